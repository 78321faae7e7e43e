//! Diagnoses and stage errors
//!
//! A [`Diagnosis`] is one problem report: optionally located by a [`TextSpan`],
//! tagged with a [`Severity`] and the [`WorkflowStage`] that produced it. Every
//! output parser in the workflow funnels into this one type so a consumer can
//! render generation, compilation and execution failures the same way.
//!
//! [`StageError`] is the exception recorded on a workflow state when a stage
//! could not run its tool at all. [`Cancelled`] is the only error that escapes a
//! stage through `Result`.

use crate::source::TextSpan;
use crate::workflow::WorkflowStage;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;

/// Severity of a diagnosis; only errors make a state fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

/// Where a diagnosis came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosisKind {
    /// Invalid stage input, detected before any process is spawned
    ConfigurationError,
    /// The tool for the stage could not be started
    ProcessSpawnFailure,
    /// A located report parsed from the tool's error stream
    ChildProcessDiagnostic,
    /// A line the output protocol could not interpret, kept verbatim
    UnparsedOutputLine,
    /// The tool exited unsuccessfully without reporting why
    AbnormalExit,
    /// Reported by the grammar checker
    GrammarCheck,
}

impl fmt::Display for DiagnosisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosisKind::ConfigurationError => "configuration-error",
            DiagnosisKind::ProcessSpawnFailure => "process-spawn-failure",
            DiagnosisKind::ChildProcessDiagnostic => "child-process-diagnostic",
            DiagnosisKind::UnparsedOutputLine => "unparsed-output-line",
            DiagnosisKind::AbnormalExit => "abnormal-exit",
            DiagnosisKind::GrammarCheck => "grammar-check",
        };
        write!(f, "{}", name)
    }
}

/// One reported problem
///
/// Equality compares span, message, severity and stage; the kind is
/// classification only.
#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub text_span: Option<TextSpan>,
    pub message: String,
    pub severity: Severity,
    pub stage: WorkflowStage,
    pub kind: DiagnosisKind,
}

impl Diagnosis {
    pub fn located(
        text_span: TextSpan,
        message: impl Into<String>,
        severity: Severity,
        stage: WorkflowStage,
    ) -> Self {
        Self {
            text_span: Some(text_span),
            message: message.into(),
            severity,
            stage,
            kind: DiagnosisKind::ChildProcessDiagnostic,
        }
    }

    pub fn unlocated(message: impl Into<String>, severity: Severity, stage: WorkflowStage) -> Self {
        Self {
            text_span: None,
            message: message.into(),
            severity,
            stage,
            kind: DiagnosisKind::UnparsedOutputLine,
        }
    }

    pub fn error(message: impl Into<String>, stage: WorkflowStage) -> Self {
        Self::unlocated(message, Severity::Error, stage)
    }

    pub fn with_kind(mut self, kind: DiagnosisKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl PartialEq for Diagnosis {
    fn eq(&self, other: &Self) -> bool {
        self.text_span == other.text_span
            && self.message == other.message
            && self.severity == other.severity
            && self.stage == other.stage
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; {}", self.stage, self.severity)?;
        if let Some(span) = &self.text_span {
            write!(f, "; {}{}", span.source().name(), span.line_column())?;
        }
        write!(f, "; {}", self.message)
    }
}

impl Serialize for Diagnosis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let location = self.text_span.as_ref().map(|span| span.line_column());
        let mut state = serializer.serialize_struct("Diagnosis", 9)?;
        state.serialize_field("stage", &self.stage.to_string())?;
        state.serialize_field("severity", &self.severity.to_string())?;
        state.serialize_field("kind", &self.kind.to_string())?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field(
            "file",
            &location.as_ref().map(|l| l.source().name().to_string()),
        )?;
        state.serialize_field("line", &location.as_ref().map(|l| l.begin.line))?;
        state.serialize_field("column", &location.as_ref().map(|l| l.begin.column))?;
        state.serialize_field("end_line", &location.as_ref().map(|l| l.end.line))?;
        state.serialize_field("end_column", &location.as_ref().map(|l| l.end.column))?;
        state.end()
    }
}

/// True if any diagnosis is an error.
pub fn has_errors(diagnoses: &[Diagnosis]) -> bool {
    diagnoses.iter().any(Diagnosis::is_error)
}

/// Exception recorded on a state whose stage could not complete
#[derive(Debug, Clone, PartialEq)]
pub enum StageError {
    /// Stage input or settings are invalid
    Configuration(String),
    /// The stage tool could not be started
    ProcessSpawn { program: String, message: String },
    /// Reading or writing stage files failed
    Io(String),
    /// Unexpected fault inside the stage
    Internal(String),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            StageError::ProcessSpawn { program, message } => {
                write!(f, "Failed to start '{}': {}", program, message)
            }
            StageError::Io(msg) => write!(f, "I/O error: {}", msg),
            StageError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::Io(err.to_string())
    }
}

/// A stage or workflow was stopped by its cancellation token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation was cancelled")
    }
}

impl std::error::Error for Cancelled {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    #[test]
    fn test_display_unlocated() {
        let diagnosis = Diagnosis::error("File to parse is not specified", WorkflowStage::TextParsed);
        assert_eq!(
            diagnosis.to_string(),
            "TextParsed; Error; File to parse is not specified"
        );
    }

    #[test]
    fn test_display_located() {
        let source = Source::shared("input.txt", "a = 1;\nb = ;\n");
        let diagnosis = Diagnosis::located(
            TextSpan::new(11, 1, source),
            "extraneous input ';'",
            Severity::Warning,
            WorkflowStage::TextParsed,
        );
        insta::assert_snapshot!(diagnosis.to_string(), @"TextParsed; Warning; input.txt[2,5..6); extraneous input ';'");
    }

    #[test]
    fn test_equality_ignores_kind() {
        let a = Diagnosis::error("boom", WorkflowStage::ParserCompiled);
        let b = a.clone().with_kind(DiagnosisKind::AbnormalExit);
        assert_eq!(a, b);
        assert_ne!(a, Diagnosis::error("boom", WorkflowStage::ParserGenerated));
    }

    #[test]
    fn test_warnings_are_not_errors() {
        let warning = Diagnosis::unlocated("careful", Severity::Warning, WorkflowStage::ParserGenerated);
        assert!(!has_errors(&[warning.clone()]));
        assert!(has_errors(&[
            warning,
            Diagnosis::error("boom", WorkflowStage::ParserGenerated)
        ]));
    }

    #[test]
    fn test_serializes_location() {
        let source = Source::shared("input.txt", "abc\ndef");
        let diagnosis = Diagnosis::located(
            TextSpan::new(5, 2, source),
            "bad",
            Severity::Error,
            WorkflowStage::TextParsed,
        );
        let value = serde_json::to_value(&diagnosis).unwrap();
        assert_eq!(value["file"], "input.txt");
        assert_eq!(value["line"], 2);
        assert_eq!(value["column"], 2);
        assert_eq!(value["end_column"], 4);
        assert_eq!(value["kind"], "child-process-diagnostic");
    }
}
