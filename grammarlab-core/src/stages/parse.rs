//! ParserCompiled -> TextParsed
//!
//! Launches the generated parser on the input text. The child receives the
//! runtime's preamble arguments followed by four positional arguments:
//!
//! ```text
//! <root rule> <absolute input path> <tokenize only: true|false> <prediction mode>
//! ```
//!
//! and reports back through the tagged stdout protocol and `line L:C` errors on
//! stderr (see [`crate::protocol`]).

use super::{absolute, file_name, record_exit, run_tool};
use crate::diagnosis::{Cancelled, Diagnosis, DiagnosisKind, StageError};
use crate::grammar::RuleEntry;
use crate::process::{CancellationToken, ProcessSpec};
use crate::protocol::{notify, EventSender, ParseEvent, TextOutput};
use crate::runtime::{PredictionMode, RuntimeDescriptor, TemplateContext, WorkspaceSettings};
use crate::source::Source;
use crate::workflow::{
    GrammarCheckedArtifacts, ParserCompiledArtifacts, StageOutcome, StateRef, TextParsedArtifacts,
    WorkflowStage, WorkflowState,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const STAGE: WorkflowStage = WorkflowStage::TextParsed;

/// What to parse and how
#[derive(Debug, Clone, Default)]
pub struct ParseParams {
    pub text_path: Option<PathBuf>,
    /// Entry rule; the first declared parser rule when unset
    pub root: Option<String>,
    pub tokenize_only: bool,
    pub prediction_mode: PredictionMode,
}

pub struct ParseRequest<'a> {
    pub runtime: &'a RuntimeDescriptor,
    pub workspace: &'a WorkspaceSettings,
    pub params: &'a ParseParams,
}

pub async fn parse_text(
    compiled: &StateRef<ParserCompiledArtifacts>,
    request: &ParseRequest<'_>,
    cancel: &CancellationToken,
    events: Option<&EventSender>,
) -> Result<StateRef<TextParsedArtifacts>, Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    let params = request.params;
    let mut outcome = StageOutcome::default();

    let Some(text_path) = &params.text_path else {
        let diagnosis = Diagnosis::error("File to parse is not specified", STAGE)
            .with_kind(DiagnosisKind::ConfigurationError);
        notify(events, ParseEvent::Diagnosis(diagnosis.clone()));
        outcome.push(diagnosis);
        return Ok(WorkflowState::derive(
            compiled,
            TextParsedArtifacts::default(),
            outcome,
        ));
    };

    let prepared = read_text(text_path).and_then(|text| {
        let root = compiled
            .artifacts()
            .rules
            .resolve(params.root.as_deref())
            .map_err(|err| StageError::Configuration(err.to_string()))?;
        let grammar = compiled
            .get::<GrammarCheckedArtifacts>()
            .map(|checked| checked.grammar_name.as_str())
            .unwrap_or_default();
        let spec = command(compiled.artifacts(), grammar, request, &root, text_path)?;
        Ok((text, root, spec))
    });
    let (text, root, spec) = match prepared {
        Ok(prepared) => prepared,
        Err(error) => {
            outcome.fail(STAGE, error, DiagnosisKind::ConfigurationError);
            return Ok(WorkflowState::derive(
                compiled,
                TextParsedArtifacts::default(),
                outcome,
            ));
        }
    };

    let mut output = TextOutput::new(
        Some(text),
        request.runtime.error_line_parser(),
        events.cloned(),
    );
    let status = run_tool(
        STAGE,
        &spec,
        &request.runtime.ignored_lines,
        &mut output,
        cancel,
        &mut outcome,
    )
    .await?;

    let (mut artifacts, diagnoses) = output.into_parts();
    artifacts.root = Some(root.name);
    outcome.diagnoses.extend(diagnoses);

    if let Some(status) = status {
        record_exit(STAGE, &spec.program, status, &mut outcome, events);
        info!(
            root = artifacts.root.as_deref().unwrap_or_default(),
            diagnoses = outcome.diagnoses.len(),
            "text parsed"
        );
    }

    Ok(WorkflowState::derive(compiled, artifacts, outcome))
}

fn read_text(path: &Path) -> Result<Arc<Source>, StageError> {
    let text = fs::read_to_string(path).map_err(|err| {
        StageError::Configuration(format!(
            "Cannot read file to parse '{}': {}",
            path.display(),
            err
        ))
    })?;
    Ok(Source::shared(file_name(path), text))
}

fn command(
    compiled: &ParserCompiledArtifacts,
    grammar: &str,
    request: &ParseRequest<'_>,
    root: &RuleEntry,
    text_path: &Path,
) -> Result<ProcessSpec, StageError> {
    let runtime = request.runtime;
    let working_dir = &compiled.working_dir;
    let runtime_dir = request.workspace.runtime_directory(&runtime.id);
    let context = TemplateContext {
        main_file: &runtime.main_file,
        working_dir,
        runtime_dir: &runtime_dir,
        grammar,
    };

    let tokenize_only = if request.params.tokenize_only {
        "true"
    } else {
        "false"
    };
    Ok(ProcessSpec::new(runtime.program(working_dir)?, working_dir)
        .args(context.expand_all(&runtime.arguments))
        .arg(root.name.as_str())
        .arg(absolute(text_path)?.display().to_string())
        .arg(tokenize_only)
        .arg(request.params.prediction_mode.as_str())
        .env(&runtime.environment))
}
