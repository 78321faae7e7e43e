//! GrammarChecked -> ParserGenerated
//!
//! Writes the grammar files, with action fragments wrapped in marks, into the
//! working directory of the (grammar, runtime) pair and runs the parser
//! generator there. Generator reports refer to the marked files and are mapped
//! back to the original grammar sources.

use super::{absolute, file_name, record_exit, run_tool, runtime_files};
use crate::diagnosis::{Cancelled, Diagnosis, DiagnosisKind, StageError};
use crate::marks::{mark_fragments, SourceWithMarks};
use crate::process::{CancellationToken, LineSink, ProcessSpec, StreamKind};
use crate::protocol::error_line::{ErrorLineParser, PatternErrorLine};
use crate::protocol::{notify, EventSender, ParseEvent};
use crate::runtime::{GeneratorSettings, RuntimeDescriptor, WorkspaceSettings};
use crate::workflow::{
    GrammarCheckedArtifacts, InputArtifacts, ParserGeneratedArtifacts, StageOutcome, StateRef,
    WorkflowStage, WorkflowState,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const STAGE: WorkflowStage = WorkflowStage::ParserGenerated;

static PACKAGE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z\d_]*(?:\.[A-Za-z_][A-Za-z\d_]*)*$")
        .expect("package name pattern is valid")
});

pub struct GenerateRequest<'a> {
    pub runtime: &'a RuntimeDescriptor,
    pub generator: &'a GeneratorSettings,
    pub workspace: &'a WorkspaceSettings,
}

pub async fn generate_parser(
    checked: &StateRef<GrammarCheckedArtifacts>,
    request: &GenerateRequest<'_>,
    cancel: &CancellationToken,
    events: Option<&EventSender>,
) -> Result<StateRef<ParserGeneratedArtifacts>, Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    let runtime = request.runtime;
    let grammar_name = &checked.artifacts().grammar_name;
    let mut artifacts = ParserGeneratedArtifacts {
        runtime: runtime.id.clone(),
        working_dir: request
            .workspace
            .working_directory(grammar_name, &runtime.id),
        ..ParserGeneratedArtifacts::default()
    };
    let mut outcome = StageOutcome::default();

    if let Err(error) = validate(request.generator) {
        outcome.fail(STAGE, error, DiagnosisKind::ConfigurationError);
        return Ok(WorkflowState::derive(checked, artifacts, outcome));
    }

    match prepare(checked, runtime, &artifacts.working_dir) {
        Ok(marked) => artifacts.marked_sources = marked,
        Err(error) => {
            outcome.fail(STAGE, error, DiagnosisKind::ConfigurationError);
            return Ok(WorkflowState::derive(checked, artifacts, outcome));
        }
    }

    let spec = match command(request, &artifacts) {
        Ok(spec) => spec,
        Err(error) => {
            outcome.fail(STAGE, error, DiagnosisKind::ConfigurationError);
            return Ok(WorkflowState::derive(checked, artifacts, outcome));
        }
    };

    let mut sink = GeneratorOutput {
        marked: &artifacts.marked_sources,
        parser: PatternErrorLine::antlr_tool(),
        diagnoses: Vec::new(),
        events,
    };
    let status = run_tool(
        STAGE,
        &spec,
        &request.generator.ignored_lines,
        &mut sink,
        cancel,
        &mut outcome,
    )
    .await?;
    let diagnoses = sink.diagnoses;
    outcome.diagnoses.extend(diagnoses);

    if let Some(status) = status {
        record_exit(STAGE, &spec.program, status, &mut outcome, events);
        match runtime_files(&artifacts.working_dir, runtime) {
            Ok(files) => artifacts.generated_files = files,
            Err(err) => outcome.fail(STAGE, err.into(), DiagnosisKind::AbnormalExit),
        }
        info!(
            grammar = %grammar_name,
            runtime = %runtime.id,
            files = artifacts.generated_files.len(),
            "parser generated"
        );
    }

    Ok(WorkflowState::derive(checked, artifacts, outcome))
}

fn validate(generator: &GeneratorSettings) -> Result<(), StageError> {
    match &generator.package {
        Some(package) if !PACKAGE_NAME.is_match(package) => Err(StageError::Configuration(
            format!("Incorrect package name '{}'", package),
        )),
        _ => Ok(()),
    }
}

/// Recreate the working directory and write the marked grammar files into it.
fn prepare(
    checked: &StateRef<GrammarCheckedArtifacts>,
    runtime: &RuntimeDescriptor,
    working_dir: &Path,
) -> Result<Vec<SourceWithMarks>, StageError> {
    let Some(input) = checked.get::<InputArtifacts>() else {
        return Err(StageError::Internal("workflow chain has no input".into()));
    };

    if working_dir.exists() {
        fs::remove_dir_all(working_dir)?;
    }
    fs::create_dir_all(working_dir)?;

    let syntax = runtime.mark_syntax();
    let mut marked_sources = Vec::new();
    for source in input.project.sources() {
        // Numbers index the fragments of the whole grammar
        let fragments: Vec<_> = checked
            .artifacts()
            .fragments
            .iter()
            .enumerate()
            .filter(|(_, fragment)| fragment.source().name() == source.name())
            .map(|(number, fragment)| (number, fragment.clone()))
            .collect();
        let marked = mark_fragments(source, &syntax, &fragments)
            .map_err(|err| StageError::Internal(err.to_string()))?;
        let path = working_dir.join(source.name());
        debug!(path = %path.display(), marks = marked.mark_offsets().len(), "writing grammar");
        fs::write(&path, marked.source().text())?;
        marked_sources.push(marked);
    }
    Ok(marked_sources)
}

fn command(
    request: &GenerateRequest<'_>,
    artifacts: &ParserGeneratedArtifacts,
) -> Result<ProcessSpec, StageError> {
    let generator = request.generator;
    let jar = absolute(&generator.jar)?;
    let mut spec = ProcessSpec::new(&generator.tool, &artifacts.working_dir)
        .arg("-jar")
        .arg(jar.display().to_string())
        .args(["-o", "."])
        .arg(format!("-Dlanguage={}", request.runtime.language))
        .args(["-encoding", generator.encoding.as_str()])
        .arg(if generator.listener { "-listener" } else { "-no-listener" })
        .arg(if generator.visitor { "-visitor" } else { "-no-visitor" });
    if let Some(package) = &generator.package {
        spec = spec.args(["-package", package.as_str()]);
    }
    Ok(spec.args(
        artifacts
            .marked_sources
            .iter()
            .map(|marked| marked.source().name().to_string()),
    ))
}

/// Turns generator output into diagnoses on the original grammar sources
struct GeneratorOutput<'a> {
    marked: &'a [SourceWithMarks],
    parser: PatternErrorLine,
    diagnoses: Vec<Diagnosis>,
    events: Option<&'a EventSender>,
}

impl GeneratorOutput<'_> {
    fn interpret(&self, line: &str) -> Diagnosis {
        let Some(reported) = self.parser.parse_line(line) else {
            return Diagnosis::error(format!("Unknown error: {}", line), STAGE)
                .with_kind(DiagnosisKind::UnparsedOutputLine);
        };

        let located = reported.file.as_deref().and_then(|file| {
            let name = file_name(&PathBuf::from(file));
            let marked = self
                .marked
                .iter()
                .find(|marked| marked.source().name() == name)?;
            let position = marked
                .source()
                .checked_position(reported.line?, reported.column?)?;
            Some(marked.original_text_span(position, 1))
        });

        match located {
            Some(span) => Diagnosis::located(span, reported.message, reported.severity, STAGE),
            None => Diagnosis::unlocated(reported.message, reported.severity, STAGE)
                .with_kind(DiagnosisKind::ChildProcessDiagnostic),
        }
    }
}

impl LineSink for GeneratorOutput<'_> {
    fn on_line(&mut self, _stream: StreamKind, line: String) {
        let diagnosis = self.interpret(&line);
        notify(self.events, ParseEvent::Diagnosis(diagnosis.clone()));
        self.diagnoses.push(diagnosis);
    }
}
