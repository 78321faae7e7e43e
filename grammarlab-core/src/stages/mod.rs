//! Stage processors
//!
//! One module per transition of the workflow chain:
//!
//! - [`check`]: Input -> GrammarChecked (in-process, via a [`check::GrammarChecker`])
//! - [`generate`]: GrammarChecked -> ParserGenerated (runs the parser generator)
//! - [`compile`]: ParserGenerated -> ParserCompiled (runs the runtime's compiler)
//! - [`parse`]: ParserCompiled -> TextParsed (runs the generated parser)
//!
//! Every processor takes the previous state by reference and returns the new
//! state, or [`Cancelled`] if the token fired. Everything else that goes wrong is
//! recorded on the returned state.

pub mod check;
pub mod compile;
pub mod generate;
pub mod parse;

use crate::diagnosis::{has_errors, Cancelled, Diagnosis, DiagnosisKind, StageError};
use crate::process::{run_process, CancellationToken, LineSink, ProcessError, ProcessSpec};
use crate::protocol::{notify, EventSender, ParseEvent};
use crate::runtime::{IgnoredLines, RuntimeDescriptor};
use crate::workflow::{StageOutcome, WorkflowStage};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

/// Run one tool for `stage`, recording the command and any spawn failure.
///
/// Returns `Ok(None)` when the tool never produced an exit status.
pub(crate) async fn run_tool(
    stage: WorkflowStage,
    spec: &ProcessSpec,
    ignored: &IgnoredLines,
    sink: &mut dyn LineSink,
    cancel: &CancellationToken,
    outcome: &mut StageOutcome,
) -> Result<Option<ExitStatus>, Cancelled> {
    outcome.command = Some(spec.command_line());
    match run_process(spec, ignored, sink, cancel).await {
        Ok(status) => Ok(Some(status)),
        Err(ProcessError::Cancelled) => Err(Cancelled),
        Err(ProcessError::Spawn(err)) => {
            outcome.fail(
                stage,
                StageError::ProcessSpawn {
                    program: spec.program.clone(),
                    message: err.to_string(),
                },
                DiagnosisKind::ProcessSpawnFailure,
            );
            Ok(None)
        }
        Err(ProcessError::Wait(err)) => {
            outcome.fail(
                stage,
                StageError::Io(err.to_string()),
                DiagnosisKind::AbnormalExit,
            );
            Ok(None)
        }
    }
}

/// A failed exit counts as an error even if the tool printed nothing useful.
pub(crate) fn record_exit(
    stage: WorkflowStage,
    program: &str,
    status: ExitStatus,
    outcome: &mut StageOutcome,
    events: Option<&EventSender>,
) {
    if status.success() || has_errors(&outcome.diagnoses) {
        return;
    }
    let diagnosis = Diagnosis::error(format!("'{}' {}", program, status), stage)
        .with_kind(DiagnosisKind::AbnormalExit);
    notify(events, ParseEvent::Diagnosis(diagnosis.clone()));
    outcome.push(diagnosis);
}

/// Files in `dir` whose extension belongs to `runtime`, sorted by name.
pub(crate) fn runtime_files(dir: &Path, runtime: &RuntimeDescriptor) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && runtime.is_generated_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
