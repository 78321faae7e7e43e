//! ParserGenerated -> ParserCompiled
//!
//! Removes fragment marks from the generated files and instantiates the
//! runtime's entry-point template next to them, then runs the runtime's
//! compiler if it has one. Runtimes without a build step (interpreted targets)
//! complete this stage without spawning.
//!
//! Compiler errors inside an action fragment are reported on the grammar;
//! everything else points into the generated file.

use super::{file_name, record_exit, run_tool, runtime_files};
use crate::diagnosis::{Cancelled, Diagnosis, DiagnosisKind, Severity, StageError};
use crate::grammar::RuleTable;
use crate::marks::FragmentMapper;
use crate::process::{CancellationToken, LineSink, ProcessSpec, StreamKind};
use crate::protocol::error_line::{ErrorLineParser, PatternErrorLine};
use crate::protocol::{notify, EventSender, ParseEvent};
use crate::runtime::{CompilerSpec, RuntimeDescriptor, TemplateContext, WorkspaceSettings};
use crate::source::{Source, TextSpan, START_COLUMN};
use crate::workflow::{
    GrammarCheckedArtifacts, ParserCompiledArtifacts, ParserGeneratedArtifacts, StageOutcome,
    StateRef, WorkflowStage, WorkflowState,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const STAGE: WorkflowStage = WorkflowStage::ParserCompiled;

pub const GRAMMAR_NAME_PLACEHOLDER: &str = "__TemplateGrammarName__";
pub const LEXER_NAME_PLACEHOLDER: &str = "__TemplateLexerName__";
pub const PARSER_NAME_PLACEHOLDER: &str = "__TemplateParserName__";

/// Expands to one argument per generated source file
pub const FILES_PLACEHOLDER: &str = "{files}";

pub struct CompileRequest<'a> {
    pub runtime: &'a RuntimeDescriptor,
    pub workspace: &'a WorkspaceSettings,
}

pub async fn compile_parser(
    generated: &StateRef<ParserGeneratedArtifacts>,
    request: &CompileRequest<'_>,
    cancel: &CancellationToken,
    events: Option<&EventSender>,
) -> Result<StateRef<ParserCompiledArtifacts>, Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    let runtime = request.runtime;
    let working_dir = generated.artifacts().working_dir.clone();
    let checked = generated
        .get::<GrammarCheckedArtifacts>()
        .cloned()
        .unwrap_or_default();
    let mut artifacts = ParserCompiledArtifacts {
        runtime: runtime.id.clone(),
        working_dir: working_dir.clone(),
        rules: RuleTable::from_rules(checked.parser_rules.iter().cloned()),
        entry_point: None,
    };
    let mut outcome = StageOutcome::default();

    let mappers = match strip_fragment_marks(generated.artifacts(), runtime, &checked) {
        Ok(mappers) => mappers,
        Err(error) => {
            outcome.fail(STAGE, error, DiagnosisKind::ConfigurationError);
            return Ok(WorkflowState::derive(generated, artifacts, outcome));
        }
    };

    if let Some(template) = &runtime.entry_template {
        let template = request
            .workspace
            .runtime_directory(&runtime.id)
            .join(template);
        match instantiate_template(&template, &working_dir, &checked.grammar_name) {
            Ok(path) => artifacts.entry_point = Some(path),
            Err(error) => {
                outcome.fail(STAGE, error, DiagnosisKind::ConfigurationError);
                return Ok(WorkflowState::derive(generated, artifacts, outcome));
            }
        }
    }

    let Some(compiler) = &runtime.compiler else {
        debug!(runtime = %runtime.id, "no compile step");
        return Ok(WorkflowState::derive(generated, artifacts, outcome));
    };

    let spec = match command(compiler, runtime, request.workspace, &working_dir, &checked) {
        Ok(spec) => spec.env(&runtime.environment),
        Err(error) => {
            outcome.fail(STAGE, error, DiagnosisKind::ConfigurationError);
            return Ok(WorkflowState::derive(generated, artifacts, outcome));
        }
    };

    let mut sink = CompilerOutput {
        working_dir: &working_dir,
        parser: compiler.error_line_parser(),
        mappers: &mappers,
        sources: HashMap::new(),
        diagnoses: Vec::new(),
        events,
    };
    let status = run_tool(
        STAGE,
        &spec,
        &compiler.ignored_lines,
        &mut sink,
        cancel,
        &mut outcome,
    )
    .await?;
    let diagnoses = sink.diagnoses;
    outcome.diagnoses.extend(diagnoses);

    if let Some(status) = status {
        record_exit(STAGE, &spec.program, status, &mut outcome, events);
        info!(runtime = %runtime.id, %status, "parser compiled");
    }

    Ok(WorkflowState::derive(generated, artifacts, outcome))
}

/// Rewrite every generated file that carries fragment marks without them.
///
/// Returns the fragment mappers keyed by file name.
fn strip_fragment_marks(
    generated: &ParserGeneratedArtifacts,
    runtime: &RuntimeDescriptor,
    checked: &GrammarCheckedArtifacts,
) -> Result<HashMap<String, FragmentMapper>, StageError> {
    let mut mappers = HashMap::new();
    if checked.fragments.is_empty() {
        return Ok(mappers);
    }

    let syntax = runtime.mark_syntax();
    for path in &generated.generated_files {
        let name = file_name(path);
        let text = fs::read_to_string(path)?;
        let mapper = FragmentMapper::strip(name.as_str(), &text, &syntax, &checked.fragments)
            .map_err(|err| StageError::Internal(format!("{}: {}", name, err)))?;
        if mapper.fragments().is_empty() {
            continue;
        }
        fs::write(path, mapper.source().text())?;
        debug!(file = %name, fragments = mapper.fragments().len(), "fragment marks removed");
        mappers.insert(name, mapper);
    }
    Ok(mappers)
}

/// Copy an entry-point template into `working_dir`, filling in the recognizer
/// names of `grammar`. Placeholders are replaced in the file name too.
pub fn instantiate_template(
    template: &Path,
    working_dir: &Path,
    grammar: &str,
) -> Result<PathBuf, StageError> {
    let text = fs::read_to_string(template).map_err(|err| {
        StageError::Configuration(format!(
            "Cannot read entry template '{}': {}",
            template.display(),
            err
        ))
    })?;
    let name = substitute_names(&file_name(template), grammar);
    let target = working_dir.join(name);
    fs::write(&target, substitute_names(&text, grammar))?;
    debug!(target = %target.display(), "entry point written");
    Ok(target)
}

fn substitute_names(text: &str, grammar: &str) -> String {
    text.replace(LEXER_NAME_PLACEHOLDER, &format!("{}Lexer", grammar))
        .replace(PARSER_NAME_PLACEHOLDER, &format!("{}Parser", grammar))
        .replace(GRAMMAR_NAME_PLACEHOLDER, grammar)
}

fn command(
    compiler: &CompilerSpec,
    runtime: &RuntimeDescriptor,
    workspace: &WorkspaceSettings,
    working_dir: &Path,
    checked: &GrammarCheckedArtifacts,
) -> Result<ProcessSpec, StageError> {
    let runtime_dir = workspace.runtime_directory(&runtime.id);
    let context = TemplateContext {
        main_file: &runtime.main_file,
        working_dir,
        runtime_dir: &runtime_dir,
        grammar: &checked.grammar_name,
    };

    let mut args = Vec::with_capacity(compiler.arguments.len());
    for argument in &compiler.arguments {
        if argument == FILES_PLACEHOLDER {
            args.extend(runtime_files(working_dir, runtime)?.iter().map(|p| file_name(p)));
        } else {
            args.push(context.expand(argument));
        }
    }
    Ok(ProcessSpec::new(&compiler.tool, working_dir).args(args))
}

/// Compiler messages point into generated files; they are attached to those
/// files as read from the working directory.
struct CompilerOutput<'a> {
    working_dir: &'a Path,
    parser: PatternErrorLine,
    mappers: &'a HashMap<String, FragmentMapper>,
    sources: HashMap<String, Option<Arc<Source>>>,
    diagnoses: Vec<Diagnosis>,
    events: Option<&'a EventSender>,
}

impl CompilerOutput<'_> {
    fn interpret(&mut self, line: &str) -> Diagnosis {
        let Some(reported) = self.parser.parse_line(line) else {
            return Diagnosis::unlocated(line, Severity::Warning, STAGE);
        };

        let span = reported.file.as_deref().and_then(|file| {
            let name = file_name(Path::new(file));
            let source = self.source(&name)?;
            let column = reported.column.unwrap_or(START_COLUMN);
            let position = source.checked_position(reported.line?, column)?;
            let in_grammar = self
                .mappers
                .get(&name)
                .and_then(|mapper| mapper.map(position));
            Some(in_grammar.unwrap_or_else(|| TextSpan::new(position, 0, source)))
        });

        match span {
            Some(span) => Diagnosis::located(span, reported.message, reported.severity, STAGE),
            None => Diagnosis::unlocated(reported.message, reported.severity, STAGE)
                .with_kind(DiagnosisKind::ChildProcessDiagnostic),
        }
    }

    fn source(&mut self, name: &str) -> Option<Arc<Source>> {
        if let Some(mapper) = self.mappers.get(name) {
            return Some(Arc::clone(mapper.source()));
        }
        let working_dir = self.working_dir;
        self.sources
            .entry(name.to_string())
            .or_insert_with(|| {
                fs::read_to_string(working_dir.join(name))
                    .ok()
                    .map(|text| Source::shared(name, text))
            })
            .clone()
    }
}

impl LineSink for CompilerOutput<'_> {
    fn on_line(&mut self, _stream: StreamKind, line: String) {
        let diagnosis = self.interpret(&line);
        notify(self.events, ParseEvent::Diagnosis(diagnosis.clone()));
        self.diagnoses.push(diagnosis);
    }
}
