use super::state::{
    GrammarCheckedArtifacts, InputArtifacts, ParserCompiledArtifacts, ParserGeneratedArtifacts,
    StageArtifacts, StateRef, WorkflowState,
};
use super::WorkflowStage;
use crate::diagnosis::Cancelled;
use crate::grammar::GrammarProject;
use crate::process::CancellationToken;
use crate::protocol::EventSender;
use crate::runtime::{GeneratorSettings, PredictionMode, RuntimeDescriptor, WorkspaceSettings};
use crate::stages::check::{check_grammar, DeclaredRulesChecker, GrammarChecker};
use crate::stages::compile::{compile_parser, CompileRequest};
use crate::stages::generate::{generate_parser, GenerateRequest};
use crate::stages::parse::{parse_text, ParseParams, ParseRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Drives a grammar project through the stages of one runtime
pub struct Workflow {
    project: GrammarProject,
    runtime: RuntimeDescriptor,
    workspace: WorkspaceSettings,
    generator: GeneratorSettings,
    checker: Arc<dyn GrammarChecker>,
    params: ParseParams,
    end_stage: WorkflowStage,
}

impl Workflow {
    pub fn builder(project: GrammarProject, runtime: RuntimeDescriptor) -> WorkflowBuilder {
        WorkflowBuilder::new(project, runtime)
    }

    pub fn runtime(&self) -> &RuntimeDescriptor {
        &self.runtime
    }

    pub fn end_stage(&self) -> WorkflowStage {
        self.end_stage
    }

    /// Run from a fresh input state.
    ///
    /// Stops after `end_stage` or at the first state with errors, whichever
    /// comes first. The returned state is the last one produced.
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        events: Option<EventSender>,
    ) -> Result<Arc<WorkflowState>, Cancelled> {
        let input = WorkflowState::input(self.project.clone());
        self.resume(input.into_state(), cancel, events).await
    }

    /// Continue an existing chain, e.g. one returned by
    /// [`WorkflowState::rollback`] after the input text changed.
    pub async fn resume(
        &self,
        mut state: Arc<WorkflowState>,
        cancel: &CancellationToken,
        events: Option<EventSender>,
    ) -> Result<Arc<WorkflowState>, Cancelled> {
        while !state.has_errors() && state.stage() < self.end_stage {
            debug!(from = %state.stage(), "advancing");
            state = self.step(&state, cancel, events.as_ref()).await?;
        }
        info!(
            stage = %state.stage(),
            has_errors = state.has_errors(),
            "workflow stopped"
        );
        Ok(state)
    }

    async fn step(
        &self,
        state: &Arc<WorkflowState>,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<Arc<WorkflowState>, Cancelled> {
        let next = match state.stage() {
            WorkflowStage::Input => {
                let input = typed::<InputArtifacts>(state);
                check_grammar(&input, self.checker.as_ref(), cancel, events)?.into_state()
            }
            WorkflowStage::GrammarChecked => {
                let checked = typed::<GrammarCheckedArtifacts>(state);
                let request = GenerateRequest {
                    runtime: &self.runtime,
                    generator: &self.generator,
                    workspace: &self.workspace,
                };
                generate_parser(&checked, &request, cancel, events)
                    .await?
                    .into_state()
            }
            WorkflowStage::ParserGenerated => {
                let generated = typed::<ParserGeneratedArtifacts>(state);
                let request = CompileRequest {
                    runtime: &self.runtime,
                    workspace: &self.workspace,
                };
                compile_parser(&generated, &request, cancel, events)
                    .await?
                    .into_state()
            }
            WorkflowStage::ParserCompiled => {
                let compiled = typed::<ParserCompiledArtifacts>(state);
                let request = ParseRequest {
                    runtime: &self.runtime,
                    workspace: &self.workspace,
                    params: &self.params,
                };
                parse_text(&compiled, &request, cancel, events)
                    .await?
                    .into_state()
            }
            WorkflowStage::TextParsed => Arc::clone(state),
        };
        Ok(next)
    }
}

fn typed<T: StageArtifacts>(state: &Arc<WorkflowState>) -> StateRef<T> {
    match StateRef::from_state(Arc::clone(state)) {
        Some(typed) => typed,
        None => unreachable!("state at {} does not hold {} artifacts", state.stage(), T::STAGE),
    }
}

pub struct WorkflowBuilder {
    project: GrammarProject,
    runtime: RuntimeDescriptor,
    workspace: WorkspaceSettings,
    generator: GeneratorSettings,
    checker: Arc<dyn GrammarChecker>,
    params: ParseParams,
    end_stage: WorkflowStage,
}

impl WorkflowBuilder {
    pub fn new(project: GrammarProject, runtime: RuntimeDescriptor) -> Self {
        Self {
            project,
            runtime,
            workspace: WorkspaceSettings::default(),
            generator: GeneratorSettings::default(),
            checker: Arc::new(DeclaredRulesChecker),
            params: ParseParams::default(),
            end_stage: WorkflowStage::TextParsed,
        }
    }

    pub fn workspace(mut self, workspace: WorkspaceSettings) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn generator(mut self, generator: GeneratorSettings) -> Self {
        self.generator = generator;
        self
    }

    pub fn checker(mut self, checker: Arc<dyn GrammarChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn text(mut self, path: impl Into<PathBuf>) -> Self {
        self.params.text_path = Some(path.into());
        self
    }

    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.params.root = Some(root.into());
        self
    }

    pub fn tokenize_only(mut self, tokenize_only: bool) -> Self {
        self.params.tokenize_only = tokenize_only;
        self
    }

    pub fn prediction_mode(mut self, mode: PredictionMode) -> Self {
        self.params.prediction_mode = mode;
        self
    }

    pub fn end_stage(mut self, stage: WorkflowStage) -> Self {
        self.end_stage = stage;
        self
    }

    pub fn build(self) -> Workflow {
        Workflow {
            project: self.project,
            runtime: self.runtime,
            workspace: self.workspace,
            generator: self.generator,
            checker: self.checker,
            params: self.params,
            end_stage: self.end_stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ExecutableKind, IgnoredLines};
    use crate::source::Source;
    use std::collections::BTreeMap;

    fn runtime() -> RuntimeDescriptor {
        RuntimeDescriptor {
            id: "test".into(),
            name: "Test".into(),
            executable: ExecutableKind::Hosted,
            tool: Some("true".into()),
            main_file: "main".into(),
            environment: BTreeMap::new(),
            ignored_lines: IgnoredLines::default(),
            arguments: Vec::new(),
            language: "Test".into(),
            extensions: Vec::new(),
            comment_start: "/*".into(),
            comment_end: "*/".into(),
            entry_template: None,
            error_pattern: None,
            compiler: None,
        }
    }

    #[tokio::test]
    async fn test_stops_at_end_stage() {
        let project = GrammarProject::from_sources(vec![Source::shared(
            "Expr.g4",
            "grammar Expr;\nexpr : ID ;\nID : [a-z]+ ;\n",
        )]);
        let workflow = Workflow::builder(project, runtime())
            .end_stage(WorkflowStage::GrammarChecked)
            .build();
        let state = workflow
            .process(&CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(state.stage(), WorkflowStage::GrammarChecked);
        assert!(!state.has_errors());
        assert_eq!(
            state.get::<GrammarCheckedArtifacts>().unwrap().parser_rules,
            vec!["expr"]
        );
    }

    #[tokio::test]
    async fn test_stops_at_first_failed_stage() {
        let project = GrammarProject::from_sources(vec![Source::shared("Bad.g4", "a : 'x' ;\n")]);
        let workflow = Workflow::builder(project, runtime()).build();
        let state = workflow
            .process(&CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(state.stage(), WorkflowStage::GrammarChecked);
        assert!(state.has_errors());
    }

    #[tokio::test]
    async fn test_cancelled_workflow_produces_no_state() {
        let project = GrammarProject::from_sources(vec![]);
        let workflow = Workflow::builder(project, runtime()).build();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(workflow.process(&cancel, None).await.unwrap_err(), Cancelled);
    }
}
