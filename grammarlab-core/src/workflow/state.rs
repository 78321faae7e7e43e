//! Immutable workflow state chain
//!
//! The pipeline is a closed set of stages, so a state stores its payload as one
//! variant of [`Artifacts`] next to a link to its predecessor. Typed access goes
//! through [`StateRef<T>`]: a state for stage `T` can only be derived from a
//! `StateRef<T::Previous>`, which makes an out-of-order chain unrepresentable.
//!
//! `has_errors` is folded at construction time from the predecessor, so asking
//! any node is O(1) and failure can never be lost moving forward.

use super::WorkflowStage;
use crate::diagnosis::{Diagnosis, DiagnosisKind, StageError};
use crate::grammar::{GrammarProject, RuleTable};
use crate::marks::SourceWithMarks;
use crate::source::{Source, TextSpan};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct InputArtifacts {
    pub project: GrammarProject,
}

#[derive(Debug, Clone, Default)]
pub struct GrammarCheckedArtifacts {
    pub grammar_name: String,
    /// Parser rules in declaration order
    pub parser_rules: Vec<String>,
    pub lexer_rules: Vec<String>,
    /// Embedded action spans, sorted per source
    pub fragments: Vec<TextSpan>,
}

#[derive(Debug, Clone, Default)]
pub struct ParserGeneratedArtifacts {
    pub runtime: String,
    pub working_dir: PathBuf,
    pub generated_files: Vec<PathBuf>,
    /// Grammar texts as they were handed to the generator
    pub marked_sources: Vec<SourceWithMarks>,
}

#[derive(Debug, Clone, Default)]
pub struct ParserCompiledArtifacts {
    pub runtime: String,
    pub working_dir: PathBuf,
    pub rules: RuleTable,
    pub entry_point: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct TextParsedArtifacts {
    pub text: Option<Arc<Source>>,
    pub root: Option<String>,
    pub lexer_time: Option<Duration>,
    pub parser_time: Option<Duration>,
    pub tokens: Option<String>,
    pub tree: Option<String>,
}

/// Stage payload of a [`WorkflowState`]
#[derive(Debug, Clone)]
pub enum Artifacts {
    Input(InputArtifacts),
    GrammarChecked(GrammarCheckedArtifacts),
    ParserGenerated(ParserGeneratedArtifacts),
    ParserCompiled(ParserCompiledArtifacts),
    TextParsed(TextParsedArtifacts),
}

impl Artifacts {
    pub fn stage(&self) -> WorkflowStage {
        match self {
            Artifacts::Input(_) => WorkflowStage::Input,
            Artifacts::GrammarChecked(_) => WorkflowStage::GrammarChecked,
            Artifacts::ParserGenerated(_) => WorkflowStage::ParserGenerated,
            Artifacts::ParserCompiled(_) => WorkflowStage::ParserCompiled,
            Artifacts::TextParsed(_) => WorkflowStage::TextParsed,
        }
    }
}

/// Ties an artifact type to its stage
pub trait StageArtifacts: Sized {
    const STAGE: WorkflowStage;

    fn wrap(self) -> Artifacts;

    fn peek(artifacts: &Artifacts) -> Option<&Self>;
}

/// Artifacts of every stage except Input
pub trait DerivedArtifacts: StageArtifacts {
    type Previous: StageArtifacts;
}

macro_rules! stage_artifacts {
    ($ty:ident, $variant:ident) => {
        impl StageArtifacts for $ty {
            const STAGE: WorkflowStage = WorkflowStage::$variant;

            fn wrap(self) -> Artifacts {
                Artifacts::$variant(self)
            }

            fn peek(artifacts: &Artifacts) -> Option<&Self> {
                match artifacts {
                    Artifacts::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
    ($ty:ident, $variant:ident, after $previous:ident) => {
        stage_artifacts!($ty, $variant);

        impl DerivedArtifacts for $ty {
            type Previous = $previous;
        }
    };
}

stage_artifacts!(InputArtifacts, Input);
stage_artifacts!(GrammarCheckedArtifacts, GrammarChecked, after InputArtifacts);
stage_artifacts!(ParserGeneratedArtifacts, ParserGenerated, after GrammarCheckedArtifacts);
stage_artifacts!(ParserCompiledArtifacts, ParserCompiled, after ParserGeneratedArtifacts);
stage_artifacts!(TextParsedArtifacts, TextParsed, after ParserCompiledArtifacts);

/// What a stage transition collected besides its artifacts
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub diagnoses: Vec<Diagnosis>,
    pub exception: Option<StageError>,
    pub command: Option<String>,
}

impl StageOutcome {
    pub fn push(&mut self, diagnosis: Diagnosis) {
        self.diagnoses.push(diagnosis);
    }

    /// Record `error` as the stage exception and as an error diagnosis.
    pub fn fail(&mut self, stage: WorkflowStage, error: StageError, kind: DiagnosisKind) {
        self.diagnoses
            .push(Diagnosis::error(error.to_string(), stage).with_kind(kind));
        self.exception = Some(error);
    }
}

/// One immutable node of the workflow chain
#[derive(Debug)]
pub struct WorkflowState {
    artifacts: Artifacts,
    previous: Option<Arc<WorkflowState>>,
    diagnoses: Vec<Diagnosis>,
    exception: Option<StageError>,
    command: Option<String>,
    has_errors: bool,
}

impl WorkflowState {
    /// Start a chain.
    pub fn input(project: GrammarProject) -> StateRef<InputArtifacts> {
        StateRef::wrap(Arc::new(WorkflowState {
            artifacts: Artifacts::Input(InputArtifacts { project }),
            previous: None,
            diagnoses: Vec::new(),
            exception: None,
            command: None,
            has_errors: false,
        }))
    }

    /// Append a state for stage `T` after `previous`.
    pub fn derive<T: DerivedArtifacts>(
        previous: &StateRef<T::Previous>,
        artifacts: T,
        outcome: StageOutcome,
    ) -> StateRef<T> {
        let previous = Arc::clone(previous.state());
        let has_errors = previous.has_errors
            || outcome.exception.is_some()
            || outcome.diagnoses.iter().any(Diagnosis::is_error);
        StateRef::wrap(Arc::new(WorkflowState {
            artifacts: artifacts.wrap(),
            previous: Some(previous),
            diagnoses: outcome.diagnoses,
            exception: outcome.exception,
            command: outcome.command,
            has_errors,
        }))
    }

    pub fn stage(&self) -> WorkflowStage {
        self.artifacts.stage()
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn previous(&self) -> Option<&Arc<WorkflowState>> {
        self.previous.as_ref()
    }

    /// Diagnoses reported by this stage only.
    pub fn diagnoses(&self) -> &[Diagnosis] {
        &self.diagnoses
    }

    pub fn exception(&self) -> Option<&StageError> {
        self.exception.as_ref()
    }

    /// Reproducible command line of the tool this stage ran.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Sticky failure flag: this stage or any ancestor failed.
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    /// This node followed by its predecessors, newest first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Artifacts of the nearest node of stage `T`, searching from this node.
    pub fn get<T: StageArtifacts>(&self) -> Option<&T> {
        self.ancestors().find_map(|state| T::peek(&state.artifacts))
    }

    /// Handle to the nearest node of stage `T`, searching from this node.
    pub fn find_state<T: StageArtifacts>(self: &Arc<Self>) -> Option<StateRef<T>> {
        let mut current = Some(self);
        while let Some(state) = current {
            if T::peek(&state.artifacts).is_some() {
                return Some(StateRef::wrap(Arc::clone(state)));
            }
            current = state.previous.as_ref();
        }
        None
    }

    /// The node of `stage` in this chain, to resume the workflow from.
    pub fn rollback(self: &Arc<Self>, stage: WorkflowStage) -> Option<Arc<WorkflowState>> {
        let mut current = Some(self);
        while let Some(state) = current {
            if state.stage() == stage {
                return Some(Arc::clone(state));
            }
            current = state.previous.as_ref();
        }
        None
    }

    /// Diagnoses of the whole chain, oldest stage first.
    pub fn all_diagnoses(&self) -> Vec<&Diagnosis> {
        let mut chain: Vec<&WorkflowState> = self.ancestors().collect();
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|state| state.diagnoses.iter())
            .collect()
    }
}

/// Iterator over a state and its predecessors
pub struct Ancestors<'a> {
    next: Option<&'a WorkflowState>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a WorkflowState;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.previous.as_deref();
        Some(current)
    }
}

/// A workflow state known to hold artifacts of stage `T`
pub struct StateRef<T> {
    state: Arc<WorkflowState>,
    _stage: PhantomData<fn() -> T>,
}

impl<T: StageArtifacts> StateRef<T> {
    fn wrap(state: Arc<WorkflowState>) -> Self {
        Self {
            state,
            _stage: PhantomData,
        }
    }

    /// Recover a typed handle from an untyped state.
    pub fn from_state(state: Arc<WorkflowState>) -> Option<Self> {
        T::peek(&state.artifacts)?;
        Some(Self::wrap(state))
    }

    pub fn artifacts(&self) -> &T {
        match T::peek(&self.state.artifacts) {
            Some(artifacts) => artifacts,
            None => unreachable!("state reference does not match stage {}", T::STAGE),
        }
    }

    pub fn state(&self) -> &Arc<WorkflowState> {
        &self.state
    }

    pub fn into_state(self) -> Arc<WorkflowState> {
        self.state
    }

    pub fn has_errors(&self) -> bool {
        self.state.has_errors
    }

    /// Artifacts of an earlier stage of this chain.
    pub fn get<U: StageArtifacts>(&self) -> Option<&U> {
        self.state.get::<U>()
    }
}

impl<T> Clone for StateRef<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            _stage: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for StateRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateRef").field(&self.state.stage()).finish()
    }
}
