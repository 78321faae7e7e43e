//! The five-stage grammar workflow
//!
//! ```text
//! Input -> GrammarChecked -> ParserGenerated -> ParserCompiled -> TextParsed
//! ```
//!
//! Each stage produces one immutable [`WorkflowState`] that points at the state
//! it was built from. Failure is sticky: a state reports [`WorkflowState::has_errors`]
//! if it or any ancestor failed. [`Workflow`] drives the chain until it reaches a
//! requested end stage or a state fails.

mod runner;
mod state;

pub use runner::{Workflow, WorkflowBuilder};
pub use state::{
    Ancestors, Artifacts, DerivedArtifacts, GrammarCheckedArtifacts, InputArtifacts,
    ParserCompiledArtifacts, ParserGeneratedArtifacts, StageArtifacts, StageOutcome, StateRef,
    TextParsedArtifacts, WorkflowState,
};

use std::fmt;
use std::str::FromStr;

/// One step of the pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkflowStage {
    Input,
    GrammarChecked,
    ParserGenerated,
    ParserCompiled,
    TextParsed,
}

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 5] = [
        WorkflowStage::Input,
        WorkflowStage::GrammarChecked,
        WorkflowStage::ParserGenerated,
        WorkflowStage::ParserCompiled,
        WorkflowStage::TextParsed,
    ];

    /// The stage built from this one, if any.
    pub fn next(self) -> Option<WorkflowStage> {
        match self {
            WorkflowStage::Input => Some(WorkflowStage::GrammarChecked),
            WorkflowStage::GrammarChecked => Some(WorkflowStage::ParserGenerated),
            WorkflowStage::ParserGenerated => Some(WorkflowStage::ParserCompiled),
            WorkflowStage::ParserCompiled => Some(WorkflowStage::TextParsed),
            WorkflowStage::TextParsed => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WorkflowStage::Input => "Input",
            WorkflowStage::GrammarChecked => "GrammarChecked",
            WorkflowStage::ParserGenerated => "ParserGenerated",
            WorkflowStage::ParserCompiled => "ParserCompiled",
            WorkflowStage::TextParsed => "TextParsed",
        }
    }

    /// Kebab-case name used on the command line.
    pub fn cli_name(self) -> &'static str {
        match self {
            WorkflowStage::Input => "input",
            WorkflowStage::GrammarChecked => "grammar-checked",
            WorkflowStage::ParserGenerated => "parser-generated",
            WorkflowStage::ParserCompiled => "parser-compiled",
            WorkflowStage::TextParsed => "text-parsed",
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for WorkflowStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStage::ALL
            .into_iter()
            .find(|stage| stage.name() == s || stage.cli_name() == s)
            .ok_or_else(|| format!("Unknown workflow stage '{}'", s))
    }
}
