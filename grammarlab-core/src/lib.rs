//! # grammarlab-core
//!
//! Drives a grammar through a five-stage workflow: check the grammar, generate
//! a parser for a target runtime, compile it, and run it on an input text.
//!
//! Layout
//!
//!   source     Position model: sources, spans, line/column conversion
//!   marks      Marked sources and their back-mapping to originals
//!   diagnosis  Diagnoses and stage errors
//!   grammar    Grammar projects and rule tables
//!   runtime    Runtime descriptors and workspace/generator settings
//!   process    Child-process harness with cancellation
//!   protocol   Generated-parser output protocol (stdout tags, stderr errors)
//!   stages     One processor per stage transition
//!   workflow   The immutable state chain and the driver that extends it
//!
//! External tools never fail the workflow by themselves: everything they
//! report, including a failure to start, ends up as diagnoses on the state of
//! the stage that ran them. Only cancellation aborts a run.

pub mod diagnosis;
pub mod grammar;
pub mod marks;
pub mod process;
pub mod protocol;
pub mod runtime;
pub mod source;
pub mod stages;
pub mod workflow;

pub use diagnosis::{Cancelled, Diagnosis, DiagnosisKind, Severity, StageError};
pub use grammar::{GrammarProject, RuleTable};
pub use process::CancellationToken;
pub use protocol::{EventSender, ParseEvent};
pub use runtime::{GeneratorSettings, PredictionMode, RuntimeDescriptor, WorkspaceSettings};
pub use source::{LineColumnTextSpan, Position, Source, TextSpan};
pub use workflow::{Workflow, WorkflowBuilder, WorkflowStage, WorkflowState};
