//! Output protocol of generated parsers
//!
//! A generated parser entry point reports its results on stdout as tagged lines:
//!
//! ```text
//! LexerTime <duration>
//! ParserTime <duration>
//! Tokens <tok1> <tok2> ... EOF
//! Tree <tree-text-with-literal-\n-for-newlines>
//! ```
//!
//! and its syntax errors on stderr as `line <L>:<C> <message>`. This module
//! holds the line interpreters for both streams and the formatters an entry
//! point uses to produce the token and tree dumps.

pub mod dump;
pub mod duration;
pub mod error_line;
pub mod span_hint;
pub mod text_output;

pub use dump::{parse_token_dump, DumpedToken, ParseTree, TokenDump, TreeDump};
pub use text_output::TextOutput;

use crate::diagnosis::Diagnosis;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;

/// Structured results a text-parsing run reports on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputTag {
    LexerTime,
    ParserTime,
    Tokens,
    Tree,
}

impl OutputTag {
    pub const ALL: [OutputTag; 4] = [
        OutputTag::LexerTime,
        OutputTag::ParserTime,
        OutputTag::Tokens,
        OutputTag::Tree,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputTag::LexerTime => "LexerTime",
            OutputTag::ParserTime => "ParserTime",
            OutputTag::Tokens => "Tokens",
            OutputTag::Tree => "Tree",
        }
    }
}

impl fmt::Display for OutputTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutputTag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or(())
    }
}

/// A live notification emitted while a stage runs
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    LexerTime(Duration),
    ParserTime(Duration),
    Tokens(String),
    Tree(String),
    Diagnosis(Diagnosis),
}

impl ParseEvent {
    /// The stdout tag this event was produced from; `None` for diagnoses.
    pub fn tag(&self) -> Option<OutputTag> {
        match self {
            ParseEvent::LexerTime(_) => Some(OutputTag::LexerTime),
            ParseEvent::ParserTime(_) => Some(OutputTag::ParserTime),
            ParseEvent::Tokens(_) => Some(OutputTag::Tokens),
            ParseEvent::Tree(_) => Some(OutputTag::Tree),
            ParseEvent::Diagnosis(_) => None,
        }
    }
}

/// Channel end stages push [`ParseEvent`]s into
pub type EventSender = mpsc::UnboundedSender<ParseEvent>;

pub(crate) fn notify(events: Option<&EventSender>, event: ParseEvent) {
    if let Some(sender) = events {
        // A dropped receiver only means nobody is listening
        let _ = sender.send(event);
    }
}
