//! Interpreter for the two output streams of a text-parsing run
//!
//! [`TextOutput`] receives lines as the process harness reads them and keeps
//! the running result. Each recognized stdout tag and each diagnosis is also
//! forwarded as a [`ParseEvent`] the moment it is seen, so observers get results
//! in stream order while the parser is still running.

use super::duration::parse_duration;
use super::error_line::{ErrorLineParser, PatternErrorLine};
use super::span_hint::estimate_span;
use super::{notify, EventSender, OutputTag, ParseEvent};
use crate::diagnosis::{Diagnosis, DiagnosisKind, Severity};
use crate::process::{LineSink, StreamKind};
use crate::source::Source;
use crate::workflow::{TextParsedArtifacts, WorkflowStage};
use std::sync::Arc;
use tracing::debug;

const STAGE: WorkflowStage = WorkflowStage::TextParsed;

pub struct TextOutput {
    artifacts: TextParsedArtifacts,
    diagnoses: Vec<Diagnosis>,
    error_lines: PatternErrorLine,
    events: Option<EventSender>,
}

impl TextOutput {
    pub fn new(
        text: Option<Arc<Source>>,
        error_lines: PatternErrorLine,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            artifacts: TextParsedArtifacts {
                text,
                ..TextParsedArtifacts::default()
            },
            diagnoses: Vec::new(),
            error_lines,
            events,
        }
    }

    pub fn artifacts(&self) -> &TextParsedArtifacts {
        &self.artifacts
    }

    pub fn diagnoses(&self) -> &[Diagnosis] {
        &self.diagnoses
    }

    pub fn into_parts(self) -> (TextParsedArtifacts, Vec<Diagnosis>) {
        (self.artifacts, self.diagnoses)
    }

    pub fn stdout_line(&mut self, line: &str) {
        let (head, payload) = line.split_once(' ').unwrap_or((line, ""));
        let Ok(tag) = head.parse::<OutputTag>() else {
            self.report(
                Diagnosis::error(line, STAGE).with_kind(DiagnosisKind::UnparsedOutputLine),
            );
            return;
        };

        let event = match tag {
            OutputTag::LexerTime | OutputTag::ParserTime => {
                let Some(duration) = parse_duration(payload) else {
                    debug!(line, "unparsable duration payload");
                    self.report(
                        Diagnosis::error(line, STAGE)
                            .with_kind(DiagnosisKind::UnparsedOutputLine),
                    );
                    return;
                };
                if tag == OutputTag::LexerTime {
                    self.artifacts.lexer_time = Some(duration);
                    ParseEvent::LexerTime(duration)
                } else {
                    self.artifacts.parser_time = Some(duration);
                    ParseEvent::ParserTime(duration)
                }
            }
            OutputTag::Tokens => {
                self.artifacts.tokens = Some(payload.to_string());
                ParseEvent::Tokens(payload.to_string())
            }
            OutputTag::Tree => {
                let tree = payload.replace("\\n", "\n");
                self.artifacts.tree = Some(tree.clone());
                ParseEvent::Tree(tree)
            }
        };
        notify(self.events.as_ref(), event);
    }

    pub fn stderr_line(&mut self, line: &str) {
        let diagnosis = self
            .locate(line)
            .unwrap_or_else(|| {
                Diagnosis::error(line, STAGE).with_kind(DiagnosisKind::UnparsedOutputLine)
            });
        self.report(diagnosis);
    }

    /// Any failure to resolve the reported position falls back to the raw line.
    fn locate(&self, line: &str) -> Option<Diagnosis> {
        let reported = self.error_lines.parse_line(line)?;
        let text = self.artifacts.text.as_ref()?;
        let position = text.checked_position(reported.line?, reported.column?)?;
        let span = estimate_span(position, &reported.message, text);
        Some(Diagnosis::located(
            span,
            reported.message,
            Severity::Error,
            STAGE,
        ))
    }

    fn report(&mut self, diagnosis: Diagnosis) {
        notify(
            self.events.as_ref(),
            ParseEvent::Diagnosis(diagnosis.clone()),
        );
        self.diagnoses.push(diagnosis);
    }
}

impl LineSink for TextOutput {
    fn on_line(&mut self, stream: StreamKind, line: String) {
        match stream {
            StreamKind::Stdout => self.stdout_line(&line),
            StreamKind::Stderr => self.stderr_line(&line),
        }
    }
}
