//! Marked sources
//!
//! Before a grammar is handed to the generator, embedded action fragments are
//! wrapped in fixed-length comment marks so their code can be located again in
//! the generated files. Generator diagnostics arrive in coordinates of the
//! marked text; [`SourceWithMarks::original_text_span`] maps them back.
//!
//! The builder records, for each inserted mark, the offset in the marked text
//! immediately *after* the mark. A query at offset `p` subtracts one mark length
//! for every recorded offset `<= p`, so a mark is always resolved as occurring
//! before the query point.
//!
//! The generator copies action code, marks included, into the generated files.
//! [`FragmentMapper::strip`] removes them again before compilation and keeps
//! where each fragment landed, so compiler errors inside an action can be
//! reported on the grammar.

use crate::source::{Source, TextSpan};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Comment syntax used to build fragment marks for one runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkSyntax {
    pub comment_start: String,
    pub comment_end: String,
}

const FRAGMENT_SUFFIX: char = '#';

/// Fragment numbers are zero-padded to this many digits so marks keep a fixed length.
pub const FRAGMENT_DIGITS: usize = 3;

impl MarkSyntax {
    pub fn new(comment_start: impl Into<String>, comment_end: impl Into<String>) -> Self {
        Self {
            comment_start: comment_start.into(),
            comment_end: comment_end.into(),
        }
    }

    pub fn fragment_name(number: usize) -> String {
        format!("fragment_{:0width$}", number, width = FRAGMENT_DIGITS)
    }

    /// `/*#fragment_000*/`
    pub fn open_mark(&self, number: usize) -> String {
        format!(
            "{}{}{}{}",
            self.comment_start,
            FRAGMENT_SUFFIX,
            Self::fragment_name(number),
            self.comment_end
        )
    }

    /// `/*fragment_000#*/`
    pub fn close_mark(&self, number: usize) -> String {
        format!(
            "{}{}{}{}",
            self.comment_start,
            Self::fragment_name(number),
            FRAGMENT_SUFFIX,
            self.comment_end
        )
    }

    /// Length in characters shared by every open and close mark.
    pub fn mark_length(&self) -> usize {
        self.open_mark(0).chars().count()
    }

    fn patterns(&self) -> Result<(Regex, Regex), MarkError> {
        let start = regex::escape(&self.comment_start);
        let end = regex::escape(&self.comment_end);
        let digits = format!("([0-9]{{{}}})", FRAGMENT_DIGITS);
        let suffix = regex::escape(&FRAGMENT_SUFFIX.to_string());
        let open = Regex::new(&format!("{}{}fragment_{}{}", start, suffix, digits, end));
        let close = Regex::new(&format!("{}fragment_{}{}{}", start, digits, suffix, end));
        match (open, close) {
            (Ok(open), Ok(close)) => Ok((open, close)),
            (Err(err), _) | (_, Err(err)) => Err(MarkError::Syntax(err.to_string())),
        }
    }
}

impl Default for MarkSyntax {
    fn default() -> Self {
        Self::new("/*", "*/")
    }
}

/// Errors raised while inserting marks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkError {
    /// Marks must be inserted at non-decreasing original offsets
    Unordered { offset: usize, previous: usize },
    /// Every mark of one source must have the same length
    LengthMismatch { expected: usize, found: usize },
    OutOfRange { offset: usize, length: usize },
    /// An open mark without its close mark
    Unclosed { number: usize },
    /// A mark number with no fragment in the grammar
    UnknownFragment { number: usize },
    Syntax(String),
}

impl fmt::Display for MarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkError::Unordered { offset, previous } => write!(
                f,
                "mark at offset {} inserted after a mark at offset {}",
                offset, previous
            ),
            MarkError::LengthMismatch { expected, found } => write!(
                f,
                "mark of length {} does not match the mark length {}",
                found, expected
            ),
            MarkError::OutOfRange { offset, length } => write!(
                f,
                "mark offset {} is outside of a source of length {}",
                offset, length
            ),
            MarkError::Unclosed { number } => {
                write!(f, "fragment {} has no close mark", number)
            }
            MarkError::UnknownFragment { number } => {
                write!(f, "fragment {} does not map to a grammar fragment", number)
            }
            MarkError::Syntax(message) => write!(f, "invalid mark syntax: {}", message),
        }
    }
}

impl std::error::Error for MarkError {}

/// A source derived from an original by inserting fixed-length marks
#[derive(Debug, Clone)]
pub struct SourceWithMarks {
    source: Arc<Source>,
    mark_offsets: Vec<usize>,
    mark_length: usize,
    original: Arc<Source>,
}

impl SourceWithMarks {
    /// The marked text.
    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn original(&self) -> &Arc<Source> {
        &self.original
    }

    pub fn mark_offsets(&self) -> &[usize] {
        &self.mark_offsets
    }

    pub fn mark_length(&self) -> usize {
        self.mark_length
    }

    /// Map a range of the marked text back onto the original source.
    pub fn original_text_span(&self, marked_start: usize, length: usize) -> TextSpan {
        let marks_before = self.mark_offsets.partition_point(|&o| o <= marked_start);
        let start = marked_start.saturating_sub(marks_before * self.mark_length);
        TextSpan::clamped(start, start + length, Arc::clone(&self.original))
    }
}

/// Incrementally copies an original text while inserting marks
pub struct MarkedSourceBuilder {
    original: Arc<Source>,
    chars: Vec<char>,
    copied: usize,
    text: String,
    marked_len: usize,
    mark_offsets: Vec<usize>,
    mark_length: usize,
}

impl MarkedSourceBuilder {
    pub fn new(original: Arc<Source>, mark_length: usize) -> Self {
        let chars: Vec<char> = original.text().chars().collect();
        Self {
            text: String::with_capacity(original.text().len()),
            original,
            chars,
            copied: 0,
            marked_len: 0,
            mark_offsets: Vec::new(),
            mark_length,
        }
    }

    /// Insert `mark` in front of the character at `original_offset`.
    pub fn insert(&mut self, original_offset: usize, mark: &str) -> Result<(), MarkError> {
        if original_offset > self.chars.len() {
            return Err(MarkError::OutOfRange {
                offset: original_offset,
                length: self.chars.len(),
            });
        }
        if original_offset < self.copied {
            return Err(MarkError::Unordered {
                offset: original_offset,
                previous: self.copied,
            });
        }
        let found = mark.chars().count();
        if found != self.mark_length {
            return Err(MarkError::LengthMismatch {
                expected: self.mark_length,
                found,
            });
        }

        self.text
            .extend(&self.chars[self.copied..original_offset]);
        self.marked_len += original_offset - self.copied;
        self.copied = original_offset;

        self.text.push_str(mark);
        self.marked_len += found;
        self.mark_offsets.push(self.marked_len);
        Ok(())
    }

    pub fn finish(mut self, name: impl Into<String>) -> SourceWithMarks {
        self.text.extend(&self.chars[self.copied..]);
        SourceWithMarks {
            source: Source::shared(name, self.text),
            mark_offsets: self.mark_offsets,
            mark_length: self.mark_length,
            original: self.original,
        }
    }
}

/// Wrap every span in open/close marks carrying its fragment number.
///
/// Spans must be sorted and non-overlapping.
pub fn mark_fragments(
    original: &Arc<Source>,
    syntax: &MarkSyntax,
    fragments: &[(usize, TextSpan)],
) -> Result<SourceWithMarks, MarkError> {
    let mut builder = MarkedSourceBuilder::new(Arc::clone(original), syntax.mark_length());
    for (number, fragment) in fragments {
        builder.insert(fragment.start(), &syntax.open_mark(*number))?;
        builder.insert(fragment.end(), &syntax.close_mark(*number))?;
    }
    Ok(builder.finish(original.name()))
}

/// A grammar fragment found in a generated file
#[derive(Debug, Clone, PartialEq)]
pub struct MappedFragment {
    pub number: usize,
    /// Where the fragment ended up once the marks were removed
    pub generated: TextSpan,
    pub grammar: TextSpan,
}

/// A generated file with its fragment marks removed
#[derive(Debug, Clone)]
pub struct FragmentMapper {
    source: Arc<Source>,
    fragments: Vec<MappedFragment>,
}

impl FragmentMapper {
    /// Remove the marks of `syntax` from `text`, pairing every marked region
    /// with `grammar_fragments[number]`.
    pub fn strip(
        name: impl Into<String>,
        text: &str,
        syntax: &MarkSyntax,
        grammar_fragments: &[TextSpan],
    ) -> Result<Self, MarkError> {
        let (open, close) = syntax.patterns()?;
        let mut stripped = String::with_capacity(text.len());
        let mut stripped_len = 0;
        let mut regions = Vec::new();
        let mut rest = text;

        while let Some(caps) = open.captures(rest) {
            let (Some(mark), Some(digits)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let number: usize = digits
                .as_str()
                .parse()
                .map_err(|err: std::num::ParseIntError| MarkError::Syntax(err.to_string()))?;
            if number >= grammar_fragments.len() {
                return Err(MarkError::UnknownFragment { number });
            }

            let before = &rest[..mark.start()];
            stripped.push_str(before);
            stripped_len += before.chars().count();
            rest = &rest[mark.end()..];

            let closing = close
                .captures(rest)
                .and_then(|caps| Some((caps.get(0)?, caps.get(1)?)))
                .filter(|(_, digits)| digits.as_str().parse::<usize>().ok() == Some(number));
            let Some((mark, _)) = closing else {
                return Err(MarkError::Unclosed { number });
            };

            let body = &rest[..mark.start()];
            let body_len = body.chars().count();
            stripped.push_str(body);
            regions.push((number, stripped_len, body_len));
            stripped_len += body_len;
            rest = &rest[mark.end()..];
        }
        stripped.push_str(rest);

        let source = Source::shared(name, stripped);
        let fragments = regions
            .into_iter()
            .map(|(number, start, length)| MappedFragment {
                number,
                generated: TextSpan::new(start, length, Arc::clone(&source)),
                grammar: grammar_fragments[number].clone(),
            })
            .collect();
        Ok(Self { source, fragments })
    }

    /// The generated text without marks.
    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn fragments(&self) -> &[MappedFragment] {
        &self.fragments
    }

    /// Map a position of the stripped text into the grammar, if it lies inside
    /// a fragment.
    ///
    /// The first line of a fragment maps column for column. Later lines may be
    /// re-indented by the generator, so they are aligned on their line ends.
    pub fn map(&self, position: usize) -> Option<TextSpan> {
        let fragment = self
            .fragments
            .iter()
            .find(|f| f.generated.start() <= position && position <= f.generated.end())?;
        let generated: Vec<char> = fragment.generated.text().chars().collect();
        let grammar: Vec<char> = fragment.grammar.text().chars().collect();

        let local = position - fragment.generated.start();
        let line = generated[..local].iter().filter(|&&c| c == '\n').count();
        let line_start = line_start_in(&generated, line).unwrap_or(0);
        let column = local - line_start;

        let offset = if line == 0 {
            column.min(line_length(&grammar, 0))
        } else {
            let Some(grammar_start) = line_start_in(&grammar, line) else {
                return Some(fragment.grammar.clone());
            };
            let shift = line_length(&generated, line_start) as isize
                - line_length(&grammar, grammar_start) as isize;
            let column = (column as isize - shift).max(0) as usize;
            grammar_start + column.min(line_length(&grammar, grammar_start))
        };

        let start = fragment.grammar.start() + offset;
        Some(TextSpan::clamped(
            start,
            start,
            Arc::clone(fragment.grammar.source()),
        ))
    }
}

/// Offset of the `line`-th line (0-based) of `chars`.
fn line_start_in(chars: &[char], line: usize) -> Option<usize> {
    if line == 0 {
        return Some(0);
    }
    chars
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c == '\n')
        .nth(line - 1)
        .map(|(i, _)| i + 1)
}

fn line_length(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|&c| c == '\n' || c == '\r')
        .unwrap_or(chars.len() - start)
}
