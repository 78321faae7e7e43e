//! Position and location tracking for grammar, generated and input texts
//!
//! Every diagnosis produced by the workflow is anchored to a [`Source`]. A source
//! owns its text and an index of line starts, so converting between a linear
//! character offset and a human `(line, column)` coordinate is a binary search.
//!
//! ## Types
//!
//! - [`Source`] - Immutable named text with a line-start index
//! - [`Position`] - A 1-based line:column coordinate
//! - [`TextSpan`] - A half-open linear range owned by exactly one source
//! - [`LineColumnTextSpan`] - The same range in line/column coordinates
//!
//! ## Key Design
//!
//! - **Character offsets**: offsets count Unicode scalar values, not bytes
//! - **Line terminators**: `\r\n`, `\r`, `\n`, U+2028 and U+2029, CRLF counted once
//! - **1-based coordinates**: [`START_LINE`] and [`START_COLUMN`] are both 1
//! - **Shared ownership**: sources are handed around as `Arc<Source>` and never mutated

use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// The number given to the first line of every source.
pub const START_LINE: usize = 1;

/// The number given to the first column of every line.
pub const START_COLUMN: usize = 1;

static EMPTY_SOURCE: Lazy<Arc<Source>> = Lazy::new(|| Arc::new(Source::new("", "")));

/// A line:column coordinate in a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(START_LINE, START_COLUMN)
    }
}

/// Immutable text with a precomputed line-start index
pub struct Source {
    name: String,
    text: String,
    /// Character offsets where each line starts; always begins with 0
    line_starts: Vec<usize>,
    char_len: usize,
}

impl Source {
    /// Build a source in a single pass over `text`.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let (line_starts, char_len) = index_lines(&text);
        Self {
            name: name.into(),
            text,
            line_starts,
            char_len,
        }
    }

    pub fn shared(name: impl Into<String>, text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name, text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of the text in characters.
    pub fn len(&self) -> usize {
        self.char_len
    }

    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn line_starts(&self) -> &[usize] {
        &self.line_starts
    }

    /// Convert a character offset into a line/column coordinate.
    ///
    /// Offsets past the end of the text resolve on the last line.
    pub fn position_to_line_column(&self, position: usize) -> Position {
        let index = match self.line_starts.binary_search(&position) {
            Ok(index) => index,
            Err(index) => index.saturating_sub(1),
        };
        Position::new(
            index + START_LINE,
            position - self.line_starts[index] + START_COLUMN,
        )
    }

    /// Convert a line/column coordinate into a character offset.
    ///
    /// # Panics
    ///
    /// Panics if `line` is not a line of this source or `column` is below
    /// [`START_COLUMN`]. Use [`Source::checked_position`] for untrusted input.
    pub fn line_column_to_position(&self, line: usize, column: usize) -> usize {
        assert!(
            line >= START_LINE && line - START_LINE < self.line_starts.len(),
            "line {} is outside of source '{}' ({} lines)",
            line,
            self.name,
            self.line_starts.len()
        );
        assert!(
            column >= START_COLUMN,
            "column {} is below the first column",
            column
        );
        self.line_starts[line - START_LINE] + column - START_COLUMN
    }

    /// Like [`Source::line_column_to_position`], but returns `None` for a
    /// coordinate that does not address a character of its line.
    ///
    /// The end of the last line (the end of the text) is addressable.
    pub fn checked_position(&self, line: usize, column: usize) -> Option<usize> {
        let index = line.checked_sub(START_LINE)?;
        let offset = column.checked_sub(START_COLUMN)?;
        let line_start = *self.line_starts.get(index)?;
        let position = line_start + offset;
        match self.line_starts.get(index + 1) {
            Some(&next) if position < next => Some(position),
            None if position <= self.char_len => Some(position),
            _ => None,
        }
    }

    pub fn to_line_column(self: &Arc<Self>, span: &TextSpan) -> LineColumnTextSpan {
        let begin = self.position_to_line_column(span.start());
        let end = self.position_to_line_column(span.end());
        LineColumnTextSpan::new(begin, end, Arc::clone(self))
    }

    /// Span of one line, excluding its terminator.
    pub fn line_span(self: &Arc<Self>, line: usize) -> Option<TextSpan> {
        let index = line.checked_sub(START_LINE)?;
        let start = *self.line_starts.get(index)?;
        let mut end = self
            .line_starts
            .get(index + 1)
            .copied()
            .unwrap_or(self.char_len);
        let content = self.slice(start, end - start);
        let trimmed = content.trim_end_matches(['\r', '\n', '\u{2028}', '\u{2029}']);
        end -= content.chars().count() - trimmed.chars().count();
        Some(TextSpan::new(start, end - start, Arc::clone(self)))
    }

    pub fn line_text(self: &Arc<Self>, line: usize) -> Option<String> {
        self.line_span(line).map(|span| span.text())
    }

    /// Text between two character offsets.
    pub fn slice(&self, start: usize, length: usize) -> String {
        if self.text.is_ascii() {
            let end = (start + length).min(self.text.len());
            let start = start.min(end);
            return self.text[start..end].to_string();
        }
        self.text.chars().skip(start).take(length).collect()
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.text == other.text
    }
}

impl Eq for Source {}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("len", &self.char_len)
            .field("lines", &self.line_starts.len())
            .finish()
    }
}

fn index_lines(text: &str) -> (Vec<usize>, usize) {
    let mut line_starts = vec![0];
    let mut chars = text.chars().enumerate().peekable();
    let mut len = 0;

    while let Some((offset, ch)) = chars.next() {
        len = offset + 1;
        match ch {
            '\r' => {
                if let Some((lf, _)) = chars.next_if(|&(_, next)| next == '\n') {
                    len = lf + 1;
                    line_starts.push(lf + 1);
                } else {
                    line_starts.push(offset + 1);
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => line_starts.push(offset + 1),
            _ => {}
        }
    }

    (line_starts, len)
}

/// A half-open character range `[start, start + length)` in one source
#[derive(Clone)]
pub struct TextSpan {
    start: usize,
    length: usize,
    source: Arc<Source>,
}

impl TextSpan {
    /// # Panics
    ///
    /// Panics if the range extends past the end of `source`.
    pub fn new(start: usize, length: usize, source: Arc<Source>) -> Self {
        assert!(
            start + length <= source.len(),
            "span {}..{} exceeds source '{}' of length {}",
            start,
            start + length,
            source.name(),
            source.len()
        );
        Self {
            start,
            length,
            source,
        }
    }

    /// Build a span from bounds, clamping both ends into the source.
    pub fn clamped(start: usize, end: usize, source: Arc<Source>) -> Self {
        let start = start.min(source.len());
        let end = end.clamp(start, source.len());
        Self::new(start, end - start, source)
    }

    /// The "point/unknown" sentinel: zero length on an empty source.
    pub fn empty() -> Self {
        Self {
            start: 0,
            length: 0,
            source: Arc::clone(&EMPTY_SOURCE),
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn contains(&self, position: usize) -> bool {
        position >= self.start && position < self.end()
    }

    pub fn same_source(&self, other: &TextSpan) -> bool {
        Arc::ptr_eq(&self.source, &other.source) || self.source == other.source
    }

    pub fn text(&self) -> String {
        self.source.slice(self.start, self.length)
    }

    pub fn line_column(&self) -> LineColumnTextSpan {
        self.source.to_line_column(self)
    }
}

impl PartialEq for TextSpan {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.length == other.length && self.same_source(other)
    }
}

impl Eq for TextSpan {}

impl PartialOrd for TextSpan {
    /// Spans are only ordered against spans of the same source.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.same_source(other) {
            return None;
        }
        Some(
            self.start
                .cmp(&other.start)
                .then(self.length.cmp(&other.length)),
        )
    }
}

impl fmt::Debug for TextSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextSpan({}, [{}..{}))", self.source.name(), self.start, self.end())
    }
}

impl fmt::Display for TextSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end())
    }
}

/// A span in human coordinates
#[derive(Clone, PartialEq, Eq)]
pub struct LineColumnTextSpan {
    pub begin: Position,
    pub end: Position,
    source: Arc<Source>,
}

impl LineColumnTextSpan {
    pub fn new(begin: Position, end: Position, source: Arc<Source>) -> Self {
        Self { begin, end, source }
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn to_text_span(&self) -> TextSpan {
        let start = self
            .source
            .line_column_to_position(self.begin.line, self.begin.column);
        let end = self
            .source
            .line_column_to_position(self.end.line, self.end.column);
        TextSpan::new(start, end.saturating_sub(start), Arc::clone(&self.source))
    }
}

impl fmt::Debug for LineColumnTextSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineColumnTextSpan({}, {})", self.source.name(), self)
    }
}

impl fmt::Display for LineColumnTextSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (begin, end) = (self.begin, self.end);
        if begin == end {
            write!(f, "[{},{})", begin.line, begin.column)
        } else if begin.line == end.line {
            write!(f, "[{},{}..{})", begin.line, begin.column, end.column)
        } else {
            write!(
                f,
                "[{},{}..{},{})",
                begin.line, begin.column, end.line, end.column
            )
        }
    }
}
