//! Error-line parsers for tool output
//!
//! Each tool in the workflow reports problems in its own textual convention.
//! [`ErrorLineParser`] turns one line into a [`ReportedError`]; the pipeline only
//! ever sees that shape. [`PatternErrorLine`] covers the common case of a regex
//! with named groups:
//!
//! - `line` (required): 1-based line number
//! - `message` (required)
//! - `column`: column in the tool's own origin, converted to [`START_COLUMN`]
//! - `file`: file the error refers to
//! - `type`: `warning` (case-insensitive) marks a warning, anything else an error

use crate::diagnosis::Severity;
use crate::runtime::LinePattern;
use crate::source::START_COLUMN;
use once_cell::sync::Lazy;

/// Column origin of the `line L:C` reports of generated parsers and of the
/// generator tool. Columns are converted to [`START_COLUMN`] on input and back
/// with [`to_raw_column`].
pub const RAW_COLUMN_ORIGIN: usize = 0;

static ANTLR_TEXT: Lazy<LinePattern> = Lazy::new(|| {
    LinePattern::new(r"^line (?P<line>\d+):(?P<column>\d+) (?P<message>.+)$")
        .expect("text error pattern is valid")
});

static ANTLR_TOOL: Lazy<LinePattern> = Lazy::new(|| {
    LinePattern::new(
        r"^(?P<type>[^(]+)\(\d+\): (?P<file>.+?):(?P<line>\d*):(?P<column>\d*): (?P<message>.+)$",
    )
    .expect("generator error pattern is valid")
});

/// A problem reported by a tool, in human coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub file: Option<String>,
    pub line: Option<usize>,
    /// Already converted to [`START_COLUMN`] origin
    pub column: Option<usize>,
    pub severity: Severity,
    pub message: String,
}

pub trait ErrorLineParser: Send + Sync {
    /// `None` if the line is not in this parser's format.
    fn parse_line(&self, line: &str) -> Option<ReportedError>;
}

#[derive(Debug, Clone)]
pub struct PatternErrorLine {
    pattern: LinePattern,
    column_origin: usize,
}

impl PatternErrorLine {
    pub fn new(pattern: LinePattern, column_origin: usize) -> Self {
        Self {
            pattern,
            column_origin,
        }
    }

    /// `line L:C message`, as printed by generated parsers.
    pub fn antlr_text() -> Self {
        Self::new(ANTLR_TEXT.clone(), RAW_COLUMN_ORIGIN)
    }

    /// `error(50): File.g4:3:5: message`, as printed by the generator.
    pub fn antlr_tool() -> Self {
        Self::new(ANTLR_TOOL.clone(), RAW_COLUMN_ORIGIN)
    }
}

impl ErrorLineParser for PatternErrorLine {
    fn parse_line(&self, line: &str) -> Option<ReportedError> {
        let caps = self.pattern.regex().captures(line)?;
        let message = caps.name("message")?.as_str().to_string();
        let number = |name: &str| {
            caps.name(name)
                .and_then(|m| m.as_str().parse::<usize>().ok())
        };
        let column = number("column")
            .and_then(|raw| (raw + START_COLUMN).checked_sub(self.column_origin));
        let severity = match caps.name("type") {
            Some(kind) if kind.as_str().trim().eq_ignore_ascii_case("warning") => Severity::Warning,
            _ => Severity::Error,
        };
        Some(ReportedError {
            file: caps
                .name("file")
                .map(|m| m.as_str().to_string())
                .filter(|f| !f.is_empty()),
            line: number("line"),
            column,
            severity,
            message,
        })
    }
}

/// Inverse of the column conversion applied by [`PatternErrorLine::antlr_text`].
pub fn to_raw_column(column: usize) -> usize {
    column - START_COLUMN + RAW_COLUMN_ORIGIN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_error_line() {
        let parsed = PatternErrorLine::antlr_text()
            .parse_line("line 3:5 mismatched input 'foo' expecting ID")
            .unwrap();
        assert_eq!(parsed.line, Some(3));
        assert_eq!(parsed.column, Some(6));
        assert_eq!(to_raw_column(parsed.column.unwrap()), 5);
        assert_eq!(parsed.message, "mismatched input 'foo' expecting ID");
        assert_eq!(parsed.severity, Severity::Error);
        assert_eq!(parsed.file, None);
    }

    #[test]
    fn test_text_error_line_rejects_other_output() {
        let parser = PatternErrorLine::antlr_text();
        assert_eq!(parser.parse_line("Exception in thread \"main\""), None);
        assert_eq!(parser.parse_line("line x:1 broken"), None);
    }

    #[test]
    fn test_tool_error_line() {
        let parsed = PatternErrorLine::antlr_tool()
            .parse_line("warning(125): Expr.g4:4:8: implicit definition of token ID in parser")
            .unwrap();
        assert_eq!(parsed.file.as_deref(), Some("Expr.g4"));
        assert_eq!(parsed.line, Some(4));
        assert_eq!(parsed.column, Some(9));
        assert_eq!(parsed.severity, Severity::Warning);
    }

    #[test]
    fn test_tool_error_line_without_position() {
        let parsed = PatternErrorLine::antlr_tool()
            .parse_line("error(99): Expr.g4::: grammar Expr has no rules")
            .unwrap();
        assert_eq!(parsed.line, None);
        assert_eq!(parsed.column, None);
        assert_eq!(parsed.severity, Severity::Error);
    }

    #[test]
    fn test_one_based_compiler_columns() {
        let pattern =
            LinePattern::new(r"^(?P<file>[^:]+):(?P<line>\d+):(?P<column>\d+): (?P<message>.+)$")
                .unwrap();
        let parsed = PatternErrorLine::new(pattern, 1)
            .parse_line("./expr_parser.go:12:3: undefined: antlr.Foo")
            .unwrap();
        assert_eq!(parsed.column, Some(3));
    }
}
