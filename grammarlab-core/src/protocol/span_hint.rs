//! Span estimation for syntax-error messages
//!
//! Error lines only carry a start coordinate. The offending token is usually
//! quoted in the message, which gives a better span length than a single
//! character:
//!
//! | message                                   | length                     |
//! |-------------------------------------------|----------------------------|
//! | `token recognition error at: 'x'`         | `len(x)`                   |
//! | `missing x at 'y'`                        | 1                          |
//! | `extraneous input 'x' expecting ...`      | `len(x)`                   |
//! | `mismatched input 'x' expecting ...`      | `len(x)`                   |
//! | `no viable alternative at input 'x'`      | up to the end of `x`       |
//! | any of the above with `<EOF>`             | 0                          |
//!
//! Anything else gets length 1. The result is always clamped into the source.

use crate::source::{Source, TextSpan};
use std::sync::Arc;

const EOF_TOKEN: &str = "<EOF>";
const DEFAULT_LENGTH: usize = 1;

enum Hint<'a> {
    /// The quoted token starts at the reported position
    Token(&'a str),
    /// A token was missing; point at one character
    Missing,
    /// The quoted text ends somewhere after the reported position
    TrailingInput(&'a str),
}

fn hint(message: &str) -> Option<Hint<'_>> {
    if let Some(rest) = message.strip_prefix("token recognition error at: ") {
        return Some(Hint::Token(rest));
    }
    if message.starts_with("missing ") {
        return Some(Hint::Missing);
    }
    for prefix in ["extraneous input ", "mismatched input "] {
        if let Some(rest) = message.strip_prefix(prefix) {
            return rest
                .find(" expecting ")
                .map(|end| Hint::Token(&rest[..end]));
        }
    }
    message
        .strip_prefix("no viable alternative at input ")
        .map(Hint::TrailingInput)
}

fn unquote(token: &str) -> String {
    let token = token.strip_prefix('\'').unwrap_or(token);
    token
        .strip_suffix('\'')
        .unwrap_or(token)
        .replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
}

fn token_length(token: &str) -> usize {
    if token == EOF_TOKEN {
        0
    } else {
        token.chars().count()
    }
}

/// Estimate the span of the token an error message at `start` refers to.
pub fn estimate_span(start: usize, message: &str, source: &Arc<Source>) -> TextSpan {
    let length = match hint(message) {
        None | Some(Hint::Missing) => DEFAULT_LENGTH,
        Some(Hint::Token(token)) => token_length(&unquote(token)),
        Some(Hint::TrailingInput(input)) => {
            let input = unquote(input);
            match token_length(&input) {
                0 => 0,
                length => trailing_length(start, &input, length, source),
            }
        }
    };
    TextSpan::clamped(start, start + length, Arc::clone(source))
}

/// `input` is the text consumed since the last decision point, so it ends at
/// or after `start`. Search backwards for where it begins and measure from
/// `start` to its end.
fn trailing_length(start: usize, input: &str, length: usize, source: &Source) -> usize {
    let text: Vec<char> = source.text().chars().collect();
    let needle: Vec<char> = input.chars().collect();
    if length > text.len() {
        return length;
    }
    let last_start = start.min(text.len() - length);

    (0..=last_start)
        .rev()
        .find(|&candidate| text[candidate..candidate + length] == needle[..])
        .and_then(|found| (found + length).checked_sub(start))
        .filter(|&trailing| trailing > 0)
        .unwrap_or(length)
}
