//! Token and parse-tree dumps
//!
//! Generated-parser entry points print these on stdout after the `Tokens` and
//! `Tree` tags. The formatters here produce exactly the text the entry points
//! print, so a Rust entry point (or a test double) can speak the protocol.

/// Literal token text longer than this is truncated in a token dump.
pub const MAX_TOKEN_TEXT: usize = 8;

pub const DEFAULT_INDENT_SIZE: usize = 2;

const EOF: &str = "EOF";

/// Builds a `Tokens` payload
#[derive(Debug, Default)]
pub struct TokenDump {
    out: String,
}

impl TokenDump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one token. The text is shown in parentheses when it differs
    /// from the symbolic name, ignoring case.
    pub fn push(&mut self, symbolic_name: &str, text: &str) -> &mut Self {
        let text: String = text.chars().filter(|&c| c != '\r' && c != '\n').collect();
        self.out.push_str(symbolic_name);
        if text.to_lowercase() != symbolic_name.to_lowercase() {
            self.out.push('(');
            if text.chars().count() <= MAX_TOKEN_TEXT {
                self.out.push_str(&text);
            } else {
                self.out.extend(text.chars().take(MAX_TOKEN_TEXT));
                self.out.push_str("...");
            }
            self.out.push(')');
        }
        self.out.push(' ');
        self
    }

    /// Close the dump with the `EOF` marker.
    pub fn finish(mut self) -> String {
        self.out.push_str(EOF);
        self.out
    }
}

/// Format `(symbolic name, text)` pairs, excluding the EOF token itself.
pub fn format_tokens<'a, I>(tokens: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut dump = TokenDump::new();
    for (name, text) in tokens {
        dump.push(name, text);
    }
    dump.finish()
}

/// One entry of a `Tokens` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpedToken {
    pub name: String,
    pub text: Option<String>,
}

/// Split a `Tokens` payload back into entries; the closing `EOF` is dropped.
///
/// Token text may itself contain spaces and parentheses, so a parenthesized
/// part runs up to the next `") "` or the final `")"`.
pub fn parse_token_dump(payload: &str) -> Vec<DumpedToken> {
    let mut tokens = Vec::new();
    let mut rest = payload.trim_end();

    while !rest.is_empty() {
        let name_end = rest.find([' ', '(']).unwrap_or(rest.len());
        let name = &rest[..name_end];
        rest = &rest[name_end..];

        let mut text = None;
        if let Some(inner) = rest.strip_prefix('(') {
            let close = inner
                .find(") ")
                .or_else(|| inner.strip_suffix(')').map(str::len))
                .unwrap_or(inner.len());
            text = Some(inner[..close].to_string());
            rest = inner.get(close + 1..).unwrap_or("");
        }
        rest = rest.trim_start_matches(' ');

        if name == EOF && text.is_none() && rest.is_empty() {
            break;
        }
        tokens.push(DumpedToken {
            name: name.to_string(),
            text,
        });
    }

    tokens
}

/// A parse tree as printed by the indented tree dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseTree {
    Rule { name: String, children: Vec<ParseTree> },
    Token { text: String },
}

impl ParseTree {
    pub fn rule(name: impl Into<String>, children: Vec<ParseTree>) -> Self {
        ParseTree::Rule {
            name: name.into(),
            children,
        }
    }

    pub fn token(text: impl Into<String>) -> Self {
        ParseTree::Token { text: text.into() }
    }
}

/// Indented tree formatter
#[derive(Debug, Clone, Copy)]
pub struct TreeDump {
    indent_size: usize,
}

impl Default for TreeDump {
    fn default() -> Self {
        Self::new(DEFAULT_INDENT_SIZE)
    }
}

impl TreeDump {
    pub fn new(indent_size: usize) -> Self {
        Self { indent_size }
    }

    /// Render with real newlines.
    pub fn format(&self, tree: &ParseTree) -> String {
        let mut out = String::new();
        self.write(tree, 0, &mut out);
        out
    }

    /// Render for the `Tree` stdout line, newlines escaped as `\n`.
    pub fn format_escaped(&self, tree: &ParseTree) -> String {
        self.format(tree).replace('\n', "\\n")
    }

    fn write(&self, tree: &ParseTree, level: usize, out: &mut String) {
        let indent = " ".repeat(level * self.indent_size);
        out.push_str(&indent);
        match tree {
            ParseTree::Rule { name, children } => {
                out.push('(');
                out.push_str(name);
                out.push('\n');
                for child in children {
                    self.write(child, level + 1, out);
                    out.push('\n');
                }
                out.push_str(&indent);
                out.push(')');
            }
            ParseTree::Token { text } => {
                out.push('\'');
                for ch in text.chars() {
                    match ch {
                        '\'' => out.push_str("\\'"),
                        '\r' | '\n' => {}
                        _ => out.push(ch),
                    }
                }
                out.push('\'');
            }
        }
    }
}
