//! Grammar projects and rule tables

use crate::source::Source;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The grammar files fed into the workflow
#[derive(Debug, Clone)]
pub struct GrammarProject {
    name: String,
    sources: Vec<Arc<Source>>,
    directory: Option<PathBuf>,
}

impl GrammarProject {
    /// Build a project from in-memory grammar sources.
    ///
    /// The project name comes from the first source: `ExprLexer.g4` and
    /// `ExprParser.g4` both name the grammar `Expr`.
    pub fn from_sources(sources: Vec<Arc<Source>>) -> Self {
        let name = sources
            .first()
            .map(|source| grammar_name_from_file(source.name()))
            .unwrap_or_default();
        Self {
            name,
            sources,
            directory: None,
        }
    }

    /// Read grammar files from disk.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> io::Result<Self> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let text = fs::read_to_string(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            sources.push(Source::shared(name, text));
        }
        let mut project = Self::from_sources(sources);
        project.directory = paths
            .first()
            .and_then(|p| p.as_ref().parent())
            .map(Path::to_path_buf);
        Ok(project)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &[Arc<Source>] {
        &self.sources
    }

    /// Directory the grammar files were loaded from.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn source_named(&self, name: &str) -> Option<&Arc<Source>> {
        self.sources.iter().find(|source| source.name() == name)
    }
}

fn grammar_name_from_file(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in ["Lexer", "Parser"] {
        if let Some(base) = stem.strip_suffix(suffix) {
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    stem
}

/// Parser rule names mapped to entry-point indexes, built once per grammar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

/// A resolved parse entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub name: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleLookupError {
    NoRules,
    Unknown(String),
}

impl fmt::Display for RuleLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleLookupError::NoRules => write!(f, "Grammar declares no parser rules"),
            RuleLookupError::Unknown(name) => write!(f, "Root rule '{}' is not declared", name),
        }
    }
}

impl std::error::Error for RuleLookupError {}

impl RuleTable {
    /// Build from rule names in declaration order; later duplicates are ignored.
    pub fn from_rules<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = RuleTable::default();
        for rule in rules {
            let rule = rule.into();
            if !table.index.contains_key(&rule) {
                table.index.insert(rule.clone(), table.names.len());
                table.names.push(rule);
            }
        }
        table
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn first(&self) -> Option<RuleEntry> {
        self.names.first().map(|name| RuleEntry {
            name: name.clone(),
            index: 0,
        })
    }

    /// Resolve a requested root; `None` or an empty name selects the first rule.
    pub fn resolve(&self, requested: Option<&str>) -> Result<RuleEntry, RuleLookupError> {
        match requested.filter(|name| !name.is_empty()) {
            None => self.first().ok_or(RuleLookupError::NoRules),
            Some(name) => self
                .index
                .get(name)
                .map(|&index| RuleEntry {
                    name: name.to_string(),
                    index,
                })
                .ok_or_else(|| RuleLookupError::Unknown(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_from_split_grammar() {
        let project = GrammarProject::from_sources(vec![
            Source::shared("ExprLexer.g4", "lexer grammar ExprLexer;"),
            Source::shared("ExprParser.g4", "parser grammar ExprParser;"),
        ]);
        assert_eq!(project.name(), "Expr");
        assert!(project.source_named("ExprParser.g4").is_some());
    }

    #[test]
    fn test_project_name_keeps_bare_suffix() {
        let project =
            GrammarProject::from_sources(vec![Source::shared("Parser.g4", "grammar Parser;")]);
        assert_eq!(project.name(), "Parser");
    }

    #[test]
    fn test_rule_table_resolution() {
        let rules = RuleTable::from_rules(["program", "statement", "program", "expr"]);
        assert_eq!(rules.names(), &["program", "statement", "expr"]);
        assert_eq!(
            rules.resolve(None),
            Ok(RuleEntry {
                name: "program".into(),
                index: 0
            })
        );
        assert_eq!(rules.resolve(Some("")).map(|e| e.index), Ok(0));
        assert_eq!(rules.resolve(Some("expr")).map(|e| e.index), Ok(2));
        assert_eq!(
            rules.resolve(Some("missing")),
            Err(RuleLookupError::Unknown("missing".into()))
        );
        assert_eq!(RuleTable::default().resolve(None), Err(RuleLookupError::NoRules));
    }
}
