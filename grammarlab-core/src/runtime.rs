//! Runtime descriptors and workflow settings
//!
//! A runtime is a code-generation back end: the generator target language, how
//! the generated parser is compiled, and how it is launched. Everything that
//! differs between runtimes is data on [`RuntimeDescriptor`] (argument templates,
//! ignored-line patterns, error-line formats) so adding a runtime never touches
//! the pipeline.

use crate::diagnosis::StageError;
use crate::marks::MarkSyntax;
use crate::protocol::error_line::{PatternErrorLine, RAW_COLUMN_ORIGIN};
use crate::source::START_COLUMN;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How the generated parser is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutableKind {
    /// The compile step produces `main_file` as a native executable
    NativeBinary,
    /// `main_file` is run by a host tool such as `java` or `python3`
    Hosted,
}

/// A compiled regular expression read from configuration
#[derive(Debug, Clone)]
pub struct LinePattern(Regex);

impl LinePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(LinePattern)
    }

    pub fn regex(&self) -> &Regex {
        &self.0
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.0.is_match(line)
    }
}

impl TryFrom<String> for LinePattern {
    type Error = regex::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        LinePattern::new(&value)
    }
}

impl<'de> Deserialize<'de> for LinePattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        LinePattern::new(&pattern).map_err(serde::de::Error::custom)
    }
}

static BLANK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*$").expect("blank line pattern is valid"));

/// Output lines a runtime prints that carry no information
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct IgnoredLines(Vec<LinePattern>);

impl IgnoredLines {
    pub fn new(patterns: Vec<LinePattern>) -> Self {
        Self(patterns)
    }

    /// Ignores empty and whitespace-only lines.
    pub fn blank_lines() -> Self {
        Self(vec![LinePattern(BLANK_LINE.clone())])
    }

    pub fn matches(&self, line: &str) -> bool {
        self.0.iter().any(|pattern| pattern.is_match(line))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// ANTLR prediction mode passed to the generated parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionMode {
    #[default]
    Ll,
    Sll,
    FastLl,
}

impl PredictionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionMode::Ll => "ll",
            PredictionMode::Sll => "sll",
            PredictionMode::FastLl => "fastll",
        }
    }
}

impl fmt::Display for PredictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PredictionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ll" => Ok(PredictionMode::Ll),
            "sll" => Ok(PredictionMode::Sll),
            "fastll" => Ok(PredictionMode::FastLl),
            other => Err(format!("Unknown prediction mode '{}'", other)),
        }
    }
}

/// Compiler invocation for runtimes with a build step
#[derive(Debug, Clone, Deserialize)]
pub struct CompilerSpec {
    pub tool: String,
    /// Argument template; `{files}` expands to the generated source files
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Named groups: `line`, `message`, optional `file`, `column`, `type`
    pub message_pattern: LinePattern,
    #[serde(default = "default_compiler_column_origin")]
    pub column_origin: usize,
    #[serde(default)]
    pub ignored_lines: IgnoredLines,
}

fn default_compiler_column_origin() -> usize {
    START_COLUMN
}

impl CompilerSpec {
    pub fn error_line_parser(&self) -> PatternErrorLine {
        PatternErrorLine::new(self.message_pattern.clone(), self.column_origin)
    }
}

/// Everything needed to generate, build and run a parser for one runtime
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeDescriptor {
    /// Filled from the configuration key when loaded through a runtime table
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub executable: ExecutableKind,
    /// Host tool for [`ExecutableKind::Hosted`] runtimes
    #[serde(default)]
    pub tool: Option<String>,
    pub main_file: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub ignored_lines: IgnoredLines,
    /// Preamble arguments; supports `{main_file}`, `{working_dir}`, `{runtime_dir}`, `{grammar}`
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Generator target language
    pub language: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default = "default_comment_start")]
    pub comment_start: String,
    #[serde(default = "default_comment_end")]
    pub comment_end: String,
    /// Entry-point template copied into the working directory before compiling
    #[serde(default)]
    pub entry_template: Option<PathBuf>,
    /// Overrides the `line L:C message` error format of the generated parser
    #[serde(default)]
    pub error_pattern: Option<LinePattern>,
    #[serde(default)]
    pub compiler: Option<CompilerSpec>,
}

fn default_comment_start() -> String {
    "/*".to_string()
}

fn default_comment_end() -> String {
    "*/".to_string()
}

impl RuntimeDescriptor {
    pub fn mark_syntax(&self) -> MarkSyntax {
        MarkSyntax::new(&self.comment_start, &self.comment_end)
    }

    /// Parser for the generated parser's error stream.
    pub fn error_line_parser(&self) -> PatternErrorLine {
        match &self.error_pattern {
            Some(pattern) => PatternErrorLine::new(pattern.clone(), RAW_COLUMN_ORIGIN),
            None => PatternErrorLine::antlr_text(),
        }
    }

    pub fn is_generated_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.as_str() == ext))
    }

    /// Program that runs the generated parser inside `working_dir`.
    pub fn program(&self, working_dir: &Path) -> Result<String, StageError> {
        match self.executable {
            ExecutableKind::NativeBinary => {
                Ok(working_dir.join(&self.main_file).display().to_string())
            }
            ExecutableKind::Hosted => self.tool.clone().ok_or_else(|| {
                StageError::Configuration(format!(
                    "Runtime '{}' is hosted but declares no tool",
                    self.name
                ))
            }),
        }
    }
}

/// Placeholder values for argument templates
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub main_file: &'a str,
    pub working_dir: &'a Path,
    pub runtime_dir: &'a Path,
    pub grammar: &'a str,
}

impl TemplateContext<'_> {
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{main_file}", self.main_file)
            .replace("{working_dir}", &self.working_dir.display().to_string())
            .replace("{runtime_dir}", &self.runtime_dir.display().to_string())
            .replace("{grammar}", self.grammar)
    }

    pub fn expand_all(&self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.expand(t)).collect()
    }
}

/// Directory layout shared by all runs
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSettings {
    /// Root of the per-(grammar, runtime) working directories
    pub helper_directory: PathBuf,
    /// Root of runtime support files, one subdirectory per runtime id
    pub runtimes_directory: PathBuf,
}

impl WorkspaceSettings {
    /// Working directory owned by one (grammar, runtime) pair.
    pub fn working_directory(&self, grammar: &str, runtime: &str) -> PathBuf {
        self.helper_directory.join(grammar).join(runtime)
    }

    pub fn runtime_directory(&self, runtime: &str) -> PathBuf {
        self.runtimes_directory.join(runtime)
    }
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            helper_directory: PathBuf::from("GrammarLabHelper"),
            runtimes_directory: PathBuf::from("runtimes"),
        }
    }
}

/// Parser generator invocation
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorSettings {
    pub tool: String,
    pub jar: PathBuf,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_true")]
    pub listener: bool,
    #[serde(default)]
    pub visitor: bool,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub ignored_lines: IgnoredLines,
}

fn default_encoding() -> String {
    "utf8".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            tool: "java".to_string(),
            jar: PathBuf::from("antlr-complete.jar"),
            encoding: default_encoding(),
            listener: true,
            visitor: false,
            package: None,
            ignored_lines: IgnoredLines::blank_lines(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosted() -> RuntimeDescriptor {
        RuntimeDescriptor {
            id: "python".into(),
            name: "Python".into(),
            executable: ExecutableKind::Hosted,
            tool: Some("python3".into()),
            main_file: "main.py".into(),
            environment: BTreeMap::new(),
            ignored_lines: IgnoredLines::default(),
            arguments: vec!["{main_file}".into()],
            language: "Python3".into(),
            extensions: vec!["py".into()],
            comment_start: "#".into(),
            comment_end: "\n".into(),
            entry_template: None,
            error_pattern: None,
            compiler: None,
        }
    }

    #[test]
    fn test_program_depends_on_executable_kind() {
        let mut runtime = hosted();
        assert_eq!(runtime.program(Path::new("/w")).unwrap(), "python3");

        runtime.tool = None;
        assert!(matches!(
            runtime.program(Path::new("/w")),
            Err(StageError::Configuration(_))
        ));

        runtime.executable = ExecutableKind::NativeBinary;
        runtime.main_file = "parser".into();
        assert_eq!(runtime.program(Path::new("/w")).unwrap(), "/w/parser");
    }

    #[test]
    fn test_template_expansion() {
        let context = TemplateContext {
            main_file: "Main.java",
            working_dir: Path::new("/tmp/Expr/java"),
            runtime_dir: Path::new("/opt/runtimes/java"),
            grammar: "Expr",
        };
        assert_eq!(
            context.expand_all(&["-cp".into(), ".:{runtime_dir}/antlr.jar".into(), "{grammar}Main".into()]),
            vec!["-cp", ".:/opt/runtimes/java/antlr.jar", "ExprMain"]
        );
    }

    #[test]
    fn test_ignored_lines() {
        let ignored = IgnoredLines::new(vec![LinePattern::new("^Picked up _JAVA_OPTIONS").unwrap()]);
        assert!(ignored.matches("Picked up _JAVA_OPTIONS: -Xmx1g"));
        assert!(!ignored.matches("line 1:0 token recognition error at: '#'"));
    }

    #[test]
    fn test_generator_ignores_blank_lines_by_default() {
        let ignored = GeneratorSettings::default().ignored_lines;
        assert!(ignored.matches(""));
        assert!(ignored.matches("   \t"));
        assert!(!ignored.matches("error(50): Expr.g4:1:0: syntax error"));
    }

    #[test]
    fn test_generated_file_extensions() {
        let runtime = hosted();
        assert!(runtime.is_generated_file(Path::new("ExprParser.py")));
        assert!(!runtime.is_generated_file(Path::new("ExprParser.interp")));
    }

    #[test]
    fn test_prediction_mode_names() {
        assert_eq!("SLL".parse(), Ok(PredictionMode::Sll));
        assert_eq!(PredictionMode::FastLl.to_string(), "fastll");
        assert_eq!(PredictionMode::default(), PredictionMode::Ll);
    }

    #[test]
    fn test_working_directories_are_per_runtime() {
        let workspace = WorkspaceSettings::default();
        assert_ne!(
            workspace.working_directory("Expr", "java"),
            workspace.working_directory("Expr", "python")
        );
    }
}
