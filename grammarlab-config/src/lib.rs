//! Shared configuration loader for the grammarlab toolchain.
//!
//! `defaults/grammarlab.default.toml` is embedded into every binary so that
//! docs and runtime behavior stay in sync. Applications layer user-specific
//! files on top of those defaults via [`Loader`] before deserializing into
//! [`GrammarLabConfig`].

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, ValueKind};
use grammarlab_core::runtime::{
    GeneratorSettings, PredictionMode, RuntimeDescriptor, WorkspaceSettings,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_TOML: &str = include_str!("../defaults/grammarlab.default.toml");

/// File picked up from the working directory when present.
pub const LOCAL_CONFIG_FILE: &str = "grammarlab.toml";

/// Top-level configuration consumed by grammarlab applications.
#[derive(Debug, Clone, Deserialize)]
pub struct GrammarLabConfig {
    pub workspace: WorkspaceSettings,
    pub generator: GeneratorSettings,
    pub parsing: ParsingConfig,
    /// Runtime descriptors keyed by runtime id
    pub runtimes: BTreeMap<String, RuntimeDescriptor>,
}

/// Defaults for the text parsing stage.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsingConfig {
    pub prediction_mode: PredictionMode,
}

impl GrammarLabConfig {
    pub fn runtime(&self, id: &str) -> Option<&RuntimeDescriptor> {
        self.runtimes.get(id)
    }

    pub fn runtime_ids(&self) -> impl Iterator<Item = &str> {
        self.runtimes.keys().map(String::as_str)
    }

    fn assign_runtime_ids(mut self) -> Self {
        for (id, runtime) in self.runtimes.iter_mut() {
            runtime.id = id.clone();
        }
        self
    }
}

/// Helper for layering user overrides over the built-in defaults.
#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    /// Start a loader seeded with the embedded defaults.
    pub fn new() -> Self {
        let builder = Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));
        Self { builder }
    }

    /// Layer a configuration file. Missing files trigger an error.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(true);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer an optional configuration file (ignored if the file is absent).
    pub fn with_optional_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(false);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Apply a single key/value override (useful for CLI settings).
    pub fn set_override<I>(mut self, key: &str, value: I) -> Result<Self, ConfigError>
    where
        I: Into<ValueKind>,
    {
        self.builder = self.builder.set_override(key, value)?;
        Ok(self)
    }

    /// Finalize the builder and deserialize the resulting configuration.
    pub fn build(self) -> Result<GrammarLabConfig, ConfigError> {
        let config: GrammarLabConfig = self.builder.build()?.try_deserialize()?;
        Ok(config.assign_runtime_ids())
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for callers that only need the defaults.
pub fn load_defaults() -> Result<GrammarLabConfig, ConfigError> {
    Loader::new().build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grammarlab_core::runtime::ExecutableKind;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn loads_default_config() {
        let config = load_defaults().expect("defaults to deserialize");
        assert_eq!(
            config.workspace.helper_directory,
            PathBuf::from("GrammarLabHelper")
        );
        assert_eq!(config.generator.encoding, "utf8");
        assert!(config.generator.listener);
        assert_eq!(config.parsing.prediction_mode, PredictionMode::Ll);
        assert_eq!(
            config.runtime_ids().collect::<Vec<_>>(),
            vec!["go", "java", "javascript", "python"]
        );
    }

    #[test]
    fn runtime_ids_come_from_table_keys() {
        let config = load_defaults().expect("defaults to deserialize");
        let java = config.runtime("java").expect("java runtime");
        assert_eq!(java.id, "java");
        assert_eq!(java.executable, ExecutableKind::Hosted);
        assert!(java.ignored_lines.matches("Picked up _JAVA_OPTIONS: -Xmx2g"));

        let go = config.runtime("go").expect("go runtime");
        assert_eq!(go.executable, ExecutableKind::NativeBinary);
        let compiler = go.compiler.as_ref().expect("go compiler");
        assert_eq!(compiler.column_origin, 1);
        assert!(compiler.message_pattern.is_match("./ExprParser.go:12:5: undefined: x"));
    }

    #[test]
    fn tool_output_skips_blank_lines() {
        let config = load_defaults().expect("defaults to deserialize");
        assert!(config.generator.ignored_lines.matches(""));
        for id in ["java", "go"] {
            let runtime = config.runtime(id).expect("runtime");
            let compiler = runtime.compiler.as_ref().expect("compiler");
            assert!(compiler.ignored_lines.matches("   "), "{}", id);
            assert!(!compiler.ignored_lines.matches("error: x"), "{}", id);
        }
    }

    #[test]
    fn supports_overrides() {
        let config = Loader::new()
            .set_override("parsing.prediction_mode", "sll")
            .expect("override to apply")
            .set_override("runtimes.python.tool", "python3.12")
            .expect("override to apply")
            .build()
            .expect("config to build");
        assert_eq!(config.parsing.prediction_mode, PredictionMode::Sll);
        assert_eq!(
            config.runtime("python").and_then(|r| r.tool.as_deref()),
            Some("python3.12")
        );
    }

    #[test]
    fn user_file_adds_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grammarlab.toml");
        fs::write(
            &path,
            r#"
[generator]
jar = "/opt/antlr/antlr-4.13.1-complete.jar"

[runtimes.shell]
name = "Shell"
language = "Java"
executable = "hosted"
tool = "sh"
main_file = "parse.sh"
arguments = ["{main_file}"]
"#,
        )
        .unwrap();

        let config = Loader::new().with_file(&path).build().expect("config to build");
        assert_eq!(
            config.generator.jar,
            PathBuf::from("/opt/antlr/antlr-4.13.1-complete.jar")
        );
        let shell = config.runtime("shell").expect("shell runtime");
        assert_eq!(shell.id, "shell");
        assert_eq!(shell.comment_start, "/*");
        assert!(config.runtime("java").is_some());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[generator]\nignored_lines = ['(unclosed']\n").unwrap();
        assert!(Loader::new().with_file(&path).build().is_err());
    }

    #[test]
    fn missing_required_file_fails() {
        let result = Loader::new().with_file("/definitely/not/here.toml").build();
        assert!(result.is_err());
        let config = Loader::new()
            .with_optional_file("/definitely/not/here.toml")
            .build();
        assert!(config.is_ok());
    }
}
