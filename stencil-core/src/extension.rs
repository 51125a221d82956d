//! # Extension Registry
//!
//! Maps an extension name to its [`ExtensionDefinition`]: the executable, the
//! command template for each operation, a timeout and how output is captured.
//!
//! Registries can be built in code or loaded from a TOML file:
//!
//! ```toml
//! [[extension]]
//! name = "word-gen"
//! executable = "/usr/local/bin/word-gen"
//! timeout_ms = 5000
//!
//! [extension.operations]
//! upper = "{{executable}} --upper {{value}}"
//!
//! [extension.output]
//! method = "stdout"
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("could not read extension registry {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse extension registry: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("extension '{0}' is defined more than once")]
    Duplicate(String),
}

/// How the result of an extension call is captured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum OutputMethod {
    /// The command's standard output is the result.
    #[default]
    Stdout,
    /// The command prints the path of a file holding the result.
    File {
        #[serde(default)]
        cleanup: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionDefinition {
    pub name: String,
    pub executable: PathBuf,
    pub timeout: Duration,
    /// Operation name to command template. Templates may use `{{executable}}` and `{{value}}`.
    pub operations: HashMap<String, String>,
    pub output: OutputMethod,
}

impl ExtensionDefinition {
    pub fn new(name: &str, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            executable: executable.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            operations: HashMap::new(),
            output: OutputMethod::Stdout,
        }
    }

    pub fn with_operation(mut self, operation: &str, command_template: &str) -> Self {
        self.operations.insert(operation.to_string(), command_template.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output(mut self, output: OutputMethod) -> Self {
        self.output = output;
        self
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExtensionFile {
    pub name: String,
    pub executable: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub operations: HashMap<String, String>,
    #[serde(default)]
    pub output: OutputMethod,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub extension: Vec<ExtensionFile>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl From<ExtensionFile> for ExtensionDefinition {
    fn from(file: ExtensionFile) -> Self {
        Self {
            name: file.name,
            executable: file.executable,
            timeout: Duration::from_millis(file.timeout_ms),
            operations: file.operations,
            output: file.output,
        }
    }
}

/// Read-only lookup of extension definitions by name.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<String, ExtensionDefinition>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a registry from a TOML file. A missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(source) => Err(RegistryError::Read { path: path.to_path_buf(), source }),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(content)?;
        let mut registry = Self::new();
        for extension in file.extension {
            if registry.extensions.contains_key(&extension.name) {
                return Err(RegistryError::Duplicate(extension.name));
            }
            registry.register(extension.into());
        }
        Ok(registry)
    }

    /// Adds or replaces a definition.
    pub fn register(&mut self, definition: ExtensionDefinition) {
        self.extensions.insert(definition.name.clone(), definition);
    }

    pub fn lookup(&self, name: &str) -> Option<&ExtensionDefinition> {
        self.extensions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extensions.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REGISTRY: &str = r#"
[[extension]]
name = "word-gen"
executable = "/usr/local/bin/word-gen"
timeout_ms = 5000

[extension.operations]
upper = "{{executable}} --upper {{value}}"
lower = "{{executable}} --lower {{value}}"

[[extension]]
name = "render"
executable = "/opt/render"

[extension.operations]
png = "{{executable}} {{value}}"

[extension.output]
method = "file"
cleanup = true
"#;

    #[test]
    fn test_load_from_toml() {
        let registry = ExtensionRegistry::from_toml_str(REGISTRY).expect("registry should parse");
        assert_eq!(registry.names(), vec!["render", "word-gen"]);

        let word_gen = registry.lookup("word-gen").expect("word-gen should exist");
        assert_eq!(word_gen.executable, PathBuf::from("/usr/local/bin/word-gen"));
        assert_eq!(word_gen.timeout, Duration::from_millis(5000));
        assert_eq!(word_gen.operations.len(), 2);
        assert_eq!(word_gen.operations["upper"], "{{executable}} --upper {{value}}");
        assert_eq!(word_gen.output, OutputMethod::Stdout);

        let render = registry.lookup("render").expect("render should exist");
        assert_eq!(render.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(render.output, OutputMethod::File { cleanup: true });
    }

    #[test]
    fn test_lookup_missing() {
        let registry = ExtensionRegistry::from_toml_str(REGISTRY).unwrap();
        assert!(registry.lookup("nope").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let content = r#"
[[extension]]
name = "twice"
executable = "a"

[[extension]]
name = "twice"
executable = "b"
"#;
        match ExtensionRegistry::from_toml_str(content) {
            Err(RegistryError::Duplicate(name)) => assert_eq!(name, "twice"),
            other => panic!("Expected Duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_toml() {
        let result = ExtensionRegistry::from_toml_str("[[extension]]\nname = ");
        assert!(matches!(result, Err(RegistryError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let registry = ExtensionRegistry::load(&temp_dir.path().join("extensions.toml")).unwrap();
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("extensions.toml");
        fs::write(&path, REGISTRY).unwrap();

        let registry = ExtensionRegistry::load(&path).unwrap();
        assert!(registry.lookup("word-gen").is_some());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ExtensionRegistry::new();
        registry.register(ExtensionDefinition::new("echo", "echo").with_operation("say", "{{executable}} {{value}}"));
        registry.register(ExtensionDefinition::new("echo", "/bin/echo"));

        let echo = registry.lookup("echo").unwrap();
        assert_eq!(echo.executable, PathBuf::from("/bin/echo"));
        assert!(echo.operations.is_empty());
    }
}
