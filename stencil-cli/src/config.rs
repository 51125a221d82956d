use confy::ConfyError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stencil_core::extension::{ExtensionRegistry, RegistryError};
use stencil_core::file_storage::FileStorage;

pub const STENCIL_CLI: &str = "stencil";

#[derive(Serialize, Deserialize)]
pub struct StencilConfig {
    pub patterns_dir: String,
    pub custom_patterns_dir: Option<String>,
    pub system_file: String,
    pub extensions_file: String,
    pub unique_patterns_file: String,
}

impl Default for StencilConfig {
    fn default() -> Self {
        let base_path = dirs::home_dir()
            .map(|p| p.join(".config").join("stencil"))
            .unwrap_or_else(|| PathBuf::from("stencil"));

        Self {
            patterns_dir: base_path.join("patterns").display().to_string(),
            custom_patterns_dir: None,
            system_file: String::from("system.md"),
            extensions_file: base_path.join("extensions.toml").display().to_string(),
            unique_patterns_file: base_path.join("unique_patterns.txt").display().to_string(),
        }
    }
}

impl StencilConfig {
    pub fn load() -> Result<Self, ConfyError> {
        confy::load(STENCIL_CLI, None)
    }

    pub fn storage(&self, patterns_dir: Option<String>) -> FileStorage {
        let patterns_dir = patterns_dir.unwrap_or_else(|| self.patterns_dir.clone());
        let storage = FileStorage::new(PathBuf::from(patterns_dir), &self.system_file)
            .with_unique_patterns_file(PathBuf::from(&self.unique_patterns_file));

        match &self.custom_patterns_dir {
            Some(custom_dir) if !custom_dir.is_empty() => storage.with_custom_dir(PathBuf::from(custom_dir)),
            _ => storage,
        }
    }

    pub fn registry(&self) -> Result<ExtensionRegistry, RegistryError> {
        ExtensionRegistry::load(&PathBuf::from(&self.extensions_file))
    }
}
