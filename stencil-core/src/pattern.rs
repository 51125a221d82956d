use std::collections::HashMap;
use log::debug;
use thiserror::Error;
use crate::dispatcher::ExtensionRunner;
use crate::file_storage::StorageError;
use crate::storage::PatternStorage;
use crate::template::{apply_input, ResolveError, TemplateResolver};

#[derive(Debug, Error)]
pub enum PatternError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// A pattern as loaded from storage, or once resolved, its final text.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// The pattern name, or the absolute path it was read from.
    pub identifier: String,
    pub text: String,
}

impl Pattern {
    pub fn new(identifier: &str, text: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            text: text.to_string(),
        }
    }
}

/// Loads patterns from a [`PatternStorage`] and resolves them, dispatching
/// extension calls through an [`ExtensionRunner`].
pub struct PatternEntity<S: PatternStorage, R: ExtensionRunner> {
    storage: S,
    runner: R,
}

impl<S: PatternStorage, R: ExtensionRunner> PatternEntity<S, R> {
    pub fn new(storage: S, runner: R) -> Self {
        Self { storage, runner }
    }

    /// Loads a pattern and resolves its variables, extension calls and input.
    pub fn resolve(&self, identifier: &str, variables: &HashMap<String, String>, input: &str) -> Result<Pattern, PatternError> {
        let mut pattern = self.storage.load(identifier)?;
        debug!("resolving pattern '{}' with {} variable(s)", pattern.identifier, variables.len());

        pattern.text = TemplateResolver::new(&self.runner).apply(&pattern.text, variables, input)?;
        Ok(pattern)
    }

    /// Loads a pattern and only substitutes the input placeholder.
    pub fn resolve_input_only(&self, identifier: &str, input: &str) -> Result<Pattern, PatternError> {
        let mut pattern = self.storage.load(identifier)?;
        pattern.text = apply_input(&pattern.text, input);
        Ok(pattern)
    }

    /// Resolves a pattern with no variables and empty input.
    pub fn get(&self, identifier: &str) -> Result<Pattern, PatternError> {
        self.resolve(identifier, &HashMap::new(), "")
    }

    pub fn list_names(&self) -> Result<Vec<String>, PatternError> {
        Ok(self.storage.list_names()?)
    }

    pub fn save(&self, name: &str, content: &str) -> Result<(), PatternError> {
        Ok(self.storage.save(name, content)?)
    }

    /// Returns the `count` most recently added pattern names, newest first.
    pub fn latest_names(&self, count: usize) -> Result<Vec<String>, PatternError> {
        Ok(self.storage.latest_names(count)?)
    }
}
