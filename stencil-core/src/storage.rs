//! # Pattern Storage
//!
//! Defines the [`PatternStorage`] trait used by the pattern entity to load,
//! list and save pattern text, and to report recently added patterns.

use crate::file_storage::StorageError;
use crate::pattern::Pattern;

pub trait PatternStorage {
    /// Loads a pattern by bare name or by filesystem path.
    fn load(&self, identifier: &str) -> Result<Pattern, StorageError>;
    /// Returns every known pattern name, sorted and deduplicated.
    fn list_names(&self) -> Result<Vec<String>, StorageError>;
    fn save(&self, name: &str, content: &str) -> Result<(), StorageError>;
    /// Returns the `count` most recently added pattern names, newest first.
    fn latest_names(&self, count: usize) -> Result<Vec<String>, StorageError>;
}
