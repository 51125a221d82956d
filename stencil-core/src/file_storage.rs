//! # File Storage
//!
//! This module provides functionality for storing and retrieving patterns from the local filesystem.
//!
//! Each pattern lives in its own directory, `{patterns_dir}/{name}/{system_file}`. An optional
//! custom directory with the same layout is consulted first and overrides the default one.
//!
//! # Examples
//!
//! ```rust
//! use stencil_core::file_storage::FileStorage;
//! use stencil_core::storage::PatternStorage;
//! use tempfile::TempDir;
//!
//! let temp_dir = TempDir::new().unwrap();
//! let storage = FileStorage::new(temp_dir.path(), "system.md");
//!
//! storage.save("greeting", "Say hello to {{name}}.").expect("Failed to save pattern");
//! let pattern = storage.load("greeting").expect("Failed to load pattern");
//! assert_eq!(pattern.text, "Say hello to {{name}}.");
//! ```

use std::collections::BTreeSet;
use std::fs::{self, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};
use log::{debug, warn};
use thiserror::Error;
use walkdir::WalkDir;
use crate::pattern::Pattern;
use crate::storage::PatternStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("pattern not found: {name} ({})", .path.display())]
    PatternNotFound { name: String, path: PathBuf },
    #[error("could not read pattern file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not resolve file path {0}: home directory unavailable")]
    HomeDirUnavailable(String),
    #[error("could not resolve file path {path}: {source}")]
    ResolvePath {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("could not create pattern directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not save pattern {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not list patterns in {}: {source}", .path.display())]
    ListDir {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("no unique patterns file configured")]
    UniquePatternsNotConfigured,
    #[error("could not read unique patterns file {}, please update patterns: {source}", .path.display())]
    UniquePatterns {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A local file storage for patterns.
pub struct FileStorage {
    /// The default directory holding one sub-directory per pattern.
    pub patterns_dir: PathBuf,
    /// Checked before `patterns_dir` when loading by name.
    pub custom_patterns_dir: Option<PathBuf>,
    /// Name of the pattern body file inside each pattern directory.
    pub system_file: String,
    /// One pattern name per line, oldest first.
    pub unique_patterns_file: Option<PathBuf>,
}

impl FileStorage {
    pub fn new(patterns_dir: impl Into<PathBuf>, system_file: &str) -> Self {
        Self {
            patterns_dir: patterns_dir.into(),
            custom_patterns_dir: None,
            system_file: system_file.to_string(),
            unique_patterns_file: None,
        }
    }

    pub fn with_custom_dir(mut self, custom_patterns_dir: impl Into<PathBuf>) -> Self {
        self.custom_patterns_dir = Some(custom_patterns_dir.into());
        self
    }

    pub fn with_unique_patterns_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.unique_patterns_file = Some(path.into());
        self
    }

    fn load_from_file(&self, identifier: &str) -> Result<Pattern, StorageError> {
        let path = resolve_path(identifier)?;
        debug!("loading pattern from file {}", path.display());

        let text = fs::read_to_string(&path).map_err(|source| StorageError::ReadFile {
            path: path.clone(),
            source,
        })?;

        Ok(Pattern::new(&path.display().to_string(), &text))
    }

    fn load_by_name(&self, name: &str) -> Result<Pattern, StorageError> {
        if let Some(custom_dir) = &self.custom_patterns_dir {
            let custom_path = custom_dir.join(name).join(&self.system_file);
            if let Ok(text) = fs::read_to_string(&custom_path) {
                debug!("loaded pattern '{}' from custom directory", name);
                return Ok(Pattern::new(name, &text));
            }
        }

        let path = self.patterns_dir.join(name).join(&self.system_file);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Pattern::new(name, &text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::PatternNotFound {
                name: name.to_string(),
                path,
            }),
            Err(source) => Err(StorageError::ReadFile { path, source }),
        }
    }
}

impl PatternStorage for FileStorage {
    /// Loads a pattern.
    ///
    /// Identifiers starting with `/`, `\`, `~` or `.` are read directly from that path;
    /// a failure to read is returned as is, with no fallback to the pattern directories.
    /// Any other identifier is a pattern name, looked up in the custom directory first.
    ///
    /// # Returns
    ///
    /// * `Ok(Pattern)` - If the pattern is found.
    /// * `StorageError::PatternNotFound` - If no pattern with that name exists.
    /// * `StorageError::ReadFile` - If the pattern file exists but cannot be read.
    fn load(&self, identifier: &str) -> Result<Pattern, StorageError> {
        if is_file_path(identifier) {
            self.load_from_file(identifier)
        } else {
            self.load_by_name(identifier)
        }
    }

    /// Lists pattern names from the default and custom directories.
    ///
    /// Errors reading the default directory itself are returned; errors reading the
    /// custom directory are logged and ignored. Entries that cannot be read, such as
    /// dangling symlinks, are skipped in both.
    fn list_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names: BTreeSet<String> = pattern_dirs(&self.patterns_dir)?.into_iter().collect();

        if let Some(custom_dir) = &self.custom_patterns_dir {
            match pattern_dirs(custom_dir) {
                Ok(custom_names) => names.extend(custom_names),
                Err(err) => warn!("ignoring custom patterns directory: {}", err),
            }
        }

        Ok(names.into_iter().collect())
    }

    /// Returns the `count` most recently added pattern names, newest first,
    /// read from the unique-patterns file.
    fn latest_names(&self, count: usize) -> Result<Vec<String>, StorageError> {
        let path = self
            .unique_patterns_file
            .as_ref()
            .ok_or(StorageError::UniquePatternsNotConfigured)?;

        let content = fs::read_to_string(path).map_err(|source| StorageError::UniquePatterns {
            path: path.clone(),
            source,
        })?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .rev()
            .take(count)
            .map(str::to_string)
            .collect())
    }

    /// Saves a pattern into the default directory, creating its directory if
    /// needed and overwriting an existing pattern file.
    fn save(&self, name: &str, content: &str) -> Result<(), StorageError> {
        let pattern_dir = self.patterns_dir.join(name);
        create_dir_all(&pattern_dir).map_err(|source| StorageError::CreateDir {
            path: pattern_dir.clone(),
            source,
        })?;

        let path = pattern_dir.join(&self.system_file);
        fs::write(&path, content).map_err(|source| StorageError::Write {
            path: path.clone(),
            source,
        })?;
        debug!("saved pattern '{}' to {}", name, path.display());
        Ok(())
    }
}

pub fn is_file_path(identifier: &str) -> bool {
    identifier.starts_with('\\')
        || identifier.starts_with('/')
        || identifier.starts_with('~')
        || identifier.starts_with('.')
}

/// Resolves a path identifier to an absolute path, expanding a leading `~`.
pub fn resolve_path(identifier: &str) -> Result<PathBuf, StorageError> {
    if let Some(rest) = identifier.strip_prefix('~') {
        let home = dirs::home_dir().ok_or_else(|| StorageError::HomeDirUnavailable(identifier.to_string()))?;
        let rest = rest.trim_start_matches(['/', '\\']);
        return Ok(if rest.is_empty() { home } else { home.join(rest) });
    }

    std::path::absolute(identifier).map_err(|source| StorageError::ResolvePath {
        path: identifier.to_string(),
        source,
    })
}

fn pattern_dirs(dir: &Path) -> Result<Vec<String>, StorageError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(StorageError::ListDir {
                    path: dir.to_path_buf(),
                    source,
                });
            },
            Err(err) => {
                warn!("skipping unreadable entry in {}: {}", dir.display(), err);
                continue;
            },
        };
        if entry.file_type().is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}
