//! # stencil Core
//!
//! This crate provides the core functionality for stencil, a pattern engine that
//! assembles prompt text from named templates.
//!
//! A pattern is loaded from layered storage, then its placeholders are resolved:
//! `{{input}}` takes the caller's input, `{{name}}` takes a variable, and
//! `{{ext:name:operation:value}}` runs an external extension and substitutes its output.
//!
//! # Modules
//!
//! - [`file_storage`] - File-based storage implementation for patterns
//! - [`storage`] - Pattern storage trait
//! - [`parser`] - Template parsing functionality
//! - [`template`] - Template resolution
//! - [`extension`] - Extension definitions and registry
//! - [`dispatcher`] - Extension process execution
//! - [`pattern`] - Pattern loading and resolution
//!
//! # Examples
//!
//! ```rust
//! use std::collections::HashMap;
//! use stencil_core::dispatcher::ExtensionDispatcher;
//! use stencil_core::extension::ExtensionRegistry;
//! use stencil_core::file_storage::FileStorage;
//! use stencil_core::pattern::PatternEntity;
//! use stencil_core::storage::PatternStorage;
//! use tempfile::TempDir;
//!
//! let temp_dir = TempDir::new().unwrap();
//! let storage = FileStorage::new(temp_dir.path(), "system.md");
//! storage.save("greet", "Greet {{name}}.").expect("Failed to save pattern");
//!
//! let dispatcher = ExtensionDispatcher::new(ExtensionRegistry::new()).unwrap();
//! let patterns = PatternEntity::new(storage, dispatcher);
//!
//! let mut variables = HashMap::new();
//! variables.insert("name".to_string(), "Ada".to_string());
//! let pattern = patterns.resolve("greet", &variables, "Hello!").unwrap();
//! assert_eq!(pattern.text, "Greet Ada.\nHello!");
//! ```

pub mod dispatcher;
pub mod extension;
pub mod file_storage;
pub mod parser;
pub mod pattern;
pub mod storage;
pub mod template;
