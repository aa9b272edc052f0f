//! Compose model assembly library
//!
//! Builds one configuration tree from several Compose documents: merge
//! with path-specific rules, duplicate-entry resolution, `!reset` and
//! `!override` directives, `${...}` interpolation and service dependency
//! validation. Only [`loader`] touches the filesystem.

pub mod cli;
pub mod document;
pub mod error;
pub mod format;
pub mod graph;
pub mod interpolation;
pub mod loader;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod reset;
pub mod template;
pub mod tree;
pub mod unicity;

pub use error::{ErrorCode, ModelError, Result};
pub use pipeline::{Document, Model, Options, Pipeline};
