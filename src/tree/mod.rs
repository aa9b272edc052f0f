//! Generic document tree.
//!
//! Decoded documents are plain `serde_json::Value`s built with the
//! `preserve_order` feature, so mapping keys keep their source order.

pub mod path;

pub use path::{Path, Segment};

use serde_json::{Map, Value};

/// A decoded document, before any typed binding.
pub type Tree = Value;

/// Ordered string-keyed mapping node.
pub type Mapping = Map<String, Value>;

/// Human-readable kind name used in error messages.
pub fn kind_name(node: &Tree) -> &'static str {
    match node {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Render a scalar the way it reads in a `KEY=VALUE` entry.
///
/// Containers fall back to their JSON text.
pub fn scalar_to_string(node: &Tree) -> String {
    match node {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Visit every string scalar of a tree together with its path.
///
/// Mapping keys are not visited.
pub fn walk_strings<E>(
    node: &Tree,
    path: &Path,
    visit: &mut impl FnMut(&str, &Path) -> Result<(), E>,
) -> Result<(), E> {
    match node {
        Value::String(s) => visit(s, path),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk_strings(item, &path.index(i), visit)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, value) in map {
                walk_strings(value, &path.key(key), visit)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
