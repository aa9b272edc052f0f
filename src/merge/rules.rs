//! Path-specific merge handlers for Compose documents.

use super::Merger;
use super::entries::{port_key, port_to_long, volume_key, volume_to_long};
use crate::error::{ModelError, Result};
use crate::tree::{Mapping, Path, Tree, scalar_to_string};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Override replaces base outright.
pub fn replace(_: &Merger, _base: Tree, overlay: Tree, _path: &Path) -> Result<Tree> {
    Ok(overlay)
}

/// Logging options only make sense for the driver they were written for:
/// merge when both sides agree on the driver (or one side leaves it unset),
/// otherwise take the override block as a whole.
pub fn merge_logging(merger: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let compatible = match (base.get("driver"), overlay.get("driver")) {
                (Some(b), Some(o)) => b == o,
                _ => true,
            };
            if compatible {
                merger.merge_mappings(base, overlay, path).map(Value::Object)
            } else {
                Ok(Value::Object(overlay))
            }
        }
        (base, overlay) => merger.merge_default(base, overlay, path),
    }
}

/// Ports merge as a set keyed by `host_ip:published:target/protocol`.
pub fn merge_ports(merger: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    merge_indexed(merger, base, overlay, path, port_key, port_to_long)
}

/// Volumes merge as a set keyed by mount target.
pub fn merge_volumes(merger: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    merge_indexed(merger, base, overlay, path, volume_key, volume_to_long)
}

type KeyFn = fn(&Tree, &Path) -> Result<String>;
type NormalizeFn = fn(Tree, &Path) -> Result<Tree>;

/// Merge two sequences as a key-indexed set.
///
/// Entries keep the position of the first entry with their key. When two
/// entries share a key both are brought to long syntax and merged
/// recursively; an entry with a unique key is kept exactly as written.
///
/// Errors point into `base ++ override`: override entry `i` is reported
/// at index `base.len() + i`.
fn merge_indexed(
    merger: &Merger,
    base: Tree,
    overlay: Tree,
    path: &Path,
    key_of: KeyFn,
    normalize: NormalizeFn,
) -> Result<Tree> {
    let (base, overlay) = match (base, overlay) {
        (Value::Array(base), Value::Array(overlay)) => (base, overlay),
        (base, overlay) => return merger.merge_default(base, overlay, path),
    };

    let mut merged: Vec<Tree> = Vec::with_capacity(base.len() + overlay.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (i, entry) in base.into_iter().chain(overlay).enumerate() {
        let entry_path = path.index(i);
        let key = key_of(&entry, &entry_path)?;
        match positions.get(&key) {
            Some(&at) => {
                let at_path = path.index(at);
                let existing = normalize(std::mem::take(&mut merged[at]), &at_path)?;
                let entry = normalize(entry, &entry_path)?;
                merged[at] = merger.merge_at(existing, entry, &at_path)?;
            }
            None => {
                positions.insert(key, merged.len());
                merged.push(entry);
            }
        }
    }
    Ok(Value::Array(merged))
}

/// Both sides are read as `KEY=VALUE` sequences and concatenated.
pub fn merge_to_sequence(_: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    let mut merged = to_sequence(base, path)?;
    merged.extend(to_sequence(overlay, path)?);
    Ok(Value::Array(merged))
}

/// Like [`merge_to_sequence`], dropping override entries already in base.
pub fn merge_extra_hosts(_: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    let mut merged = to_sequence(base, path)?;
    let additions: Vec<Tree> = to_sequence(overlay, path)?
        .into_iter()
        .filter(|entry| !merged.contains(entry))
        .collect();
    merged.extend(additions);
    Ok(Value::Array(merged))
}

/// `build: ./dir` is shorthand for `build: {context: ./dir}`.
pub fn merge_build(merger: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    let to_build = |node: Tree| match node {
        Value::String(context) => Ok(json!({ "context": context })),
        Value::Object(_) | Value::Null => Ok(node),
        other => Err(ModelError::invalid_entry(
            path,
            format!("unsupported build value {}", other),
        )),
    };
    merger.merge_default(to_build(base)?, to_build(overlay)?, path)
}

/// `depends_on: [db]` means `depends_on: {db: {condition: service_started, required: true}}`.
pub fn merge_depends_on(merger: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    let default = json!({ "condition": "service_started", "required": true });
    let base = to_mapping(base, Some(&default), path)?;
    let overlay = to_mapping(overlay, Some(&default), path)?;
    merger.merge_mappings(base, overlay, path).map(Value::Object)
}

/// `networks: [front]` means `networks: {front: null}`.
pub fn merge_networks(merger: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    let base = to_mapping(base, None, path)?;
    let overlay = to_mapping(overlay, None, path)?;
    merger.merge_mappings(base, overlay, path).map(Value::Object)
}

/// `nofile: {soft: 1, hard: 2}` merges; a single number replaces.
pub fn merge_ulimit(merger: &Merger, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            merger.merge_mappings(base, overlay, path).map(Value::Object)
        }
        (_, overlay) => Ok(overlay),
    }
}

/// Read a node as a flat sequence.
///
/// A mapping becomes `KEY=VALUE` strings sorted by text (`KEY` alone for a
/// null value, one entry per element for a list value). A scalar becomes a
/// single-element sequence.
pub(crate) fn to_sequence(node: Tree, path: &Path) -> Result<Vec<Tree>> {
    match node {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, value) in map {
                match value {
                    Value::Null => entries.push(key),
                    Value::Array(values) => {
                        entries.extend(
                            values
                                .iter()
                                .map(|v| format!("{}={}", key, scalar_to_string(v))),
                        );
                    }
                    Value::Object(_) => {
                        return Err(ModelError::invalid_entry(
                            path.key(&key),
                            "nested mapping cannot be expressed as KEY=VALUE",
                        ));
                    }
                    scalar => entries.push(format!("{}={}", key, scalar_to_string(&scalar))),
                }
            }
            entries.sort();
            Ok(entries.into_iter().map(Value::String).collect())
        }
        scalar => Ok(vec![scalar]),
    }
}

/// Read a list of names as a mapping, each name bound to `default`.
fn to_mapping(node: Tree, default: Option<&Tree>, path: &Path) -> Result<Mapping> {
    match node {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        Value::Array(items) => {
            let mut map = Mapping::new();
            for (i, item) in items.into_iter().enumerate() {
                match item {
                    Value::String(name) => {
                        map.insert(name, default.cloned().unwrap_or(Value::Null));
                    }
                    other => {
                        return Err(ModelError::invalid_entry(
                            path.index(i),
                            format!("expected a name, found {}", other),
                        ));
                    }
                }
            }
            Ok(map)
        }
        other => Err(ModelError::invalid_entry(
            path,
            format!("expected a mapping or a list of names, found {}", other),
        )),
    }
}
