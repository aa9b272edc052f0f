//! Substitution over every string scalar of a tree.

use crate::error::{ModelError, Result};
use crate::template::Substitutor;
use crate::tree::{Path, Tree};
use serde_json::Value;

/// Substitute every string value in `tree`. Mapping keys are left alone.
///
/// The first failure stops the walk and is reported with the path of the
/// offending string.
pub fn interpolate(tree: Tree, substitutor: &Substitutor<'_>) -> Result<Tree> {
    interpolate_at(tree, &Path::new(), substitutor)
}

fn interpolate_at(node: Tree, path: &Path, substitutor: &Substitutor<'_>) -> Result<Tree> {
    match node {
        Value::String(text) => substitutor
            .substitute(&text)
            .map(Value::String)
            .map_err(|source| ModelError::Interpolation {
                path: path.to_string(),
                source: Box::new(source),
            }),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| interpolate_at(item, &path.index(i), substitutor))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(mut map) => {
            for (key, value) in map.iter_mut() {
                let child = std::mem::take(value);
                *value = interpolate_at(child, &path.key(key), substitutor)?;
            }
            Ok(Value::Object(map))
        }
        scalar => Ok(scalar),
    }
}
