//! Duplicate-entry resolution for merged documents.
//!
//! Concatenating sequences during merge can leave the same logical entry
//! twice (`FOO=1` from base, `FOO=2` from override). For the sequences listed
//! in [`UnicityRules`], entries are keyed and collapsed: the first occurrence
//! keeps its position, the last occurrence provides the value.

use crate::error::{ModelError, Result};
use crate::merge::entries::{port_key, volume_key};
use crate::tree::{Path, Tree, kind_name, scalar_to_string};
use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

/// Computes the semantic key of one sequence entry.
pub type KeyFn = fn(&Tree, &Path) -> Result<String>;

#[derive(Clone)]
pub struct UnicityRule {
    pub pattern: Path,
    pub key: KeyFn,
}

impl std::fmt::Debug for UnicityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnicityRule")
            .field("pattern", &self.pattern.to_string())
            .finish()
    }
}

/// Ordered table of (pattern, key extractor) pairs.
#[derive(Debug, Clone, Default)]
pub struct UnicityRules {
    rules: Vec<UnicityRule>,
}

impl UnicityRules {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, pattern: &str, key: KeyFn) -> Self {
        self.rules.push(UnicityRule {
            pattern: Path::parse(pattern),
            key,
        });
        self
    }

    pub fn find(&self, path: &Path) -> Option<&UnicityRule> {
        self.rules.iter().find(|rule| path.matches(&rule.pattern))
    }

    /// Rules for Compose documents.
    pub fn compose() -> Self {
        Self::empty()
            .with("services.*.environment", key_value_key)
            .with("services.*.labels", key_value_key)
            .with("services.*.annotations", key_value_key)
            .with("services.*.build.args", key_value_key)
            .with("services.*.build.labels", key_value_key)
            .with("services.*.build.tags", key_value_key)
            .with("services.*.build.additional_contexts", key_value_key)
            .with("services.*.deploy.labels", key_value_key)
            .with("services.*.cap_add", key_value_key)
            .with("services.*.cap_drop", key_value_key)
            .with("services.*.dns", key_value_key)
            .with("services.*.dns_opt", key_value_key)
            .with("services.*.dns_search", key_value_key)
            .with("services.*.profiles", key_value_key)
            .with("services.*.links", key_value_key)
            .with("services.*.tmpfs", key_value_key)
            .with("services.*.sysctls", key_value_key)
            .with("services.*.networks.*.aliases", key_value_key)
            .with("services.*.networks.*.link_local_ips", key_value_key)
            .with("services.*.ports", port_key)
            .with("services.*.volumes", volume_key)
            .with("services.*.expose", expose_key)
            .with("services.*.secrets", secret_key)
            .with("services.*.configs", config_key)
            .with("services.*.env_file", env_file_key)
            .with("networks.*.labels", key_value_key)
            .with("volumes.*.labels", key_value_key)
    }
}

/// Collapse duplicate entries with the Compose rules.
pub fn enforce_unicity(tree: Tree) -> Result<Tree> {
    enforce_unicity_with(tree, &UnicityRules::compose())
}

/// Collapse duplicate entries in every sequence matched by `rules`.
pub fn enforce_unicity_with(tree: Tree, rules: &UnicityRules) -> Result<Tree> {
    enforce_at(tree, &Path::new(), rules)
}

fn enforce_at(node: Tree, path: &Path, rules: &UnicityRules) -> Result<Tree> {
    match node {
        Value::Object(mut map) => {
            for (key, value) in map.iter_mut() {
                let child = std::mem::take(value);
                *value = enforce_at(child, &path.key(key), rules)?;
            }
            Ok(Value::Object(map))
        }
        Value::Array(items) => {
            let items = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| enforce_at(item, &path.index(i), rules))
                .collect::<Result<Vec<_>>>()?;
            let Some(rule) = rules.find(path) else {
                return Ok(Value::Array(items));
            };
            let mut unique: Vec<Tree> = Vec::with_capacity(items.len());
            let mut positions: HashMap<String, usize> = HashMap::new();
            for (i, entry) in items.into_iter().enumerate() {
                let key = (rule.key)(&entry, &path.index(i))?;
                match positions.get(&key) {
                    Some(&at) => {
                        trace!(path = %path, key = %key, "Collapsing duplicate entry");
                        unique[at] = entry;
                    }
                    None => {
                        positions.insert(key, unique.len());
                        unique.push(entry);
                    }
                }
            }
            Ok(Value::Array(unique))
        }
        scalar => Ok(scalar),
    }
}

/// `KEY=VALUE` entries are keyed by `KEY`; entries without `=` by themselves.
pub fn key_value_key(entry: &Tree, path: &Path) -> Result<String> {
    match entry {
        Value::String(s) => Ok(s.split_once('=').map_or(s.as_str(), |(k, _)| k).to_string()),
        other => Err(ModelError::invalid_entry(
            path,
            format!("unexpected {} entry, expected a string", kind_name(other)),
        )),
    }
}

pub fn expose_key(entry: &Tree, path: &Path) -> Result<String> {
    match entry {
        Value::String(_) | Value::Number(_) => Ok(scalar_to_string(entry)),
        other => Err(ModelError::invalid_entry(
            path,
            format!("unsupported expose value {}", other),
        )),
    }
}

fn mount_key(default_dir: &str, entry: &Tree, path: &Path) -> Result<String> {
    match entry {
        Value::String(source) => Ok(format!("{}/{}", default_dir, source)),
        Value::Object(mount) => match mount.get("target") {
            Some(target) => Ok(scalar_to_string(target)),
            None => Ok(format!(
                "{}/{}",
                default_dir,
                mount.get("source").map(scalar_to_string).unwrap_or_default()
            )),
        },
        other => Err(ModelError::invalid_entry(
            path,
            format!("unsupported mount value {}", other),
        )),
    }
}

/// Secrets mount under `/run/secrets` unless a target is given.
pub fn secret_key(entry: &Tree, path: &Path) -> Result<String> {
    mount_key("/run/secrets", entry, path)
}

/// Configs mount at `/<source>` unless a target is given.
pub fn config_key(entry: &Tree, path: &Path) -> Result<String> {
    mount_key("", entry, path)
}

/// `env_file` entries are a path string or `{path: ..., required: ...}`.
pub fn env_file_key(entry: &Tree, path: &Path) -> Result<String> {
    match entry {
        Value::String(file) => Ok(file.clone()),
        Value::Object(spec) => spec
            .get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ModelError::invalid_entry(path, "env_file entry is missing a path")),
        other => Err(ModelError::invalid_entry(
            path,
            format!("unsupported env_file value {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(body: Tree) -> Tree {
        json!({ "services": { "web": body } })
    }

    #[test]
    fn test_first_position_last_value() {
        let tree = service(json!({"environment": ["A=1", "B=1", "A=2", "C", "B=3"]}));
        let result = enforce_unicity(tree).unwrap();
        assert_eq!(result["services"]["web"]["environment"], json!(["A=2", "B=3", "C"]));
    }

    #[test]
    fn test_output_length_is_distinct_key_count() {
        let env = json!(["X=1", "Y=1", "X=2", "X=3", "Z"]);
        let result = enforce_unicity(service(json!({"environment": env}))).unwrap();
        assert_eq!(result["services"]["web"]["environment"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_volumes_keyed_by_normalized_target() {
        let tree = service(json!({"volumes": [
            "db:/data",
            "/cache",
            {"type": "bind", "source": "./data", "target": "/data"}
        ]}));
        let result = enforce_unicity(tree).unwrap();
        assert_eq!(
            result["services"]["web"]["volumes"],
            json!([{"type": "bind", "source": "./data", "target": "/data"}, "/cache"])
        );
    }

    #[test]
    fn test_ports_keyed_by_tuple() {
        let tree = service(json!({"ports": ["80:80", "443:443", {"target": 80, "published": "80"}]}));
        let result = enforce_unicity(tree).unwrap();
        assert_eq!(
            result["services"]["web"]["ports"],
            json!([{"target": 80, "published": "80"}, "443:443"])
        );
    }

    #[test]
    fn test_unmatched_sequences_untouched() {
        let tree = service(json!({"command": ["echo", "echo"]}));
        let result = enforce_unicity(tree.clone()).unwrap();
        assert_eq!(result, tree);
    }

    #[test]
    fn test_non_string_environment_entry_rejected() {
        let err = enforce_unicity(service(json!({"environment": [{"A": 1}]}))).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidEntry {
                path: "services.web.environment.[0]".into(),
                reason: "unexpected mapping entry, expected a string".into(),
            }
        );
    }

    #[test]
    fn test_secrets_default_target() {
        let tree = service(json!({"secrets": ["token", {"source": "token"}, {"source": "other", "target": "/run/secrets/token"}]}));
        let result = enforce_unicity(tree).unwrap();
        assert_eq!(
            result["services"]["web"]["secrets"],
            json!([{"source": "other", "target": "/run/secrets/token"}])
        );
    }

    #[test]
    fn test_rules_reach_inside_sequences() {
        let rules = UnicityRules::empty().with("items.[].env", key_value_key);
        let tree = json!({"items": [{"env": ["A=1", "A=2"]}, {"env": ["B=1"]}]});
        let result = enforce_unicity_with(tree, &rules).unwrap();
        assert_eq!(result, json!({"items": [{"env": ["A=2"]}, {"env": ["B=1"]}]}));
    }

    #[test]
    fn test_custom_rule_table() {
        let rules = UnicityRules::empty().with("items", key_value_key);
        let result = enforce_unicity_with(json!({"items": ["a=1", "a=2"]}), &rules).unwrap();
        assert_eq!(result, json!({"items": ["a=2"]}));
    }
}
