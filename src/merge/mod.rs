//! Tree merge engine.
//!
//! Folds an override tree into a base tree. Mappings merge key by key,
//! sequences concatenate and scalars are replaced, unless the current path
//! matches a registered rule, in which case the rule decides everything
//! below that point.

pub mod entries;
mod rules;

use crate::error::{ModelError, Result};
use crate::tree::{Mapping, Path, Tree, kind_name};
use serde_json::Value;
use tracing::{debug, trace};

pub use rules::{
    merge_build, merge_depends_on, merge_extra_hosts, merge_logging, merge_networks, merge_ports,
    merge_to_sequence, merge_ulimit, merge_volumes, replace,
};

/// A path-triggered merge handler.
///
/// Receives the merger so it can fall back to generic merging for the
/// children it does not handle itself.
pub type MergeFn = fn(&Merger, Tree, Tree, &Path) -> Result<Tree>;

/// One registered rule.
#[derive(Clone)]
pub struct MergeRule {
    pub pattern: Path,
    pub merge: MergeFn,
}

impl std::fmt::Debug for MergeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeRule")
            .field("pattern", &self.pattern.to_string())
            .finish()
    }
}

/// Ordered table of merge rules. The first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct MergeRules {
    rules: Vec<MergeRule>,
}

impl MergeRules {
    /// A table with no rules: plain recursive merge everywhere.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a rule after the existing ones.
    pub fn with(mut self, pattern: &str, merge: MergeFn) -> Self {
        self.rules.push(MergeRule {
            pattern: Path::parse(pattern),
            merge,
        });
        self
    }

    pub fn find(&self, path: &Path) -> Option<&MergeRule> {
        self.rules.iter().find(|rule| path.matches(&rule.pattern))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rule set for Compose documents.
    pub fn compose() -> Self {
        Self::empty()
            .with("services.*.logging", merge_logging)
            .with("services.*.ports", merge_ports)
            .with("services.*.volumes", merge_volumes)
            .with("services.*.command", replace)
            .with("services.*.entrypoint", replace)
            .with("services.*.healthcheck.test", replace)
            .with("services.*.environment", merge_to_sequence)
            .with("services.*.labels", merge_to_sequence)
            .with("services.*.annotations", merge_to_sequence)
            .with("services.*.sysctls", merge_to_sequence)
            .with("services.*.dns", merge_to_sequence)
            .with("services.*.dns_search", merge_to_sequence)
            .with("services.*.dns_opt", merge_to_sequence)
            .with("services.*.tmpfs", merge_to_sequence)
            .with("services.*.env_file", merge_to_sequence)
            .with("services.*.extra_hosts", merge_extra_hosts)
            .with("services.*.build", merge_build)
            .with("services.*.build.args", merge_to_sequence)
            .with("services.*.build.labels", merge_to_sequence)
            .with("services.*.build.extra_hosts", merge_extra_hosts)
            .with("services.*.deploy.labels", merge_to_sequence)
            .with("services.*.depends_on", merge_depends_on)
            .with("services.*.networks", merge_networks)
            .with("services.*.ulimits.*", merge_ulimit)
            .with("networks.*.labels", merge_to_sequence)
            .with("volumes.*.labels", merge_to_sequence)
    }
}

/// Merges trees under an immutable rule table.
#[derive(Debug, Clone)]
pub struct Merger {
    rules: MergeRules,
}

impl Default for Merger {
    fn default() -> Self {
        Self::new(MergeRules::compose())
    }
}

impl Merger {
    pub fn new(rules: MergeRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &MergeRules {
        &self.rules
    }

    /// Merge `overlay` into `base` starting at the document root.
    pub fn merge(&self, base: Tree, overlay: Tree) -> Result<Tree> {
        self.merge_at(base, overlay, &Path::new())
    }

    /// Merge documents left to right. An empty input yields an empty mapping.
    pub fn merge_all(&self, trees: impl IntoIterator<Item = Tree>) -> Result<Tree> {
        let mut trees = trees.into_iter();
        let Some(first) = trees.next() else {
            return Ok(Value::Object(Mapping::new()));
        };
        trees.try_fold(first, |base, overlay| self.merge(base, overlay))
    }

    /// Merge at `path`, consulting the rule table first.
    pub fn merge_at(&self, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
        if let Some(rule) = self.rules.find(path) {
            debug!(path = %path, pattern = %rule.pattern, "Applying merge rule");
            return (rule.merge)(self, base, overlay, path);
        }
        self.merge_default(base, overlay, path)
    }

    /// Generic merge at `path`, ignoring any rule registered for `path`
    /// itself. Children are still merged through [`Merger::merge_at`].
    pub fn merge_default(&self, base: Tree, overlay: Tree, path: &Path) -> Result<Tree> {
        match (base, overlay) {
            (Value::Object(base), Value::Object(overlay)) => {
                self.merge_mappings(base, overlay, path).map(Value::Object)
            }
            (Value::Array(mut base), Value::Array(overlay)) => {
                base.extend(overlay);
                Ok(Value::Array(base))
            }
            // An absent base takes whatever the override brings.
            (Value::Null, overlay) => Ok(overlay),
            // A declared but empty override (`web:`) leaves a container alone.
            (base, Value::Null) if is_container(&base) => Ok(base),
            (base, overlay) if is_container(&base) || is_container(&overlay) => {
                Err(ModelError::type_mismatch(path, kind_name(&base), kind_name(&overlay)))
            }
            (_, overlay) => Ok(overlay),
        }
    }

    /// Merge two mappings key by key.
    ///
    /// Base keys keep their position; override-only keys are appended.
    /// Extension keys (`x-*`) are replaced, never merged.
    pub fn merge_mappings(&self, mut base: Mapping, overlay: Mapping, path: &Path) -> Result<Mapping> {
        for (key, value) in overlay {
            match base.get_mut(&key) {
                Some(slot) if !key.starts_with("x-") => {
                    let existing = std::mem::take(slot);
                    *slot = self.merge_at(existing, value, &path.key(&key))?;
                }
                Some(slot) => {
                    trace!(path = %path.key(&key), "Replacing extension key");
                    *slot = value;
                }
                None => {
                    base.insert(key, value);
                }
            }
        }
        Ok(base)
    }
}

fn is_container(node: &Tree) -> bool {
    matches!(node, Value::Object(_) | Value::Array(_))
}

/// Merge two trees with the Compose rule set.
pub fn merge(base: Tree, overlay: Tree) -> Result<Tree> {
    Merger::default().merge(base, overlay)
}

/// Left-fold [`merge`] over `trees`.
pub fn merge_all(trees: impl IntoIterator<Item = Tree>) -> Result<Tree> {
    Merger::default().merge_all(trees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_nested_mappings() {
        let base = json!({"a": {"x": 1, "y": 2}});
        let overlay = json!({"a": {"y": 3, "z": 4}});
        let result = merge(base, overlay).unwrap();
        assert_eq!(result, json!({"a": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn test_keys_present_on_one_side_survive() {
        let base = json!({"only_base": {"k": [1]}, "shared": 1});
        let overlay = json!({"only_override": "v", "shared": 2});
        let result = merge(base, overlay).unwrap();
        assert_eq!(result["only_base"], json!({"k": [1]}));
        assert_eq!(result["only_override"], json!("v"));
        assert_eq!(result["shared"], json!(2));
    }

    #[test]
    fn test_key_order_is_base_first() {
        let base = json!({"b": 1, "a": 1});
        let overlay = json!({"c": 2, "a": 2});
        let result = merge(base, overlay).unwrap();
        let keys: Vec<&String> = result.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_sequences_concatenate() {
        let base = json!({"services": {"web": {"cap_add": ["A", "B"]}}});
        let overlay = json!({"services": {"web": {"cap_add": ["B", "C"]}}});
        let result = merge(base, overlay).unwrap();
        assert_eq!(result["services"]["web"]["cap_add"], json!(["A", "B", "B", "C"]));
    }

    #[test]
    fn test_scalar_override_wins() {
        let result = merge(json!({"image": "nginx:1"}), json!({"image": "nginx:2"})).unwrap();
        assert_eq!(result, json!({"image": "nginx:2"}));
        let result = merge(json!({"replicas": 1}), json!({"replicas": null})).unwrap();
        assert_eq!(result, json!({"replicas": null}));
    }

    #[test]
    fn test_null_override_keeps_container_base() {
        let result = merge(json!({"a": {"x": 1}, "b": [1]}), json!({"a": null, "b": null})).unwrap();
        assert_eq!(result, json!({"a": {"x": 1}, "b": [1]}));
        let result = merge(
            json!({"services": {"web": {"ports": ["80:80"], "logging": {"driver": "syslog"}}}}),
            json!({"services": {"web": {"ports": null, "logging": null}}}),
        )
        .unwrap();
        assert_eq!(
            result,
            json!({"services": {"web": {"ports": ["80:80"], "logging": {"driver": "syslog"}}}})
        );
    }

    #[test]
    fn test_kind_mismatch_names_path() {
        let err = merge(
            json!({"services": {"web": {"healthcheck": {"interval": "5s"}}}}),
            json!({"services": {"web": {"healthcheck": ["x"]}}}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModelError::PathTypeMismatch {
                path: "services.web.healthcheck".into(),
                base_kind: "mapping",
                override_kind: "sequence",
            }
        );
    }

    #[test]
    fn test_extension_keys_replaced() {
        let result = merge(
            json!({"x-common": {"a": 1}}),
            json!({"x-common": {"b": 2}}),
        )
        .unwrap();
        assert_eq!(result, json!({"x-common": {"b": 2}}));
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let base = json!({"a": {"x": [1]}});
        let overlay = json!({"a": {"x": [2]}});
        let merged = merge(base.clone(), overlay.clone()).unwrap();
        assert_eq!(merged, json!({"a": {"x": [1, 2]}}));
        assert_eq!(base, json!({"a": {"x": [1]}}));
        assert_eq!(overlay, json!({"a": {"x": [2]}}));
    }

    #[test]
    fn test_merge_all_folds_left_to_right() {
        let result = merge_all(vec![json!({"a": 1}), json!({"b": 2}), json!({"a": 3, "c": 4})]).unwrap();
        assert_eq!(result, json!({"a": 3, "b": 2, "c": 4}));
        assert_eq!(merge_all(Vec::new()).unwrap(), json!({}));
    }

    #[test]
    fn test_empty_rule_table_concatenates_everything() {
        let merger = Merger::new(MergeRules::empty());
        let result = merger
            .merge(
                json!({"services": {"web": {"command": ["a"]}}}),
                json!({"services": {"web": {"command": ["b"]}}}),
            )
            .unwrap();
        assert_eq!(result["services"]["web"]["command"], json!(["a", "b"]));
    }

    #[test]
    fn test_first_registered_rule_wins() {
        let rules = MergeRules::empty()
            .with("a.*", replace)
            .with("a.b", merge_to_sequence);
        let merger = Merger::new(rules);
        let result = merger.merge(json!({"a": {"b": ["x"]}}), json!({"a": {"b": ["y"]}})).unwrap();
        assert_eq!(result, json!({"a": {"b": ["y"]}}));
    }
}
