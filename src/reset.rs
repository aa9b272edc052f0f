//! `!reset` / `!override` directives and anchor cycle detection.
//!
//! Directives are read from the raw document, where tags and aliases are
//! still visible. Aliases are expanded on demand from an anchor index, so
//! a directive inside an anchored subtree is recorded once for the anchor
//! and once more for every alias that reuses it. The result is a flat set
//! of independent paths; nothing in the produced tree is shared.

use crate::document::{AnchorId, RawKind, RawNode};
use crate::error::{ModelError, Result};
use crate::tree::{Mapping, Path, Segment, Tree};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

pub const RESET_TAG: &str = "!reset";
pub const OVERRIDE_TAG: &str = "!override";

const MERGE_KEY: &str = "<<";

/// Ordered, de-duplicated set of concrete paths flagged by a directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErasureSet {
    paths: Vec<Path>,
    index: HashSet<Path>,
}

impl ErasureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path. Returns `false` if it was already present.
    pub fn insert(&mut self, path: Path) -> bool {
        if !self.index.insert(path.clone()) {
            return false;
        }
        self.paths.push(path);
        true
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Proper prefixes of every entry, used to prune the apply walk.
    fn prefixes(&self) -> HashSet<Path> {
        let mut prefixes = HashSet::new();
        for path in &self.paths {
            let mut current = path.clone();
            while !current.is_empty() {
                current = current.parent();
                if !prefixes.insert(current.clone()) {
                    break;
                }
            }
        }
        prefixes
    }
}

impl Extend<Path> for ErasureSet {
    fn extend<I: IntoIterator<Item = Path>>(&mut self, iter: I) {
        for path in iter {
            self.insert(path);
        }
    }
}

impl<'a> IntoIterator for &'a ErasureSet {
    type Item = &'a Path;
    type IntoIter = std::slice::Iter<'a, Path>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

/// A raw document lowered to a [`Tree`] together with its directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub tree: Tree,
    pub erasures: ErasureSet,
}

/// Lower a raw document, expanding aliases and recording directives.
///
/// `!reset` nodes are dropped from the tree; `!override` nodes are kept.
pub fn resolve(root: &RawNode) -> Result<Resolved> {
    let mut resolver = Resolver::new(root);
    let tree = resolver
        .node(root, &Path::new())?
        .unwrap_or_else(|| Value::Object(Mapping::new()));
    debug!(erasures = resolver.erasures.len(), "Resolved raw document");
    Ok(Resolved {
        tree,
        erasures: resolver.erasures,
    })
}

/// The directive paths of a raw document.
pub fn scan_resets(root: &RawNode) -> Result<ErasureSet> {
    resolve(root).map(|resolved| resolved.erasures)
}

/// Remove every mapping key and sequence element named by `erasures`.
///
/// Paths that do not resolve in `tree` are ignored. Sequence indexes refer
/// to positions before any removal.
pub fn apply_resets(tree: Tree, erasures: &ErasureSet) -> Result<Tree> {
    if erasures.is_empty() {
        return Ok(tree);
    }
    if erasures.contains(&Path::new()) {
        return Err(ModelError::invalid_entry("<root>", "the document root cannot be reset"));
    }
    let prefixes = erasures.prefixes();
    Ok(prune(tree, &Path::new(), erasures, &prefixes))
}

fn prune(node: Tree, path: &Path, erasures: &ErasureSet, prefixes: &HashSet<Path>) -> Tree {
    if !prefixes.contains(path) {
        return node;
    }
    match node {
        Value::Object(map) => {
            let mut kept = Mapping::with_capacity(map.len());
            for (key, value) in map {
                let child = path.key(&key);
                if erasures.contains(&child) {
                    trace!(path = %child, "Reset mapping entry");
                    continue;
                }
                kept.insert(key, prune(value, &child, erasures, prefixes));
            }
            Value::Object(kept)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let child = path.index(i);
                    if erasures.contains(&child) {
                        trace!(path = %child, "Reset sequence entry");
                        return None;
                    }
                    Some(prune(item, &child, erasures, prefixes))
                })
                .collect(),
        ),
        scalar => scalar,
    }
}

struct Resolver<'a> {
    /// Anchor id to its node and the path where it is written.
    anchors: HashMap<AnchorId, (&'a RawNode, Path)>,
    /// Anchors currently being expanded through an alias.
    expanding: Vec<AnchorId>,
    erasures: ErasureSet,
}

impl<'a> Resolver<'a> {
    fn new(root: &'a RawNode) -> Self {
        let mut anchors = HashMap::new();
        index_anchors(root, &Path::new(), &mut anchors);
        Self {
            anchors,
            expanding: Vec::new(),
            erasures: ErasureSet::new(),
        }
    }

    /// Lower `node` found at `path`. `None` means the node was reset.
    fn node(&mut self, node: &'a RawNode, path: &Path) -> Result<Option<Tree>> {
        if node.has_tag(RESET_TAG) {
            debug!(path = %path, "Found !reset");
            self.erasures.insert(path.clone());
            return Ok(None);
        }
        if node.has_tag(OVERRIDE_TAG) {
            debug!(path = %path, "Found !override");
            self.erasures.insert(path.clone());
        }

        match &node.kind {
            RawKind::Scalar { .. } => Ok(node.scalar_value()),
            RawKind::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if let Some(value) = self.node(item, &path.index(i))? {
                        out.push(value);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            RawKind::Mapping(_) => {
                let entries = self.entries(node, path)?;
                let mut map = Mapping::with_capacity(entries.len());
                for (key, value) in entries {
                    if let Some(value) = self.node(value, &path.key(&key))? {
                        map.insert(key, value);
                    }
                }
                Ok(Some(Value::Object(map)))
            }
            RawKind::Alias(id) => {
                let target = self.enter(*id, path)?;
                let result = self.node(target, path);
                self.expanding.pop();
                result
            }
        }
    }

    /// Look up an alias target, failing if following it would loop.
    ///
    /// On success the anchor is pushed on the expansion stack; the caller
    /// pops it.
    fn enter(&mut self, id: AnchorId, path: &Path) -> Result<&'a RawNode> {
        let Some((target, anchor_path)) = self.anchors.get(&id).cloned() else {
            return Err(ModelError::decode(&path.to_string(), format!("unknown anchor {}", id)));
        };
        if path.starts_with(&anchor_path) || self.expanding.contains(&id) {
            return Err(ModelError::AnchorCycle {
                path: path.to_string(),
                anchor_path: anchor_path.to_string(),
            });
        }
        trace!(path = %path, anchor = %anchor_path, "Expanding alias");
        self.expanding.push(id);
        Ok(target)
    }

    /// The effective entries of a mapping, with `<<` merge keys applied.
    ///
    /// Inherited keys come first; explicit keys win over inherited ones and
    /// earlier merge sources win over later ones.
    fn entries(&mut self, node: &'a RawNode, path: &Path) -> Result<Vec<(String, &'a RawNode)>> {
        let RawKind::Mapping(raw) = &node.kind else {
            return Err(ModelError::invalid_entry(path, "merge source is not a mapping"));
        };

        let mut inherited: Vec<(String, &'a RawNode)> = Vec::new();
        let mut explicit: Vec<(String, &'a RawNode)> = Vec::new();
        for (key_node, value) in raw {
            if is_merge_key(key_node) {
                for source in self.merge_sources(value, path)? {
                    for (key, node) in source {
                        if !inherited.iter().any(|(k, _)| *k == key) {
                            inherited.push((key, node));
                        }
                    }
                }
                continue;
            }
            let key = self.key(key_node, path)?;
            if explicit.iter().any(|(k, _)| *k == key) {
                return Err(ModelError::invalid_entry(path, format!("duplicate key {:?}", key)));
            }
            explicit.push((key, value));
        }

        let mut entries = inherited;
        for (key, value) in explicit {
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => entries.push((key, value)),
            }
        }
        Ok(entries)
    }

    /// Entries of each mapping named by a `<<` value (a mapping, an alias or
    /// a sequence of those).
    fn merge_sources(&mut self, value: &'a RawNode, path: &Path) -> Result<Vec<Vec<(String, &'a RawNode)>>> {
        match &value.kind {
            RawKind::Sequence(items) => {
                let mut sources = Vec::with_capacity(items.len());
                for item in items {
                    sources.push(self.merge_source(item, path)?);
                }
                Ok(sources)
            }
            _ => Ok(vec![self.merge_source(value, path)?]),
        }
    }

    fn merge_source(&mut self, value: &'a RawNode, path: &Path) -> Result<Vec<(String, &'a RawNode)>> {
        match &value.kind {
            RawKind::Alias(id) => {
                let target = self.enter(*id, path)?;
                let result = self.entries(target, path);
                self.expanding.pop();
                result
            }
            RawKind::Mapping(_) => self.entries(value, path),
            _ => Err(ModelError::invalid_entry(
                path,
                "merge key value must be a mapping or a list of mappings",
            )),
        }
    }

    fn key(&mut self, node: &'a RawNode, path: &Path) -> Result<String> {
        match &node.kind {
            RawKind::Scalar { value, .. } => Ok(value.clone()),
            RawKind::Alias(id) => {
                let target = self.enter(*id, path)?;
                let result = self.key(target, path);
                self.expanding.pop();
                result
            }
            _ => Err(ModelError::invalid_entry(path, "mapping keys must be scalars")),
        }
    }
}

fn is_merge_key(node: &RawNode) -> bool {
    matches!(&node.kind, RawKind::Scalar { value, plain: true } if value == MERGE_KEY)
}

/// Record every anchor with the path it is written at.
///
/// Entries under a `<<` key belong to the host mapping's path.
fn index_anchors<'a>(node: &'a RawNode, path: &Path, anchors: &mut HashMap<AnchorId, (&'a RawNode, Path)>) {
    if let Some(id) = node.anchor {
        anchors.insert(id, (node, path.clone()));
    }
    match &node.kind {
        RawKind::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                index_anchors(item, &path.index(i), anchors);
            }
        }
        RawKind::Mapping(entries) => {
            for (key, value) in entries {
                if let Some(id) = key.anchor {
                    anchors.insert(id, (key, path.clone()));
                }
                if is_merge_key(key) {
                    index_merge_anchors(value, path, anchors);
                } else if let RawKind::Scalar { value: name, .. } = &key.kind {
                    index_anchors(value, &path.next(Segment::Key(name.clone())), anchors);
                } else {
                    index_anchors(value, path, anchors);
                }
            }
        }
        RawKind::Scalar { .. } | RawKind::Alias(_) => {}
    }
}

fn index_merge_anchors<'a>(value: &'a RawNode, host: &Path, anchors: &mut HashMap<AnchorId, (&'a RawNode, Path)>) {
    match &value.kind {
        RawKind::Sequence(items) => {
            for item in items {
                index_anchors(item, host, anchors);
            }
        }
        _ => index_anchors(value, host, anchors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn resolve_text(text: &str) -> Result<Resolved> {
        let doc = parse_document(text, "test.yaml")?;
        resolve(&doc.root)
    }

    fn paths(set: &ErasureSet) -> Vec<String> {
        set.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_reset_dropped_and_recorded() {
        let resolved = resolve_text(
            "services:\n  web:\n    image: nginx\n    ports: !reset []\n    command: !override [run]\n",
        )
        .unwrap();
        assert_eq!(
            resolved.tree,
            json!({"services": {"web": {"image": "nginx", "command": ["run"]}}})
        );
        assert_eq!(
            paths(&resolved.erasures),
            vec!["services.web.ports", "services.web.command"]
        );
    }

    #[test]
    fn test_erasures_reprojected_through_alias() {
        let resolved = resolve_text(
            "x-base: &base\n  environment: !reset {}\n  image: app\nservices:\n  web: *base\n  api: *base\n",
        )
        .unwrap();
        assert_eq!(
            paths(&resolved.erasures),
            vec![
                "x-base.environment",
                "services.web.environment",
                "services.api.environment",
            ]
        );
        assert_eq!(resolved.tree["services"]["api"], json!({"image": "app"}));
    }

    #[test]
    fn test_merge_key_erasures_land_on_host() {
        let resolved = resolve_text(
            "x-base: &base\n  volumes: !reset []\n  image: app\nservices:\n  web:\n    <<: *base\n    image: web\n",
        )
        .unwrap();
        assert_eq!(resolved.tree["services"]["web"], json!({"image": "web"}));
        assert!(resolved.erasures.contains(&Path::parse("services.web.volumes")));
    }

    #[test]
    fn test_merge_key_precedence() {
        let resolved = resolve_text(
            "a: &a {x: 1, y: 1}\nb: &b {y: 2, z: 2}\nc:\n  <<: [*a, *b]\n  z: 3\n",
        )
        .unwrap();
        assert_eq!(resolved.tree["c"], json!({"x": 1, "y": 1, "z": 3}));
    }

    #[test]
    fn test_self_alias_is_anchor_cycle() {
        let err = resolve_text("a: &a\n  b: *a\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::AnchorCycle);
        assert_eq!(
            err.to_string(),
            "cycle detected: node at path a.b references node at path a"
        );
    }

    #[test]
    fn test_alias_through_intermediate_anchor_is_cycle() {
        let err = resolve_text("a: &a\n  b: &b\n    c: *a\n").unwrap_err();
        assert_eq!(
            err,
            ModelError::AnchorCycle {
                path: "a.b.c".into(),
                anchor_path: "a".into(),
            }
        );
    }

    #[test]
    fn test_merge_key_self_reference_is_cycle() {
        let err = resolve_text("a: &a\n  x: 1\n  inner:\n    <<: *a\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::AnchorCycle);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = resolve_text("a: 1\na: 2\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidEntry);
    }

    #[test]
    fn test_apply_removes_keys_and_original_indexes() {
        let tree = json!({
            "services": {"web": {"ports": ["80", "443"], "dns": ["a", "b", "c"]}}
        });
        let mut erasures = ErasureSet::new();
        erasures.insert(Path::parse("services.web.ports"));
        erasures.insert(Path::parse("services.web.dns.[0]"));
        erasures.insert(Path::parse("services.web.dns.[2]"));
        erasures.insert(Path::parse("services.missing.image"));
        let result = apply_resets(tree, &erasures).unwrap();
        assert_eq!(result, json!({"services": {"web": {"dns": ["b"]}}}));
    }

    #[test]
    fn test_apply_rejects_root() {
        let mut erasures = ErasureSet::new();
        erasures.insert(Path::new());
        assert!(apply_resets(json!({}), &erasures).is_err());
    }

    #[test]
    fn test_erasure_set_dedups_in_order() {
        let mut set = ErasureSet::new();
        assert!(set.insert(Path::parse("b")));
        assert!(set.insert(Path::parse("a")));
        assert!(!set.insert(Path::parse("b")));
        assert_eq!(paths(&set), vec!["b", "a"]);
    }
}
