//! Service dependency graph and cycle detection.

use crate::error::{ModelError, Result};
use crate::tree::{Path, Tree};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Directed graph from each entity to the entities it depends on.
///
/// Vertices are kept sorted by name so traversal and cycle reports are
/// reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    vertices: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from vertex names and `(dependent, dependency)` edges.
    pub fn build<N, A, B>(names: impl IntoIterator<Item = N>, edges: impl IntoIterator<Item = (A, B)>) -> Self
    where
        N: Into<String>,
        A: Into<String>,
        B: Into<String>,
    {
        let mut graph = Self::new();
        for name in names {
            graph.add_vertex(name);
        }
        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    /// Build the graph of the `services` section of a merged document.
    ///
    /// Edges come from `depends_on` (list or mapping form), `links`,
    /// `network_mode: service:<name>` and `volumes_from` entries that name
    /// a service.
    pub fn from_services(tree: &Tree) -> Result<Self> {
        let mut graph = Self::new();
        let Some(services) = tree.get("services").and_then(Value::as_object) else {
            return Ok(graph);
        };
        let root = Path::new().key("services");
        for (name, service) in services {
            graph.add_vertex(name.as_str());
            for dependency in service_dependencies(service, &root.key(name))? {
                graph.add_edge(name.as_str(), dependency);
            }
        }
        Ok(graph)
    }

    pub fn add_vertex(&mut self, name: impl Into<String>) {
        self.vertices.entry(name.into()).or_default();
    }

    /// Record that `from` depends on `to`. Unknown endpoints become vertices.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let to = to.into();
        self.add_vertex(to.clone());
        self.vertices.entry(from.into()).or_default().insert(to);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vertices.contains_key(name)
    }

    /// Direct dependencies of `name`.
    pub fn children(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.vertices.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vertices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// The first cycle found, as the names from the re-entered vertex down
    /// to the vertex that closes the loop. A self-edge yields one name.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        self.vertices
            .keys()
            .find_map(|name| self.visit(name, &mut marks, &mut stack, &mut |_| {}))
    }

    /// Fail with [`ModelError::DependencyCycle`] if the graph has a cycle.
    pub fn check(&self) -> Result<()> {
        match self.find_cycle() {
            Some(cycle) => Err(ModelError::DependencyCycle { cycle }),
            None => Ok(()),
        }
    }

    /// Names ordered so that every vertex comes after its dependencies.
    ///
    /// Ties are broken by name.
    pub fn in_dependency_order(&self) -> Result<Vec<String>> {
        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        let mut order = Vec::with_capacity(self.vertices.len());
        for name in self.vertices.keys() {
            if let Some(cycle) = self.visit(name, &mut marks, &mut stack, &mut |done| {
                order.push(done.to_string())
            }) {
                return Err(ModelError::DependencyCycle { cycle });
            }
        }
        Ok(order)
    }

    /// Three-state depth-first visit. `finished` sees vertices in post-order.
    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        finished: &mut dyn FnMut(&str),
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::InProgress) => {
                let start = stack.iter().position(|n| *n == name).unwrap_or(0);
                let cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                debug!(cycle = ?cycle, "Dependency cycle found");
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(name, Mark::InProgress);
        stack.push(name);
        for child in self.vertices.get(name).into_iter().flatten() {
            if let Some(cycle) = self.visit(child, marks, stack, finished) {
                return Some(cycle);
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        finished(name);
        None
    }
}

fn service_dependencies(service: &Tree, path: &Path) -> Result<Vec<String>> {
    let mut dependencies = Vec::new();

    match service.get("depends_on") {
        Some(Value::Object(map)) => dependencies.extend(map.keys().cloned()),
        Some(Value::Array(items)) => {
            for name in string_entries(items, &path.key("depends_on"))? {
                dependencies.push(name.to_string());
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            return Err(ModelError::invalid_entry(
                path.key("depends_on"),
                format!("expected a list or mapping, found {}", other),
            ));
        }
    }

    if let Some(Value::Array(links)) = service.get("links") {
        for link in string_entries(links, &path.key("links"))? {
            let target = link.split_once(':').map_or(link, |(service, _)| service);
            dependencies.push(target.to_string());
        }
    }

    if let Some(target) = service
        .get("network_mode")
        .and_then(Value::as_str)
        .and_then(|mode| mode.strip_prefix("service:"))
    {
        dependencies.push(target.to_string());
    }

    if let Some(Value::Array(sources)) = service.get("volumes_from") {
        for source in string_entries(sources, &path.key("volumes_from"))? {
            if source.starts_with("container:") {
                continue;
            }
            let source = source.strip_prefix("service:").unwrap_or(source);
            let target = source.split_once(':').map_or(source, |(service, _)| service);
            dependencies.push(target.to_string());
        }
    }

    Ok(dependencies)
}

fn string_entries<'a>(items: &'a [Value], path: &Path) -> Result<Vec<&'a str>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str()
                .ok_or_else(|| ModelError::invalid_entry(path.index(i), "expected a service name"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_three_cycle_reported_in_order() {
        let graph = DependencyGraph::build(["a", "b", "c"], [("a", "b"), ("b", "c"), ("c", "a")]);
        assert!(graph.has_cycle());
        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            graph.check().unwrap_err().to_string(),
            "dependency cycle detected: a -> b -> c -> a"
        );
    }

    #[test]
    fn test_self_edge_is_one_element_cycle() {
        let graph = DependencyGraph::build(["a"], [("a", "a")]);
        assert_eq!(graph.find_cycle().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_dag_has_no_cycle() {
        // Diamond: shared children are not cycles.
        let graph = DependencyGraph::build(
            ["web", "api", "worker", "db"],
            [("web", "api"), ("web", "worker"), ("api", "db"), ("worker", "db")],
        );
        assert!(!graph.has_cycle());
        assert!(graph.check().is_ok());
        assert_eq!(
            graph.in_dependency_order().unwrap(),
            vec!["db", "api", "worker", "web"]
        );
    }

    #[test]
    fn test_cycle_reported_from_reentry_point() {
        let graph = DependencyGraph::build(
            ["entry", "x", "y"],
            [("entry", "x"), ("x", "y"), ("y", "x")],
        );
        assert_eq!(graph.find_cycle().unwrap(), vec!["x", "y"]);
        assert!(graph.in_dependency_order().is_err());
    }

    #[test]
    fn test_unknown_edge_target_becomes_vertex() {
        let graph = DependencyGraph::build(["a"], [("a", "ghost")]);
        assert!(graph.contains("ghost"));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_from_services_collects_all_reference_kinds() {
        let tree = json!({
            "services": {
                "web": {"depends_on": ["api"], "links": ["cache:redis"]},
                "api": {"depends_on": {"db": {"condition": "service_healthy"}}},
                "sidecar": {"network_mode": "service:web", "volumes_from": ["api:ro", "container:abc"]},
                "db": {},
                "cache": {}
            }
        });
        let graph = DependencyGraph::from_services(&tree).unwrap();
        let children = |name: &str| -> Vec<String> {
            graph.children(name).unwrap().iter().cloned().collect()
        };
        assert_eq!(children("web"), vec!["api", "cache"]);
        assert_eq!(children("api"), vec!["db"]);
        assert_eq!(children("sidecar"), vec!["api", "web"]);
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_from_services_detects_cycle() {
        let tree = json!({
            "services": {
                "a": {"depends_on": ["b"]},
                "b": {"depends_on": {"a": {}}}
            }
        });
        let graph = DependencyGraph::from_services(&tree).unwrap();
        assert_eq!(
            graph.check().unwrap_err(),
            ModelError::DependencyCycle {
                cycle: vec!["a".into(), "b".into()]
            }
        );
    }
}
