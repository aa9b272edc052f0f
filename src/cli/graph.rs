//! Graph subcommand: show service dependencies.

use crate::format::{OutputFormat, render};
use crate::graph::DependencyGraph;
use crate::tree::Tree;
use anyhow::Result;
use clap::Args;
use serde::Serialize;

/// Arguments for the graph subcommand
#[derive(Args, Debug, Default)]
pub struct GraphArgs {
    /// Output format: text lines (default), yaml or json
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
struct Node<'a> {
    name: &'a str,
    depends_on: Vec<&'a str>,
}

/// List services dependencies first, each with its direct dependencies.
///
/// A cycle is an error naming the services involved.
pub fn run(args: &GraphArgs, tree: &Tree) -> Result<String> {
    let graph = DependencyGraph::from_services(tree)?;
    let order = graph.in_dependency_order()?;
    let nodes: Vec<Node<'_>> = order
        .iter()
        .map(|name| Node {
            name,
            depends_on: graph
                .children(name)
                .map(|deps| deps.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        })
        .collect();

    if let Some(format) = args.format {
        return render(&nodes, format);
    }
    let mut out = String::new();
    for node in &nodes {
        out.push_str(node.name);
        if !node.depends_on.is_empty() {
            out.push_str(" -> ");
            out.push_str(&node.depends_on.join(", "));
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_output() {
        let tree = json!({
            "services": {
                "web": {"depends_on": ["api", "cache"]},
                "api": {"depends_on": {"db": {"condition": "service_healthy"}}},
                "db": {},
                "cache": {}
            }
        });
        let out = run(&GraphArgs::default(), &tree).unwrap();
        assert_eq!(out, "db\napi -> db\ncache\nweb -> api, cache\n");
    }

    #[test]
    fn test_cycle_is_error() {
        let tree = json!({"services": {"a": {"depends_on": ["a"]}}});
        let err = run(&GraphArgs::default(), &tree).unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle detected: a -> a");
    }
}
