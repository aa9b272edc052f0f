//! Variables subcommand: report the variables a project references.

use crate::format::{OutputFormat, render};
use crate::template::{Lookup, Variable, extract_variables};
use crate::tree::Tree;
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;

/// Arguments for the variables subcommand
#[derive(Args, Debug, Default)]
pub struct VariablesArgs {
    /// Output format: yaml (default) or json
    #[arg(long, default_value = "yaml", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Only list required variables that have no value
    #[arg(long)]
    pub missing: bool,
}

#[derive(Debug, Serialize)]
struct VariableReport {
    #[serde(flatten)]
    variable: Variable,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

/// Report the variables of an uninterpolated tree against `lookup`.
pub fn run(args: &VariablesArgs, tree: &Tree, lookup: &dyn Lookup) -> Result<String> {
    let report: BTreeMap<String, VariableReport> = extract_variables(tree)
        .into_iter()
        .map(|(name, variable)| {
            let value = lookup.lookup(&name);
            (name, VariableReport { variable, value })
        })
        .filter(|(_, report)| !args.missing || (report.variable.required && report.value.is_none()))
        .collect();
    render(&report, args.format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    #[test]
    fn test_report_includes_values_and_defaults() {
        let tree = json!({"services": {"web": {"image": "${IMAGE:-nginx}:${TAG:?tag required}"}}});
        let env: HashMap<String, String> = [("IMAGE".to_string(), "httpd".to_string())].into();
        let args = VariablesArgs {
            format: OutputFormat::Json,
            ..VariablesArgs::default()
        };
        let out: Value = serde_json::from_str(&run(&args, &tree, &env).unwrap()).unwrap();
        assert_eq!(out["IMAGE"]["default_value"], json!("nginx"));
        assert_eq!(out["IMAGE"]["value"], json!("httpd"));
        assert_eq!(out["TAG"]["required"], json!(true));
        assert!(out["TAG"].get("value").is_none());
    }

    #[test]
    fn test_missing_filter() {
        let tree = json!({"a": "${SET:?x} ${UNSET:?y} ${OPTIONAL}"});
        let env: HashMap<String, String> = [("SET".to_string(), "1".to_string())].into();
        let args = VariablesArgs {
            format: OutputFormat::Json,
            missing: true,
        };
        let out: Value = serde_json::from_str(&run(&args, &tree, &env).unwrap()).unwrap();
        let names: Vec<&String> = out.as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["UNSET"]);
    }
}
