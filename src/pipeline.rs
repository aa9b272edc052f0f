//! Model assembly: decode, interpolation, fold, unicity, consistency.

use crate::document::parse_documents;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::interpolation::interpolate;
use crate::merge::{MergeRules, Merger};
use crate::reset::{ErasureSet, Resolved, apply_resets, resolve};
use crate::template::Substitutor;
use crate::tree::{Mapping, Tree};
use crate::unicity::{UnicityRules, enforce_unicity_with};
use serde_json::Value;
use tracing::{debug, info};

/// Pipeline settings. Rule tables are plain values owned by the pipeline.
#[derive(Debug, Clone)]
pub struct Options {
    pub merge_rules: MergeRules,
    pub unicity_rules: UnicityRules,
    /// Substitute `${...}` references in string values.
    pub interpolate: bool,
    /// Build the service dependency graph and reject cycles.
    pub consistency: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            merge_rules: MergeRules::compose(),
            unicity_rules: UnicityRules::compose(),
            interpolate: true,
            consistency: true,
        }
    }
}

/// One source text and the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub text: String,
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// The assembled model.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub tree: Tree,
    /// Every directive path seen across all documents.
    pub erasures: ErasureSet,
    /// Service names; dependencies first when consistency checks ran,
    /// document order otherwise.
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    options: Options,
    merger: Merger,
}

impl Pipeline {
    pub fn new(options: Options) -> Self {
        let merger = Merger::new(options.merge_rules.clone());
        Self { options, merger }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Assemble a model from source texts, merged left to right.
    ///
    /// A text may hold several YAML documents; they fold in stream order.
    pub fn load(&self, documents: &[Document], substitutor: &Substitutor<'_>) -> Result<Model> {
        let mut resolved = Vec::new();
        for document in documents {
            let raw = parse_documents(&document.text, &document.name)?;
            info!(document = %document.name, count = raw.len(), "Decoded document");
            for doc in raw {
                resolved.push(resolve(&doc.root)?);
            }
        }
        self.assemble(resolved, substitutor)
    }

    /// Assemble a model from already resolved documents.
    ///
    /// Each document is interpolated on its own before the fold, so merge
    /// and unicity keys compare substituted values.
    pub fn assemble(
        &self,
        documents: impl IntoIterator<Item = Resolved>,
        substitutor: &Substitutor<'_>,
    ) -> Result<Model> {
        let documents = documents
            .into_iter()
            .map(|Resolved { tree, erasures }| {
                let tree = if self.options.interpolate {
                    interpolate(tree, substitutor)?
                } else {
                    tree
                };
                Ok(Resolved { tree, erasures })
            })
            .collect::<Result<Vec<_>>>()?;

        let (tree, erasures) = self.fold(documents)?;
        let tree = enforce_unicity_with(tree, &self.options.unicity_rules)?;

        let services = if self.options.consistency {
            DependencyGraph::from_services(&tree)?.in_dependency_order()?
        } else {
            service_names(&tree)
        };
        debug!(services = services.len(), "Model assembled");

        Ok(Model {
            tree,
            erasures,
            services,
        })
    }

    /// Merge documents left to right.
    ///
    /// Each document's directives are applied to the accumulated base
    /// before the document is merged into it.
    pub fn fold(&self, documents: impl IntoIterator<Item = Resolved>) -> Result<(Tree, ErasureSet)> {
        let mut base: Option<Tree> = None;
        let mut all = ErasureSet::new();
        for Resolved { tree, erasures } in documents {
            base = Some(match base {
                None => tree,
                Some(current) => {
                    let current = apply_resets(current, &erasures)?;
                    self.merger.merge(current, tree)?
                }
            });
            all.extend(erasures.iter().cloned());
        }
        Ok((base.unwrap_or_else(|| Value::Object(Mapping::new())), all))
    }
}

fn service_names(tree: &Tree) -> Vec<String> {
    tree.get("services")
        .and_then(Value::as_object)
        .map(|services| services.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ModelError};
    use crate::template::EmptyLookup;
    use serde_json::json;
    use std::collections::HashMap;

    fn load(docs: &[(&str, &str)]) -> Result<Model> {
        let env: HashMap<String, String> = [("TAG".to_string(), "1.25".to_string())].into();
        let substitutor = Substitutor::new(&env);
        let documents: Vec<Document> = docs.iter().map(|(n, t)| Document::new(*n, *t)).collect();
        Pipeline::default().load(&documents, &substitutor)
    }

    #[test]
    fn test_override_file_merges_over_base() {
        let model = load(&[
            (
                "compose.yaml",
                "services:\n  web:\n    image: nginx:${TAG}\n    ports: ['8080:80']\n    depends_on: [db]\n  db:\n    image: postgres\n",
            ),
            (
                "compose.override.yaml",
                "services:\n  web:\n    ports: ['8080:80', '443:443']\n    environment: [DEBUG=1]\n",
            ),
        ])
        .unwrap();
        assert_eq!(model.tree["services"]["web"]["image"], json!("nginx:1.25"));
        assert_eq!(model.tree["services"]["web"]["ports"].as_array().unwrap().len(), 2);
        assert_eq!(model.services, vec!["db", "web"]);
    }

    #[test]
    fn test_reset_clears_base_value() {
        let model = load(&[
            ("a.yaml", "services:\n  web:\n    image: a\n    ports: ['80:80']\n"),
            ("b.yaml", "services:\n  web:\n    ports: !reset []\n"),
        ])
        .unwrap();
        assert_eq!(model.tree, json!({"services": {"web": {"image": "a"}}}));
    }

    #[test]
    fn test_override_replaces_base_value() {
        let model = load(&[
            ("a.yaml", "services:\n  web:\n    command: [a, b]\n"),
            ("b.yaml", "services:\n  web:\n    command: !override [c]\n"),
        ])
        .unwrap();
        assert_eq!(model.tree["services"]["web"]["command"], json!(["c"]));
        assert!(model.erasures.contains(&"services.web.command".into()));
    }

    #[test]
    fn test_multi_document_stream_folds_in_order() {
        let model = load(&[("all.yaml", "services:\n  a: {image: x}\n---\nservices:\n  a: {image: y}\n")]).unwrap();
        assert_eq!(model.tree["services"]["a"]["image"], json!("y"));
    }

    #[test]
    fn test_cycle_rejected_unless_disabled() {
        let docs = [Document::new(
            "c.yaml",
            "services:\n  a: {depends_on: [b]}\n  b: {depends_on: [a]}\n",
        )];
        let err = Pipeline::default()
            .load(&docs, &Substitutor::new(&EmptyLookup))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyCycle);

        let pipeline = Pipeline::new(Options {
            consistency: false,
            ..Options::default()
        });
        let model = pipeline.load(&docs, &Substitutor::new(&EmptyLookup)).unwrap();
        assert_eq!(model.services, vec!["a", "b"]);
    }

    #[test]
    fn test_interpolation_can_be_disabled() {
        let docs = [Document::new("a.yaml", "services:\n  a: {image: '${MISSING:?required}'}\n")];
        let err = Pipeline::default()
            .load(&docs, &Substitutor::new(&EmptyLookup))
            .unwrap_err();
        assert!(matches!(err, ModelError::Interpolation { .. }));

        let pipeline = Pipeline::new(Options {
            interpolate: false,
            ..Options::default()
        });
        let model = pipeline.load(&docs, &Substitutor::new(&EmptyLookup)).unwrap();
        assert_eq!(model.tree["services"]["a"]["image"], json!("${MISSING:?required}"));
    }

    #[test]
    fn test_type_mismatch_surfaces() {
        let err = load(&[
            ("a.yaml", "services:\n  web:\n    healthcheck: {interval: 5s}\n"),
            ("b.yaml", "services:\n  web:\n    healthcheck: [CMD, true]\n"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PathTypeMismatch);
    }

    #[test]
    fn test_empty_service_override_keeps_base() {
        let model = load(&[
            ("a.yaml", "services:\n  web:\n    image: a\n"),
            ("b.yaml", "services:\n  web:\n"),
        ])
        .unwrap();
        assert_eq!(model.tree, json!({"services": {"web": {"image": "a"}}}));
        assert_eq!(model.services, vec!["web"]);
    }

    #[test]
    fn test_volume_with_default_reference_loads() {
        let text = "services:\n  web:\n    volumes: ['${DATA:-./data}:/data']\n";
        let model = load(&[("a.yaml", text)]).unwrap();
        assert_eq!(model.tree["services"]["web"]["volumes"], json!(["./data:/data"]));

        let pipeline = Pipeline::new(Options {
            interpolate: false,
            consistency: false,
            ..Options::default()
        });
        let model = pipeline
            .load(&[Document::new("a.yaml", text)], &Substitutor::new(&EmptyLookup))
            .unwrap();
        assert_eq!(model.tree["services"]["web"]["volumes"], json!(["${DATA:-./data}:/data"]));
    }

    #[test]
    fn test_ports_collapse_after_substitution() {
        let model = load(&[
            ("a.yaml", "services:\n  web:\n    ports: ['${P:-8080}:80']\n"),
            ("b.yaml", "services:\n  web:\n    ports: ['8080:80']\n"),
        ])
        .unwrap();
        assert_eq!(
            model.tree["services"]["web"]["ports"],
            json!([{"target": 80, "published": "8080"}])
        );

        let model = load(&[("a.yaml", "services:\n  web:\n    ports: ['${P:-8080}:80', '8080:80']\n")]).unwrap();
        assert_eq!(model.tree["services"]["web"]["ports"], json!(["8080:80"]));
    }

    #[test]
    fn test_no_documents_is_empty_model() {
        let model = load(&[]).unwrap();
        assert_eq!(model.tree, json!({}));
        assert!(model.services.is_empty());
    }
}
