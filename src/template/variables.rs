//! Static analysis of the variables a document needs.

use super::{Operator, Template};
use crate::tree::{Path, Tree, walk_strings};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use tracing::debug;

/// A variable referenced somewhere in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    /// Raw default expression (`:-` / `-`), unsubstituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Raw alternate expression (`:+` / `+`), unsubstituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_value: Option<String>,
    /// Raw error message for `:?` / `?`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_message: Option<String>,
    pub required: bool,
}

impl Variable {
    /// Fold another reference to the same variable into this one.
    fn absorb(&mut self, other: Variable) {
        self.required |= other.required;
        if self.default_value.is_none() {
            self.default_value = other.default_value;
        }
        if self.presence_value.is_none() {
            self.presence_value = other.presence_value;
        }
        if self.required_message.is_none() {
            self.required_message = other.required_message;
        }
    }
}

/// Every variable referenced in the string scalars of `tree`.
///
/// Nothing is substituted. Strings that fail to parse are skipped.
pub fn extract_variables(tree: &Tree) -> BTreeMap<String, Variable> {
    let mut found = BTreeMap::new();
    let Ok(()) = walk_strings::<Infallible>(tree, &Path::new(), &mut |text, path| {
        if text.contains('$') {
            match Template::parse(text) {
                Ok(template) => collect(&template, &mut found),
                Err(err) => debug!(path = %path, error = %err, "Skipping unparseable template"),
            }
        }
        Ok(())
    });
    found
}

/// Variables referenced by a single template string.
pub fn extract_variables_from_str(text: &str) -> crate::error::Result<BTreeMap<String, Variable>> {
    let mut found = BTreeMap::new();
    collect(&Template::parse(text)?, &mut found);
    Ok(found)
}

fn collect(template: &Template, found: &mut BTreeMap<String, Variable>) {
    for substitution in template.substitutions() {
        if let Some(key) = &substitution.key {
            // Named mappings are not variables, but their key may reference some.
            collect(key, found);
        } else {
            let mut variable = Variable {
                name: substitution.name.clone(),
                ..Variable::default()
            };
            if let Some((operator, argument)) = &substitution.operator {
                let raw = Some(argument.source().to_string());
                match operator {
                    Operator::DefaultIfUnsetOrEmpty | Operator::DefaultIfUnset => {
                        variable.default_value = raw
                    }
                    Operator::AlternateIfNonEmpty | Operator::AlternateIfSet => {
                        variable.presence_value = raw
                    }
                    Operator::RequiredNonEmpty | Operator::Required => {
                        variable.required = true;
                        variable.required_message = raw;
                    }
                }
            }
            match found.get_mut(&variable.name) {
                Some(existing) => existing.absorb(variable),
                None => {
                    found.insert(variable.name.clone(), variable);
                }
            }
        }
        if let Some((_, argument)) = &substitution.operator {
            collect(argument, found);
        }
    }
}
