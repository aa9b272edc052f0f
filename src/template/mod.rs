//! Shell-style variable substitution.
//!
//! Supported forms:
//!
//! | form              | unset         | set, empty    | set, non-empty |
//! |-------------------|---------------|---------------|----------------|
//! | `$V` / `${V}`     | `""` (warned) | `""`          | value          |
//! | `${V:-d}`         | `d`           | `d`           | value          |
//! | `${V-d}`          | `d`           | `""`          | value          |
//! | `${V:?msg}`       | error         | error         | value          |
//! | `${V?msg}`        | error         | `""`          | value          |
//! | `${V:+alt}`       | `""`          | `""`          | `alt`          |
//! | `${V+alt}`        | `""`          | `alt`         | `alt`          |
//!
//! `$$` is a literal `$`. Default, message and alternate expressions are
//! templates themselves and are only rendered when their branch is taken.
//! `${MAP[key]}` (with any trailing operator) looks `key` up in the named
//! mapping `MAP` instead of the default lookup.

mod lookup;
mod variables;

pub use lookup::{EmptyLookup, EnvLookup, Lookup, LookupFn};
pub use variables::{Variable, extract_variables, extract_variables_from_str};

use crate::error::{ModelError, Result};
use std::collections::HashMap;
use tracing::warn;

/// Substitution operator following a variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `:-`
    DefaultIfUnsetOrEmpty,
    /// `-`
    DefaultIfUnset,
    /// `:?`
    RequiredNonEmpty,
    /// `?`
    Required,
    /// `:+`
    AlternateIfNonEmpty,
    /// `+`
    AlternateIfSet,
}

impl Operator {
    const TOKENS: [(&'static str, Operator); 6] = [
        (":-", Operator::DefaultIfUnsetOrEmpty),
        ("-", Operator::DefaultIfUnset),
        (":+", Operator::AlternateIfNonEmpty),
        ("+", Operator::AlternateIfSet),
        (":?", Operator::RequiredNonEmpty),
        ("?", Operator::Required),
    ];

    pub fn token(self) -> &'static str {
        Self::TOKENS
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(token, _)| *token)
            .unwrap_or_default()
    }

    /// The operator occurring first in `text`, with its position.
    ///
    /// On a tie the two-character token wins, so `:-` is never read as `-`.
    fn earliest(text: &str) -> Option<(usize, Operator)> {
        Self::TOKENS
            .iter()
            .filter_map(|(token, op)| text.find(token).map(|at| (at, token.len(), *op)))
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(at, _, op)| (at, op))
    }
}

/// One `$NAME` / `${...}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    /// Variable name, or mapping name for `${MAP[key]}`.
    pub name: String,
    /// Key template for named-mapping lookups.
    pub key: Option<Template>,
    /// Operator and its argument template.
    pub operator: Option<(Operator, Template)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Substitution(Substitution),
}

/// A parsed template: literal text interleaved with substitutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Parse `text`. Fails on the first malformed `${...}`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(at) = rest.find('$') {
            literal.push_str(&rest[..at]);
            let after = &rest[at + 1..];

            if let Some(tail) = after.strip_prefix('$') {
                literal.push('$');
                rest = tail;
            } else if after.starts_with('{') {
                let close = closing_brace(&rest[at..]).ok_or_else(|| ModelError::malformed(&rest[at..]))?;
                let fragment = &rest[at..at + close + 1];
                let substitution = parse_braced(&fragment[2..fragment.len() - 1], fragment)?;
                flush(&mut literal, &mut parts);
                parts.push(Part::Substitution(substitution));
                rest = &rest[at + close + 1..];
            } else if let Some(name) = leading_name(after) {
                flush(&mut literal, &mut parts);
                parts.push(Part::Substitution(Substitution {
                    name: name.to_string(),
                    key: None,
                    operator: None,
                }));
                rest = &after[name.len()..];
            } else {
                // A lone `$` is plain text.
                literal.push('$');
                rest = after;
            }
        }
        literal.push_str(rest);
        flush(&mut literal, &mut parts);

        Ok(Self {
            source: text.to_string(),
            parts,
        })
    }

    /// The text this template was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template contains no substitution at all.
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    pub fn substitutions(&self) -> impl Iterator<Item = &Substitution> {
        self.parts.iter().filter_map(|p| match p {
            Part::Substitution(s) => Some(s),
            Part::Literal(_) => None,
        })
    }

    /// Render against the substitutor's lookups.
    pub fn render(&self, substitutor: &Substitutor<'_>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Substitution(s) => out.push_str(&s.resolve(substitutor)?),
            }
        }
        Ok(out)
    }
}

fn flush(literal: &mut String, parts: &mut Vec<Part>) {
    if !literal.is_empty() {
        parts.push(Part::Literal(std::mem::take(literal)));
    }
}

/// Index of the `}` closing the `${` at the start of `text`.
///
/// Nested `${` openings are counted; bare `{` are not.
fn closing_brace(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'}' {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        } else if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            depth += 1;
            i += 1;
        }
        i += 1;
    }
    None
}

/// Index of the `]` closing a named-mapping key, skipping nested `${...}`.
fn closing_bracket(text: &str) -> Option<usize> {
    let mut i = 0;
    while i < text.len() {
        let rest = &text[i..];
        if rest.starts_with("${") {
            i += closing_brace(rest)? + 1;
        } else if rest.starts_with(']') {
            return Some(i);
        } else {
            i += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    None
}

/// Longest `[_A-Za-z][_A-Za-z0-9]*` prefix.
fn leading_name(text: &str) -> Option<&str> {
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, c)) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return None,
    }
    let end = chars
        .find(|(_, c)| !(*c == '_' || c.is_ascii_alphanumeric()))
        .map_or(text.len(), |(at, _)| at);
    Some(&text[..end])
}

fn is_valid_key(key: &str) -> bool {
    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Parse the body of `${...}`. `fragment` is the whole `${...}` for errors.
fn parse_braced(body: &str, fragment: &str) -> Result<Substitution> {
    let name = leading_name(body).ok_or_else(|| ModelError::malformed(fragment))?;
    let mut rest = &body[name.len()..];

    let mut key = None;
    if let Some(after) = rest.strip_prefix('[') {
        let close = closing_bracket(after).ok_or_else(|| ModelError::malformed(fragment))?;
        key = Some(Template::parse(&after[..close])?);
        rest = &after[close + 1..];
    }

    if rest.is_empty() {
        return Ok(Substitution {
            name: name.to_string(),
            key,
            operator: None,
        });
    }

    match Operator::earliest(rest) {
        Some((0, operator)) => {
            let argument = Template::parse(&rest[operator.token().len()..])?;
            Ok(Substitution {
                name: name.to_string(),
                key,
                operator: Some((operator, argument)),
            })
        }
        _ => Err(ModelError::malformed(fragment)),
    }
}

impl Substitution {
    /// Display name used in logs and errors (`NAME` or `MAP[key]`).
    fn label(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => format!("{}[{}]", self.name, key),
            None => self.name.clone(),
        }
    }

    fn resolve(&self, substitutor: &Substitutor<'_>) -> Result<String> {
        let (value, label) = match &self.key {
            None => (substitutor.lookup.lookup(&self.name), self.name.clone()),
            Some(key) => {
                let key = key.render(substitutor)?;
                if !is_valid_key(&key) {
                    return Err(ModelError::InvalidKey { key });
                }
                let mapping = substitutor.named.get(&self.name).ok_or_else(|| {
                    ModelError::MissingNamedMapping {
                        name: self.name.clone(),
                    }
                })?;
                (mapping.lookup(&key), self.label(Some(&key)))
            }
        };

        let Some((operator, argument)) = &self.operator else {
            return Ok(value.unwrap_or_else(|| {
                warn!(variable = %label, "Variable is not set. Defaulting to a blank string.");
                String::new()
            }));
        };

        let non_empty = value.as_deref().is_some_and(|v| !v.is_empty());
        match operator {
            Operator::DefaultIfUnsetOrEmpty => match value {
                Some(v) if non_empty => Ok(v),
                _ => argument.render(substitutor),
            },
            Operator::DefaultIfUnset => match value {
                Some(v) => Ok(v),
                None => argument.render(substitutor),
            },
            Operator::RequiredNonEmpty => match value {
                Some(v) if non_empty => Ok(v),
                _ => Err(ModelError::missing_required(&label, argument.render(substitutor)?)),
            },
            Operator::Required => match value {
                Some(v) => Ok(v),
                None => Err(ModelError::missing_required(&label, argument.render(substitutor)?)),
            },
            Operator::AlternateIfNonEmpty => {
                if non_empty {
                    argument.render(substitutor)
                } else {
                    Ok(String::new())
                }
            }
            Operator::AlternateIfSet => {
                if value.is_some() {
                    argument.render(substitutor)
                } else {
                    Ok(String::new())
                }
            }
        }
    }
}

/// A default lookup plus any named mappings.
pub struct Substitutor<'a> {
    lookup: &'a dyn Lookup,
    named: HashMap<String, &'a dyn Lookup>,
}

impl<'a> Substitutor<'a> {
    pub fn new(lookup: &'a dyn Lookup) -> Self {
        Self {
            lookup,
            named: HashMap::new(),
        }
    }

    /// Register `lookup` under `name` for `${name[key]}` references.
    pub fn with_mapping(mut self, name: impl Into<String>, lookup: &'a dyn Lookup) -> Self {
        self.named.insert(name.into(), lookup);
        self
    }

    pub fn has_mapping(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn substitute(&self, text: &str) -> Result<String> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }
        Template::parse(text)?.render(self)
    }
}

/// Substitute `text` against a single lookup.
pub fn substitute(text: &str, lookup: &dyn Lookup) -> Result<String> {
    Substitutor::new(lookup).substitute(text)
}
