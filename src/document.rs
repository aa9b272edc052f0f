//! Raw YAML documents.
//!
//! The generic [`Tree`](crate::tree::Tree) forgets how a document was
//! written. Reset directives and anchor cycles can only be found on the raw
//! form, which keeps tags, anchors and unresolved aliases. This module
//! builds that form from the parser's event stream.

use crate::error::{ModelError, Result};
use saphyr_parser::{Event, Parser, ScalarStyle};
use serde_json::{Number, Value};

/// Anchor id as assigned by the parser. Ids are unique within one stream.
pub type AnchorId = usize;

/// The core-schema string tag, resolved and as written.
const STR_TAGS: [&str; 2] = ["tag:yaml.org,2002:str", "!!str"];

/// A node as written in the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub kind: RawKind,
    /// Resolved tag text, e.g. `!reset` or `tag:yaml.org,2002:str`.
    pub tag: Option<String>,
    pub anchor: Option<AnchorId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawKind {
    Scalar { value: String, plain: bool },
    Sequence(Vec<RawNode>),
    Mapping(Vec<(RawNode, RawNode)>),
    Alias(AnchorId),
}

impl RawNode {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self {
            kind: RawKind::Scalar {
                value: value.into(),
                plain: true,
            },
            tag: None,
            anchor: None,
        }
    }

    pub fn sequence(items: Vec<RawNode>) -> Self {
        Self {
            kind: RawKind::Sequence(items),
            tag: None,
            anchor: None,
        }
    }

    pub fn mapping(entries: Vec<(RawNode, RawNode)>) -> Self {
        Self {
            kind: RawKind::Mapping(entries),
            tag: None,
            anchor: None,
        }
    }

    pub fn alias(anchor: AnchorId) -> Self {
        Self {
            kind: RawKind::Alias(anchor),
            tag: None,
            anchor: None,
        }
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn anchored(mut self, anchor: AnchorId) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag.as_deref() == Some(tag)
    }

    /// Resolve a scalar to its typed value.
    ///
    /// Only plain, untagged-as-string scalars are typed; quoted and block
    /// scalars are always strings. Returns `None` for non-scalars.
    pub fn scalar_value(&self) -> Option<Value> {
        let RawKind::Scalar { value, plain } = &self.kind else {
            return None;
        };
        if !plain || STR_TAGS.iter().any(|tag| self.has_tag(tag)) {
            return Some(Value::String(value.clone()));
        }
        Some(resolve_plain(value))
    }
}

/// Core-schema resolution of a plain scalar.
fn resolve_plain(text: &str) -> Value {
    match text {
        "" | "~" | "null" | "Null" | "NULL" => return Value::Null,
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Some(number) = resolve_number(text) {
        return Value::Number(number);
    }
    Value::String(text.to_string())
}

fn resolve_number(text: &str) -> Option<Number> {
    if let Some(hex) = text.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok().map(Number::from);
    }
    if let Some(octal) = text.strip_prefix("0o") {
        return i64::from_str_radix(octal, 8).ok().map(Number::from);
    }
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    if unsigned.is_empty() || !unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if unsigned.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(int) = text.parse::<i64>() {
            return Some(Number::from(int));
        }
        if let Ok(int) = text.parse::<u64>() {
            return Some(Number::from(int));
        }
    }
    let float_like = unsigned
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'-' | b'+'))
        && unsigned.bytes().any(|b| b.is_ascii_digit());
    if float_like {
        return text.parse::<f64>().ok().and_then(Number::from_f64);
    }
    None
}

/// One document of a YAML stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    /// Display name used in errors (usually the file path).
    pub name: String,
    pub root: RawNode,
}

enum Frame {
    Sequence {
        items: Vec<RawNode>,
        tag: Option<String>,
        anchor: Option<AnchorId>,
    },
    Mapping {
        entries: Vec<(RawNode, RawNode)>,
        key: Option<RawNode>,
        tag: Option<String>,
        anchor: Option<AnchorId>,
    },
}

#[derive(Default)]
struct Builder {
    stack: Vec<Frame>,
    roots: Vec<RawNode>,
}

impl Builder {
    fn push(&mut self, node: RawNode) {
        match self.stack.last_mut() {
            None => self.roots.push(node),
            Some(Frame::Sequence { items, .. }) => items.push(node),
            Some(Frame::Mapping { entries, key, .. }) => match key.take() {
                None => *key = Some(node),
                Some(k) => entries.push((k, node)),
            },
        }
    }

    fn close(&mut self, document: &str) -> Result<()> {
        let node = match self.stack.pop() {
            Some(Frame::Sequence { items, tag, anchor }) => RawNode {
                kind: RawKind::Sequence(items),
                tag,
                anchor,
            },
            Some(Frame::Mapping {
                entries,
                key: None,
                tag,
                anchor,
            }) => RawNode {
                kind: RawKind::Mapping(entries),
                tag,
                anchor,
            },
            Some(Frame::Mapping { key: Some(_), .. }) => {
                return Err(ModelError::decode(document, "mapping key without a value"));
            }
            None => return Err(ModelError::decode(document, "unbalanced collection end")),
        };
        self.push(node);
        Ok(())
    }
}

fn anchor_id(id: usize) -> Option<AnchorId> {
    (id != 0).then_some(id)
}

/// Parse every document of a YAML stream.
pub fn parse_documents(text: &str, name: &str) -> Result<Vec<RawDocument>> {
    let mut builder = Builder::default();
    for next in Parser::new_from_str(text) {
        let (event, _) = next.map_err(|err| ModelError::decode(name, err))?;
        match event {
            Event::Scalar(value, style, anchor, tag) => builder.push(RawNode {
                kind: RawKind::Scalar {
                    value: value.to_string(),
                    plain: matches!(style, ScalarStyle::Plain),
                },
                tag: tag.as_ref().map(|t| format!("{}{}", t.handle, t.suffix)),
                anchor: anchor_id(anchor),
            }),
            Event::Alias(anchor) => builder.push(RawNode::alias(anchor)),
            Event::SequenceStart(anchor, tag) => builder.stack.push(Frame::Sequence {
                items: Vec::new(),
                tag: tag.as_ref().map(|t| format!("{}{}", t.handle, t.suffix)),
                anchor: anchor_id(anchor),
            }),
            Event::MappingStart(anchor, tag) => builder.stack.push(Frame::Mapping {
                entries: Vec::new(),
                key: None,
                tag: tag.as_ref().map(|t| format!("{}{}", t.handle, t.suffix)),
                anchor: anchor_id(anchor),
            }),
            Event::SequenceEnd | Event::MappingEnd => builder.close(name)?,
            _ => {}
        }
    }
    if !builder.stack.is_empty() {
        return Err(ModelError::decode(name, "unexpected end of stream"));
    }
    Ok(builder
        .roots
        .into_iter()
        .map(|root| RawDocument {
            name: name.to_string(),
            root,
        })
        .collect())
}

/// Parse a single-document source. An empty source is an empty mapping.
pub fn parse_document(text: &str, name: &str) -> Result<RawDocument> {
    let mut documents = parse_documents(text, name)?;
    match documents.len() {
        0 => Ok(RawDocument {
            name: name.to_string(),
            root: RawNode::mapping(Vec::new()),
        }),
        1 => Ok(documents.remove(0)),
        n => Err(ModelError::decode(
            name,
            format!("expected a single document, found {}", n),
        )),
    }
}
