//! Port and volume entry normalization.
//!
//! Both lists accept a short string syntax and a long mapping syntax. Two
//! entries describe the same thing when their semantic keys agree, whichever
//! syntax they were written in.

use crate::error::{ModelError, Result};
use crate::tree::{Mapping, Path, Tree, scalar_to_string};
use serde_json::{Value, json};

const DEFAULT_PROTOCOL: &str = "tcp";

/// Semantic key of a port entry: `host_ip:published:target/protocol`.
pub fn port_key(entry: &Tree, path: &Path) -> Result<String> {
    let long = port_to_long(entry.clone(), path)?;
    let Value::Object(port) = &long else {
        return Err(ModelError::invalid_entry(path, "unsupported port entry"));
    };
    let target = port
        .get("target")
        .map(scalar_to_string)
        .ok_or_else(|| ModelError::invalid_entry(path, "service port is missing a target port"))?;
    let field = |name: &str, default: &str| {
        port.get(name)
            .map(scalar_to_string)
            .unwrap_or_else(|| default.to_string())
    };
    Ok(format!(
        "{}:{}:{}/{}",
        field("host_ip", ""),
        field("published", ""),
        target,
        field("protocol", DEFAULT_PROTOCOL)
    ))
}

/// Convert a port entry to long syntax.
///
/// Accepts a bare number, a `[[host_ip:]published:]target[/protocol]`
/// string, or an existing mapping (returned unchanged).
pub fn port_to_long(entry: Tree, path: &Path) -> Result<Tree> {
    match entry {
        Value::Object(_) => Ok(entry),
        Value::Number(_) => Ok(json!({ "target": entry })),
        Value::String(spec) => parse_short_port(&spec)
            .map(Value::Object)
            .ok_or_else(|| ModelError::invalid_entry(path, format!("invalid port {:?}", spec))),
        other => Err(ModelError::invalid_entry(
            path,
            format!("unsupported port entry {}", other),
        )),
    }
}

fn parse_short_port(spec: &str) -> Option<Mapping> {
    let (rest, protocol) = match separators(spec, b'/').last() {
        Some(&at) => (&spec[..at], Some(&spec[at + 1..])),
        None => (spec, None),
    };

    let (host_ip, rest) = match rest.strip_prefix('[') {
        // [::1]:8080:80
        Some(bracketed) => {
            let (host, after) = bracketed.split_once(']')?;
            (Some(host), after.strip_prefix(':')?)
        }
        None => (None, rest),
    };

    // The host part may itself hold colons; only the last two split.
    let colons = separators(rest, b':');
    let parts: Vec<&str> = match colons.as_slice() {
        [] => vec![rest],
        [at] => vec![&rest[..*at], &rest[at + 1..]],
        [.., first, second] => vec![&rest[..*first], &rest[first + 1..*second], &rest[second + 1..]],
    };
    let (host_ip, published, target) = match (host_ip, parts.as_slice()) {
        (None, [target]) => (None, None, *target),
        (None, [published, target]) | (Some(_), [published, target]) => {
            (host_ip, Some(*published), *target)
        }
        (None, [host, published, target]) => (Some(*host), Some(*published), *target),
        _ => return None,
    };
    if target.is_empty() {
        return None;
    }

    let mut port = Mapping::new();
    port.insert("target".into(), numeric_or_string(target));
    if let Some(published) = published.filter(|p| !p.is_empty()) {
        port.insert("published".into(), Value::String(published.to_string()));
    }
    if let Some(host_ip) = host_ip.filter(|h| !h.is_empty()) {
        port.insert("host_ip".into(), Value::String(host_ip.to_string()));
    }
    if let Some(protocol) = protocol {
        port.insert("protocol".into(), Value::String(protocol.to_string()));
    }
    Some(port)
}

fn numeric_or_string(raw: &str) -> Value {
    raw.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Semantic key of a volume entry: its mount target.
pub fn volume_key(entry: &Tree, path: &Path) -> Result<String> {
    match entry {
        Value::Object(volume) => volume
            .get("target")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ModelError::invalid_entry(path, "service volume is missing a mount target")),
        Value::String(spec) => Ok(parse_short_volume(spec, path)?
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()),
        other => Err(ModelError::invalid_entry(
            path,
            format!("unsupported volume entry {}", other),
        )),
    }
}

/// Convert a volume entry to long syntax.
pub fn volume_to_long(entry: Tree, path: &Path) -> Result<Tree> {
    match entry {
        Value::Object(_) => Ok(entry),
        Value::String(spec) => parse_short_volume(&spec, path).map(Value::Object),
        other => Err(ModelError::invalid_entry(
            path,
            format!("unsupported volume entry {}", other),
        )),
    }
}

/// Parse `[source:]target[:mode]`.
fn parse_short_volume(spec: &str, path: &Path) -> Result<Mapping> {
    let mut parts = Vec::new();
    let mut start = 0;
    for at in separators(spec, b':') {
        parts.push(&spec[start..at]);
        start = at + 1;
    }
    parts.push(&spec[start..]);
    let (source, target, mode) = match parts.as_slice() {
        [target] => (None, *target, None),
        [source, target] => (Some(*source), *target, None),
        [source, target, mode] => (Some(*source), *target, Some(*mode)),
        _ => {
            return Err(ModelError::invalid_entry(
                path,
                format!("invalid volume specification {:?}", spec),
            ));
        }
    };
    if target.is_empty() {
        return Err(ModelError::invalid_entry(
            path,
            format!("invalid volume specification {:?}: empty target", spec),
        ));
    }

    let mut volume = Mapping::new();
    let kind = match source {
        Some(s) if is_bind_source(s) => "bind",
        _ => "volume",
    };
    volume.insert("type".into(), Value::String(kind.into()));
    if let Some(source) = source {
        volume.insert("source".into(), Value::String(source.into()));
    }
    volume.insert("target".into(), Value::String(target.into()));

    let mut bind = Mapping::new();
    let mut named = Mapping::new();
    for option in mode.into_iter().flat_map(|m| m.split(',')) {
        match option {
            "ro" => {
                volume.insert("read_only".into(), Value::Bool(true));
            }
            "rw" => {}
            "z" | "Z" => {
                bind.insert("selinux".into(), Value::String(option.into()));
            }
            "nocopy" => {
                named.insert("nocopy".into(), Value::Bool(true));
            }
            "cached" | "delegated" | "consistent" => {
                volume.insert("consistency".into(), Value::String(option.into()));
            }
            "shared" | "rshared" | "slave" | "rslave" | "private" | "rprivate" => {
                bind.insert("propagation".into(), Value::String(option.into()));
            }
            other => {
                return Err(ModelError::invalid_entry(
                    path,
                    format!("invalid volume mode {:?}", other),
                ));
            }
        }
    }
    if !bind.is_empty() {
        volume.insert("bind".into(), Value::Object(bind));
    }
    if !named.is_empty() {
        volume.insert("volume".into(), Value::Object(named));
    }
    Ok(volume)
}

fn is_bind_source(source: &str) -> bool {
    source.starts_with('/') || source.starts_with('.') || source.starts_with('~')
}

/// Byte offsets of `sep` outside `${...}` references, so an unsubstituted
/// `${DATA:-./data}:/data` still splits into source and target.
fn separators(text: &str, sep: u8) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1)) {
            (b'$', Some(b'$')) => i += 1,
            (b'$', Some(b'{')) => {
                depth += 1;
                i += 1;
            }
            (b'}', _) if depth > 0 => depth -= 1,
            (b, _) if b == sep && depth == 0 => found.push(i),
            _ => {}
        }
        i += 1;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> Path {
        Path::parse("services.web.ports.[0]")
    }

    #[test]
    fn test_short_and_long_ports_share_key() {
        let short = port_key(&json!("8080:80"), &at()).unwrap();
        let long = port_key(&json!({"target": 80, "published": "8080"}), &at()).unwrap();
        assert_eq!(short, ":8080:80/tcp");
        assert_eq!(short, long);
    }

    #[test]
    fn test_port_key_components() {
        assert_eq!(port_key(&json!(80), &at()).unwrap(), "::80/tcp");
        assert_eq!(
            port_key(&json!("127.0.0.1:53:53/udp"), &at()).unwrap(),
            "127.0.0.1:53:53/udp"
        );
        assert_eq!(
            port_key(&json!("[::1]:8080:80"), &at()).unwrap(),
            "::1:8080:80/tcp"
        );
    }

    #[test]
    fn test_port_without_target_is_rejected() {
        let err = port_key(&json!({"published": "80"}), &at()).unwrap_err();
        assert!(matches!(err, ModelError::InvalidEntry { .. }));
    }

    #[test]
    fn test_short_volume_to_long() {
        let long = volume_to_long(json!("./data:/var/lib/data:ro"), &at()).unwrap();
        assert_eq!(
            long,
            json!({"type": "bind", "source": "./data", "target": "/var/lib/data", "read_only": true})
        );
        let named = volume_to_long(json!("db:/var/lib/postgres"), &at()).unwrap();
        assert_eq!(named["type"], "volume");
        let anonymous = volume_to_long(json!("/cache"), &at()).unwrap();
        assert_eq!(anonymous, json!({"type": "volume", "target": "/cache"}));
    }

    #[test]
    fn test_volume_key_normalizes_short_syntax() {
        assert_eq!(volume_key(&json!("db:/data"), &at()).unwrap(), "/data");
        assert_eq!(
            volume_key(&json!({"type": "volume", "source": "db", "target": "/data"}), &at()).unwrap(),
            "/data"
        );
    }

    #[test]
    fn test_references_do_not_split_entries() {
        let long = volume_to_long(json!("${DATA:-./data}:/data:ro"), &at()).unwrap();
        assert_eq!(long["source"], "${DATA:-./data}");
        assert_eq!(long["target"], "/data");
        assert_eq!(long["read_only"], true);
        assert_eq!(volume_key(&json!("${DATA:-./data}:/data"), &at()).unwrap(), "/data");
        assert_eq!(
            port_key(&json!("${HOST:-0.0.0.0}:${P:-8080}:80/udp"), &at()).unwrap(),
            "${HOST:-0.0.0.0}:${P:-8080}:80/udp"
        );
    }

    #[test]
    fn test_volume_options_grouped_by_kind() {
        let long = volume_to_long(json!("./src:/app:z,rshared,cached"), &at()).unwrap();
        assert_eq!(long["bind"], json!({"selinux": "z", "propagation": "rshared"}));
        assert_eq!(long["consistency"], "cached");
        let named = volume_to_long(json!("cache:/cache:nocopy"), &at()).unwrap();
        assert_eq!(named["volume"], json!({"nocopy": true}));
    }

    #[test]
    fn test_invalid_volume_mode() {
        let err = volume_to_long(json!("a:/b:bogus"), &at()).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }
}
