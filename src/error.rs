//! Structured error types for the model assembly pipeline.

use serde::Serialize;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Merge errors
    PathTypeMismatch,
    InvalidEntry,

    // Template errors
    MalformedTemplate,
    MissingRequiredVariable,
    MissingNamedMapping,
    InvalidKey,

    // Structural errors
    DependencyCycle,
    AnchorCycle,

    // Input errors
    DecodeError,
}

/// Errors raised by the core pipeline.
///
/// Every component returns the first error it meets and stops; there is no
/// best-effort partial result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Base and override disagree on node kind and no rule reconciles them.
    #[error("cannot merge {override_kind} into {base_kind} at {path}")]
    PathTypeMismatch {
        path: String,
        base_kind: &'static str,
        override_kind: &'static str,
    },

    /// A `${...}` fragment matches none of the supported forms.
    #[error("invalid template: {fragment:?}")]
    MalformedTemplate { fragment: String },

    /// A `:?` / `?` variable is unset (or empty, for `:?`).
    #[error("required variable {name} is missing a value: {message}")]
    MissingRequiredVariable { name: String, message: String },

    /// `${MAP[key]}` names a mapping that was not registered.
    #[error("named mapping not found: {name}")]
    MissingNamedMapping { name: String },

    /// Named-mapping key contains characters outside `[_A-Za-z0-9.-]`.
    #[error("invalid key in named mapping: {key:?}")]
    InvalidKey { key: String },

    /// Service dependencies loop back on themselves.
    #[error("dependency cycle detected: {}", render_cycle(cycle))]
    DependencyCycle { cycle: Vec<String> },

    /// An alias re-enters the anchor that defines it.
    #[error("cycle detected: node at path {path} references node at path {anchor_path}")]
    AnchorCycle { path: String, anchor_path: String },

    /// A sequence entry cannot be keyed or normalized.
    #[error("{path}: {reason}")]
    InvalidEntry { path: String, reason: String },

    /// Substitution failed for the string at `path`.
    #[error("error while interpolating {path}: {source}")]
    Interpolation {
        path: String,
        #[source]
        source: Box<ModelError>,
    },

    /// Source text is not a well-formed YAML document.
    #[error("{document}: {reason}")]
    Decode { document: String, reason: String },
}

impl ModelError {
    pub fn type_mismatch(path: impl ToString, base_kind: &'static str, override_kind: &'static str) -> Self {
        Self::PathTypeMismatch {
            path: path.to_string(),
            base_kind,
            override_kind,
        }
    }

    pub fn malformed(fragment: impl Into<String>) -> Self {
        Self::MalformedTemplate {
            fragment: fragment.into(),
        }
    }

    pub fn missing_required(name: &str, message: impl Into<String>) -> Self {
        Self::MissingRequiredVariable {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_entry(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn decode(document: &str, reason: impl ToString) -> Self {
        Self::Decode {
            document: document.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Machine-readable code for this error.
    ///
    /// Interpolation failures report the code of the underlying cause.
    pub fn code(&self) -> ErrorCode {
        match self {
            ModelError::PathTypeMismatch { .. } => ErrorCode::PathTypeMismatch,
            ModelError::MalformedTemplate { .. } => ErrorCode::MalformedTemplate,
            ModelError::MissingRequiredVariable { .. } => ErrorCode::MissingRequiredVariable,
            ModelError::MissingNamedMapping { .. } => ErrorCode::MissingNamedMapping,
            ModelError::InvalidKey { .. } => ErrorCode::InvalidKey,
            ModelError::DependencyCycle { .. } => ErrorCode::DependencyCycle,
            ModelError::AnchorCycle { .. } => ErrorCode::AnchorCycle,
            ModelError::InvalidEntry { .. } => ErrorCode::InvalidEntry,
            ModelError::Interpolation { source, .. } => source.code(),
            ModelError::Decode { .. } => ErrorCode::DecodeError,
        }
    }

    /// Strip interpolation context and return the root cause.
    pub fn root(&self) -> &ModelError {
        match self {
            ModelError::Interpolation { source, .. } => source.root(),
            other => other,
        }
    }
}

/// `a -> b -> a`: the cycle closed back onto its first name.
fn render_cycle(cycle: &[String]) -> String {
    let mut names: Vec<&str> = cycle.iter().map(String::as_str).collect();
    if let Some(first) = cycle.first() {
        names.push(first);
    }
    names.join(" -> ")
}

/// Convenience alias for pipeline results.
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_reports_inner_code() {
        let err = ModelError::Interpolation {
            path: "services.web.image".into(),
            source: Box::new(ModelError::missing_required("TAG", "tag is required")),
        };
        assert_eq!(err.code(), ErrorCode::MissingRequiredVariable);
        assert_eq!(
            err.to_string(),
            "error while interpolating services.web.image: required variable TAG is missing a value: tag is required"
        );
        assert!(matches!(err.root(), ModelError::MissingRequiredVariable { .. }));
    }

    #[test]
    fn test_cycle_message_joins_names() {
        let err = ModelError::DependencyCycle {
            cycle: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::AnchorCycle).unwrap();
        assert_eq!(json, "\"ANCHOR_CYCLE\"");
    }
}
