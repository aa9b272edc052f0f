//! Output rendering for YAML and JSON.

use anyhow::Result;
use serde::Serialize;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format '{}'. Valid options: yaml, json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Yaml => write!(f, "yaml"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render any serializable value. JSON output is pretty-printed and ends
/// with a newline, like the YAML output.
pub fn render<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(value)?;
            out.push('\n');
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_format() {
        assert_eq!("YAML".parse::<OutputFormat>().unwrap(), OutputFormat::Yaml);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("toml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_render_keeps_key_order() {
        let tree = json!({"services": {"web": {"image": "nginx"}}, "networks": {"front": null}});
        let yaml = render(&tree, OutputFormat::Yaml).unwrap();
        assert!(yaml.find("services").unwrap() < yaml.find("networks").unwrap());
        assert!(yaml.contains("image: nginx"));

        let json = render(&tree, OutputFormat::Json).unwrap();
        assert!(json.ends_with("}\n"));
        assert_eq!(serde_json::from_str::<serde_json::Value>(&json).unwrap(), tree);
    }
}
