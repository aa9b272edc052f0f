//! `.env` file parsing.
//!
//! Syntax is whatever `dotenvy` accepts: `KEY=VALUE` lines, an optional
//! `export` prefix, single-quoted (literal) and double-quoted values,
//! comments. `$VAR` and `${VAR}` in unquoted and double-quoted values expand
//! from the process environment, then from entries earlier in the file.
//! Nothing is written to the process environment.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Parse dotenv text.
pub fn parse(text: &str) -> Result<BTreeMap<String, String>> {
    collect(dotenvy::from_read_iter(text.as_bytes()))
}

/// Read and parse a dotenv file.
pub fn read(path: &Path) -> Result<BTreeMap<String, String>> {
    let entries =
        dotenvy::from_path_iter(path).with_context(|| format!("Failed to read env file {:?}", path))?;
    collect(entries).with_context(|| format!("Failed to parse env file {:?}", path))
}

fn collect<E>(
    entries: impl IntoIterator<Item = std::result::Result<(String, String), E>>,
) -> Result<BTreeMap<String, String>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let mut vars = BTreeMap::new();
    for entry in entries {
        let (key, value) = entry.context("Invalid dotenv entry")?;
        vars.insert(key, value);
    }
    Ok(vars)
}
