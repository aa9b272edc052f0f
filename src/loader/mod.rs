//! Reads compose files and environment files from disk.
//!
//! This is the only part of the crate that touches the filesystem. It
//! resolves which files make up a project, builds the variable environment
//! and hands the texts to the [`Pipeline`](crate::pipeline::Pipeline).

pub mod dotenv;

use crate::pipeline::Document;
use crate::template::Lookup;
use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Candidate file names, in lookup order.
pub const DEFAULT_FILE_NAMES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Default dotenv file, relative to the project directory.
pub const DEFAULT_ENV_FILE: &str = ".env";

#[cfg(windows)]
const DEFAULT_PATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const DEFAULT_PATH_SEPARATOR: &str = ":";

/// What to load. Every field is optional; empty means "discover".
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit compose files, in merge order.
    pub files: Vec<PathBuf>,
    /// Explicit dotenv files, later files win.
    pub env_files: Vec<PathBuf>,
    /// Base directory; defaults to the directory of the first file or the
    /// working directory.
    pub project_directory: Option<PathBuf>,
    /// The process environment. It wins over every dotenv value.
    pub environment: BTreeMap<String, String>,
}

impl LoadOptions {
    /// Options seeded with the current process environment.
    pub fn from_process_env() -> Self {
        Self {
            environment: std::env::vars().collect(),
            ..Self::default()
        }
    }
}

/// Variables visible to interpolation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

impl Lookup for Environment {
    fn lookup(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// A project ready for the pipeline.
#[derive(Debug, Clone)]
pub struct Project {
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    pub environment: Environment,
    pub documents: Vec<Document>,
}

/// Resolve files and environment, then read every compose file.
pub fn load(options: &LoadOptions) -> Result<Project> {
    let working_dir = match &options.project_directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to determine working directory")?,
    };

    let files = resolve_files(options, &working_dir)?;
    let directory = match &options.project_directory {
        Some(dir) => dir.clone(),
        None => files
            .first()
            .and_then(|f| f.parent())
            .map(Path::to_path_buf)
            .unwrap_or(working_dir),
    };

    let environment = load_environment(options, &directory)?;

    let mut documents = Vec::with_capacity(files.len());
    for file in &files {
        let text = std::fs::read_to_string(file).with_context(|| format!("Failed to read compose file {:?}", file))?;
        info!(file = %file.display(), "Loaded compose file");
        documents.push(Document::new(file.display().to_string(), text));
    }

    Ok(Project {
        directory,
        files,
        environment,
        documents,
    })
}

/// The compose files to load: explicit files, then `COMPOSE_FILE`, then
/// discovery in `dir`.
pub fn resolve_files(options: &LoadOptions, dir: &Path) -> Result<Vec<PathBuf>> {
    if !options.files.is_empty() {
        return Ok(options.files.iter().map(|f| absolutize(dir, f)).collect());
    }

    if let Some(value) = options.environment.get("COMPOSE_FILE").filter(|v| !v.is_empty()) {
        let separator = options
            .environment
            .get("COMPOSE_PATH_SEPARATOR")
            .map_or(DEFAULT_PATH_SEPARATOR, String::as_str);
        let files: Vec<PathBuf> = split_compose_file(value, separator)
            .into_iter()
            .map(|f| absolutize(dir, &f))
            .collect();
        debug!(count = files.len(), "Using COMPOSE_FILE");
        return Ok(files);
    }

    discover(dir)
}

/// Split a `COMPOSE_FILE` value. Empty items are dropped.
pub fn split_compose_file(value: &str, separator: &str) -> Vec<PathBuf> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Find the default compose file in `dir`, or any parent directory, plus
/// its `.override` sibling.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    for candidate_dir in dir.ancestors() {
        for name in DEFAULT_FILE_NAMES {
            let file = candidate_dir.join(name);
            if !file.is_file() {
                continue;
            }
            let mut files = vec![file.clone()];
            if let Some(override_file) = override_file(&file).filter(|f| f.is_file()) {
                files.push(override_file);
            }
            debug!(dir = %candidate_dir.display(), files = files.len(), "Discovered compose files");
            return Ok(files);
        }
    }
    bail!(
        "no configuration file provided: none of {} found in {:?} or its parents",
        DEFAULT_FILE_NAMES.join(", "),
        dir
    )
}

/// `compose.yaml` -> `compose.override.yaml`.
pub fn override_file(file: &Path) -> Option<PathBuf> {
    let stem = file.file_stem()?.to_str()?;
    let extension = file.extension()?.to_str()?;
    Some(file.with_file_name(format!("{}.override.{}", stem, extension)))
}

/// Dotenv values layered under the process environment.
///
/// Without explicit env files, `.env` in the project directory is used if
/// it exists.
pub fn load_environment(options: &LoadOptions, directory: &Path) -> Result<Environment> {
    let env_files: Vec<PathBuf> = if options.env_files.is_empty() {
        let default = directory.join(DEFAULT_ENV_FILE);
        if default.is_file() { vec![default] } else { Vec::new() }
    } else {
        options.env_files.iter().map(|f| absolutize(directory, f)).collect()
    };

    let mut vars = BTreeMap::new();
    for file in &env_files {
        let parsed = dotenv::read(file)?;
        info!(file = %file.display(), vars = parsed.len(), "Loaded env file");
        vars.extend(parsed);
    }
    vars.extend(options.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(Environment::new(vars))
}

fn absolutize(dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        dir.join(file)
    }
}
