//! CLI command definitions for compose-model
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod config;
pub mod graph;
pub mod variables;

use crate::loader::LoadOptions;
use crate::pipeline::Options;
use clap::{Parser, Subcommand};
use config::ConfigArgs;
use graph::GraphArgs;
use std::collections::BTreeMap;
use std::path::PathBuf;
use variables::VariablesArgs;

/// Assemble and inspect multi-file Compose models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Compose file, repeatable; later files override earlier ones
    #[arg(short, long = "file", value_name = "FILE", global = true)]
    pub files: Vec<PathBuf>,

    /// Environment file, repeatable; replaces the default `.env`
    #[arg(long = "env-file", value_name = "FILE", global = true)]
    pub env_files: Vec<PathBuf>,

    /// Working directory for relative paths (default: first file's directory)
    #[arg(long, value_name = "DIR", global = true)]
    pub project_directory: Option<PathBuf>,

    /// Leave `${...}` references unresolved
    #[arg(long, global = true)]
    pub no_interpolate: bool,

    /// Skip the dependency cycle check
    #[arg(long, global = true)]
    pub no_consistency: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the assembled model (default if no subcommand given)
    Config(ConfigArgs),

    /// List the variables the documents reference
    Variables(VariablesArgs),

    /// Print services in dependency order
    Graph(GraphArgs),
}

impl Cli {
    /// Loader inputs from the flags and the given process environment.
    pub fn load_options(&self, environment: BTreeMap<String, String>) -> LoadOptions {
        LoadOptions {
            files: self.files.clone(),
            env_files: self.env_files.clone(),
            project_directory: self.project_directory.clone(),
            environment,
        }
    }

    pub fn pipeline_options(&self) -> Options {
        Options {
            interpolate: !self.no_interpolate,
            consistency: !self.no_consistency,
            ..Options::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeatable_files_keep_order() {
        let cli = Cli::parse_from(["compose-model", "-f", "a.yaml", "--file", "b.yaml", "config"]);
        assert_eq!(cli.files, vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]);
        assert!(matches!(cli.command, Some(Command::Config(_))));
    }

    #[test]
    fn test_pipeline_flags() {
        let cli = Cli::parse_from(["compose-model", "--no-interpolate", "graph"]);
        let options = cli.pipeline_options();
        assert!(!options.interpolate);
        assert!(options.consistency);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["compose-model", "variables", "--env-file", "x.env", "-v"]);
        assert_eq!(cli.env_files, vec![PathBuf::from("x.env")]);
        assert!(cli.verbose);
        assert_eq!(cli.log, "2");
    }
}
