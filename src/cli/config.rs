//! Config subcommand: print the assembled model.

use crate::format::{OutputFormat, render};
use crate::pipeline::Model;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

/// Arguments for the config subcommand
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Output format: yaml (default) or json
    #[arg(long, default_value = "yaml", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Print only the service names, one per line
    #[arg(long)]
    pub services: bool,

    /// Write to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Render the model as requested.
pub fn run(args: &ConfigArgs, model: &Model) -> Result<String> {
    if args.services {
        let mut out = String::new();
        for name in &model.services {
            out.push_str(name);
            out.push('\n');
        }
        return Ok(out);
    }
    render(&model.tree, args.format)
}
