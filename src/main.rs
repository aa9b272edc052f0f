//! compose-model
//!
//! Assembles a multi-file Compose project into a single model and prints
//! it, its variables or its service dependency order.

use anyhow::{Context, Result};
use clap::Parser;
use compose_model::cli::config::{self, ConfigArgs};
use compose_model::cli::{Cli, Command, graph, variables};
use compose_model::loader;
use compose_model::logging::{self, LogTarget};
use compose_model::pipeline::{Options, Pipeline};
use compose_model::template::Substitutor;
use std::io::Write;
use tracing::{debug, info};

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let command = cli
        .command
        .take()
        .unwrap_or_else(|| Command::Config(ConfigArgs::default()));

    let project = loader::load(&cli.load_options(std::env::vars().collect()))?;
    info!(
        directory = %project.directory.display(),
        files = project.files.len(),
        "Project resolved"
    );
    let substitutor = Substitutor::new(&project.environment);

    let (output, destination) = match command {
        Command::Config(args) => {
            let model = Pipeline::new(cli.pipeline_options())
                .load(&project.documents, &substitutor)
                .context("Failed to assemble model")?;
            (config::run(&args, &model)?, args.output)
        }
        Command::Variables(args) => {
            let options = Options {
                interpolate: false,
                consistency: false,
                ..cli.pipeline_options()
            };
            let model = Pipeline::new(options)
                .load(&project.documents, &substitutor)
                .context("Failed to assemble model")?;
            (variables::run(&args, &model.tree, &project.environment)?, None)
        }
        Command::Graph(args) => {
            let options = Options {
                consistency: false,
                ..cli.pipeline_options()
            };
            let model = Pipeline::new(options)
                .load(&project.documents, &substitutor)
                .context("Failed to assemble model")?;
            (graph::run(&args, &model.tree)?, None)
        }
    };

    match destination {
        Some(path) => {
            std::fs::write(&path, &output).with_context(|| format!("Failed to write {:?}", path))?;
            debug!(path = %path.display(), "Wrote output");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(output.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}
