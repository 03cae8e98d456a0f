mod backend;
mod cli;
mod command;
mod config;
mod connection;
mod dispatch;
mod help;
mod mode;
mod parser;
mod report;
mod resolve;
mod select;
mod sqlcmd;
mod validate;

use std::{
    io::{self, IsTerminal},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::load_config_resolved;
use crate::dispatch::{DispatchOptions, dispatch};
use crate::mode::OpMode;
use crate::sqlcmd::SqlCmd;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // --help and --version are not failures
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose);

    match run(cli) {
        Ok(failures) => ExitCode::from(failures.min(u8::MAX as usize) as u8),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_ansi(io::stderr().is_terminal())
        .without_time()
        .with_target(false)
        .init();
}

/// Returns the number of databases that failed.
fn run(cli: Cli) -> Result<usize> {
    let cmd = parser::parse(&cli.args).context("Failed to parse command line arguments")?;
    validate::validate(&cmd)?;

    if cmd.mode() == OpMode::Help {
        print!("{}", help::USAGE);
        return Ok(0);
    }

    let (config, config_path) = load_config_resolved(cli.config)?;
    match &config_path {
        Some(path) => debug!(path = %path.display(), "loaded config"),
        None => debug!("no config file found, using defaults"),
    }

    let connection = cmd
        .connection_string()
        .context("Connection string not set")?;
    let backend = SqlCmd::connect(&config, connection)?;

    info!(mode = cmd.mode().keyword(), "starting");
    let options = DispatchOptions::from(&config);
    let mut out = io::stdout().lock();
    dispatch(&cmd, &backend, &options, &mut out)
}
