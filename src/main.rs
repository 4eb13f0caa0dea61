//! `mount-idmapped`: attach an id-mapped clone of a directory tree somewhere else.

use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mount_idmapped::Error;
use mount_idmapped::orchestrate::exec_caller_helper;

mod cli;

use cli::Cli;

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Prefix errors with the stage they happened in, unless they already name it.
fn stage_error(err: Error) -> anyhow::Error {
    let phrase = match &err {
        Error::Parse(_) => "failed to parse idmaps for mount",
        Error::Namespace(_) => "failed to create user namespace",
        _ => return err.into(),
    };
    anyhow::Error::new(err).context(phrase)
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let plan = cli.plan().map_err(stage_error)?;
    plan.run().map_err(stage_error)?;

    if let Some(idmap) = &cli.map_caller {
        return Err(exec_caller_helper(idmap)).context("failed to enter caller user namespace");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mount-idmapped: {err:#}");
            ExitCode::FAILURE
        }
    }
}
