//! Magma certifier binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use magma_certifier::cli::{Cli, Commands};
use magma_certifier::commands::{
    BundleCommand, CaCommand, CsrCommand, InspectCommand, KeyCommand, PfxCommand, RenewCommand,
    SignCommand,
};
use magma_certifier::output::OutputFormat;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_deref(), cli.log_json) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so command output on stdout stays pipeable.
fn init_tracing(level: Option<&str>, json: bool) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), magma_certifier::CertifierError> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Commands::Bundle(args) => BundleCommand::new(args).execute(&mut stdout, &format),
        Commands::Renew { bundle, kind } => RenewCommand::new(bundle, *kind).execute(&mut stdout, &format),
        Commands::Key(args) => KeyCommand::new(args).execute(&mut stdout, &format),
        Commands::Csr(args) => CsrCommand::new(args).execute(&mut stdout, &format),
        Commands::Ca(args) => CaCommand::new(args).execute(&mut stdout, &format),
        Commands::Sign(args) => SignCommand::new(args).execute(&mut stdout, &format),
        Commands::Pfx(args) => PfxCommand::new(args).execute(&mut stdout, &format),
        Commands::Inspect { cert } => InspectCommand::new(cert).execute(&mut stdout, &format),
    }
}
