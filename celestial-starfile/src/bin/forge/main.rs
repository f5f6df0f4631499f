//! Forge: star catalog file builder CLI
//!
//! Turns a CSV star list into HEALPix-indexed catalog files and checks
//! existing ones.

mod build;
mod cli;
mod csv_source;
mod info;
mod verify;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Build(args) => build::run(args, &cli),
        Commands::Verify(args) => verify::run(args, &cli),
        Commands::Info(args) => info::run(args),
    }
}
