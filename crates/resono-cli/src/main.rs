//! Resono CLI - offline driver for the DSP pipeline.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "resono")]
#[command(author, version, about = "Resono audio server DSP tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a WAV file through a DSP graph
    Process(commands::process::ProcessArgs),

    /// Build a pipeline from a graph file and print its layout
    Dump(commands::dump::DumpArgs),

    /// Validate a server configuration file
    Check(commands::check::CheckArgs),
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    tracing::debug!(command = ?std::mem::discriminant(&cli.command), "dispatching command");

    match cli.command {
        Commands::Process(args) => commands::process::run(args),
        Commands::Dump(args) => commands::dump::run(args),
        Commands::Check(args) => commands::check::run(args),
    }
}
