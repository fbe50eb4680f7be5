//! Rivet CLI — declarative contract deployment orchestrator.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rivet",
    version,
    about = "Declarative contract deployment — resolved DAG, durable ledger, resumable runs"
)]
struct Cli {
    /// Project configuration file
    #[arg(long, global = true, default_value = "rivet.yaml")]
    config: PathBuf,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: rivet::cli::Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = rivet::cli::dispatch(cli.command, &cli.config).await {
        eprintln!("error: {}", e);
        if let Some(action) = e.action() {
            eprintln!("  failed action: {}", action);
        }
        std::process::exit(1);
    }
}
