//! Tool host binary
//!
//! Run with: cargo run -- serve
//!
//! For help: cargo run -- --help

use std::io::IsTerminal;

use clap::Parser;
use toolhost::{Cli, run, shutdown_otel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // SIGINT/SIGTERM are handled inside `run` so live processes get cleaned up
    let result = run(&cli).await;

    // Shutdown OpenTelemetry to flush all pending spans
    shutdown_otel();

    if let Err(e) = result {
        // stdout carries tool results, errors go to stderr
        eprintln!("Error: {:#}", e);

        if std::io::stdin().is_terminal() {
            eprintln!("\nFor debugging, run with --diagnostic to log to a file.");
            eprintln!("Or use -v/-vv/-vvv for more verbose logging.");
        }

        std::process::exit(1);
    }

    Ok(())
}
