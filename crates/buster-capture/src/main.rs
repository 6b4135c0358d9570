//! buster-capture: capture server runtime binary.
//! Accepts captured clients over TCP, runs one coordinated test run across
//! them and prints the event stream as JSON lines on stdout.

use clap::Parser;

mod cli;
mod reporter;
mod run;
mod server;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // stdout carries the event stream; logs go to stderr
    let filter = std::env::var("BUSTER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Run(opts) => {
            let outcome = run::run(opts.into_settings(), std::io::stdout()).await?;
            tracing::info!(outcome = %outcome, "run finished");
            let exit_code = outcome.exit_code();
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}
