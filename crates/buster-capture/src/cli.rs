//! CLI definition using clap derive.

use std::time::Duration;

use clap::{Parser, Subcommand};

use buster_capture_core::{DEFAULT_IDLE_TIMEOUT_MS, RunConfig};

use crate::run::RunSettings;

#[derive(Parser)]
#[command(name = "buster-capture", about = "Run tests across captured browsers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Wait for the expected clients, run their tests and report the result
    Run(RunOpts),
}

#[derive(clap::Args)]
pub struct RunOpts {
    /// Address captured clients connect to
    #[arg(long, env = "BUSTER_LISTEN", default_value = "127.0.0.1:1111")]
    pub listen: String,

    /// Id of a client taking part in the run (repeatable)
    #[arg(long = "client", value_name = "ID")]
    pub clients: Vec<String>,

    /// Give up on a client after this long without a message
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_MS)]
    pub idle_timeout_ms: u64,

    /// Abort the whole run after this long
    #[arg(long)]
    pub run_timeout_ms: Option<u64>,

    /// Only run tests matching this pattern (repeatable)
    #[arg(long = "filter", value_name = "PATTERN")]
    pub filters: Vec<String>,

    /// Ask clients to start their tests on their own
    #[arg(long)]
    pub auto_run: bool,

    /// Ask clients to capture console output
    #[arg(long)]
    pub capture_console: bool,

    /// Do not fail tests that make no assertions
    #[arg(long)]
    pub allow_no_assertions: bool,
}

impl RunOpts {
    pub fn into_settings(self) -> RunSettings {
        RunSettings {
            listen: self.listen,
            clients: self.clients,
            config: RunConfig {
                fail_on_no_assertions: !self.allow_no_assertions,
                auto_run: self.auto_run.then_some(true),
                filters: self.filters,
                capture_console: self.capture_console.then_some(true),
                idle_timeout_ms: self.idle_timeout_ms,
            },
            run_timeout: self.run_timeout_ms.map(Duration::from_millis),
        }
    }
}
