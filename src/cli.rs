//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// converge - wait for remote resources to settle
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Drive eventually-consistent resources to a target state")]
#[command(
    long_about = "converge polls remote resources until they reach a target state or disappear, \
                  and retries mutating calls that fail for transient reasons. The simulate \
                  command exercises the engine against an in-memory cache control plane."
)]
pub struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. "debug" or "converge_reconciler=trace"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and tear down simulated cache clusters and their subnet group
    Simulate {
        /// Number of cache clusters
        #[arg(short, long, default_value_t = 2)]
        clusters: usize,

        /// Timing configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Time a new cluster spends in `creating`
        #[arg(long, default_value_t = 2000)]
        create_latency_ms: u64,

        /// Time a deleted cluster spends in `deleting`
        #[arg(long, default_value_t = 1500)]
        delete_latency_ms: u64,

        /// Override the wait timeout from the configuration
        #[arg(long)]
        wait_timeout_ms: Option<u64>,

        /// Override the minimum poll interval from the configuration
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Run on virtual time (sleeps return immediately)
        #[arg(long, default_value_t = false)]
        virtual_time: bool,

        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Parse and validate a timing configuration file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },
}
