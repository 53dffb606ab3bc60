//! # converge
//!
//! Entry point for the `converge` CLI.
//!
//! ## Shutdown
//!
//! Ctrl-C fires the shared cancel token. Every in-flight wait and retry
//! returns a cancellation error at its next check, the report is still
//! printed, and the process exits non-zero.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use converge::cli::{Cli, Commands};
use converge::sim::Latencies;
use converge::simulate::{self, SimulationOptions};
use converge_core::ConvergeConfig;
use converge_reconciler::CancelToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Simulate {
            clusters,
            config,
            create_latency_ms,
            delete_latency_ms,
            wait_timeout_ms,
            poll_interval_ms,
            virtual_time,
            json,
        } => {
            let mut config = match config {
                Some(path) => load_config(&path)?,
                None => SimulationOptions::demo_config(),
            };
            if let Some(timeout_ms) = wait_timeout_ms {
                config.wait.timeout_ms = timeout_ms;
            }
            if let Some(interval_ms) = poll_interval_ms {
                config.wait.poll_interval_ms = interval_ms;
            }
            let options = SimulationOptions {
                clusters,
                latencies: Latencies {
                    create: Duration::from_millis(create_latency_ms),
                    delete: Duration::from_millis(delete_latency_ms),
                },
                config,
                virtual_time,
            };
            run_simulation(options, json).await
        }
        Commands::CheckConfig { path } => {
            let config = load_config(&path)?;
            info!(path = %path.display(), "Configuration is valid");
            println!(
                "{}: ok (wait timeout {} ms, retry budget {} ms)",
                path.display(),
                config.wait.timeout_ms,
                config.retry.overall_timeout_ms
            );
            Ok(())
        }
    }
}

/// Logs go to stderr so `--json` output stays parseable.
fn init_tracing(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: &Path) -> Result<ConvergeConfig> {
    ConvergeConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run_simulation(options: SimulationOptions, json: bool) -> Result<()> {
    let cancel = CancelToken::new();
    tokio::spawn(wait_for_shutdown(cancel.clone()));

    let report = simulate::run(options, cancel)
        .await
        .context("Simulation failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print!("{}", report.render_text());
    }

    let failures = report.failures();
    if failures > 0 {
        bail!("{failures} resource(s) did not converge");
    }
    Ok(())
}

async fn wait_for_shutdown(cancel: CancelToken) {
    if signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, cancelling in-flight waits");
        cancel.cancel();
    }
}
