//! End-to-end run: N cache clusters and the subnet group they share.
//!
//! Clusters are created and destroyed concurrently on blocking workers. On the
//! system clock the subnet group delete is issued while the clusters are still
//! going away, so it keeps hitting `DependencyViolation` until the last one is
//! gone.

use std::sync::Arc;

use converge_core::{ConvergeConfig, RetryTimingConfig, WaitTimingConfig};
use converge_reconciler::{CancelToken, Clock, Converged, Lifecycle, ManualClock, SystemClock};
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{info, warn};

use crate::error::Result;
use crate::report::{ResourceKind, ResourceReport, SimulationReport, millis};
use crate::resources::CacheReconciler;
use crate::sim::{CacheCluster, ControlPlane, Latencies, SubnetGroup};

pub const SUBNET_GROUP: &str = "converge-sim";

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub clusters: usize,
    pub latencies: Latencies,
    pub config: ConvergeConfig,
    /// Run on a manual clock: every sleep returns at once and advances time.
    pub virtual_time: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            clusters: 2,
            latencies: Latencies::default(),
            config: Self::demo_config(),
            virtual_time: false,
        }
    }
}

impl SimulationOptions {
    /// Cadences scaled to the simulated latencies rather than a real cloud.
    #[must_use]
    pub const fn demo_config() -> ConvergeConfig {
        ConvergeConfig {
            wait: WaitTimingConfig {
                timeout_ms: 60_000,
                initial_delay_ms: 500,
                poll_interval_ms: 250,
                backoff_growth: Some(1.5),
                max_poll_interval_ms: 2_000,
            },
            retry: RetryTimingConfig {
                overall_timeout_ms: 30_000,
                initial_delay_ms: 250,
                max_delay_ms: 2_000,
                multiplier: 2.0,
            },
        }
    }
}

#[must_use]
pub fn cluster_id(index: usize) -> String {
    format!("{SUBNET_GROUP}-{index:03}")
}

/// Run the simulation until every resource is gone, failed, or cancelled.
///
/// # Errors
///
/// Fails on invalid timing configuration, if the shared subnet group cannot
/// be created, or if a worker task panics. Per-resource failures are
/// recorded in the report instead.
pub async fn run(options: SimulationOptions, cancel: CancelToken) -> Result<SimulationReport> {
    options.config.validate()?;

    let clock: Arc<dyn Clock> = if options.virtual_time {
        Arc::new(ManualClock::new())
    } else {
        Arc::new(SystemClock)
    };
    let plane = Arc::new(ControlPlane::new(Arc::clone(&clock), options.latencies));
    let reconciler = Arc::new(CacheReconciler::new(
        Arc::clone(&plane),
        Lifecycle::with_parts(Arc::clone(&clock), cancel),
        options.config,
    ));
    let start = clock.now();

    info!(
        clusters = options.clusters,
        virtual_time = options.virtual_time,
        "Starting simulation"
    );

    let setup = Arc::clone(&reconciler);
    spawn_blocking(move || setup.create_subnet_group(SUBNET_GROUP, "converge simulation"))
        .await??;

    let mut reports = Vec::with_capacity(options.clusters.saturating_add(1));
    let mut live = Vec::with_capacity(options.clusters);

    let creates: Vec<_> = (0..options.clusters)
        .map(|index| {
            let reconciler = Arc::clone(&reconciler);
            let id = cluster_id(index);
            spawn_blocking(move || {
                let result = reconciler.create_cluster(&id, SUBNET_GROUP);
                (id, result)
            })
        })
        .collect();
    for handle in creates {
        let (id, result) = handle.await?;
        match result {
            Ok(_) => live.push(id),
            Err(err) => {
                warn!(cluster = %id, error = %err, "Create failed");
                reports.push(ResourceReport::failed(ResourceKind::CacheCluster, id, &err));
            }
        }
    }

    let destroys: Vec<_> = live
        .into_iter()
        .map(|id| {
            let reconciler = Arc::clone(&reconciler);
            spawn_blocking(move || {
                let result = reconciler.destroy_cluster(&id);
                (id, result)
            })
        })
        .collect();

    // Manual time jumps on every sleep, so a concurrent retry loop could
    // exhaust its budget before the cluster deletes are even submitted.
    let subnet_group = if options.virtual_time {
        collect_destroys(destroys, &mut reports).await?;
        spawn_subnet_group_delete(&reconciler).await?
    } else {
        let handle = spawn_subnet_group_delete(&reconciler);
        collect_destroys(destroys, &mut reports).await?;
        handle.await?
    };
    reports.push(match subnet_group {
        Ok(converged) => {
            ResourceReport::deleted(ResourceKind::SubnetGroup, SUBNET_GROUP, &converged)
        }
        Err(err) => {
            warn!(subnet_group = SUBNET_GROUP, error = %err, "Delete failed");
            ResourceReport::failed(ResourceKind::SubnetGroup, SUBNET_GROUP, &err)
        }
    });

    let report = SimulationReport {
        resources: reports,
        elapsed_ms: millis(clock.now().saturating_duration_since(start)),
        describe_calls: plane.describe_calls(),
        mutate_calls: plane.mutate_calls(),
    };
    info!(
        resources = report.resources.len(),
        failures = report.failures(),
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    Ok(report)
}

type DestroyHandle = JoinHandle<(String, Result<Converged<CacheCluster>>)>;

async fn collect_destroys(
    handles: Vec<DestroyHandle>,
    reports: &mut Vec<ResourceReport>,
) -> Result<()> {
    for handle in handles {
        let (id, result) = handle.await?;
        reports.push(match result {
            Ok(converged) => ResourceReport::deleted(ResourceKind::CacheCluster, id, &converged),
            Err(err) => {
                warn!(cluster = %id, error = %err, "Delete failed");
                ResourceReport::failed(ResourceKind::CacheCluster, id, &err)
            }
        });
    }
    Ok(())
}

fn spawn_subnet_group_delete(
    reconciler: &Arc<CacheReconciler>,
) -> JoinHandle<Result<Converged<SubnetGroup>>> {
    let reconciler = Arc::clone(reconciler);
    spawn_blocking(move || reconciler.destroy_subnet_group(SUBNET_GROUP))
}
