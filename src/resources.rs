//! Cache cluster and subnet group lifecycles on top of the reconcile engine.
//!
//! The control plane signals "gone" with a not-found error; the probes here
//! turn that into [`Observation::Absent`] so deletion waits can target it.

use std::sync::Arc;

use converge_core::ConvergeConfig;
use converge_reconciler::{
    CodeClassifier, Converged, Lifecycle, Observation, RetryPolicy, RetrySpec, Target, WaitSpec,
};
use tracing::info;

use crate::error::{ReconcileError, Result};
use crate::sim::{
    ApiError, CacheCluster, ControlPlane, DEPENDENCY_VIOLATION, INVALID_CLUSTER_STATE,
    STATUS_AVAILABLE, STATUS_CREATING, STATUS_DELETING, SubnetGroup, THROTTLING,
};

/// States a cluster may pass through on its way to `available`.
pub const CLUSTER_CREATE_PENDING: [&str; 1] = [STATUS_CREATING];

/// States a cluster may report between a delete call and its disappearance.
pub const CLUSTER_DELETE_PENDING: [&str; 6] = [
    STATUS_CREATING,
    STATUS_AVAILABLE,
    STATUS_DELETING,
    "incompatible-parameters",
    "incompatible-network",
    "restore-failed",
];

/// Probe a cache cluster, mapping not-found to absence.
pub fn cluster_probe<'a>(
    plane: &'a ControlPlane,
    id: &'a str,
) -> impl FnMut() -> std::result::Result<Observation<CacheCluster>, ApiError> + 'a {
    move || match plane.describe_cache_cluster(id) {
        Ok(cluster) => {
            let status = cluster.status.clone();
            Ok(Observation::present(cluster, status))
        }
        Err(err) if err.is_not_found() => Ok(Observation::Absent),
        Err(err) => Err(err),
    }
}

/// Probe a subnet group. An existing group always reports `available`.
pub fn subnet_group_probe<'a>(
    plane: &'a ControlPlane,
    name: &'a str,
) -> impl FnMut() -> std::result::Result<Observation<SubnetGroup>, ApiError> + 'a {
    move || match plane.describe_subnet_group(name) {
        Ok(group) => Ok(Observation::present(group, STATUS_AVAILABLE)),
        Err(err) if err.is_not_found() => Ok(Observation::Absent),
        Err(err) => Err(err),
    }
}

/// Drives cache resources on one control plane through create and delete.
#[derive(Debug, Clone)]
pub struct CacheReconciler {
    plane: Arc<ControlPlane>,
    lifecycle: Lifecycle,
    config: ConvergeConfig,
}

impl CacheReconciler {
    pub const fn new(
        plane: Arc<ControlPlane>,
        lifecycle: Lifecycle,
        config: ConvergeConfig,
    ) -> Self {
        Self {
            plane,
            lifecycle,
            config,
        }
    }

    #[must_use]
    pub fn plane(&self) -> &ControlPlane {
        &self.plane
    }

    /// Create a subnet group, retrying throttled calls.
    ///
    /// # Errors
    ///
    /// Fails on any non-throttling API error or when retries run out.
    pub fn create_subnet_group(&self, name: &str, description: &str) -> Result<SubnetGroup> {
        let spec = self.retry_spec([THROTTLING])?;
        self.lifecycle
            .retrier()
            .retry_until(|| self.plane.create_subnet_group(name, description), &spec)
            .map_err(|err| ReconcileError::lifecycle(subnet_group_label(name), err.into()))
    }

    /// Create a cluster and wait until it is `available`.
    ///
    /// # Errors
    ///
    /// Fails if the create is rejected or the cluster never becomes available.
    pub fn create_cluster(&self, id: &str, subnet_group: &str) -> Result<Converged<CacheCluster>> {
        let label = cluster_label(id);
        let retry = self.retry_spec([THROTTLING])?;
        let wait = self.wait_spec(&label, CLUSTER_CREATE_PENDING, STATUS_AVAILABLE)?;
        let mut probe = cluster_probe(&self.plane, id);

        let (_, converged) = self
            .lifecycle
            .create_and_await(
                || self.plane.create_cache_cluster(id, subnet_group, 1),
                &retry,
                &mut probe,
                &wait,
            )
            .map_err(|err| ReconcileError::lifecycle(&label, err))?;
        info!(cluster = id, probes = converged.probes, "Cache cluster available");
        Ok(converged)
    }

    /// Wait for a cluster to leave `creating`, delete it, and wait until
    /// describe no longer finds it.
    ///
    /// The control plane rejects deletes while a cluster is still
    /// `creating`, so the delete is only issued once it has settled. A
    /// throttled delete, or one that races a late state change, is retried.
    ///
    /// # Errors
    ///
    /// Fails if the cluster never settles, on a permanent API error, on an
    /// unexpected state, or on a timeout.
    pub fn destroy_cluster(&self, id: &str) -> Result<Converged<CacheCluster>> {
        let label = cluster_label(id);
        let settle = self.wait_spec(&label, CLUSTER_CREATE_PENDING, STATUS_AVAILABLE)?;
        let retry = self.retry_spec([THROTTLING, INVALID_CLUSTER_STATE])?;
        let confirm = self.wait_spec(&label, CLUSTER_DELETE_PENDING, Target::Absent)?;
        let mut settle_probe = cluster_probe(&self.plane, id);
        let mut confirm_probe = cluster_probe(&self.plane, id);

        let converged = self
            .lifecycle
            .settle_then(&mut settle_probe, &settle, |_| {
                Ok(self.lifecycle.delete_and_confirm(
                    || self.plane.delete_cache_cluster(id),
                    &retry,
                    &mut confirm_probe,
                    &confirm,
                ))
            })
            .and_then(|(_, deleted)| deleted)
            .map_err(|err| ReconcileError::lifecycle(&label, err))?;
        info!(cluster = id, probes = converged.probes, "Cache cluster deleted");
        Ok(converged)
    }

    /// Delete a subnet group, retrying while clusters still depend on it.
    ///
    /// # Errors
    ///
    /// Fails on a permanent API error or when dependents outlive the retry budget.
    pub fn destroy_subnet_group(&self, name: &str) -> Result<Converged<SubnetGroup>> {
        let label = subnet_group_label(name);
        let retry = self.retry_spec([THROTTLING, DEPENDENCY_VIOLATION])?;
        let confirm = self.wait_spec(&label, [STATUS_AVAILABLE], Target::Absent)?;
        let mut probe = subnet_group_probe(&self.plane, name);

        let converged = self
            .lifecycle
            .delete_and_confirm(
                || self.plane.delete_subnet_group(name),
                &retry,
                &mut probe,
                &confirm,
            )
            .map_err(|err| ReconcileError::lifecycle(&label, err))?;
        info!(subnet_group = name, "Subnet group deleted");
        Ok(converged)
    }

    fn retry_spec<const N: usize>(
        &self,
        transient: [&str; N],
    ) -> Result<RetrySpec<CodeClassifier>> {
        let policy = RetryPolicy::from_config(&self.config.retry)?;
        Ok(RetrySpec::new(policy, CodeClassifier::transient(transient))?)
    }

    fn wait_spec<const N: usize>(
        &self,
        label: &str,
        pending: [&str; N],
        target: impl Into<Target>,
    ) -> Result<WaitSpec> {
        let spec = WaitSpec::from_config(pending, target, &self.config.wait)?
            .label(label)
            .build()?;
        Ok(spec)
    }
}

fn cluster_label(id: &str) -> String {
    format!("cache cluster {id}")
}

fn subnet_group_label(name: &str) -> String {
    format!("subnet group {name}")
}
