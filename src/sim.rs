//! In-memory, eventually-consistent cache control plane.
//!
//! Mimics the parts of a managed-cache API that make reconciliation hard:
//!
//! - clusters are `creating` for a while after the create call returns, then
//!   `available`
//! - a delete is rejected while the cluster is still `creating`, and once
//!   accepted the cluster stays `deleting` for a while before it disappears
//! - a subnet group cannot be deleted while any cluster (even a `deleting`
//!   one) still references it: the call fails with `DependencyViolation`
//! - describing a missing cluster is an error with a not-found code
//!
//! Time comes from an injected [`Clock`], so tests can drive it with a
//! `ManualClock`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use converge_reconciler::{Clock, ProviderErrorCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub const CLUSTER_NOT_FOUND: &str = "CacheClusterNotFound";
pub const SUBNET_GROUP_NOT_FOUND: &str = "CacheSubnetGroupNotFoundFault";
pub const CLUSTER_ALREADY_EXISTS: &str = "CacheClusterAlreadyExists";
pub const SUBNET_GROUP_ALREADY_EXISTS: &str = "CacheSubnetGroupAlreadyExists";
pub const INVALID_CLUSTER_STATE: &str = "InvalidCacheClusterState";
pub const DEPENDENCY_VIOLATION: &str = "DependencyViolation";
pub const INVALID_PARAMETER: &str = "InvalidParameterValue";
pub const THROTTLING: &str = "Throttling";

pub const STATUS_CREATING: &str = "creating";
pub const STATUS_AVAILABLE: &str = "available";
pub const STATUS_DELETING: &str = "deleting";

/// Error returned by the simulated API, carrying a provider error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    code: String,
    message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the error means the thing asked about does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == CLUSTER_NOT_FOUND || self.code == SUBNET_GROUP_NOT_FOUND
    }
}

impl ProviderErrorCode for ApiError {
    fn code(&self) -> Option<&str> {
        Some(&self.code)
    }
}

/// How long the simulated backend takes to converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latencies {
    pub create: Duration,
    pub delete: Duration,
}

impl Default for Latencies {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(2),
            delete: Duration::from_millis(1500),
        }
    }
}

/// Describe response for a cache cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheCluster {
    pub id: String,
    pub subnet_group: String,
    pub status: String,
    pub num_cache_nodes: u32,
}

/// Describe response for a subnet group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetGroup {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
struct ClusterRecord {
    subnet_group: String,
    num_cache_nodes: u32,
    created_at: Instant,
    deleting_since: Option<Instant>,
    forced_status: Option<String>,
}

#[derive(Debug, Default)]
struct PlaneState {
    clusters: BTreeMap<String, ClusterRecord>,
    subnet_groups: BTreeMap<String, SubnetGroup>,
    throttle_next: u32,
}

/// Counters for calls made against the plane.
#[derive(Debug, Default)]
struct CallCounts {
    describe: AtomicU64,
    mutate: AtomicU64,
}

/// The simulated remote API. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct ControlPlane {
    clock: Arc<dyn Clock>,
    latencies: Latencies,
    state: Mutex<PlaneState>,
    calls: CallCounts,
}

impl ControlPlane {
    pub fn new(clock: Arc<dyn Clock>, latencies: Latencies) -> Self {
        Self {
            clock,
            latencies,
            state: Mutex::new(PlaneState::default()),
            calls: CallCounts::default(),
        }
    }

    #[must_use]
    pub const fn latencies(&self) -> Latencies {
        self.latencies
    }

    /// Number of describe calls served so far.
    #[must_use]
    pub fn describe_calls(&self) -> u64 {
        self.calls.describe.load(Ordering::Relaxed)
    }

    /// Number of create/delete calls received so far (including rejected ones).
    #[must_use]
    pub fn mutate_calls(&self) -> u64 {
        self.calls.mutate.load(Ordering::Relaxed)
    }

    /// Reject the next `count` mutating calls with `Throttling`.
    pub fn throttle_next(&self, count: u32) {
        self.lock().throttle_next = count;
    }

    /// Pin a cluster's reported status, e.g. to `incompatible-network`.
    ///
    /// # Errors
    ///
    /// Returns `CacheClusterNotFound` for unknown clusters.
    pub fn force_status(&self, id: &str, status: impl Into<String>) -> Result<(), ApiError> {
        let mut state = self.lock();
        let record = state.clusters.get_mut(id).ok_or_else(|| cluster_not_found(id))?;
        record.forced_status = Some(status.into());
        Ok(())
    }

    /// Create a subnet group. Takes effect immediately.
    ///
    /// # Errors
    ///
    /// `CacheSubnetGroupAlreadyExists` if the name is taken.
    pub fn create_subnet_group(
        &self,
        name: &str,
        description: &str,
    ) -> Result<SubnetGroup, ApiError> {
        let mut state = self.begin_mutation()?;
        if state.subnet_groups.contains_key(name) {
            return Err(ApiError::new(
                SUBNET_GROUP_ALREADY_EXISTS,
                format!("Cache subnet group {name} already exists."),
            ));
        }
        let group = SubnetGroup {
            name: name.to_owned(),
            description: description.to_owned(),
        };
        state.subnet_groups.insert(name.to_owned(), group.clone());
        debug!(subnet_group = name, "Created subnet group");
        Ok(group)
    }

    /// Describe a subnet group.
    ///
    /// # Errors
    ///
    /// `CacheSubnetGroupNotFoundFault` if it does not exist.
    pub fn describe_subnet_group(&self, name: &str) -> Result<SubnetGroup, ApiError> {
        self.calls.describe.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        self.purge_deleted(&mut state);
        state
            .subnet_groups
            .get(name)
            .cloned()
            .ok_or_else(|| subnet_group_not_found(name))
    }

    /// Delete a subnet group.
    ///
    /// # Errors
    ///
    /// `DependencyViolation` while any cluster still references the group,
    /// `InvalidParameterValue` if no group has that name.
    pub fn delete_subnet_group(&self, name: &str) -> Result<(), ApiError> {
        let mut state = self.begin_mutation()?;
        if !state.subnet_groups.contains_key(name) {
            return Err(ApiError::new(
                INVALID_PARAMETER,
                format!("Cache subnet group {name} does not exist."),
            ));
        }
        let dependents = state
            .clusters
            .values()
            .filter(|c| c.subnet_group == name)
            .count();
        if dependents > 0 {
            return Err(ApiError::new(
                DEPENDENCY_VIOLATION,
                format!("Cache subnet group {name} is in use by {dependents} cluster(s)."),
            ));
        }
        state.subnet_groups.remove(name);
        debug!(subnet_group = name, "Deleted subnet group");
        Ok(())
    }

    /// Create a cache cluster. It reports `creating` until the create latency passes.
    ///
    /// # Errors
    ///
    /// `CacheSubnetGroupNotFoundFault` for an unknown group,
    /// `CacheClusterAlreadyExists` for a duplicate id.
    pub fn create_cache_cluster(
        &self,
        id: &str,
        subnet_group: &str,
        num_cache_nodes: u32,
    ) -> Result<CacheCluster, ApiError> {
        let now = self.clock.now();
        let mut state = self.begin_mutation()?;
        if !state.subnet_groups.contains_key(subnet_group) {
            return Err(subnet_group_not_found(subnet_group));
        }
        if state.clusters.contains_key(id) {
            return Err(ApiError::new(
                CLUSTER_ALREADY_EXISTS,
                format!("Cache cluster {id} already exists."),
            ));
        }
        let record = ClusterRecord {
            subnet_group: subnet_group.to_owned(),
            num_cache_nodes,
            created_at: now,
            deleting_since: None,
            forced_status: None,
        };
        let cluster = self.render(id, &record, now);
        state.clusters.insert(id.to_owned(), record);
        debug!(cluster = id, "Created cache cluster");
        Ok(cluster)
    }

    /// Describe a cache cluster.
    ///
    /// # Errors
    ///
    /// `CacheClusterNotFound` once the cluster is gone.
    pub fn describe_cache_cluster(&self, id: &str) -> Result<CacheCluster, ApiError> {
        self.calls.describe.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut state = self.lock();
        self.purge_deleted(&mut state);
        state
            .clusters
            .get(id)
            .map(|record| self.render(id, record, now))
            .ok_or_else(|| cluster_not_found(id))
    }

    /// Start deleting a cache cluster.
    ///
    /// # Errors
    ///
    /// `InvalidCacheClusterState` while the cluster is still `creating`,
    /// `CacheClusterNotFound` if it does not exist.
    pub fn delete_cache_cluster(&self, id: &str) -> Result<CacheCluster, ApiError> {
        let now = self.clock.now();
        let mut state = self.begin_mutation()?;
        let cluster = {
            let record = state.clusters.get(id).ok_or_else(|| cluster_not_found(id))?;
            self.render(id, record, now)
        };
        if cluster.status == STATUS_CREATING {
            return Err(ApiError::new(
                INVALID_CLUSTER_STATE,
                format!("Cache cluster {id} is not in a deletable state (creating)."),
            ));
        }
        if let Some(record) = state.clusters.get_mut(id) {
            if record.deleting_since.is_none() {
                record.deleting_since = Some(now);
                record.forced_status = None;
            }
        }
        debug!(cluster = id, "Deleting cache cluster");
        Ok(CacheCluster {
            status: STATUS_DELETING.to_owned(),
            ..cluster
        })
    }

    fn begin_mutation(&self) -> Result<MutexGuard<'_, PlaneState>, ApiError> {
        self.calls.mutate.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        self.purge_deleted(&mut state);
        if state.throttle_next > 0 {
            state.throttle_next = state.throttle_next.saturating_sub(1);
            return Err(ApiError::new(THROTTLING, "Rate exceeded"));
        }
        Ok(state)
    }

    fn purge_deleted(&self, state: &mut PlaneState) {
        let now = self.clock.now();
        let delete_latency = self.latencies.delete;
        state.clusters.retain(|id, record| {
            let gone = record
                .deleting_since
                .is_some_and(|since| now.saturating_duration_since(since) >= delete_latency);
            if gone {
                debug!(cluster = %id, "Cache cluster gone");
            }
            !gone
        });
    }

    fn render(&self, id: &str, record: &ClusterRecord, now: Instant) -> CacheCluster {
        let status = if record.deleting_since.is_some() {
            STATUS_DELETING.to_owned()
        } else if let Some(forced) = &record.forced_status {
            forced.clone()
        } else if now.saturating_duration_since(record.created_at) >= self.latencies.create {
            STATUS_AVAILABLE.to_owned()
        } else {
            STATUS_CREATING.to_owned()
        };
        CacheCluster {
            id: id.to_owned(),
            subnet_group: record.subnet_group.clone(),
            status,
            num_cache_nodes: record.num_cache_nodes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn cluster_not_found(id: &str) -> ApiError {
    ApiError::new(CLUSTER_NOT_FOUND, format!("CacheCluster not found: {id}"))
}

fn subnet_group_not_found(name: &str) -> ApiError {
    ApiError::new(
        SUBNET_GROUP_NOT_FOUND,
        format!("Cache subnet group {name} not found."),
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use converge_reconciler::ManualClock;

    use super::*;

    fn plane() -> (ControlPlane, ManualClock) {
        let clock = ManualClock::new();
        let plane = ControlPlane::new(Arc::new(clock.clone()), Latencies::default());
        (plane, clock)
    }

    #[test]
    fn test_cluster_becomes_available_after_latency() {
        let (plane, clock) = plane();
        plane.create_subnet_group("sg", "test").unwrap();
        let created = plane.create_cache_cluster("c1", "sg", 1).unwrap();
        assert_eq!(created.status, STATUS_CREATING);

        clock.advance(Duration::from_secs(2));
        let described = plane.describe_cache_cluster("c1").unwrap();
        assert_eq!(described.status, STATUS_AVAILABLE);
    }

    #[test]
    fn test_delete_rejected_while_creating() {
        let (plane, _) = plane();
        plane.create_subnet_group("sg", "test").unwrap();
        plane.create_cache_cluster("c1", "sg", 1).unwrap();

        let err = plane.delete_cache_cluster("c1").unwrap_err();
        assert_eq!(err.code(), INVALID_CLUSTER_STATE);
    }

    #[test]
    fn test_deleted_cluster_disappears() {
        let (plane, clock) = plane();
        plane.create_subnet_group("sg", "test").unwrap();
        plane.create_cache_cluster("c1", "sg", 1).unwrap();
        clock.advance(Duration::from_secs(2));

        plane.delete_cache_cluster("c1").unwrap();
        assert_eq!(plane.describe_cache_cluster("c1").unwrap().status, STATUS_DELETING);

        clock.advance(Duration::from_millis(1500));
        let err = plane.describe_cache_cluster("c1").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message(), "CacheCluster not found: c1");
    }

    #[test]
    fn test_subnet_group_dependency_violation() {
        let (plane, clock) = plane();
        plane.create_subnet_group("sg", "test").unwrap();
        plane.create_cache_cluster("c1", "sg", 1).unwrap();

        let err = plane.delete_subnet_group("sg").unwrap_err();
        assert_eq!(err.code(), DEPENDENCY_VIOLATION);

        clock.advance(Duration::from_secs(2));
        plane.delete_cache_cluster("c1").unwrap();
        assert_eq!(
            plane.delete_subnet_group("sg").unwrap_err().code(),
            DEPENDENCY_VIOLATION
        );

        clock.advance(Duration::from_millis(1500));
        plane.delete_subnet_group("sg").unwrap();
        assert!(plane.describe_subnet_group("sg").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_unknown_subnet_group_is_invalid_parameter() {
        let (plane, _) = plane();
        let err = plane.delete_subnet_group("missing").unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMETER);
    }

    #[test]
    fn test_throttling_rejects_mutations() {
        let (plane, _) = plane();
        plane.throttle_next(1);
        assert_eq!(plane.create_subnet_group("sg", "t").unwrap_err().code(), THROTTLING);
        assert!(plane.create_subnet_group("sg", "t").is_ok());
        assert_eq!(plane.mutate_calls(), 2);
    }

    #[test]
    fn test_forced_status_is_reported() {
        let (plane, _) = plane();
        plane.create_subnet_group("sg", "t").unwrap();
        plane.create_cache_cluster("c1", "sg", 1).unwrap();
        plane.force_status("c1", "incompatible-network").unwrap();

        assert_eq!(
            plane.describe_cache_cluster("c1").unwrap().status,
            "incompatible-network"
        );
    }

    #[test]
    fn test_create_requires_subnet_group() {
        let (plane, _) = plane();
        let err = plane.create_cache_cluster("c1", "missing", 1).unwrap_err();
        assert_eq!(err.code(), SUBNET_GROUP_NOT_FOUND);
    }
}
