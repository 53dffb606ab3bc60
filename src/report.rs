//! Simulation results, rendered as text or JSON.

use std::fmt;
use std::time::Duration;

use converge_reconciler::Converged;
use serde::Serialize;

use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    CacheCluster,
    SubnetGroup,
}

impl ResourceKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::CacheCluster => "cache-cluster",
            Self::SubnetGroup => "subnet-group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Deleted,
    Failed,
    Cancelled,
}

/// What happened to one simulated resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub kind: ResourceKind,
    pub id: String,
    pub outcome: Outcome,
    /// Probes spent on the final deletion wait.
    pub probes: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceReport {
    pub fn deleted<R>(
        kind: ResourceKind,
        id: impl Into<String>,
        converged: &Converged<R>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            outcome: Outcome::Deleted,
            probes: converged.probes,
            elapsed_ms: millis(converged.elapsed),
            error: None,
        }
    }

    pub fn failed(kind: ResourceKind, id: impl Into<String>, err: &ReconcileError) -> Self {
        let outcome = if err.is_cancelled() {
            Outcome::Cancelled
        } else {
            Outcome::Failed
        };
        Self {
            kind,
            id: id.into(),
            outcome,
            probes: 0,
            elapsed_ms: 0,
            error: Some(err.to_string()),
        }
    }
}

/// Results of a whole simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub resources: Vec<ResourceReport>,
    pub elapsed_ms: u64,
    pub describe_calls: u64,
    pub mutate_calls: u64,
}

impl SimulationReport {
    /// Resources that did not end up deleted.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.outcome != Outcome::Deleted)
            .count()
    }

    #[must_use]
    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

impl ResourceReport {
    fn write_line(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<13} {:<24} ", self.kind.as_str(), self.id)?;
        match (&self.outcome, &self.error) {
            (Outcome::Deleted, _) => writeln!(
                f,
                "deleted ({} probes, {} ms)",
                self.probes, self.elapsed_ms
            ),
            (Outcome::Cancelled, _) => writeln!(f, "cancelled"),
            (Outcome::Failed, Some(err)) => writeln!(f, "FAILED: {err}"),
            (Outcome::Failed, None) => writeln!(f, "FAILED"),
        }
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.resources {
            r.write_line(f)?;
        }
        writeln!(
            f,
            "{} resource(s), {} failed, {} ms, {} describe / {} mutating call(s)",
            self.resources.len(),
            self.failures(),
            self.elapsed_ms,
            self.describe_calls,
            self.mutate_calls
        )
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
