//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

/// What a probe saw.
///
/// `Absent` is the deletion sentinel. Adapters translate their provider's
/// "not found" response into it; the engine never inspects errors to detect
/// deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<R> {
    /// The resource exists and reports `state`.
    Present { resource: R, state: String },
    /// The resource no longer exists.
    Absent,
}

impl<R> Observation<R> {
    /// Shorthand for [`Observation::Present`].
    pub fn present(resource: R, state: impl Into<String>) -> Self {
        Self::Present {
            resource,
            state: state.into(),
        }
    }

    /// The reported state label, if the resource exists.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        match self {
            Self::Present { state, .. } => Some(state),
            Self::Absent => None,
        }
    }

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// The state that ends a wait successfully.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A specific status label, e.g. `available`.
    State(String),
    /// The resource must be gone.
    Absent,
}

impl Target {
    #[must_use]
    pub fn matches(&self, state: &str) -> bool {
        match self {
            Self::State(target) => target == state,
            Self::Absent => false,
        }
    }
}

/// The empty string means "deleted".
impl From<&str> for Target {
    fn from(state: &str) -> Self {
        if state.is_empty() {
            Self::Absent
        } else {
            Self::State(state.to_owned())
        }
    }
}

impl From<String> for Target {
    fn from(state: String) -> Self {
        if state.is_empty() {
            Self::Absent
        } else {
            Self::State(state)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(state) => f.write_str(state),
            Self::Absent => f.write_str("<absent>"),
        }
    }
}

/// How an observation relates to a wait's pending set and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    /// Not settled yet; keep polling.
    Pending,
    /// The target label was reported.
    Target,
    /// The resource is gone and the target is [`Target::Absent`].
    Deleted,
    /// Anything else. Never retried, never coerced to success.
    Unexpected,
}

/// Terminal state of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalState {
    Reached(String),
    Deleted,
}

impl fmt::Display for FinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reached(state) => f.write_str(state),
            Self::Deleted => f.write_str("deleted"),
        }
    }
}

/// Result of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged<R> {
    /// Last observed resource; `None` when the wait confirmed deletion.
    pub resource: Option<R>,
    /// The state that ended the wait.
    pub state: FinalState,
    /// Number of probes performed, including the final one.
    pub probes: u32,
    /// Time from the start of the wait to convergence.
    pub elapsed: Duration,
}

impl<R> Converged<R> {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        matches!(self.state, FinalState::Deleted)
    }
}

/// Verdict of a classify function on an operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retrying can never succeed; abort now.
    Permanent,
    /// Expected to clear up on its own; retry after a pause.
    Transient,
}

impl ErrorClass {
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Transient)
    }
}
