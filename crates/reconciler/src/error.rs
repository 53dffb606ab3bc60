//! Error types for the reconciler crate.
//!
//! Every terminal path of a wait or retry ends in one of these variants; the
//! engine never swallows an error or only logs it.

use std::time::Duration;

use thiserror::Error;

use crate::types::Target;

/// A wait that did not converge.
///
/// `E` is the probe's own error type, preserved as the source of
/// [`WaitError::Probe`].
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The deadline passed while the resource was still pending.
    #[error(
        "timed out after {elapsed:?} (limit {timeout:?}) waiting for {label}; last state: {}",
        describe_state(.last_state)
    )]
    Timeout {
        label: String,
        last_state: Option<String>,
        elapsed: Duration,
        timeout: Duration,
    },

    /// The status check itself failed. Never retried.
    #[error("status check for {label} failed: {source}")]
    Probe {
        label: String,
        #[source]
        source: E,
    },

    /// The remote system reported a state outside the caller's vocabulary.
    #[error(
        "{label} reported unexpected state {}; expected one of [{}] or {target}",
        describe_state(.got),
        .expected_pending.join(", ")
    )]
    UnexpectedState {
        label: String,
        got: Option<String>,
        expected_pending: Vec<String>,
        target: Target,
    },

    /// The caller's cancel token fired.
    #[error("wait for {label} cancelled; last state: {}", describe_state(.last_state))]
    Cancelled {
        label: String,
        last_state: Option<String>,
    },
}

impl<E> WaitError<E> {
    /// Label of the resource being waited on.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Timeout { label, .. }
            | Self::Probe { label, .. }
            | Self::UnexpectedState { label, .. }
            | Self::Cancelled { label, .. } => label,
        }
    }

    /// Last state the wait saw, when there is one.
    #[must_use]
    pub fn last_state(&self) -> Option<&str> {
        match self {
            Self::Timeout { last_state, .. } | Self::Cancelled { last_state, .. } => {
                last_state.as_deref()
            }
            Self::UnexpectedState { got, .. } => got.as_deref(),
            Self::Probe { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    #[must_use]
    pub const fn is_unexpected_state(&self) -> bool {
        matches!(self, Self::UnexpectedState { .. })
    }

    /// The probe's error, if that is what ended the wait.
    pub fn into_probe_error(self) -> Option<E> {
        match self {
            Self::Probe { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A retried operation that did not succeed.
///
/// `E` is the operation's own error type.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The classifier ruled the error permanent; no further attempts.
    #[error("permanent failure after {attempts} attempt(s): {source}")]
    Permanent {
        attempts: u32,
        #[source]
        source: E,
    },

    /// Only transient errors occurred, and the deadline passed.
    #[error("retries exhausted after {attempts} attempt(s) in {elapsed:?}: {source}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: E,
    },

    /// The caller's cancel token fired.
    #[error("retry cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The last underlying error, if any attempt failed.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Permanent { source, .. } | Self::Exhausted { source, .. } => Some(source),
            Self::Cancelled { last_error, .. } => last_error,
        }
    }
}

/// Failure of a composed lifecycle step.
#[derive(Debug, Error)]
pub enum LifecycleError<E> {
    /// The mutating call (create/delete) never went through.
    #[error(transparent)]
    Operation(#[from] RetryError<E>),

    /// The call went through but the resource never reached the expected state.
    #[error(transparent)]
    Wait(#[from] WaitError<E>),
}

impl<E> LifecycleError<E> {
    #[must_use]
    pub const fn as_wait(&self) -> Option<&WaitError<E>> {
        match self {
            Self::Wait(err) => Some(err),
            Self::Operation(_) => None,
        }
    }

    #[must_use]
    pub const fn as_operation(&self) -> Option<&RetryError<E>> {
        match self {
            Self::Operation(err) => Some(err),
            Self::Wait(_) => None,
        }
    }
}

fn describe_state(state: &Option<String>) -> &str {
    match state.as_deref() {
        Some("") => "<empty>",
        Some(state) => state,
        None => "<none>",
    }
}
