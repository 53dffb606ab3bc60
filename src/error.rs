//! Error type for the `converge` binary crate.

use converge_reconciler::LifecycleError;
use thiserror::Error;

use crate::sim::ApiError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] converge_core::Error),

    #[error("{resource}: {source}")]
    Lifecycle {
        resource: String,
        #[source]
        source: LifecycleError<ApiError>,
    },

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl ReconcileError {
    pub fn lifecycle(resource: impl Into<String>, source: LifecycleError<ApiError>) -> Self {
        Self::Lifecycle {
            resource: resource.into(),
            source,
        }
    }

    /// Whether the step stopped because its cancel token fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Lifecycle { source, .. } => {
                source.as_wait().is_some_and(|e| e.is_cancelled())
                    || source.as_operation().is_some_and(|e| e.is_cancelled())
            }
            Self::Config(_) | Self::Worker(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
