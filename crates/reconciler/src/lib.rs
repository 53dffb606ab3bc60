//! Reconciliation primitives for eventually-consistent control planes.
//!
//! Remote create/delete calls against cloud APIs return immediately and
//! finish later. This crate provides the two loops needed to drive them:
//!
//! - **Waiter**: poll a caller-supplied probe until the resource reaches the
//!   target state, disappears (when deletion is the goal), reports a state
//!   nobody anticipated, or the timeout passes.
//! - **Retrier**: re-run a caller-supplied operation while a caller-supplied
//!   classifier calls its errors transient, failing fast on permanent ones.
//!
//! Both block the calling thread, perform strictly sequential probes or
//! attempts, and hold no shared state; run several on separate threads to
//! reconcile several resources at once. A [`CancelToken`] stops either loop
//! early, interrupting its sleep.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use converge_reconciler::{
//!     CodeClassifier, Lifecycle, ManualClock, Observation, ProviderErrorCode, RetryPolicy,
//!     RetrySpec, WaitSpec, CancelToken,
//! };
//!
//! #[derive(Debug)]
//! struct ApiError(&'static str);
//!
//! impl std::fmt::Display for ApiError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str(self.0)
//!     }
//! }
//!
//! impl std::error::Error for ApiError {}
//!
//! impl ProviderErrorCode for ApiError {
//!     fn code(&self) -> Option<&str> {
//!         Some(self.0)
//!     }
//! }
//!
//! let lifecycle = Lifecycle::with_parts(Arc::new(ManualClock::new()), CancelToken::new());
//! let retry = RetrySpec::new(
//!     RetryPolicy::new(Duration::from_secs(300)),
//!     CodeClassifier::transient(["DependencyViolation"]),
//! )?;
//! let confirm = WaitSpec::builder(["deleting"], "", Duration::from_secs(600))
//!     .label("cache subnet group")
//!     .build()?;
//!
//! let mut probe = || Ok::<_, ApiError>(Observation::<()>::Absent);
//! let gone = lifecycle
//!     .delete_and_confirm(|| Ok::<_, ApiError>(()), &retry, &mut probe, &confirm)
//!     .map_err(|e| e.to_string())?;
//! assert!(gone.is_deleted());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backoff;
pub mod cancel;
pub mod classify;
pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod probe;
pub mod retrier;
pub mod types;
pub mod waiter;

// Re-export main types
pub use backoff::Backoff;
pub use cancel::CancelToken;
pub use classify::{Classify, CodeClassifier, ProviderErrorCode, always_permanent, always_transient};
pub use clock::{Clock, ManualClock, Sleep, SystemClock};
pub use error::{LifecycleError, RetryError, WaitError};
pub use lifecycle::Lifecycle;
pub use probe::StateQuery;
pub use retrier::{MIN_RETRY_DELAY, Retrier, RetryPolicy, RetrySpec, retry_until};
pub use types::{Converged, ErrorClass, FinalState, Observation, StateClass, Target};
pub use waiter::{DEFAULT_POLL_INTERVAL, WaitSpec, WaitSpecBuilder, Waiter, wait};
