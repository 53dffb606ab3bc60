//! Composition of retries and waits into resource lifecycle steps.
//!
//! A remote create or delete has two independent sources of asynchrony: the
//! call itself can be rejected for a while (a dependency still holds the
//! resource), and an accepted call takes time to converge. [`Lifecycle`]
//! pairs a [`Retrier`] for the first with a [`Waiter`] for the second, sharing
//! one clock and one cancel token.

use std::sync::Arc;

use tracing::info;

use crate::cancel::CancelToken;
use crate::classify::Classify;
use crate::clock::{Clock, SystemClock};
use crate::error::{LifecycleError, WaitError};
use crate::probe::StateQuery;
use crate::retrier::{Retrier, RetrySpec};
use crate::types::{Converged, Target};
use crate::waiter::{WaitSpec, Waiter};

/// A waiter and a retrier driven by the same clock and cancel token.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    waiter: Waiter,
    retrier: Retrier,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Lifecycle on the system clock with a fresh cancel token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SystemClock), CancelToken::new())
    }

    /// Lifecycle on the given clock, cancelled by `cancel`.
    #[must_use]
    pub fn with_parts(clock: Arc<dyn Clock>, cancel: CancelToken) -> Self {
        Self {
            waiter: Waiter::new()
                .with_clock(Arc::clone(&clock))
                .with_cancel(cancel.clone()),
            retrier: Retrier::new().with_clock(clock).with_cancel(cancel),
        }
    }

    #[must_use]
    pub const fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    #[must_use]
    pub const fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Submit a create (retrying transient rejections), then wait for the
    /// target state.
    ///
    /// Returns the create call's value alongside the converged observation.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Operation`] if the create never went through,
    /// [`LifecycleError::Wait`] if the resource never reached the target.
    pub fn create_and_await<T, E, F, C, Q>(
        &self,
        create: F,
        retry: &RetrySpec<C>,
        probe: &mut Q,
        wait: &WaitSpec,
    ) -> Result<(T, Converged<Q::Resource>), LifecycleError<E>>
    where
        F: FnMut() -> Result<T, E>,
        C: Classify<E>,
        E: std::fmt::Display,
        Q: StateQuery<Error = E> + ?Sized,
    {
        let created = self.retrier.retry_until(create, retry)?;
        let converged = self.waiter.wait(probe, wait)?;
        info!(label = wait.label(), state = %converged.state, "Resource created");
        Ok((created, converged))
    }

    /// Submit a delete (retrying transient rejections such as a dependency
    /// not yet released), then wait until the resource is gone.
    ///
    /// `confirm` must target [`Target::Absent`]; otherwise the confirmation
    /// step fails with [`WaitError::UnexpectedState`] without probing.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Operation`] if the delete never went through,
    /// [`LifecycleError::Wait`] if the resource never disappeared.
    pub fn delete_and_confirm<T, E, F, C, Q>(
        &self,
        delete: F,
        retry: &RetrySpec<C>,
        probe: &mut Q,
        confirm: &WaitSpec,
    ) -> Result<Converged<Q::Resource>, LifecycleError<E>>
    where
        F: FnMut() -> Result<T, E>,
        C: Classify<E>,
        E: std::fmt::Display,
        Q: StateQuery<Error = E> + ?Sized,
    {
        if confirm.target() != &Target::Absent {
            return Err(WaitError::UnexpectedState {
                label: confirm.label().to_owned(),
                got: None,
                expected_pending: confirm.pending().to_vec(),
                target: confirm.target().clone(),
            }
            .into());
        }
        self.retrier.retry_until(delete, retry)?;
        let converged = self.waiter.wait(probe, confirm)?;
        info!(label = confirm.label(), "Resource deleted");
        Ok(converged)
    }

    /// Wait for a settled state, then run `op` once against it.
    ///
    /// Useful when a resource rejects mutations while it is still converging,
    /// e.g. a cluster that cannot be deleted while `creating`.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Wait`] if the resource never settled,
    /// [`LifecycleError::Operation`] if `op` failed (reported as a
    /// single-attempt permanent failure).
    pub fn settle_then<T, E, F, Q>(
        &self,
        probe: &mut Q,
        settle: &WaitSpec,
        op: F,
    ) -> Result<(Converged<Q::Resource>, T), LifecycleError<E>>
    where
        F: FnOnce(&Converged<Q::Resource>) -> Result<T, E>,
        Q: StateQuery<Error = E> + ?Sized,
    {
        let settled = self.waiter.wait(probe, settle)?;
        let value = op(&settled).map_err(|source| crate::error::RetryError::Permanent {
            attempts: 1,
            source,
        })?;
        Ok((settled, value))
    }
}
