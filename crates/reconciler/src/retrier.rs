//! Retry of operations that fail for transient, provider-side reasons.
//!
//! Each failure is handed to the call site's classifier. A permanent error
//! aborts at once; a transient one is retried after a pause until the
//! overall deadline passes. Delays never shrink and never drop below
//! [`MIN_RETRY_DELAY`], except that the final pause is cut short so it ends
//! exactly at the deadline. Success is returned as-is, without re-checking.

use std::sync::Arc;
use std::time::Duration;

use converge_core::{Error, Result, RetryTimingConfig};
use tracing::{debug, debug_span, warn};

use crate::backoff::Backoff;
use crate::cancel::CancelToken;
use crate::classify::Classify;
use crate::clock::{Clock, Sleep, SystemClock};
use crate::error::RetryError;
use crate::types::ErrorClass;

/// Lower bound on the pause between attempts.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Budget and cadence for retrying one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Stop retrying transient errors once this much time has passed.
    pub overall_timeout: Duration,
    /// Pause after the first failure.
    pub initial_delay: Duration,
    /// Pauses never grow beyond this.
    pub max_delay: Duration,
    /// Growth per attempt; `1.0` keeps the pause fixed.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(5 * 60),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Default cadence with the given overall budget.
    #[must_use]
    pub fn new(overall_timeout: Duration) -> Self {
        Self {
            overall_timeout,
            ..Self::default()
        }
    }

    /// Short budget for calls that usually clear up within seconds.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            overall_timeout: Duration::from_secs(30),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }

    /// Standard budget; same as `default()`.
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
    }

    /// Long budget for slow dependency releases.
    #[must_use]
    pub fn patient() -> Self {
        Self {
            overall_timeout: Duration::from_secs(20 * 60),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Build from a `[retry]` config section.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the section fails validation.
    pub fn from_config(config: &RetryTimingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            overall_timeout: config.overall_timeout(),
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            multiplier: config.multiplier,
        })
    }

    #[must_use]
    pub const fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Fixed pause between attempts.
    #[must_use]
    pub const fn fixed(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.max_delay = delay;
        self.multiplier = 1.0;
        self
    }

    /// Check the budget and cadence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero overall timeout, a
    /// multiplier below 1.0 or not finite, or a max delay below the initial one.
    pub fn validate(&self) -> Result<()> {
        if self.overall_timeout.is_zero() {
            return Err(Error::invalid_config("retry overall timeout must be positive"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::invalid_config(format!(
                "retry multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config(format!(
                "retry max delay ({:?}) is below the initial delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }

    fn backoff(&self) -> Backoff {
        Backoff::exponential(self.initial_delay, self.multiplier, self.max_delay)
            .with_floor(MIN_RETRY_DELAY)
    }
}

/// A validated policy paired with the call site's classifier.
#[derive(Debug, Clone)]
pub struct RetrySpec<C> {
    policy: RetryPolicy,
    classify: C,
}

impl<C> RetrySpec<C> {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `policy` fails [`RetryPolicy::validate`].
    pub fn new(policy: RetryPolicy, classify: C) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy, classify })
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

/// Runs retries against an injected clock and cancel token.
#[derive(Debug, Clone)]
pub struct Retrier {
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Retrier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Invoke `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// # Errors
    ///
    /// - [`RetryError::Permanent`] the first time `classify` says so
    /// - [`RetryError::Exhausted`] when a transient failure happens at or after the deadline
    /// - [`RetryError::Cancelled`] when the cancel token fires
    pub fn retry_until<T, E, F, C>(
        &self,
        mut op: F,
        spec: &RetrySpec<C>,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> std::result::Result<T, E>,
        C: Classify<E>,
        E: std::fmt::Display,
    {
        let span = debug_span!("retry", timeout_ms = spec.policy.overall_timeout.as_millis());
        let _enter = span.enter();

        let start = self.clock.now();
        let mut backoff = spec.policy.backoff();
        let mut attempts: u32 = 0;
        let mut last_error: Option<E> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts,
                    last_error,
                });
            }

            attempts = attempts.saturating_add(1);
            let error = match op() {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if spec.classify.classify(&error) == ErrorClass::Permanent {
                debug!(attempts, error = %error, "Permanent failure, not retrying");
                return Err(RetryError::Permanent {
                    attempts,
                    source: error,
                });
            }

            let elapsed = self.clock.now().saturating_duration_since(start);
            let remaining = spec.policy.overall_timeout.saturating_sub(elapsed);
            if remaining.is_zero() {
                warn!(
                    attempts,
                    error = %error,
                    elapsed_ms = elapsed.as_millis(),
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts,
                    elapsed,
                    source: error,
                });
            }

            let delay = backoff.next_delay().min(remaining);
            warn!(
                attempts,
                error = %error,
                delay_ms = delay.as_millis(),
                remaining_ms = remaining.as_millis(),
                "Transient failure, will retry"
            );

            if self.clock.sleep(delay, &self.cancel) == Sleep::Cancelled {
                return Err(RetryError::Cancelled {
                    attempts,
                    last_error: Some(error),
                });
            }
            last_error = Some(error);
        }
    }
}

/// Retry on the system clock without external cancellation.
///
/// # Errors
///
/// See [`Retrier::retry_until`].
pub fn retry_until<T, E, F, C>(op: F, spec: &RetrySpec<C>) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut() -> std::result::Result<T, E>,
    C: Classify<E>,
    E: std::fmt::Display,
{
    Retrier::new().retry_until(op, spec)
}
