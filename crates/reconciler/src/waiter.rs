//! Bounded polling until a resource settles.
//!
//! A wait repeatedly probes a resource and classifies each observation
//! against a [`WaitSpec`]:
//!
//! 1. a label in the pending set keeps the loop going (this check runs first,
//!    so a label that is both pending and target counts as pending),
//! 2. a label equal to the target ends the wait successfully,
//! 3. [`Observation::Absent`] ends it successfully when the target is
//!    [`Target::Absent`],
//! 4. anything else is [`WaitError::UnexpectedState`].
//!
//! Probe errors end the wait immediately. The wait sleeps `initial_delay`
//! before the first probe and `poll_interval` (optionally growing) between
//! probes. When the next probe would land at or after the deadline it is
//! skipped: the waiter sleeps out the remaining budget and reports
//! [`WaitError::Timeout`]. Timing out does not cancel anything remotely.

use std::sync::Arc;
use std::time::{Duration, Instant};

use converge_core::{Error, Result, WaitTimingConfig};
use itertools::Itertools;
use tracing::{debug, debug_span, info, trace};

use crate::backoff::Backoff;
use crate::cancel::CancelToken;
use crate::clock::{Clock, Sleep, SystemClock};
use crate::error::WaitError;
use crate::probe::StateQuery;
use crate::types::{Converged, FinalState, Observation, StateClass, Target};

/// Default spacing between probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default cap for a growing poll interval.
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

const DEFAULT_LABEL: &str = "resource";

/// What to wait for and how patiently. Immutable and always valid once built.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitSpec {
    label: String,
    pending: Vec<String>,
    target: Target,
    timeout: Duration,
    initial_delay: Duration,
    poll_interval: Duration,
    backoff_growth: Option<f64>,
    max_poll_interval: Duration,
}

impl WaitSpec {
    /// Start building a spec. `target` accepts `""` for "wait until deleted".
    ///
    /// ```
    /// use std::time::Duration;
    /// use converge_reconciler::WaitSpec;
    ///
    /// let spec = WaitSpec::builder(["creating"], "available", Duration::from_secs(600))
    ///     .initial_delay(Duration::from_secs(10))
    ///     .poll_interval(Duration::from_secs(3))
    ///     .build();
    /// assert!(spec.is_ok());
    /// ```
    pub fn builder<I, S>(
        pending: I,
        target: impl Into<Target>,
        timeout: Duration,
    ) -> WaitSpecBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        WaitSpecBuilder {
            spec: Self {
                label: DEFAULT_LABEL.to_owned(),
                pending: pending.into_iter().map(Into::into).unique().collect(),
                target: target.into(),
                timeout,
                initial_delay: Duration::ZERO,
                poll_interval: DEFAULT_POLL_INTERVAL,
                backoff_growth: None,
                max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            },
        }
    }

    /// Build a spec whose timing comes from a `[wait]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the timing values are invalid.
    pub fn from_config<I, S>(
        pending: I,
        target: impl Into<Target>,
        config: &WaitTimingConfig,
    ) -> Result<WaitSpecBuilder>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        config.validate()?;
        let builder = Self::builder(pending, target, config.timeout())
            .initial_delay(config.initial_delay())
            .poll_interval(config.poll_interval());
        Ok(match config.backoff_growth {
            Some(growth) => builder.backoff(growth, config.max_poll_interval()),
            None => builder,
        })
    }

    /// Where an observation falls relative to this spec.
    pub fn classify<R>(&self, observation: &Observation<R>) -> StateClass {
        match observation {
            Observation::Present { state, .. } if self.is_pending(state) => StateClass::Pending,
            Observation::Present { state, .. } if self.target.matches(state) => StateClass::Target,
            Observation::Absent if self.target == Target::Absent => StateClass::Deleted,
            _ => StateClass::Unexpected,
        }
    }

    #[must_use]
    pub fn is_pending(&self, state: &str) -> bool {
        self.pending.iter().any(|pending| pending == state)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn backoff(&self) -> Backoff {
        match self.backoff_growth {
            Some(growth) => {
                Backoff::exponential(self.poll_interval, growth, self.max_poll_interval)
            }
            None => Backoff::fixed(self.poll_interval),
        }
    }
}

/// Builder for [`WaitSpec`]; [`WaitSpecBuilder::build`] checks the invariants.
#[derive(Debug, Clone)]
pub struct WaitSpecBuilder {
    spec: WaitSpec,
}

impl WaitSpecBuilder {
    /// Name used in logs and error messages, e.g. `cache cluster tf-test-1`.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.spec.label = label.into();
        self
    }

    /// Sleep before the first probe, so a just-submitted operation can
    /// register remotely.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.spec.initial_delay = delay;
        self
    }

    /// Minimum spacing between probes.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.spec.poll_interval = interval;
        self
    }

    /// Grow the poll interval by `growth` after every pending probe, up to
    /// `max_interval`.
    #[must_use]
    pub const fn backoff(mut self, growth: f64, max_interval: Duration) -> Self {
        self.spec.backoff_growth = Some(growth);
        self.spec.max_poll_interval = max_interval;
        self
    }

    /// Validate and produce the `WaitSpec`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero timeout or poll interval,
    /// a growth factor that is below 1.0 or not finite, or a backoff cap
    /// below the poll interval.
    pub fn build(self) -> Result<WaitSpec> {
        let spec = self.spec;
        if spec.timeout.is_zero() {
            return Err(Error::invalid_config(format!(
                "wait timeout for {} must be positive",
                spec.label
            )));
        }
        if spec.poll_interval.is_zero() {
            return Err(Error::invalid_config(format!(
                "poll interval for {} must be positive",
                spec.label
            )));
        }
        if let Some(growth) = spec.backoff_growth {
            if !growth.is_finite() || growth < 1.0 {
                return Err(Error::invalid_config(format!(
                    "poll backoff growth must be a finite number >= 1.0, got {growth}"
                )));
            }
            if spec.max_poll_interval < spec.poll_interval {
                return Err(Error::invalid_config(format!(
                    "max poll interval ({:?}) for {} is below the poll interval ({:?})",
                    spec.max_poll_interval, spec.label, spec.poll_interval
                )));
            }
        }
        if spec.is_pending_target() {
            debug!(
                label = %spec.label,
                target = %spec.target,
                "Target is also listed as pending; it will be treated as pending"
            );
        }
        Ok(spec)
    }
}

impl WaitSpec {
    fn is_pending_target(&self) -> bool {
        match &self.target {
            Target::State(target) => self.is_pending(target),
            Target::Absent => false,
        }
    }
}

/// Runs waits against an injected clock and cancel token.
#[derive(Debug, Clone)]
pub struct Waiter {
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    /// Waiter on the system clock with a token nobody else holds.
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

    /// Stop polling as soon as `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Poll `probe` until it reports a non-pending state or the `WaitSpec`'s
    /// timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`WaitError::Probe`] as soon as a probe fails
    /// - [`WaitError::UnexpectedState`] on the first state outside `pending` and `target`
    /// - [`WaitError::Timeout`] once the budget is spent
    /// - [`WaitError::Cancelled`] when the cancel token fires
    pub fn wait<Q>(
        &self,
        probe: &mut Q,
        spec: &WaitSpec,
    ) -> std::result::Result<Converged<Q::Resource>, WaitError<Q::Error>>
    where
        Q: StateQuery + ?Sized,
    {
        let span = debug_span!("wait", label = %spec.label, target = %spec.target);
        let _enter = span.enter();

        let start = self.clock.now();
        let mut backoff = spec.backoff();
        let mut delay = spec.initial_delay;
        let mut last_state: Option<String> = None;
        let mut probes: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(cancelled(spec, last_state));
            }

            let remaining = spec.timeout.saturating_sub(self.elapsed_since(start));
            if delay >= remaining {
                debug!(
                    probes,
                    remaining_ms = remaining.as_millis(),
                    "Next probe would land past the deadline"
                );
                if self.clock.sleep(remaining, &self.cancel) == Sleep::Cancelled {
                    return Err(cancelled(spec, last_state));
                }
                return Err(WaitError::Timeout {
                    label: spec.label.clone(),
                    last_state,
                    elapsed: self.elapsed_since(start),
                    timeout: spec.timeout,
                });
            }

            if self.clock.sleep(delay, &self.cancel) == Sleep::Cancelled {
                return Err(cancelled(spec, last_state));
            }

            let observation = probe.probe().map_err(|source| WaitError::Probe {
                label: spec.label.clone(),
                source,
            })?;
            probes = probes.saturating_add(1);
            let elapsed = self.elapsed_since(start);

            match spec.classify(&observation) {
                StateClass::Pending => {
                    trace!(probes, state = ?observation.state(), "Still pending");
                    last_state = observation.state().map(str::to_owned);
                    delay = backoff.next_delay();
                }
                StateClass::Target => {
                    let Observation::Present { resource, state } = observation else {
                        return Err(unexpected(spec, None));
                    };
                    info!(probes, state = %state, elapsed_ms = elapsed.as_millis(), "Converged");
                    return Ok(Converged {
                        resource: Some(resource),
                        state: FinalState::Reached(state),
                        probes,
                        elapsed,
                    });
                }
                StateClass::Deleted => {
                    info!(probes, elapsed_ms = elapsed.as_millis(), "Confirmed deletion");
                    return Ok(Converged {
                        resource: None,
                        state: FinalState::Deleted,
                        probes,
                        elapsed,
                    });
                }
                StateClass::Unexpected => {
                    return Err(unexpected(spec, observation.state().map(str::to_owned)));
                }
            }
        }
    }

    fn elapsed_since(&self, start: Instant) -> Duration {
        self.clock.now().saturating_duration_since(start)
    }
}

/// Wait on the system clock without external cancellation.
///
/// # Errors
///
/// See [`Waiter::wait`].
pub fn wait<Q>(
    mut probe: Q,
    spec: &WaitSpec,
) -> std::result::Result<Converged<Q::Resource>, WaitError<Q::Error>>
where
    Q: StateQuery,
{
    Waiter::new().wait(&mut probe, spec)
}

fn cancelled<E>(spec: &WaitSpec, last_state: Option<String>) -> WaitError<E> {
    debug!("Wait cancelled");
    WaitError::Cancelled {
        label: spec.label.clone(),
        last_state,
    }
}

fn unexpected<E>(spec: &WaitSpec, got: Option<String>) -> WaitError<E> {
    WaitError::UnexpectedState {
        label: spec.label.clone(),
        got,
        expected_pending: spec.pending.clone(),
        target: spec.target.clone(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::arithmetic_side_effects)]

    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::io;

    use super::*;
    use crate::clock::ManualClock;

    fn manual() -> (Waiter, ManualClock) {
        let clock = ManualClock::new();
        let waiter = Waiter::new().with_clock(Arc::new(clock.clone()));
        (waiter, clock)
    }

    /// Replays observations in order, then repeats the last one.
    fn scripted(
        states: &[Option<&str>],
    ) -> impl FnMut() -> std::result::Result<Observation<u32>, Infallible> + use<> {
        let mut script: VecDeque<Option<String>> =
            states.iter().map(|s| s.map(str::to_owned)).collect();
        let mut n = 0;
        move || {
            n += 1;
            let next = if script.len() > 1 {
                script.pop_front().flatten()
            } else {
                script.front().cloned().flatten()
            };
            Ok(next.map_or(Observation::Absent, |state| Observation::present(n, state)))
        }
    }

    fn available_spec() -> WaitSpec {
        WaitSpec::builder(["creating"], "available", Duration::from_secs(60))
            .poll_interval(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_pending_then_target_probes_three_times() {
        let (waiter, clock) = manual();
        let mut probe = scripted(&[Some("creating"), Some("creating"), Some("available")]);

        let converged = waiter.wait(&mut probe, &available_spec()).unwrap();

        assert_eq!(converged.probes, 3);
        assert_eq!(converged.resource, Some(3));
        assert_eq!(converged.state, FinalState::Reached("available".into()));
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn test_initial_delay_precedes_first_probe() {
        let (waiter, clock) = manual();
        let spec = WaitSpec::builder(["creating"], "available", Duration::from_secs(60))
            .initial_delay(Duration::from_secs(10))
            .poll_interval(Duration::from_secs(3))
            .build()
            .unwrap();
        let mut probe = scripted(&[Some("creating"), Some("available")]);

        let converged = waiter.wait(&mut probe, &spec).unwrap();

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(10), Duration::from_secs(3)]
        );
        assert_eq!(converged.elapsed, Duration::from_secs(13));
    }

    #[test]
    fn test_deletion_sentinel_succeeds_regardless_of_pending() {
        let (waiter, _) = manual();
        let spec = WaitSpec::builder(["deleting", "available", ""], "", Duration::from_secs(60))
            .build()
            .unwrap();
        let mut probe = scripted(&[Some("deleting"), None]);

        let converged = waiter.wait(&mut probe, &spec).unwrap();

        assert!(converged.is_deleted());
        assert_eq!(converged.resource, None);
        assert_eq!(converged.probes, 2);
    }

    #[test]
    fn test_unexpected_state_returns_on_first_observation() {
        let (waiter, _) = manual();
        let mut probe = scripted(&[Some("incompatible-network")]);

        let err = waiter.wait(&mut probe, &available_spec()).unwrap_err();

        match err {
            WaitError::UnexpectedState {
                got,
                expected_pending,
                target,
                ..
            } => {
                assert_eq!(got.as_deref(), Some("incompatible-network"));
                assert_eq!(expected_pending, vec!["creating".to_owned()]);
                assert_eq!(target, Target::from("available"));
            }
            other => panic!("expected UnexpectedState, got {other:?}"),
        }
    }

    #[test]
    fn test_absence_with_state_target_is_unexpected() {
        let (waiter, _) = manual();
        let mut probe = scripted(&[None]);

        let err = waiter.wait(&mut probe, &available_spec()).unwrap_err();

        assert!(err.is_unexpected_state());
        assert_eq!(err.last_state(), None);
    }

    #[test]
    fn test_present_empty_label_does_not_satisfy_deletion() {
        let (waiter, _) = manual();
        let spec = WaitSpec::builder(["deleting"], "", Duration::from_secs(60))
            .build()
            .unwrap();
        let mut probe = scripted(&[Some("")]);

        let err = waiter.wait(&mut probe, &spec).unwrap_err();
        assert!(err.is_unexpected_state());
    }

    #[test]
    fn test_pending_wins_tie_with_target() {
        let (waiter, _) = manual();
        let spec = WaitSpec::builder(["available"], "available", Duration::from_secs(10))
            .poll_interval(Duration::from_secs(1))
            .build()
            .unwrap();
        let mut probe = scripted(&[Some("available")]);

        let err = waiter.wait(&mut probe, &spec).unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.last_state(), Some("available"));
    }

    #[test]
    fn test_always_pending_times_out_exactly_at_deadline() {
        let (waiter, clock) = manual();
        let spec = WaitSpec::builder(["creating"], "available", Duration::from_secs(10))
            .poll_interval(Duration::from_secs(3))
            .build()
            .unwrap();
        let mut calls = 0;
        let mut probe = || -> std::result::Result<Observation<()>, Infallible> {
            calls += 1;
            Ok(Observation::present((), "creating"))
        };

        let err = waiter.wait(&mut probe, &spec).unwrap_err();

        // Probes at 0s, 3s, 6s, 9s; the one at 12s would be past the deadline.
        assert_eq!(calls, 4);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        match err {
            WaitError::Timeout {
                elapsed,
                timeout,
                last_state,
                ..
            } => {
                assert_eq!(elapsed, Duration::from_secs(10));
                assert_eq!(timeout, Duration::from_secs(10));
                assert_eq!(last_state.as_deref(), Some("creating"));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_initial_delay_past_deadline_never_probes() {
        let (waiter, clock) = manual();
        let spec = WaitSpec::builder(["creating"], "available", Duration::from_secs(5))
            .initial_delay(Duration::from_secs(10))
            .build()
            .unwrap();
        let mut calls = 0;
        let mut probe = || -> std::result::Result<Observation<()>, Infallible> {
            calls += 1;
            Ok(Observation::present((), "available"))
        };

        let err = waiter.wait(&mut probe, &spec).unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.last_state(), None);
        assert_eq!(calls, 0);
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_probe_error_is_not_retried() {
        let (waiter, _) = manual();
        let mut calls = 0;
        let mut probe = || -> std::result::Result<Observation<()>, io::Error> {
            calls += 1;
            Err(io::Error::other("UnrecognizedClientException"))
        };

        let err = waiter.wait(&mut probe, &available_spec()).unwrap_err();

        assert_eq!(calls, 1);
        let source = err.into_probe_error().expect("probe error");
        assert!(source.to_string().contains("UnrecognizedClientException"));
    }

    #[test]
    fn test_backoff_grows_poll_interval() {
        let (waiter, clock) = manual();
        let spec = WaitSpec::builder(["creating"], "available", Duration::from_secs(60))
            .poll_interval(Duration::from_secs(1))
            .backoff(2.0, Duration::from_secs(5))
            .build()
            .unwrap();
        let mut probe = scripted(&[
            Some("creating"),
            Some("creating"),
            Some("creating"),
            Some("creating"),
            Some("creating"),
            Some("available"),
        ]);

        waiter.wait(&mut probe, &spec).unwrap();

        let secs: Vec<u64> = clock.sleeps().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![0, 1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (waiter, _) = manual();
        let waiter = waiter.with_cancel(CancelToken::new());
        waiter.cancel_token().cancel();
        let mut calls = 0;
        let mut probe = || -> std::result::Result<Observation<()>, Infallible> {
            calls += 1;
            Ok(Observation::present((), "creating"))
        };

        let err = waiter.wait(&mut probe, &available_spec()).unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_cancel_from_probe_stops_next_iteration() {
        let (waiter, _) = manual();
        let token = waiter.cancel_token().clone();
        let mut calls = 0;
        let mut probe = || -> std::result::Result<Observation<()>, Infallible> {
            calls += 1;
            token.cancel();
            Ok(Observation::present((), "creating"))
        };

        let err = waiter.wait(&mut probe, &available_spec()).unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.last_state(), Some("creating"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_build_rejects_zero_poll_interval() {
        let err = WaitSpec::builder(["creating"], "available", Duration::from_secs(1))
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.is_invalid_config());
    }

    #[test]
    fn test_build_rejects_zero_timeout() {
        let err = WaitSpec::builder(["creating"], "available", Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.is_invalid_config());
    }

    #[test]
    fn test_build_rejects_shrinking_backoff() {
        let err = WaitSpec::builder(["creating"], "available", Duration::from_secs(1))
            .backoff(0.9, Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(err.is_invalid_config());
    }

    #[test]
    fn test_build_rejects_backoff_cap_below_poll_interval() {
        let err = WaitSpec::builder(["creating"], "available", Duration::from_secs(60))
            .poll_interval(Duration::from_secs(3))
            .backoff(1.5, Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(err.is_invalid_config());
        assert!(err.to_string().contains("below the poll interval"));
    }

    #[test]
    fn test_build_accepts_backoff_cap_equal_to_poll_interval() {
        let spec = WaitSpec::builder(["creating"], "available", Duration::from_secs(60))
            .poll_interval(Duration::from_secs(3))
            .backoff(1.5, Duration::from_secs(3))
            .build();
        assert!(spec.is_ok());
    }

    #[test]
    fn test_pending_labels_are_deduplicated() {
        let pending = ["creating", "creating", "modifying"];
        let spec = WaitSpec::builder(pending, "available", Duration::from_secs(1))
            .build()
            .unwrap();
        assert_eq!(spec.pending(), ["creating", "modifying"]);
    }

    #[test]
    fn test_from_config_applies_timing() {
        let config = WaitTimingConfig {
            timeout_ms: 2_000,
            initial_delay_ms: 100,
            poll_interval_ms: 50,
            backoff_growth: Some(1.5),
            max_poll_interval_ms: 400,
        };
        let spec = WaitSpec::from_config(["creating"], "available", &config)
            .unwrap()
            .label("cluster")
            .build()
            .unwrap();

        assert_eq!(spec.timeout(), Duration::from_secs(2));
        assert_eq!(spec.initial_delay(), Duration::from_millis(100));
        assert_eq!(spec.poll_interval(), Duration::from_millis(50));
        assert_eq!(spec.label(), "cluster");
    }

    #[test]
    fn test_wait_free_function_on_system_clock() {
        let spec = WaitSpec::builder(["creating"], "available", Duration::from_secs(5))
            .poll_interval(Duration::from_millis(1))
            .build()
            .unwrap();
        let converged = wait(scripted(&[Some("creating"), Some("available")]), &spec).unwrap();
        assert_eq!(converged.probes, 2);
    }
}
