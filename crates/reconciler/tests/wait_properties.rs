//! Property-based tests for the waiter.
//!
//! These tests use proptest with a `ManualClock` to verify:
//! - An always-pending probe times out at the deadline, never earlier
//! - No probe happens at or after the deadline
//! - A label that is both pending and target is treated as pending
//! - The deletion sentinel ends a deletion wait regardless of pending labels
//! - A state outside the vocabulary ends the wait on first sight

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::arithmetic_side_effects)]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use converge_reconciler::{
    Backoff, Clock, FinalState, ManualClock, Observation, WaitError, WaitSpec, Waiter,
};
use proptest::prelude::*;

fn manual_waiter() -> (Waiter, ManualClock) {
    let clock = ManualClock::new();
    (Waiter::new().with_clock(Arc::new(clock.clone())), clock)
}

proptest! {
    #[test]
    fn prop_always_pending_times_out_at_deadline(
        timeout_ms in 1u64..100_000,
        poll_ms in 1u64..10_000,
        initial_ms in 0u64..20_000,
        growth in prop::option::of(1.0f64..3.0),
    ) {
        // GIVEN: A probe that never leaves the pending state
        let (waiter, clock) = manual_waiter();
        let start: Instant = clock.now();
        let timeout = Duration::from_millis(timeout_ms);
        let mut builder = WaitSpec::builder(["creating"], "available", timeout)
            .initial_delay(Duration::from_millis(initial_ms))
            .poll_interval(Duration::from_millis(poll_ms));
        if let Some(growth) = growth {
            builder = builder.backoff(growth, Duration::from_millis(poll_ms.saturating_mul(4)));
        }
        let spec = builder.build().unwrap();

        let probe_clock = clock.clone();
        let mut probe_times = Vec::new();
        let mut probe = || -> Result<Observation<()>, Infallible> {
            probe_times.push(probe_clock.now().duration_since(start));
            Ok(Observation::present((), "creating"))
        };

        // WHEN: Waiting
        let result = waiter.wait(&mut probe, &spec);

        // THEN: Timeout exactly at the deadline, and every probe happened before it
        let timeout = Duration::from_millis(timeout_ms);
        match result {
            Err(WaitError::Timeout { elapsed, .. }) => prop_assert_eq!(elapsed, timeout),
            other => prop_assert!(false, "expected timeout, got {:?}", other),
        }
        prop_assert_eq!(clock.elapsed(), timeout);
        prop_assert!(probe_times.iter().all(|t| *t < timeout));
    }

    #[test]
    fn prop_pending_wins_tie_with_target(label in "[a-z][a-z-]{0,15}") {
        // GIVEN: A malformed spec whose target is also pending
        let (waiter, _) = manual_waiter();
        let spec = WaitSpec::builder([label.clone()], label.clone(), Duration::from_secs(30))
            .poll_interval(Duration::from_secs(1))
            .build()
            .unwrap();
        let mut probe = || -> Result<Observation<()>, Infallible> {
            Ok(Observation::present((), label.clone()))
        };

        // WHEN/THEN: The wait never reports premature success
        let err = waiter.wait(&mut probe, &spec).unwrap_err();
        prop_assert!(err.is_timeout());
    }

    #[test]
    fn prop_sentinel_confirms_deletion(
        pending in prop::collection::vec("[a-z-]{0,12}", 0..6),
        pending_probes in 0usize..5,
    ) {
        // GIVEN: A deletion wait with arbitrary pending labels
        let (waiter, _) = manual_waiter();
        let first_pending = pending.first().cloned();
        let spec = WaitSpec::builder(pending, "", Duration::from_secs(600))
            .poll_interval(Duration::from_secs(1))
            .build()
            .unwrap();

        let mut remaining = if first_pending.is_some() { pending_probes } else { 0 };
        let mut probe = || -> Result<Observation<()>, Infallible> {
            if remaining == 0 {
                return Ok(Observation::Absent);
            }
            remaining -= 1;
            Ok(Observation::present((), first_pending.clone().unwrap_or_default()))
        };

        // WHEN/THEN: The sentinel ends the wait successfully
        let converged = waiter.wait(&mut probe, &spec).unwrap();
        prop_assert_eq!(converged.state, FinalState::Deleted);
        prop_assert!(converged.resource.is_none());
    }

    #[test]
    fn prop_unknown_state_is_unexpected_on_first_probe(state in "[A-Z][a-z]{1,12}") {
        // GIVEN: Lower-case vocabulary and a capitalised observed state
        let (waiter, _) = manual_waiter();
        let pending = ["creating", "modifying"];
        let spec = WaitSpec::builder(pending, "available", Duration::from_secs(60))
            .build()
            .unwrap();
        let mut calls = 0u32;
        let mut probe = || -> Result<Observation<()>, Infallible> {
            calls += 1;
            Ok(Observation::present((), state.clone()))
        };

        // WHEN
        let err = waiter.wait(&mut probe, &spec).unwrap_err();

        // THEN
        prop_assert!(err.is_unexpected_state());
        prop_assert_eq!(calls, 1);
    }

    #[test]
    fn prop_backoff_is_monotonic_and_capped(
        initial_ms in 0u64..10_000,
        growth in 0.0f64..5.0,
        cap_ms in 0u64..60_000,
    ) {
        let initial = Duration::from_millis(initial_ms);
        let cap = Duration::from_millis(cap_ms);
        let mut backoff = Backoff::exponential(initial, growth, cap);

        let delays: Vec<Duration> = (0..20).map(|_| backoff.next_delay()).collect();

        prop_assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(delays.iter().all(|d| *d <= cap.max(initial)));
        prop_assert_eq!(delays[0], initial);
    }
}
