//! Delay schedules shared by the waiter (poll cadence) and the retrier
//! (attempt cadence).

use std::time::Duration;

/// A non-decreasing delay schedule.
///
/// Each call to [`Backoff::next_delay`] returns the current delay and then
/// multiplies it by the growth factor, clamped to the cap. Without a growth
/// factor the schedule is fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    current: Duration,
    growth: Option<f64>,
    cap: Duration,
}

impl Backoff {
    /// Fixed cadence.
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            current: interval,
            growth: None,
            cap: interval,
        }
    }

    /// Exponential cadence starting at `initial`, multiplied by `growth` per
    /// step and never exceeding `cap`.
    ///
    /// A `growth` that is below 1.0 or not finite degrades to a fixed
    /// cadence, and a `cap` below `initial` is raised to `initial`, so the
    /// schedule can never shrink.
    #[must_use]
    pub fn exponential(initial: Duration, growth: f64, cap: Duration) -> Self {
        let growth = (growth.is_finite() && growth > 1.0).then_some(growth);
        Self {
            current: initial,
            growth,
            cap: cap.max(initial),
        }
    }

    /// Raise every delay to at least `floor`.
    #[must_use]
    pub fn with_floor(mut self, floor: Duration) -> Self {
        self.current = self.current.max(floor);
        self.cap = self.cap.max(self.current);
        self
    }

    /// The delay the next call to [`Backoff::next_delay`] will return.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Return the current delay and advance the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.grown();
        delay
    }

    fn grown(&self) -> Duration {
        let Some(growth) = self.growth else {
            return self.current;
        };
        Duration::try_from_secs_f64(self.current.as_secs_f64() * growth)
            .map_or(self.cap, |next| next.min(self.cap))
            .max(self.current)
    }
}
