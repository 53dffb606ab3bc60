//! Time source used by the waiter and retrier.
//!
//! Production code uses [`SystemClock`]. Tests and simulations use
//! [`ManualClock`], whose sleeps advance virtual time instantly so that
//! ten-minute timeouts can be exercised in microseconds.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

/// How a sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sleep {
    /// The full duration passed.
    Elapsed,
    /// The cancel token fired first.
    Cancelled,
}

/// Monotonic time plus an interruptible sleep.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Sleep for `duration` unless `cancel` fires first.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Sleep;
}

/// Wall-clock time; sleeps block the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Sleep {
        if cancel.wait_timeout(duration) {
            Sleep::Cancelled
        } else {
            Sleep::Elapsed
        }
    }
}

/// Virtual clock. Sleeping advances time by exactly the requested duration.
///
/// Clones share the same timeline, so a simulated remote system holding one
/// clone sees time move when the engine sleeps on another.
#[derive(Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

struct ManualState {
    origin: Instant,
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                origin: Instant::now(),
                offset: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.offset = state.offset.saturating_add(by);
    }

    /// Virtual time since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.lock().offset
    }

    /// Every sleep requested so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed())
            .finish_non_exhaustive()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.lock();
        state
            .origin
            .checked_add(state.offset)
            .unwrap_or(state.origin)
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Sleep {
        if cancel.is_cancelled() {
            return Sleep::Cancelled;
        }
        let mut state = self.lock();
        state.offset = state.offset.saturating_add(duration);
        state.sleeps.push(duration);
        Sleep::Elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_sleep_advances_time() {
        let clock = ManualClock::new();
        let start = clock.now();
        let token = CancelToken::new();

        assert_eq!(clock.sleep(Duration::from_secs(5), &token), Sleep::Elapsed);
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_manual_advance_is_not_a_sleep() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_manual_clones_share_timeline() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(other.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn test_manual_sleep_respects_cancel() {
        let clock = ManualClock::new();
        let token = CancelToken::new();
        token.cancel();

        assert_eq!(clock.sleep(Duration::from_secs(5), &token), Sleep::Cancelled);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_system_sleep_short() {
        let token = CancelToken::new();
        assert_eq!(
            SystemClock.sleep(Duration::from_millis(1), &token),
            Sleep::Elapsed
        );
    }
}
