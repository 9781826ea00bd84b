//! Small building blocks shared by the tally senders and receivers: a periodic
//! timer and a registry of event callbacks.

pub mod listeners;

pub use listeners::{ListenerId, Listeners};

use core::time::Duration;
use std::time::Instant;

/// A lightweight wrapper around [`std::time::Instant`] used to pace periodic actions.
/// Stores the instant at which the timer was last reset.
///
/// ```ignore
/// let mut timer = IntervalTimer::new(Duration::from_millis(300));
///
/// // we have sent something, no need to refresh for now
/// timer.reset();
///
/// if timer.is_due() {
///     // refresh everything
///     timer.reset();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    last: Instant,
    interval: Duration,
}

impl IntervalTimer {
    /// Creates a new timer starting at the current instant.
    #[inline(always)]
    pub fn new(interval: Duration) -> Self {
        Self {
            last: Instant::now(),
            interval,
        }
    }

    /// Resets the timer to start measuring elapsed time from now.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Returns the amount of time elapsed since the last reset.
    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.last.elapsed()
    }

    #[inline(always)]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline(always)]
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Returns `true` if at least one interval has elapsed since the last reset.
    #[inline(always)]
    pub fn is_due(&self) -> bool {
        self.elapsed() >= self.interval
    }

    /// Time left until the timer is due, zero if it already is.
    #[inline(always)]
    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_always_due() {
        let timer = IntervalTimer::new(Duration::ZERO);
        assert!(timer.is_due());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[test]
    fn reset_postpones() {
        let mut timer = IntervalTimer::new(Duration::from_secs(3600));
        assert!(!timer.is_due());

        timer.set_interval(Duration::ZERO);
        assert!(timer.is_due());

        timer.set_interval(Duration::from_secs(3600));
        timer.reset();
        assert!(!timer.is_due());
        assert!(timer.remaining() > Duration::from_secs(3500));
        assert_eq!(timer.interval(), Duration::from_secs(3600));
    }
}
