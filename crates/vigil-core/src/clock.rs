//! Time source for the engine.
//!
//! Every "current instant" in the engine comes from a [`TimeSource`]. The
//! trait only hands out [`DateTime<Utc>`] values, so a zone-naive instant
//! can never meet a zone-aware one: commit ages, event timestamps, and scan
//! durations are all differences of two values from the same source.
//!
//! # Design Principles
//!
//! - No module calls `Utc::now()` directly; [`SystemClock`] is the only
//!   place that reads the wall clock.
//! - Durations are computed with [`age_seconds`] and clamp at zero so a
//!   commit timestamp from a skewed machine never yields a negative age.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};

/// Supplies the current instant in UTC.
pub trait TimeSource: Send + Sync + core::fmt::Debug {
    /// Return the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a wall-clock time source.
    pub const fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable time source for tests and replays.
///
/// Stores milliseconds since the Unix epoch in an atomic, so it can be
/// shared between the monitor task and the test body without locking.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        self.millis
            .store(instant.timestamp_millis(), Ordering::Release);
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let step = delta.num_milliseconds();
        let _ = self
            .millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ms| {
                Some(ms.saturating_add(step))
            });
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.millis.load(Ordering::Acquire);
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
    }
}

/// Whole seconds from `then` to `now`, clamped at zero.
pub fn age_seconds(now: DateTime<Utc>, then: DateTime<Utc>) -> i64 {
    now.signed_duration_since(then).num_seconds().max(0)
}

/// Whole milliseconds from `start` to `end`, clamped at zero.
pub fn elapsed_millis(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let ms = end.signed_duration_since(start).num_milliseconds();
    u64::try_from(ms.max(0)).unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn manual_clock_is_frozen_until_moved() {
        let clock = ManualClock::new(start());
        assert_eq!(clock.now(), start());
        assert_eq!(clock.now(), start());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(start());
        clock.advance(TimeDelta::minutes(31));
        assert_eq!(age_seconds(clock.now(), start()), 31 * 60);
    }

    #[test]
    fn manual_clock_set_jumps() {
        let clock = ManualClock::new(start());
        let later = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn system_clock_reports_utc() {
        let a = SystemClock::new().now();
        let b = SystemClock::new().now();
        assert!(b >= a);
        assert!(a.to_rfc3339().ends_with("+00:00"));
    }

    #[test]
    fn age_clamps_future_commits_to_zero() {
        let later = start() + TimeDelta::hours(1);
        assert_eq!(age_seconds(start(), later), 0);
    }

    #[test]
    fn elapsed_millis_counts_forward() {
        let end = start() + TimeDelta::milliseconds(1500);
        assert_eq!(elapsed_millis(start(), end), 1500);
        assert_eq!(elapsed_millis(end, start()), 0);
    }
}
