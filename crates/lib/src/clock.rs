//! Clocks for every recorded date
//!
//! Every date this crate records (signature dates, authority creation dates,
//! orphan timestamps, packing dates) is taken from a [`Clock`] owned by the
//! [`PersistenceManager`](crate::PersistenceManager). Production code uses
//! [`SystemClock`]; tests use [`FixedClock`] to age orphans or to produce
//! predictable successor-chain dates.
//!
//! # Example
//!
//! ```
//! use aletheia_authority::{Clock, FixedClock};
//!
//! let clock = FixedClock::new(1_000);
//! let first = clock.now();
//! clock.advance(7 * 24 * 60 * 60 * 1000);
//! assert!(clock.now() > first);
//! ```

use std::fmt::Debug;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Source of the current time for a [`PersistenceManager`](crate::PersistenceManager).
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Returns the current time as a UTC date.
    ///
    /// Dates are truncated to millisecond precision, which is also the precision used in
    /// canonical signed bytes.
    fn now(&self) -> DateTime<Utc> {
        millis_to_date(self.now_millis())
    }
}

/// Convert milliseconds since the epoch into a UTC date.
pub fn millis_to_date(millis: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis as i64).unwrap_or_default()
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Controllable clock with auto-advancing time.
///
/// Each `now_millis()` call returns the current value and then advances by one
/// millisecond, so consecutive signature dates are strictly increasing. Use
/// [`FixedClock::hold`] to freeze the clock, and [`FixedClock::advance`] to jump
/// forward (e.g. past the orphan grace period).
pub struct FixedClock {
    state: Mutex<FixedClockState>,
}

struct FixedClockState {
    millis: u64,
    held: bool,
}

/// Keeps a [`FixedClock`] frozen until dropped.
pub struct ClockHold<'a>(&'a FixedClock);

impl Drop for ClockHold<'_> {
    fn drop(&mut self) {
        self.0.lock().held = false;
    }
}

impl FixedClock {
    /// Start at `millis` since the epoch.
    pub fn new(millis: u64) -> Self {
        Self {
            state: Mutex::new(FixedClockState {
                millis,
                held: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FixedClockState> {
        // The state is two plain integers; a poisoned lock still holds consistent data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Freeze the clock; reads return the same value until the guard is dropped.
    pub fn hold(&self) -> ClockHold<'_> {
        self.lock().held = true;
        ClockHold(self)
    }

    /// Jump forward by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.lock().millis += ms;
    }

    /// Advance the clock by a number of whole days.
    pub fn advance_days(&self, days: u64) {
        self.advance(days * 24 * 60 * 60 * 1000);
    }

    /// Move the clock to `ms` since the epoch.
    pub fn set(&self, ms: u64) {
        self.lock().millis = ms;
    }

    /// Get the current time without advancing.
    pub fn get(&self) -> u64 {
        self.lock().millis
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        let mut state = self.lock();
        let t = state.millis;
        if !state.held {
            state.millis += 1;
        }
        t
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC
        Self::new(1704067200000)
    }
}

impl Debug for FixedClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FixedClock")
            .field("millis", &state.millis)
            .field("held", &state.held)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_strictly_increasing() {
        let clock = FixedClock::new(1000);
        let first = clock.now_millis();
        assert_eq!(first, 1000);
        assert!(clock.now_millis() > first);
    }

    #[test]
    fn held_clock_repeats_the_same_date() {
        let clock = FixedClock::new(1000);
        {
            let _hold = clock.hold();
            assert_eq!(clock.now(), clock.now());
        }
        let a = clock.now();
        assert!(clock.now() > a);
    }

    #[test]
    fn advance_days_moves_dates() {
        let clock = FixedClock::new(0);
        clock.advance_days(7);
        assert_eq!(clock.get(), 7 * 86_400_000);
        assert_eq!(clock.now().timestamp(), 7 * 86_400);
    }
}
