//! Time types for arbitration requests.
//!
//! Activation requests carry the time window the client intends to use
//! the resource for. Windows are expressed in [`ClockTime`] nanoseconds
//! against a monotonic epoch supplied by the caller (`system_time` in
//! [`ActivationRequest`](crate::unit::ActivationRequest)).

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// Time in nanoseconds (8 bytes, Copy).
///
/// # Special Values
///
/// - `ClockTime::ZERO`: zero time
/// - `ClockTime::NONE`: invalid/unset time (sentinel)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable time (one less than the NONE sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Invalid/unset time.
    pub const NONE: Self = Self(u64::MAX);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Get the value in nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Check whether this is the NONE sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check whether this is a valid (non-NONE) time.
    #[inline]
    pub const fn is_some(self) -> bool {
        !self.is_none()
    }

    /// Saturating addition; NONE is absorbing.
    #[inline]
    pub const fn saturating_add(self, other: Self) -> Self {
        if self.is_none() || other.is_none() {
            return Self::NONE;
        }
        let sum = self.0.saturating_add(other.0);
        if sum >= u64::MAX { Self::MAX } else { Self(sum) }
    }

    /// Saturating subtraction; NONE is absorbing.
    #[inline]
    pub const fn saturating_sub(self, other: Self) -> Self {
        if self.is_none() || other.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(other.0))
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> Self {
        Self(d.as_nanos().min(u64::MAX as u128 - 1) as u64)
    }
}

impl Add for ClockTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl Sub for ClockTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}.{:03}s", self.0 / 1_000_000_000, (self.0 % 1_000_000_000) / 1_000_000)
        }
    }
}

/// The time span a client requests a resource for.
///
/// A window with `start == ClockTime::NONE` means "as soon as possible";
/// a `duration` of `ClockTime::NONE` means open-ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeWindow {
    /// Requested start time.
    pub start: ClockTime,
    /// Requested duration.
    pub duration: ClockTime,
}

impl TimeWindow {
    /// An unconstrained window (start now, open-ended).
    pub const ASAP: Self = Self {
        start: ClockTime::NONE,
        duration: ClockTime::NONE,
    };

    /// Create a window.
    pub const fn new(start: ClockTime, duration: ClockTime) -> Self {
        Self { start, duration }
    }

    /// The exclusive end of the window, or NONE when open-ended.
    pub fn end(&self) -> ClockTime {
        if self.start.is_none() || self.duration.is_none() {
            ClockTime::NONE
        } else {
            self.start + self.duration
        }
    }

    /// Key used by the arbitration comparator: unset starts sort last.
    pub(crate) fn start_key(&self) -> u64 {
        self.start.nanos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_basics() {
        let t = ClockTime::from_millis(1500);
        assert_eq!(t.nanos(), 1_500_000_000);
        assert_eq!(format!("{}", t), "1.500s");
        assert!(t.is_some());
        assert!(ClockTime::NONE.is_none());
    }

    #[test]
    fn test_clock_time_arithmetic() {
        let a = ClockTime::from_secs(1);
        let b = ClockTime::from_millis(500);
        assert_eq!((a + b).nanos(), 1_500_000_000);
        assert_eq!((a - b).nanos(), 500_000_000);
        assert_eq!(b - a, ClockTime::ZERO);
        assert!((a + ClockTime::NONE).is_none());
    }

    #[test]
    fn test_time_window_end() {
        let w = TimeWindow::new(ClockTime::from_secs(2), ClockTime::from_secs(3));
        assert_eq!(w.end(), ClockTime::from_secs(5));
        assert!(TimeWindow::ASAP.end().is_none());
    }
}
