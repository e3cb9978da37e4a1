//! Clock and time types for pipeline synchronization.
//!
//! This module provides:
//! - [`ClockTime`]: nanosecond timestamp with a `NONE` sentinel
//! - [`Clock`]: trait for time sources
//! - [`SystemClock`]: monotonic clock, shared process-wide through [`SystemClock::obtain`]

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

// ============================================================================
// ClockTime
// ============================================================================

/// Time in nanoseconds.
///
/// Buffer timestamps, segment boundaries and running time all use this type.
/// `ClockTime::NONE` marks an unset value and propagates through arithmetic.
///
/// ```rust
/// use padflow::clock::ClockTime;
///
/// let t = ClockTime::from_secs(1) + ClockTime::from_millis(500);
/// assert_eq!(t.millis(), 1500);
/// assert_eq!(format!("{}", t), "0:00:01.500000000");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Largest valid time.
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Unset time.
    pub const NONE: Self = Self(u64::MAX);

    /// One second.
    pub const SECOND: Self = Self(1_000_000_000);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us.saturating_mul(1_000))
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

    /// Nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Seconds (truncated).
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Whether this is the unset sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Whether this is a valid time.
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// `None` for the sentinel, `Some(self)` otherwise.
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }

    /// Saturating addition; `NONE` if either side is `NONE`.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        match self.0.checked_add(rhs.0) {
            Some(v) if v != u64::MAX => Self(v),
            _ => Self::MAX,
        }
    }

    /// Saturating subtraction; `NONE` if either side is `NONE`.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl std::ops::AddAssign for ClockTime {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX - 1).min(u64::MAX - 1))
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            return f.write_str("--:--:--.---------");
        }
        let secs = self.secs();
        write!(
            f,
            "{}:{:02}:{:02}.{:09}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            self.0 % 1_000_000_000
        )
    }
}

// ============================================================================
// Clock
// ============================================================================

/// A source of monotonically increasing time.
pub trait Clock: Send + Sync {
    /// Current absolute time of this clock.
    fn time(&self) -> ClockTime;

    /// Human-readable clock name.
    fn name(&self) -> &str {
        "clock"
    }
}

/// Monotonic clock backed by [`Instant`].
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

static SYSTEM_CLOCK: OnceLock<Arc<SystemClock>> = OnceLock::new();

impl SystemClock {
    /// Create a private clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// The process-wide system clock.
    ///
    /// Initialized on first use and never torn down. Pipelines pick this
    /// clock unless configured otherwise.
    pub fn obtain() -> Arc<SystemClock> {
        SYSTEM_CLOCK
            .get_or_init(|| Arc::new(SystemClock::new()))
            .clone()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn time(&self) -> ClockTime {
        ClockTime::from(self.epoch.elapsed())
    }

    fn name(&self) -> &str {
        "system-clock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_propagates() {
        assert!((ClockTime::NONE + ClockTime::SECOND).is_none());
        assert!((ClockTime::SECOND - ClockTime::NONE).is_none());
        assert_eq!(ClockTime::NONE.to_option(), None);
    }

    #[test]
    fn test_add_saturates_below_none() {
        assert_eq!(ClockTime::MAX + ClockTime::SECOND, ClockTime::MAX);
        assert_eq!(ClockTime::ZERO - ClockTime::SECOND, ClockTime::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(ClockTime::from_secs(3661).to_string(), "1:01:01.000000000");
        assert_eq!(ClockTime::NONE.to_string(), "--:--:--.---------");
    }

    #[test]
    fn test_system_clock_is_singleton_and_monotonic() {
        let a = SystemClock::obtain();
        let b = SystemClock::obtain();
        assert!(Arc::ptr_eq(&a, &b));
        let t1 = a.time();
        let t2 = b.time();
        assert!(t2 >= t1);
    }
}
