//! # Monotonic time source and duration formatting.
//!
//! All durations and thresholds are computed from a [`Clock`], so tests can
//! swap in a [`ManualClock`] and move time explicitly.
//!
//! [`format_duration`] renders durations the way operators read them in the
//! logs: the largest unit that fits, at most one fractional digit
//! (`0s`, `750ms`, `1.5s`, `5m`, `2.1h`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
///
/// Shared between the test and the service through an `Arc`; any thread may
/// advance it, including an executor in the middle of a batch.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the clock at `at` instead of zero.
    pub fn starting_at(at: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(duration_nanos(at)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_nanos(by), Ordering::SeqCst);
    }

    pub fn set(&self, at: Duration) {
        self.nanos.store(duration_nanos(at), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn duration_nanos(d: Duration) -> u64 {
    d.as_nanos().min(u128::from(u64::MAX)) as u64
}

const UNITS: [(u128, &str); 6] = [
    (86_400_000_000_000, "d"),
    (3_600_000_000_000, "h"),
    (60_000_000_000, "m"),
    (1_000_000_000, "s"),
    (1_000_000, "ms"),
    (1_000, "micros"),
];

/// Formats `d` with the largest unit whose value is at least one.
///
/// ```
/// use std::time::Duration;
/// use masterloop::format_duration;
///
/// assert_eq!(format_duration(Duration::ZERO), "0s");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
/// assert_eq!(format_duration(Duration::from_secs(300)), "5m");
/// ```
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    for (scale, suffix) in UNITS {
        if nanos >= scale {
            return format!("{}{suffix}", one_decimal(nanos, scale));
        }
    }
    format!("{nanos}nanos")
}

/// `value / scale` rounded to one decimal, trailing `.0` dropped.
fn one_decimal(value: u128, scale: u128) -> String {
    let tenths = (value * 10 + scale / 2) / scale;
    let (whole, frac) = (tenths / 10, tenths % 10);
    if frac == 0 {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_whole_units() {
        assert_eq!(format_duration(Duration::from_secs(1)), "1s");
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(86_400 * 3)), "3d");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_micros(12)), "12micros");
        assert_eq!(format_duration(Duration::from_nanos(40)), "40nanos");
    }

    #[test]
    fn test_format_fractions() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_millis(66_000)), "1.1m");
        assert_eq!(format_duration(Duration::from_millis(1_049)), "1s");
        assert_eq!(format_duration(Duration::from_millis(1_050)), "1.1s");
    }

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let clock = ManualClock::starting_at(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Duration::from_millis(6500));
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
