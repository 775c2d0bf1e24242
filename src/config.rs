//! # Master service configuration.
//!
//! Provides [`Config`] centralized settings for the update loop and its monitors.
//!
//! ## Sentinel values
//! - `starvation_check_interval = 0s` → no ticker; starvation is only evaluated
//!   at loop iteration boundaries
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

/// Global configuration for the master service.
///
/// ## Field semantics
/// - `slow_task_logging_threshold`: compute/notify/publish steps slower than this log at WARN
/// - `starvation_logging_threshold`: how long the queue may stay non-empty before WARN
/// - `starvation_check_interval`: period of the starvation ticker (`0s` = disabled)
/// - `bus_capacity`: event bus ring buffer size (min 1)
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over sprinkling
/// sentinel checks across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Threshold above which an update step is logged at WARN instead of DEBUG.
    pub slow_task_logging_threshold: Duration,

    /// Continuous non-empty queue time after which starvation is reported.
    ///
    /// Reported again every further multiple of this value.
    pub starvation_logging_threshold: Duration,

    /// Interval of the ticker that re-evaluates starvation while the loop is busy.
    pub starvation_check_interval: Duration,

    /// Capacity of the runtime event bus.
    ///
    /// Slow receivers lagging behind more than this many events skip the oldest ones.
    pub bus_capacity: usize,
}

impl Config {
    /// Returns the starvation ticker period as an `Option`.
    ///
    /// - `None` → no ticker
    /// - `Some(d)` → tick every `d`
    #[inline]
    pub fn starvation_tick(&self) -> Option<Duration> {
        if self.starvation_check_interval == Duration::ZERO {
            None
        } else {
            Some(self.starvation_check_interval)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `slow_task_logging_threshold = 10s`
    /// - `starvation_logging_threshold = 5m`
    /// - `starvation_check_interval = 1s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            slow_task_logging_threshold: Duration::from_secs(10),
            starvation_logging_threshold: Duration::from_secs(5 * 60),
            starvation_check_interval: Duration::from_secs(1),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.slow_task_logging_threshold, Duration::from_secs(10));
        assert_eq!(cfg.starvation_logging_threshold, Duration::from_secs(300));
        assert_eq!(cfg.starvation_tick(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_sentinels() {
        let cfg = Config {
            starvation_check_interval: Duration::ZERO,
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.starvation_tick(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
