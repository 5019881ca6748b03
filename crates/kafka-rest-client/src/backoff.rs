//! Poll pacing for consumer streams.
//!
//! A stream never re-polls in a tight loop. After an empty batch it waits at
//! least `min_delay`; after consecutive transport errors the wait grows
//! exponentially up to `max_delay`:
//!
//! ```text
//! idle:  delay = clamp(requested_delay, min_delay, max_delay)
//! error: delay = min(idle_delay * multiplier^(errors - 1), max_delay)
//!
//! With defaults (100ms min, 2x multiplier, 30s max) and no requested delay:
//! - empty batch:  100ms
//! - 1st error:    100ms
//! - 2nd error:    200ms
//! - 3rd error:    400ms
//! - ...
//! - capped at 30s
//! ```
//!
//! A successful poll resets the error count.

use crate::config::millis;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pacing policy shared by every stream of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Floor for the delay between two polls of the same stream
    #[serde(with = "millis")]
    pub min_delay: Duration,

    /// Ceiling for any delay, including error back-off
    #[serde(with = "millis")]
    pub max_delay: Duration,

    /// Growth factor applied per consecutive error
    pub backoff_multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl PollPolicy {
    pub fn new(min_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            min_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Delay before re-polling after an empty batch.
    ///
    /// `requested` is the stream's own poll delay, if it set one.
    pub fn idle_delay(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.min_delay)
            .max(self.min_delay)
            .min(self.max_delay)
    }

    /// Delay before re-polling after `consecutive_errors` failed polls in a row.
    pub fn error_delay(&self, requested: Option<Duration>, consecutive_errors: u32) -> Duration {
        let base = self.idle_delay(requested);
        let exponent = i32::try_from(consecutive_errors.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = base.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64).max(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_policy_default() {
        let policy = PollPolicy::default();
        assert_eq!(policy.min_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_idle_delay_enforces_floor() {
        let policy = PollPolicy::default();
        assert_eq!(policy.idle_delay(None), Duration::from_millis(100));
        assert_eq!(
            policy.idle_delay(Some(Duration::ZERO)),
            Duration::from_millis(100)
        );
        assert_eq!(
            policy.idle_delay(Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_idle_delay_capped_at_max() {
        let policy = PollPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 2.0);
        assert_eq!(
            policy.idle_delay(Some(Duration::from_secs(60))),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_error_delay_grows_exponentially() {
        let policy = PollPolicy::default();
        assert_eq!(policy.error_delay(None, 1), Duration::from_millis(100));
        assert_eq!(policy.error_delay(None, 2), Duration::from_millis(200));
        assert_eq!(policy.error_delay(None, 3), Duration::from_millis(400));
        assert_eq!(policy.error_delay(None, 4), Duration::from_millis(800));
    }

    #[test]
    fn test_error_delay_capped() {
        let policy = PollPolicy::default();
        assert_eq!(policy.error_delay(None, 20), Duration::from_secs(30));
        assert_eq!(policy.error_delay(None, u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_error_delay_stays_capped_past_i32_range() {
        let policy = PollPolicy::default();
        let past_i32 = i32::MAX as u32 + 2;
        assert_eq!(policy.error_delay(None, past_i32), Duration::from_secs(30));
    }

    #[test]
    fn test_error_delay_starts_from_requested_delay() {
        let policy = PollPolicy::default();
        let requested = Some(Duration::from_secs(1));
        assert_eq!(policy.error_delay(requested, 1), Duration::from_secs(1));
        assert_eq!(policy.error_delay(requested, 2), Duration::from_secs(2));
    }
}
