//! Reconnection policy and exponential backoff.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Consecutive abnormal closes tolerated before giving up.
    pub max_attempts: u32,
    /// Fixed delay after an invalid-session notice.
    pub invalid_session_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: 10,
            invalid_session_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay after `attempts` prior consecutive failures.
    #[must_use]
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        calculate_backoff(
            attempts,
            self.initial_delay,
            self.max_delay,
            self.backoff_multiplier,
        )
    }

    /// Whether another reconnect may be scheduled after `attempts` failures.
    #[must_use]
    pub const fn should_reconnect(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Calculate `min(initial * multiplier^attempts, max)`.
#[must_use]
pub fn calculate_backoff(
    attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
) -> Duration {
    let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
    let delay_millis = initial_delay.as_millis() as f64 * multiplier.powi(exponent);
    if !delay_millis.is_finite() || delay_millis >= max_delay.as_millis() as f64 {
        return max_delay;
    }
    Duration::from_millis(delay_millis as u64).min(max_delay)
}
