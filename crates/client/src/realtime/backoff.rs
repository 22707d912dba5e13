//! Reconnect backoff.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay before reconnect attempt `attempt` (zero-based): the base delay
/// doubled per attempt, capped at the configured maximum.
#[must_use]
pub fn reconnect_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    config
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(config.max_delay)
}
