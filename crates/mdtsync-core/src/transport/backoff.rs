// ── Reconnect backoff ──

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay before reconnect attempt `attempt` (0-based).
///
/// `delay = min(initial_delay * 2^attempt, max_delay)`, no jitter, so the
/// schedule is exactly reproducible.
pub fn reconnect_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    config
        .initial_delay
        .saturating_mul(factor)
        .min(config.max_delay)
}
