//! Exponential backoff with jitter for query resubmissions.

use std::time::Duration;

use rand::Rng;

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped at
/// `max`, plus up to 10% jitter so parallel retries spread out.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 || base_ms == 0 {
        return Duration::ZERO;
    }

    let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let delay = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    Duration::from_millis(delay + jitter)
}
