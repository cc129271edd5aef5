//! Backoff between attempts at a transaction that lost a write conflict.

use std::time::Duration;

use rand::Rng;

const BASE_DELAY_MS: u64 = 2;
const MAX_DELAY_MS: u64 = 64;

/// Exponential backoff with full jitter: a random delay in
/// `0..=min(BASE * 2^attempt, MAX)` milliseconds.
pub fn conflict_backoff(attempt: u32) -> Duration {
    let ceiling = BASE_DELAY_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_DELAY_MS);
    Duration::from_millis(rand::rng().random_range(0..=ceiling))
}
