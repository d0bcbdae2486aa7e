use rand::Rng;
use std::time::Duration;

/// Delay before reconnect attempt `n` (0-based):
/// `min(base * 2^n, max)` plus uniform jitter in `[0, 25%)` of that value.
pub(crate) fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let capped = base
        .saturating_mul(1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX))
        .min(max);
    let jitter = capped.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
    capped + jitter
}
