//! Decayed offload score.
//!
//! `score = now + s * e^(-k * (now - updated_at))`
//!
//! The `now` term ranks sessions by recency when compared at the same
//! instant (lower score means staler). The second term is a priority boost
//! proportional to the static offloadable score `s`, halving every
//! `ln 2 / k` seconds.

use crate::types::SessionMetadata;

/// Boost part of the score: `s * e^(-k * Δ)`. Negative Δ is clamped to 0.
pub fn decayed_boost(static_score: i64, elapsed_secs: f64, decay_rate: f64) -> f64 {
    static_score as f64 * (-decay_rate * elapsed_secs.max(0.0)).exp()
}

/// Offload score of `metadata` evaluated at `now`.
pub fn offload_score(metadata: &SessionMetadata, now: i64, decay_rate: f64) -> f64 {
    let elapsed = now.saturating_sub(metadata.updated_at) as f64;
    now as f64 + decayed_boost(metadata.static_offloadable_score, elapsed, decay_rate)
}
