//! Small shared utilities.

pub mod json_canonical;

use chrono::Utc;

/// Returns the current unix timestamp as fractional seconds.
#[must_use]
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Rounds a latency measurement to four decimal places for storage.
#[must_use]
pub fn round_latency(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Swaps the two legs of a `BASE-QUOTE` market symbol.
///
/// Symbols without a separator are returned unchanged.
#[must_use]
pub fn invert_pair(pair: &str) -> String {
    match pair.split_once('-') {
        Some((base, quote)) => format!("{quote}-{base}"),
        None => pair.to_string(),
    }
}
