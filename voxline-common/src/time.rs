//! Duration utilities

use std::time::Duration;

/// Convert a timeline offset in seconds to a duration.
///
/// Negative, NaN and infinite inputs clamp to zero; timeline arithmetic
/// routinely produces slightly negative remainders.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}
