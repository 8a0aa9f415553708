//! Time Utilities
//!
//! Decay math works in fractional hours.

use chrono::{DateTime, Duration, Utc};

/// Fractional hours from `from` to `to`, clamped at zero.
pub fn elapsed_hours(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let millis = (to - from).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

/// Duration of `h` fractional hours. Non-finite or negative input yields zero.
pub fn hours(h: f64) -> Duration {
    if !h.is_finite() || h <= 0.0 {
        return Duration::zero();
    }
    // Cap at roughly a century to stay inside chrono's range.
    let millis = (h * 3_600_000.0).min(3_155_760_000_000.0);
    Duration::milliseconds(millis as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_hours() {
        let start = Utc::now();
        assert!((elapsed_hours(start, start + Duration::minutes(90)) - 1.5).abs() < 1e-9);
        assert_eq!(elapsed_hours(start + Duration::hours(1), start), 0.0);
    }

    #[test]
    fn test_hours() {
        assert_eq!(hours(2.5), Duration::minutes(150));
        assert_eq!(hours(-1.0), Duration::zero());
        assert_eq!(hours(f64::NAN), Duration::zero());
        assert!(hours(f64::MAX) > Duration::days(365 * 99));
    }
}
