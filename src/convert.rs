//! Unit and category conversions applied to the raw upstream values.
use chrono::{DateTime, Utc};

use crate::record::AqiLabel;

/// Offset between the kelvin and celsius scales.
const KELVIN_OFFSET: f64 = 273.15;

/// Format used for all timestamps handed downstream.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - KELVIN_OFFSET
}

pub fn celsius_to_kelvin(celsius: f64) -> f64 {
    celsius + KELVIN_OFFSET
}

/// Maps an air quality index score to its health category.
///
/// Scores outside of 1 to 5 map to `AqiLabel::Unknown`.
pub fn categorize_aqi(score: i64) -> AqiLabel {
    match score {
        1 => AqiLabel::Good,
        2 => AqiLabel::Fair,
        3 => AqiLabel::Moderate,
        4 => AqiLabel::Poor,
        5 => AqiLabel::VeryPoor,
        _ => AqiLabel::Unknown,
    }
}

/// Maps a raw, possibly fractional, air quality index score to its health category.
///
/// Only the integral scores 1 to 5 have a category.
pub fn categorize_aqi_score(score: f64) -> AqiLabel {
    if score.fract() == 0.0 {
        categorize_aqi(score as i64)
    } else {
        AqiLabel::Unknown
    }
}

/// Formats epoch seconds as a `YYYY-MM-DD HH:MM:SS` UTC string.
///
/// Returns `None` for timestamps chrono cannot represent.
pub fn format_timestamp(epoch_seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0)
        .map(|timestamp| timestamp.format(TIMESTAMP_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kelvin_to_celsius_subtracts_offset() {
        for kelvin in &[0.0, 223.15, 273.15, 300.0, 333.15] {
            assert_eq!(kelvin_to_celsius(*kelvin), kelvin - 273.15);
        }
        assert!((kelvin_to_celsius(300.0) - 26.85).abs() < 1e-9);
    }

    #[test]
    fn celsius_round_trip() {
        for kelvin in &[0.0, 180.5, 273.15, 300.0, 1.0e6] {
            let back = celsius_to_kelvin(kelvin_to_celsius(*kelvin));
            assert!((back - kelvin).abs() < 1e-9, "{} != {}", back, kelvin);
        }
    }

    #[test]
    fn categorize_aqi_known_scores() {
        assert_eq!(categorize_aqi(1), AqiLabel::Good);
        assert_eq!(categorize_aqi(2), AqiLabel::Fair);
        assert_eq!(categorize_aqi(3), AqiLabel::Moderate);
        assert_eq!(categorize_aqi(4), AqiLabel::Poor);
        assert_eq!(categorize_aqi(5), AqiLabel::VeryPoor);
    }

    #[test]
    fn categorize_aqi_is_total() {
        for score in &[i64::MIN, -1, 0, 6, 7, 100, i64::MAX] {
            assert_eq!(categorize_aqi(*score), AqiLabel::Unknown);
        }
    }

    #[test]
    fn categorize_aqi_score_needs_integral_score() {
        assert_eq!(categorize_aqi_score(3.0), AqiLabel::Moderate);
        for score in &[2.5, -1.5, 7.5, f64::NAN, f64::INFINITY] {
            assert_eq!(categorize_aqi_score(*score), AqiLabel::Unknown);
        }
    }

    #[test]
    fn format_timestamp_utc() {
        assert_eq!(format_timestamp(0).as_deref(), Some("1970-01-01 00:00:00"));
        assert_eq!(format_timestamp(1_700_000_000).as_deref(), Some("2023-11-14 22:13:20"));
        assert_eq!(format_timestamp(i64::MAX), None);
    }
}
