//! Shared fixtures for tests across the workspace.
//!
//! Enabled with the `test-utils` feature.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::geo::CountryGeometry;
use crate::types::Signal;

/// Fixed batch epoch so fixtures never depend on the wall clock.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

/// `epoch()` shifted by a number of hours (fractional hours allowed).
pub fn hours(h: f64) -> DateTime<Utc> {
    epoch() + Duration::milliseconds((h * 3_600_000.0).round() as i64)
}

/// Signal with sensible defaults: source "gdelt", count 10, confidence 0.8.
pub fn signal(country: &str, title: &str, at_hours: f64) -> Signal {
    Signal::builder()
        .source_id("gdelt")
        .country_code(country)
        .timestamp(hours(at_hours))
        .title(title)
        .count(10)
        .confidence(0.8)
        .build()
}

pub fn signal_with(
    country: &str,
    source: &str,
    title: &str,
    at_hours: f64,
    count: i64,
    confidence: f64,
) -> Signal {
    Signal::builder()
        .source_id(source)
        .country_code(country)
        .timestamp(hours(at_hours))
        .title(title)
        .count(count)
        .confidence(confidence)
        .build()
}

/// Axis-aligned rectangular "country".
pub fn rect(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> CountryGeometry {
    CountryGeometry::rectangle(min_lng, min_lat, max_lng, max_lat)
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pulsemap=debug")),
        )
        .with_test_writer()
        .try_init();
}
