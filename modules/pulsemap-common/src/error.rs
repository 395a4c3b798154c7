use thiserror::Error;

/// Invalid engine configuration. The only fatal error class: raised when a
/// component is constructed, never while processing a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Intensity weights must sum to 1.0, got {0}")]
    WeightsDoNotSumToOne(f64),

    #[error("Intensity weight '{name}' must be non-negative, got {value}")]
    NegativeWeight { name: &'static str, value: f64 },

    #[error("Halflife must be a positive number of hours, got {0}")]
    InvalidHalflife(f64),

    #[error("'{name}' must lie in [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("'{name}' must be a positive finite number, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("Title length bounds {min}..={max} admit no title")]
    InvalidTitleBounds { min: usize, max: usize },

    #[error("Invalid resolution bounds {min}..={max} (hard ceiling {ceiling})")]
    InvalidResolutionBounds { min: u8, max: u8, ceiling: u8 },

    #[error("Smoothing ring radius must be at most {max}, got {got}")]
    SmoothingRadius { got: u8, max: u8 },

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Why a signal was dropped at the input boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalRejection {
    #[error("missing country code")]
    MissingCountryCode,

    #[error("negative count {0}")]
    NegativeCount(i64),

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("empty title")]
    EmptyTitle,
}

/// Malformed country geometry input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Expected a GeoJSON FeatureCollection")]
    NotFeatureCollection,

    #[error("Unsupported geometry type '{0}'")]
    UnsupportedGeometry(String),

    #[error("Malformed coordinates for {country}: {reason}")]
    MalformedCoordinates { country: String, reason: String },
}
