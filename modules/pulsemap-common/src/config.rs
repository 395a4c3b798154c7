//! Engine configuration.
//!
//! Plain parameters injected by the orchestration layer. Nothing in the core
//! reads the environment; callers either build an `EngineConfig` in code or
//! load one from TOML with [`load_config`].

use std::path::Path;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Cell count grows geometrically with resolution; nothing above this is ever honored.
pub const MAX_RESOLUTION_CEILING: u8 = 6;

/// Smoothing spreads to ring-1 and ring-2 neighbors at most.
pub const MAX_SMOOTHING_RADIUS: u8 = 2;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub clustering: ClusteringConfig,
    pub hotspot: HotspotConfig,
    pub flow: FlowConfig,
    pub hex: HexConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clustering.validate()?;
        self.hotspot.validate()?;
        self.flow.validate()?;
        self.hex.validate()?;
        Ok(())
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Load, parse and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = EngineConfig::from_toml_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

// --- Clustering ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringConfig {
    /// Average-linkage similarity two clusters need before they merge.
    pub merge_threshold: f64,
    /// Confidence of single-member clusters and of the all-failed fallback.
    pub confidence_floor: f64,
    pub confidence_cap: f64,
    pub min_title_len: usize,
    pub max_title_len: usize,
    pub sample_titles: usize,
    /// Member count at which the size component of confidence saturates.
    pub size_saturation: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.3,
            confidence_floor: 0.5,
            confidence_cap: 0.95,
            min_title_len: 3,
            max_title_len: 100,
            sample_titles: 3,
            size_saturation: 5,
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit_range("clustering.merge_threshold", self.merge_threshold)?;
        unit_range("clustering.confidence_floor", self.confidence_floor)?;
        unit_range("clustering.confidence_cap", self.confidence_cap)?;
        if self.confidence_cap < self.confidence_floor {
            return Err(ConfigError::OutOfUnitRange {
                name: "clustering.confidence_cap",
                value: self.confidence_cap,
            });
        }
        if self.size_saturation == 0 {
            return Err(ConfigError::NotPositive {
                name: "clustering.size_saturation",
                value: 0.0,
            });
        }
        if self.max_title_len == 0 || self.min_title_len > self.max_title_len {
            return Err(ConfigError::InvalidTitleBounds {
                min: self.min_title_len,
                max: self.max_title_len,
            });
        }
        Ok(())
    }
}

// --- Hotspots ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct IntensityWeights {
    pub volume: f64,
    pub velocity: f64,
    pub confidence: f64,
}

impl Default for IntensityWeights {
    fn default() -> Self {
        Self {
            volume: 0.4,
            velocity: 0.3,
            confidence: 0.3,
        }
    }
}

impl IntensityWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("volume", self.volume),
            ("velocity", self.velocity),
            ("confidence", self.confidence),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeWeight { name, value });
            }
        }
        let sum = self.volume + self.velocity + self.confidence;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSumToOne(sum));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct HotspotConfig {
    pub weights: IntensityWeights,
    /// Total count at which the volume component saturates.
    pub volume_ceiling: f64,
    /// Relative growth over the prior batch at which velocity saturates.
    pub velocity_ceiling: f64,
    pub top_n: usize,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            weights: IntensityWeights::default(),
            volume_ceiling: 1000.0,
            velocity_ceiling: 1.0,
            top_n: 5,
        }
    }
}

impl HotspotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        positive("hotspot.volume_ceiling", self.volume_ceiling)?;
        positive("hotspot.velocity_ceiling", self.velocity_ceiling)?;
        if self.top_n == 0 {
            return Err(ConfigError::NotPositive {
                name: "hotspot.top_n",
                value: 0.0,
            });
        }
        Ok(())
    }
}

// --- Flows ---

/// How two countries' topic sets are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityStrategy {
    /// Cosine similarity of the averaged topic-label vectors.
    #[default]
    Centroid,
    /// Best cosine similarity over all topic-label pairs.
    MaxPairwise,
    /// Jaccard overlap of normalized topic labels.
    LabelOverlap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    pub halflife_hours: f64,
    pub heat_threshold: f64,
    /// Pairs detected further apart than this are not compared. `None` disables the window.
    pub max_window_hours: Option<f64>,
    /// Per-topic similarity needed for a topic pair to count as shared.
    pub shared_topic_threshold: f64,
    pub max_shared_topics: usize,
    pub similarity: SimilarityStrategy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            halflife_hours: 6.0,
            heat_threshold: 0.5,
            max_window_hours: Some(24.0),
            shared_topic_threshold: 0.5,
            max_shared_topics: 3,
            similarity: SimilarityStrategy::Centroid,
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.halflife_hours.is_finite() || self.halflife_hours <= 0.0 {
            return Err(ConfigError::InvalidHalflife(self.halflife_hours));
        }
        unit_range("flow.heat_threshold", self.heat_threshold)?;
        unit_range("flow.shared_topic_threshold", self.shared_topic_threshold)?;
        if let Some(window) = self.max_window_hours {
            positive("flow.max_window_hours", window)?;
        }
        Ok(())
    }
}

/// Parse a time window such as `"6h"` or `"24h"` into hours.
pub fn parse_time_window(window: &str) -> Result<f64, ConfigError> {
    let trimmed = window.trim().to_lowercase();
    let hours = trimmed
        .strip_suffix('h')
        .ok_or_else(|| ConfigError::InvalidTimeWindow(format!("'{window}' must end with 'h'")))?
        .parse::<f64>()
        .map_err(|_| ConfigError::InvalidTimeWindow(format!("'{window}' is not a number of hours")))?;
    if !hours.is_finite() || hours <= 0.0 {
        return Err(ConfigError::InvalidTimeWindow(format!("'{window}' must be positive")));
    }
    Ok(hours)
}

// --- Hex tessellation ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct SmoothingConfig {
    pub enabled: bool,
    /// Neighbor ring radius, 1 or 2.
    pub radius: u8,
    /// Weight multiplier per hex step: a ring-d neighbor receives `decay^d`.
    pub decay: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 2,
            decay: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct HexConfig {
    pub intensity_threshold: f64,
    pub min_resolution: u8,
    pub max_resolution: u8,
    pub default_resolution: u8,
    pub smoothing: SmoothingConfig,
}

impl Default for HexConfig {
    fn default() -> Self {
        Self {
            intensity_threshold: 0.1,
            min_resolution: 0,
            max_resolution: 5,
            default_resolution: 3,
            smoothing: SmoothingConfig::default(),
        }
    }
}

impl HexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit_range("hex.intensity_threshold", self.intensity_threshold)?;
        if self.min_resolution > self.max_resolution
            || self.max_resolution > MAX_RESOLUTION_CEILING
            || !(self.min_resolution..=self.max_resolution).contains(&self.default_resolution)
        {
            return Err(ConfigError::InvalidResolutionBounds {
                min: self.min_resolution,
                max: self.max_resolution,
                ceiling: MAX_RESOLUTION_CEILING,
            });
        }
        if self.smoothing.radius == 0 || self.smoothing.radius > MAX_SMOOTHING_RADIUS {
            return Err(ConfigError::SmoothingRadius {
                got: self.smoothing.radius,
                max: MAX_SMOOTHING_RADIUS,
            });
        }
        unit_range("hex.smoothing.decay", self.smoothing.decay)?;
        Ok(())
    }

    /// Clamp a requested resolution into the configured bounds.
    pub fn clamp_resolution(&self, requested: u8) -> u8 {
        requested.clamp(self.min_resolution, self.max_resolution)
    }
}

fn unit_range(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { name, value })
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let weights = IntensityWeights {
            volume: 0.5,
            velocity: 0.3,
            confidence: 0.3,
        };
        assert!(matches!(
            weights.validate(),
            Err(ConfigError::WeightsDoNotSumToOne(_))
        ));
    }

    #[test]
    fn negative_weight_rejected_even_if_sum_is_one() {
        let weights = IntensityWeights {
            volume: 1.2,
            velocity: -0.2,
            confidence: 0.0,
        };
        assert!(matches!(
            weights.validate(),
            Err(ConfigError::NegativeWeight { name: "velocity", .. })
        ));
    }

    #[test]
    fn halflife_must_be_positive() {
        let mut flow = FlowConfig::default();
        flow.halflife_hours = 0.0;
        assert_eq!(flow.validate(), Err(ConfigError::InvalidHalflife(0.0)));
        flow.halflife_hours = -6.0;
        assert!(flow.validate().is_err());
    }

    #[test]
    fn title_bounds_must_admit_some_title() {
        let mut clustering = ClusteringConfig::default();
        clustering.min_title_len = 120;
        assert_eq!(
            clustering.validate(),
            Err(ConfigError::InvalidTitleBounds { min: 120, max: 100 })
        );
        clustering.min_title_len = 0;
        clustering.max_title_len = 0;
        assert!(clustering.validate().is_err());
    }

    #[test]
    fn top_n_must_be_positive() {
        let mut hotspot = HotspotConfig::default();
        hotspot.top_n = 0;
        assert!(matches!(
            hotspot.validate(),
            Err(ConfigError::NotPositive { name: "hotspot.top_n", .. })
        ));
    }

    #[test]
    fn resolution_bounds_respect_ceiling() {
        let mut hex = HexConfig::default();
        hex.max_resolution = MAX_RESOLUTION_CEILING + 1;
        assert!(matches!(
            hex.validate(),
            Err(ConfigError::InvalidResolutionBounds { .. })
        ));
    }

    #[test]
    fn clamp_resolution_into_bounds() {
        let hex = HexConfig::default();
        assert_eq!(hex.clamp_resolution(9), 5);
        assert_eq!(hex.clamp_resolution(2), 2);
    }

    #[test]
    fn toml_partial_override_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [flow]
            halflife_hours = 12.0
            similarity = "max_pairwise"

            [hex.smoothing]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.flow.halflife_hours, 12.0);
        assert_eq!(config.flow.heat_threshold, 0.5);
        assert_eq!(config.flow.similarity, SimilarityStrategy::MaxPairwise);
        assert!(config.hex.smoothing.enabled);
        assert_eq!(config.hex.smoothing.radius, 2);
    }

    #[test]
    fn toml_with_bad_weights_fails_validation() {
        let err = EngineConfig::from_toml_str(
            r#"
            [hotspot.weights]
            volume = 0.9
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::WeightsDoNotSumToOne(_)));
    }

    #[test]
    fn toml_unknown_key_is_a_parse_error() {
        let err = EngineConfig::from_toml_str("[flow]\nhalf_life = 3.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn parse_time_window_accepts_hours() {
        assert_eq!(parse_time_window("6h").unwrap(), 6.0);
        assert_eq!(parse_time_window(" 24H ").unwrap(), 24.0);
        assert_eq!(parse_time_window("1.5h").unwrap(), 1.5);
    }

    #[test]
    fn parse_time_window_rejects_garbage() {
        assert!(parse_time_window("24").is_err());
        assert!(parse_time_window("0h").is_err());
        assert!(parse_time_window("-3h").is_err());
        assert!(parse_time_window("abch").is_err());
    }
}
