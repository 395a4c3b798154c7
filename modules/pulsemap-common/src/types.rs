use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::SignalRejection;

// --- Signals ---

/// A single timestamped, country-tagged data point produced by a provider
/// normalizer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TypedBuilder)]
pub struct Signal {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    /// Provider that produced the signal ("gdelt", "trends", "wikipedia", ...).
    #[builder(setter(into))]
    pub source_id: String,
    /// ISO 3166-1 alpha-2.
    #[builder(setter(into))]
    pub country_code: String,
    pub timestamp: DateTime<Utc>,
    #[builder(setter(into))]
    pub title: String,
    /// Raw popularity count. Signed so that malformed provider data can be
    /// represented and rejected instead of wrapping.
    #[builder(default = 1)]
    pub count: i64,
    #[builder(default = 1.0)]
    pub confidence: f64,
    /// Tone in [-1, 1] when the provider reports one.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub sentiment: Option<f64>,
    #[builder(default)]
    #[serde(default)]
    pub themes: Vec<String>,
}

impl Signal {
    /// Check the record against the input contract. Invalid signals are
    /// dropped by the components, never propagated as errors.
    pub fn validate(&self) -> Result<(), SignalRejection> {
        if self.country_code.trim().is_empty() {
            return Err(SignalRejection::MissingCountryCode);
        }
        if self.count < 0 {
            return Err(SignalRejection::NegativeCount(self.count));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(SignalRejection::ConfidenceOutOfRange(self.confidence));
        }
        if self.title.trim().is_empty() {
            return Err(SignalRejection::EmptyTitle);
        }
        Ok(())
    }
}

// --- Topics ---

/// A cluster of signals judged to concern the same subject, recomputed
/// wholesale every batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Topic {
    /// Content-derived id, stable across countries and batches for the same label.
    pub id: String,
    pub label: String,
    pub member_signal_ids: Vec<Uuid>,
    pub count: u64,
    pub confidence: f64,
    pub sample_titles: Vec<String>,
    pub sources: BTreeSet<String>,
    /// Earliest member timestamp.
    pub first_seen: DateTime<Utc>,
    /// Latest member timestamp.
    pub last_seen: DateTime<Utc>,
    /// Count-weighted mean of member sentiment, if any member carried one.
    pub sentiment: Option<f64>,
    pub themes: BTreeSet<String>,
}

impl Topic {
    pub fn member_count(&self) -> usize {
        self.member_signal_ids.len()
    }
}

/// Ranking used everywhere topics are ordered: count desc, confidence desc,
/// label asc.
pub fn topic_rank(a: &Topic, b: &Topic) -> std::cmp::Ordering {
    b.count
        .cmp(&a.count)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.label.cmp(&b.label))
}

// --- Hotspots ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// Scores within ±0.05 read as neutral.
    pub fn from_score(score: f64) -> Self {
        if score > 0.05 {
            SentimentLabel::Positive
        } else if score < -0.05 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

/// Country-level intensity summary for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Hotspot {
    pub country_code: String,
    /// Weighted blend of the three components, in [0, 1].
    pub intensity: f64,
    pub top_topics: Vec<Topic>,
    pub volume: f64,
    pub velocity: f64,
    pub confidence: f64,
    pub topic_count: usize,
    /// Sum of topic counts; feeds the next batch's velocity.
    pub total_count: u64,
    pub source_count: usize,
    /// Distinct sources / member signals, in [0, 1].
    pub source_diversity: f64,
    pub avg_sentiment: Option<f64>,
    pub dominant_sentiment: SentimentLabel,
    pub theme_distribution: BTreeMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

// --- Flows ---

/// Directed, time-decayed similarity edge between two countries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Flow {
    pub from_country: String,
    pub to_country: String,
    pub heat: f64,
    pub similarity: f64,
    pub time_delta_hours: f64,
    pub shared_topic_ids: Vec<String>,
    pub shared_topic_labels: Vec<String>,
    /// When the shared topics surfaced in the destination country.
    pub detected_at: DateTime<Utc>,
}

// --- Hex cells ---

/// Axial coordinates of a hexagonal cell at a given resolution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct HexCellId {
    pub resolution: u8,
    pub q: i32,
    pub r: i32,
}

impl fmt::Display for HexCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resolution, self.q, self.r)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HexCell {
    pub cell_id: HexCellId,
    /// Summed across contributing countries and capped at 1.0.
    pub intensity: f64,
    pub countries: BTreeSet<String>,
    pub top_topic: Option<String>,
    /// True when the cell only exists because smoothing spread intensity into it.
    #[serde(default)]
    pub interpolated: bool,
}
