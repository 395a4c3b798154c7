//! Per-country hotspot intensity.
//!
//! Formula:
//!   volume     = min(total_count / volume_ceiling, 1.0)
//!   velocity   = clamp(((total - prior) / max(prior, 1)) / velocity_ceiling, 0, 1), 0 without a prior batch
//!   confidence = Σ(topic.confidence × topic.count) / Σ topic.count
//!   intensity  = w_volume × volume + w_velocity × velocity + w_confidence × confidence

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use pulsemap_common::{
    topic_rank, ConfigError, Hotspot, HotspotConfig, SentimentLabel, Topic,
};

/// Total topic count per country from the previous batch.
pub type PriorTotals = BTreeMap<String, u64>;

/// Build the prior-batch totals that the next cycle's velocity is measured against.
pub fn prior_totals(hotspots: &[Hotspot]) -> PriorTotals {
    hotspots
        .iter()
        .map(|h| (h.country_code.clone(), h.total_count))
        .collect()
}

pub struct HotspotAggregator {
    config: HotspotConfig,
}

impl HotspotAggregator {
    pub fn new(config: HotspotConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HotspotConfig {
        &self.config
    }

    /// Summarize one country's topics for this batch.
    ///
    /// `prior_total` is the country's total count in the previous batch;
    /// `None` is a cold start and yields zero velocity.
    pub fn aggregate(
        &self,
        country_code: &str,
        topics: &[Topic],
        prior_total: Option<u64>,
        as_of: DateTime<Utc>,
    ) -> Hotspot {
        let total_count = topics.iter().fold(0u64, |acc, t| acc.saturating_add(t.count));

        let volume = self.volume_component(total_count);
        let velocity = self.velocity_component(total_count, prior_total);
        let confidence = confidence_component(topics);
        let intensity = self.intensity(volume, velocity, confidence);

        let mut ranked: Vec<Topic> = topics.to_vec();
        ranked.sort_by(topic_rank);
        ranked.truncate(self.config.top_n);

        let sources: BTreeSet<&str> = topics
            .iter()
            .flat_map(|t| t.sources.iter().map(String::as_str))
            .collect();
        let members: usize = topics.iter().map(Topic::member_count).sum();
        let source_diversity = if members == 0 {
            0.0
        } else {
            (sources.len() as f64 / members as f64).min(1.0)
        };

        let avg_sentiment = average_sentiment(topics);

        debug!(
            country = country_code,
            topics = topics.len(),
            total_count,
            volume,
            velocity,
            confidence,
            intensity,
            "Aggregated hotspot"
        );

        Hotspot {
            country_code: country_code.to_string(),
            intensity,
            top_topics: ranked,
            volume,
            velocity,
            confidence,
            topic_count: topics.len(),
            total_count,
            source_count: sources.len(),
            source_diversity,
            avg_sentiment,
            dominant_sentiment: avg_sentiment
                .map(SentimentLabel::from_score)
                .unwrap_or(SentimentLabel::Neutral),
            theme_distribution: theme_distribution(topics),
            timestamp: as_of,
        }
    }

    /// Total count against the calibration ceiling, saturating at 1.0.
    pub fn volume_component(&self, total_count: u64) -> f64 {
        (total_count as f64 / self.config.volume_ceiling).clamp(0.0, 1.0)
    }

    /// Relative growth over the prior batch. Shrinking counts and cold starts score 0.
    pub fn velocity_component(&self, total_count: u64, prior_total: Option<u64>) -> f64 {
        let Some(prior) = prior_total else {
            return 0.0;
        };
        let growth = (total_count as f64 - prior as f64) / (prior.max(1) as f64);
        (growth / self.config.velocity_ceiling).clamp(0.0, 1.0)
    }

    pub fn intensity(&self, volume: f64, velocity: f64, confidence: f64) -> f64 {
        let w = &self.config.weights;
        let raw = w.volume * volume + w.velocity * velocity + w.confidence * confidence;
        if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Mean topic confidence weighted by each topic's share of the total count.
/// Falls back to the plain mean when every topic has a zero count.
pub fn confidence_component(topics: &[Topic]) -> f64 {
    if topics.is_empty() {
        return 0.0;
    }
    let total: f64 = topics.iter().map(|t| t.count as f64).sum();
    let mean = if total > 0.0 {
        topics
            .iter()
            .map(|t| t.confidence * t.count as f64)
            .sum::<f64>()
            / total
    } else {
        topics.iter().map(|t| t.confidence).sum::<f64>() / topics.len() as f64
    };
    mean.clamp(0.0, 1.0)
}

fn average_sentiment(topics: &[Topic]) -> Option<f64> {
    let scored: Vec<(f64, f64)> = topics
        .iter()
        .filter_map(|t| t.sentiment.map(|s| (s, t.count as f64)))
        .collect();
    if scored.is_empty() {
        return None;
    }
    let weight: f64 = scored.iter().map(|(_, w)| w).sum();
    if weight > 0.0 {
        Some(scored.iter().map(|(s, w)| s * w).sum::<f64>() / weight)
    } else {
        Some(scored.iter().map(|(s, _)| s).sum::<f64>() / scored.len() as f64)
    }
}

fn theme_distribution(topics: &[Topic]) -> BTreeMap<String, u64> {
    let mut dist = BTreeMap::new();
    for topic in topics {
        for theme in &topic.themes {
            let total: &mut u64 = dist.entry(theme.clone()).or_default();
            *total = total.saturating_add(topic.count);
        }
    }
    dist
}
