//! Directed topic flows between countries.
//!
//! Every unordered pair of countries with topics is compared once, over each
//! country's full topic set rather than its ranked top topics. The pair
//! needs at least one shared topic; each side's detection time is the
//! earliest `first_seen` among its shared topics, and the earlier side is
//! taken as the source.
//!
//! Formula:
//!   heat = similarity × exp(−Δt / halflife)
//!
//! Equal detection times carry no direction and the pair is dropped.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::Serialize;
use tracing::{debug, info, warn};

use pulsemap_common::{ConfigError, Flow, FlowConfig, SimilarityStrategy, Topic};

use crate::text::{self, SparseVector, TfIdf};

/// Topic labels are short, so trigrams cover whole phrases.
const LABEL_NGRAMS: usize = 3;

/// Every topic clustered for each country in a batch.
pub type TopicsByCountry = BTreeMap<String, Vec<Topic>>;

/// Counts for every way a country or pair can drop out of flow detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct FlowStats {
    /// Countries with at least one topic.
    pub countries: usize,
    /// Countries excluded for having no topics.
    pub excluded_countries: usize,
    pub pairs_considered: usize,
    pub no_shared_topics: usize,
    pub outside_window: usize,
    pub ambiguous_direction: usize,
    pub below_threshold: usize,
    pub flows_emitted: usize,
    pub formula: String,
}

#[derive(Debug, Clone, Default)]
pub struct FlowReport {
    pub flows: Vec<Flow>,
    pub stats: FlowStats,
}

/// One country's topics with their label vectors, fitted over the whole batch.
struct CountryTopics<'a> {
    code: &'a str,
    topics: &'a [Topic],
    vectors: Vec<SparseVector>,
    centroid: SparseVector,
    labels: BTreeSet<String>,
}

impl<'a> CountryTopics<'a> {
    fn new(code: &'a str, topics: &'a [Topic], vectors: Vec<SparseVector>) -> Self {
        let centroid = text::centroid(vectors.iter().filter(|v| !v.is_empty()));
        let labels = topics
            .iter()
            .map(|t| text::normalize_title(&t.label))
            .collect();
        Self {
            code,
            topics,
            vectors,
            centroid,
            labels,
        }
    }

    fn is_vectorized(&self) -> bool {
        !self.centroid.is_empty()
    }
}

enum PairOutcome {
    Flow(Flow),
    NoSharedTopics,
    OutsideWindow,
    Ambiguous,
    BelowThreshold,
}

pub struct FlowDetector {
    config: FlowConfig,
}

impl FlowDetector {
    pub fn new(config: FlowConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// `exp(−Δt / halflife)`; negative gaps count as zero.
    pub fn time_decay(&self, delta_hours: f64) -> f64 {
        (-delta_hours.max(0.0) / self.config.halflife_hours).exp()
    }

    pub fn heat(&self, similarity: f64, delta_hours: f64) -> f64 {
        if !similarity.is_finite() || !delta_hours.is_finite() {
            return 0.0;
        }
        (similarity.clamp(0.0, 1.0) * self.time_decay(delta_hours)).clamp(0.0, 1.0)
    }

    pub fn formula(&self) -> String {
        format!(
            "heat = similarity * exp(-dt / {}h)",
            self.config.halflife_hours
        )
    }

    /// Flows between every pair of countries in the batch, hottest first.
    pub fn detect(&self, topics_by_country: &TopicsByCountry) -> FlowReport {
        let mut stats = FlowStats {
            formula: self.formula(),
            ..Default::default()
        };

        let (active, excluded): (Vec<(&String, &Vec<Topic>)>, Vec<_>) = topics_by_country
            .iter()
            .partition(|(_, topics)| !topics.is_empty());
        stats.countries = active.len();
        stats.excluded_countries = excluded.len();

        let labels: Vec<&str> = active
            .iter()
            .flat_map(|(_, topics)| topics.iter().map(|t| t.label.as_str()))
            .collect();
        let (_, vectors) = TfIdf::fit_transform(&labels, LABEL_NGRAMS);
        let mut vectors = vectors.into_iter();
        let countries: Vec<CountryTopics> = active
            .iter()
            .map(|&(code, topics)| {
                CountryTopics::new(code, topics, vectors.by_ref().take(topics.len()).collect())
            })
            .collect();

        let pairs: Vec<(usize, usize)> = (0..countries.len())
            .flat_map(|i| (i + 1..countries.len()).map(move |j| (i, j)))
            .collect();
        stats.pairs_considered = pairs.len();

        let outcomes: Vec<PairOutcome> = pairs
            .par_iter()
            .map(|&(i, j)| self.evaluate(&countries[i], &countries[j]))
            .collect();

        let mut flows = Vec::new();
        for outcome in outcomes {
            match outcome {
                PairOutcome::Flow(flow) => flows.push(flow),
                PairOutcome::NoSharedTopics => stats.no_shared_topics += 1,
                PairOutcome::OutsideWindow => stats.outside_window += 1,
                PairOutcome::Ambiguous => stats.ambiguous_direction += 1,
                PairOutcome::BelowThreshold => stats.below_threshold += 1,
            }
        }
        flows.sort_by(|a, b| {
            b.heat
                .total_cmp(&a.heat)
                .then_with(|| a.from_country.cmp(&b.from_country))
                .then_with(|| a.to_country.cmp(&b.to_country))
        });
        stats.flows_emitted = flows.len();

        if stats.ambiguous_direction > 0 {
            warn!(
                pairs = stats.ambiguous_direction,
                "Dropped country pairs with equal detection times"
            );
        }
        info!(
            countries = stats.countries,
            excluded = stats.excluded_countries,
            pairs = stats.pairs_considered,
            flows = stats.flows_emitted,
            below_threshold = stats.below_threshold,
            outside_window = stats.outside_window,
            "Flow detection complete"
        );

        FlowReport { flows, stats }
    }

    fn evaluate(&self, a: &CountryTopics, b: &CountryTopics) -> PairOutcome {
        let shared = self.shared_topics(a, b);
        let (Some(a_time), Some(b_time)) = (
            shared.iter().map(|&(i, _)| a.topics[i].first_seen).min(),
            shared.iter().map(|&(_, j)| b.topics[j].first_seen).min(),
        ) else {
            return PairOutcome::NoSharedTopics;
        };

        let delta_hours = hours_between(a_time, b_time).abs();
        if let Some(window) = self.config.max_window_hours {
            if delta_hours > window {
                return PairOutcome::OutsideWindow;
            }
        }
        if a_time == b_time {
            debug!(a = a.code, b = b.code, "Equal detection times, direction ambiguous");
            return PairOutcome::Ambiguous;
        }

        let similarity = self.similarity(a, b);
        let heat = self.heat(similarity, delta_hours);
        if heat < self.config.heat_threshold {
            return PairOutcome::BelowThreshold;
        }

        let (from, to, from_indices, detected_at): (_, _, BTreeSet<usize>, _) = if a_time < b_time {
            (a, b, shared.iter().map(|&(i, _)| i).collect(), b_time)
        } else {
            (b, a, shared.iter().map(|&(_, j)| j).collect(), a_time)
        };
        let shared_topics: Vec<&Topic> = from_indices
            .into_iter()
            .map(|i| &from.topics[i])
            .take(self.config.max_shared_topics)
            .collect();

        debug!(
            from = from.code,
            to = to.code,
            similarity,
            delta_hours,
            heat,
            "Flow detected"
        );

        PairOutcome::Flow(Flow {
            from_country: from.code.to_string(),
            to_country: to.code.to_string(),
            heat,
            similarity,
            time_delta_hours: delta_hours,
            shared_topic_ids: shared_topics.iter().map(|t| t.id.clone()).collect(),
            shared_topic_labels: shared_topics.iter().map(|t| t.label.clone()).collect(),
            detected_at,
        })
    }

    /// Topic index pairs `(a, b)` that describe the same subject: same id,
    /// same normalized label, or label vectors at least as similar as the
    /// shared-topic threshold.
    fn shared_topics(&self, a: &CountryTopics, b: &CountryTopics) -> Vec<(usize, usize)> {
        let mut shared = Vec::new();
        for (i, ta) in a.topics.iter().enumerate() {
            for (j, tb) in b.topics.iter().enumerate() {
                let sim = text::cosine(&a.vectors[i], &b.vectors[j]);
                let same = ta.id == tb.id
                    || text::normalize_title(&ta.label) == text::normalize_title(&tb.label)
                    || (sim > 0.0 && sim >= self.config.shared_topic_threshold);
                if same {
                    shared.push((i, j));
                }
            }
        }
        shared
    }

    /// Symmetric similarity in [0, 1] between two countries' topic sets.
    /// Vector strategies fall back to label overlap when either side has no
    /// vectorizable label.
    fn similarity(&self, a: &CountryTopics, b: &CountryTopics) -> f64 {
        let vectorized = a.is_vectorized() && b.is_vectorized();
        let sim = match self.config.similarity {
            SimilarityStrategy::Centroid if vectorized => text::cosine(&a.centroid, &b.centroid),
            SimilarityStrategy::MaxPairwise if vectorized => a
                .vectors
                .iter()
                .flat_map(|va| b.vectors.iter().map(move |vb| text::cosine(va, vb)))
                .fold(0.0, f64::max),
            _ => label_overlap(&a.labels, &b.labels),
        };
        sim.clamp(0.0, 1.0)
    }
}

/// Jaccard overlap of two normalized label sets.
pub fn label_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::topic_id;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn topic(label: &str, at_hours: i64) -> Topic {
        let seen = t0() + Duration::hours(at_hours);
        Topic {
            id: topic_id(label),
            label: label.to_string(),
            member_signal_ids: vec![uuid::Uuid::new_v4()],
            count: 10,
            confidence: 0.8,
            sample_titles: vec![label.to_string()],
            sources: ["gdelt".to_string()].into(),
            first_seen: seen,
            last_seen: seen,
            sentiment: None,
            themes: BTreeSet::new(),
        }
    }

    fn countries<const N: usize>(sets: [(&str, Vec<Topic>); N]) -> TopicsByCountry {
        sets.into_iter()
            .map(|(code, topics)| (code.to_string(), topics))
            .collect()
    }

    fn detector() -> FlowDetector {
        FlowDetector::new(FlowConfig::default()).unwrap()
    }

    #[test]
    fn rejects_non_positive_halflife() {
        let config = FlowConfig {
            halflife_hours: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            FlowDetector::new(config),
            Err(ConfigError::InvalidHalflife(_))
        ));
    }

    #[test]
    fn heat_equals_similarity_at_zero_gap() {
        let d = detector();
        assert_eq!(d.heat(0.73, 0.0), 0.73);
    }

    #[test]
    fn heat_decays_by_e_per_halflife() {
        let d = detector();
        assert!((d.heat(1.0, 6.0) - (-1.0f64).exp()).abs() < 1e-12);
        assert!((d.heat(1.0, 1.0) - (-1.0f64 / 6.0).exp()).abs() < 1e-12);
    }

    #[test]
    fn heat_strictly_decreases_with_gap() {
        let d = detector();
        let mut last = d.heat(0.9, 0.0);
        for step in 1..50 {
            let h = d.heat(0.9, step as f64 * 0.5);
            assert!(h < last);
            last = h;
        }
    }

    #[test]
    fn heat_is_bounded_for_bad_inputs() {
        let d = detector();
        assert_eq!(d.heat(5.0, 0.0), 1.0);
        assert_eq!(d.heat(-1.0, 0.0), 0.0);
        assert_eq!(d.heat(f64::NAN, 1.0), 0.0);
    }

    #[test]
    fn one_hour_gap_emits_flow_from_earlier_country() {
        let report = detector().detect(&countries([
            ("BR", vec![topic("Amazon deforestation protest", 1)]),
            ("AR", vec![topic("Amazon deforestation protest", 0)]),
        ]));
        assert_eq!(report.flows.len(), 1);
        let flow = &report.flows[0];
        assert_eq!(flow.from_country, "AR");
        assert_eq!(flow.to_country, "BR");
        assert!((flow.heat - (-1.0f64 / 6.0).exp()).abs() < 1e-9);
        assert_eq!(flow.time_delta_hours, 1.0);
        assert_eq!(flow.detected_at, t0() + Duration::hours(1));
        assert_eq!(flow.shared_topic_ids, vec![topic_id("Amazon deforestation protest")]);
    }

    #[test]
    fn six_hour_gap_falls_below_threshold() {
        let report = detector().detect(&countries([
            ("BR", vec![topic("X", 0)]),
            ("AR", vec![topic("X", 6)]),
        ]));
        assert!(report.flows.is_empty());
        assert_eq!(report.stats.below_threshold, 1);
    }

    #[test]
    fn equal_timestamps_are_dropped() {
        let report = detector().detect(&countries([
            ("BR", vec![topic("Fuel price strike", 3)]),
            ("AR", vec![topic("Fuel price strike", 3)]),
        ]));
        assert!(report.flows.is_empty());
        assert_eq!(report.stats.ambiguous_direction, 1);
    }

    #[test]
    fn countries_without_topics_are_excluded() {
        let report = detector().detect(&countries([
            ("BR", vec![topic("Fuel price strike", 0)]),
            ("AR", vec![]),
        ]));
        assert!(report.flows.is_empty());
        assert_eq!(report.stats.excluded_countries, 1);
        assert_eq!(report.stats.pairs_considered, 0);
    }

    #[test]
    fn unrelated_topics_share_nothing() {
        let report = detector().detect(&countries([
            ("BR", vec![topic("Carnival parade schedule", 0)]),
            ("JP", vec![topic("Earthquake tsunami warning", 1)]),
        ]));
        assert!(report.flows.is_empty());
        assert_eq!(report.stats.no_shared_topics, 1);
    }

    #[test]
    fn pairs_beyond_window_are_skipped() {
        let report = detector().detect(&countries([
            ("BR", vec![topic("Fuel price strike", 0)]),
            ("AR", vec![topic("Fuel price strike", 30)]),
        ]));
        assert_eq!(report.stats.outside_window, 1);
    }

    #[test]
    fn label_overlap_is_jaccard() {
        let a: BTreeSet<String> = ["x".into(), "y".into()].into();
        let b: BTreeSet<String> = ["y".into(), "z".into()].into();
        assert!((label_overlap(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(label_overlap(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn strategies_agree_on_identical_sets() {
        for similarity in [
            SimilarityStrategy::Centroid,
            SimilarityStrategy::MaxPairwise,
            SimilarityStrategy::LabelOverlap,
        ] {
            let d = FlowDetector::new(FlowConfig {
                similarity,
                ..Default::default()
            })
            .unwrap();
            let report = d.detect(&countries([
                ("BR", vec![topic("Dam collapse rescue", 0)]),
                ("PE", vec![topic("Dam collapse rescue", 2)]),
            ]));
            assert_eq!(report.flows.len(), 1, "{similarity:?}");
            assert!((report.flows[0].similarity - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn flows_are_sorted_by_heat() {
        let label = "Regional power outage";
        let report = detector().detect(&countries([
            ("AR", vec![topic(label, 0)]),
            ("BR", vec![topic(label, 1)]),
            ("CL", vec![topic(label, 3)]),
        ]));
        assert_eq!(report.flows.len(), 3);
        for w in report.flows.windows(2) {
            assert!(w[0].heat >= w[1].heat);
        }
        assert!(report.flows.iter().all(|f| f.from_country != f.to_country));
    }
}
