//! Topic clustering for one country's batch of signals.
//!
//! Pipeline:
//! 1. Drop invalid signals and titles too short to carry meaning
//! 2. Merge near-identical titles (normalized equality) into one entry
//! 3. Build uni/bi/tri-gram TF-IDF vectors per entry
//! 4. Average-linkage agglomeration until no pair of clusters reaches the
//!    merge threshold, so the number of topics follows the data
//! 5. Label each cluster from its highest-count entry and score confidence
//!    from cohesion, size, source diversity and member confidence

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use pulsemap_common::{topic_rank, ClusteringConfig, ConfigError, Signal, Topic};

use crate::text::{self, SparseVector, TfIdf};

/// Longest n-gram used for title vectors.
const MAX_NGRAM: usize = 3;

/// Groups one country's signals into topics.
///
/// Implementations must be pure: identical input yields identical topics,
/// and every valid signal lands in exactly one topic.
pub trait Clusterer: Send + Sync {
    fn cluster(&self, signals: &[Signal]) -> ClusterOutcome;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct ClusterStats {
    pub input: usize,
    pub invalid: usize,
    pub too_short: usize,
    pub duplicates_merged: usize,
    pub unvectorizable: usize,
    pub clusters: usize,
    /// Every entry failed vectorization; one topic per entry was emitted.
    pub fallback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    pub topics: Vec<Topic>,
    pub stats: ClusterStats,
}

/// Deterministic content id for a topic label.
pub fn topic_id(label: &str) -> String {
    let digest = Sha256::digest(text::normalize_title(label).as_bytes());
    format!("topic-{}", &hex::encode(digest)[..8])
}

/// Near-identical signals merged under one cleaned title.
struct Entry<'a> {
    title: String,
    members: Vec<&'a Signal>,
}

impl Entry<'_> {
    fn count(&self) -> u64 {
        self.members
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.count.max(0) as u64))
    }

    fn first_seen(&self) -> chrono::DateTime<chrono::Utc> {
        self.members
            .iter()
            .map(|s| s.timestamp)
            .min()
            .unwrap_or_default()
    }
}

/// Term-vector clusterer with a similarity threshold instead of a fixed k.
pub struct TermVectorClusterer {
    config: ClusteringConfig,
}

impl TermVectorClusterer {
    pub fn new(config: ClusteringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn dedup<'a>(&self, signals: &'a [Signal], stats: &mut ClusterStats) -> Vec<Entry<'a>> {
        let mut entries: Vec<Entry<'a>> = Vec::new();
        let mut by_key: BTreeMap<String, usize> = BTreeMap::new();

        for signal in signals {
            if let Err(reason) = signal.validate() {
                debug!(signal_id = %signal.id, %reason, "Dropping invalid signal");
                stats.invalid += 1;
                continue;
            }
            let title = text::clean_title(&signal.title, self.config.max_title_len);
            if title.chars().count() < self.config.min_title_len {
                stats.too_short += 1;
                continue;
            }
            let key = text::normalize_title(&title);
            match by_key.get(&key) {
                Some(&idx) => {
                    entries[idx].members.push(signal);
                    stats.duplicates_merged += 1;
                }
                None => {
                    by_key.insert(key, entries.len());
                    entries.push(Entry {
                        title,
                        members: vec![signal],
                    });
                }
            }
        }
        entries
    }

    fn build_topic(&self, entries: &[&Entry<'_>], vectors: Option<&[&SparseVector]>) -> Topic {
        let mut ranked: Vec<&Entry<'_>> = entries.to_vec();
        ranked.sort_by(|a, b| {
            b.count()
                .cmp(&a.count())
                .then_with(|| a.first_seen().cmp(&b.first_seen()))
                .then_with(|| a.title.cmp(&b.title))
        });

        let label = ranked[0].title.clone();
        let members: Vec<&Signal> = ranked.iter().flat_map(|e| e.members.iter().copied()).collect();
        let count = ranked.iter().fold(0u64, |acc, e| acc.saturating_add(e.count()));
        let sources: BTreeSet<String> = members.iter().map(|s| s.source_id.clone()).collect();
        let themes: BTreeSet<String> = members.iter().flat_map(|s| s.themes.iter().cloned()).collect();

        let confidence = if members.len() <= 1 {
            self.config.confidence_floor
        } else {
            let cohesion = vectors.map(cohesion).unwrap_or(1.0);
            self.score_confidence(cohesion, &members, sources.len())
        };

        Topic {
            id: topic_id(&label),
            sample_titles: ranked
                .iter()
                .take(self.config.sample_titles)
                .map(|e| e.title.clone())
                .collect(),
            label,
            member_signal_ids: members.iter().map(|s| s.id).collect(),
            count,
            confidence,
            sources,
            first_seen: members.iter().map(|s| s.timestamp).min().unwrap_or_default(),
            last_seen: members.iter().map(|s| s.timestamp).max().unwrap_or_default(),
            sentiment: weighted_sentiment(&members),
            themes,
        }
    }

    /// Blend cohesion, size, source diversity and mean member confidence
    /// into [floor, cap].
    fn score_confidence(&self, cohesion: f64, members: &[&Signal], source_count: usize) -> f64 {
        let n = members.len() as f64;
        let size = (n / self.config.size_saturation as f64).min(1.0);
        let diversity = (source_count as f64 / n).min(1.0);
        let member_confidence = members.iter().map(|s| s.confidence).sum::<f64>() / n;

        let score = 0.4 * cohesion + 0.2 * size + 0.2 * diversity + 0.2 * member_confidence;
        let (floor, cap) = (self.config.confidence_floor, self.config.confidence_cap);
        (floor + (cap - floor) * score.clamp(0.0, 1.0)).clamp(floor, cap)
    }
}

impl Clusterer for TermVectorClusterer {
    fn cluster(&self, signals: &[Signal]) -> ClusterOutcome {
        let mut stats = ClusterStats {
            input: signals.len(),
            ..Default::default()
        };
        if signals.is_empty() {
            return ClusterOutcome {
                topics: Vec::new(),
                stats,
            };
        }

        let entries = self.dedup(signals, &mut stats);
        if stats.invalid > 0 {
            warn!(invalid = stats.invalid, input = stats.input, "Dropped invalid signals");
        }
        if entries.is_empty() {
            return ClusterOutcome {
                topics: Vec::new(),
                stats,
            };
        }

        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        let (_, vectors) = TfIdf::fit_transform(&titles, MAX_NGRAM);

        let (vectorized, empty): (Vec<usize>, Vec<usize>) =
            (0..entries.len()).partition(|&i| !vectors[i].is_empty());
        stats.unvectorizable = empty.len();

        let mut topics: Vec<Topic> = Vec::new();

        if vectorized.is_empty() {
            warn!(entries = entries.len(), "Vectorization failed for every title, falling back to one topic per entry");
            stats.fallback = true;
            for entry in &entries {
                let mut topic = self.build_topic(&[entry], None);
                topic.confidence = self.config.confidence_floor;
                topics.push(topic);
            }
        } else {
            let member_vectors: Vec<&SparseVector> = vectorized.iter().map(|&i| &vectors[i]).collect();
            for group in average_linkage(&member_vectors, self.config.merge_threshold) {
                let group_entries: Vec<&Entry<'_>> =
                    group.iter().map(|&g| &entries[vectorized[g]]).collect();
                let group_vectors: Vec<&SparseVector> = group.iter().map(|&g| member_vectors[g]).collect();
                topics.push(self.build_topic(&group_entries, Some(&group_vectors)));
            }
            for &i in &empty {
                topics.push(self.build_topic(&[&entries[i]], None));
            }
        }

        topics.sort_by(topic_rank);
        stats.clusters = topics.len();

        debug!(
            input = stats.input,
            invalid = stats.invalid,
            duplicates = stats.duplicates_merged,
            topics = stats.clusters,
            "Clustered signals"
        );

        ClusterOutcome { topics, stats }
    }
}

/// Average-linkage agglomerative clustering over unit vectors.
///
/// Repeatedly merges the most similar pair of clusters while their average
/// similarity is at least `threshold`. Ties go to the lowest index pair.
/// Returns groups of input indices, each sorted ascending.
fn average_linkage(vectors: &[&SparseVector], threshold: f64) -> Vec<Vec<usize>> {
    let n = vectors.len();
    let mut sim = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let s = text::cosine(vectors[i], vectors[j]);
            sim[i][j] = s;
            sim[j][i] = s;
        }
    }

    let mut clusters: Vec<Option<Vec<usize>>> = (0..n).map(|i| Some(vec![i])).collect();

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            if clusters[i].is_none() {
                continue;
            }
            for j in (i + 1)..n {
                if clusters[j].is_none() {
                    continue;
                }
                let s = sim[i][j];
                if s >= threshold && best.map_or(true, |(_, _, b)| s > b) {
                    best = Some((i, j, s));
                }
            }
        }
        let Some((i, j, _)) = best else {
            break;
        };

        let merged = clusters[j].take().unwrap_or_default();
        let size_i = clusters[i].as_ref().map_or(0, Vec::len) as f64;
        let size_j = merged.len() as f64;

        // Lance-Williams update for average linkage.
        for k in 0..n {
            if k == i || k == j || clusters[k].is_none() {
                continue;
            }
            let s = (size_i * sim[i][k] + size_j * sim[j][k]) / (size_i + size_j);
            sim[i][k] = s;
            sim[k][i] = s;
        }
        if let Some(members) = clusters[i].as_mut() {
            members.extend(merged);
            members.sort_unstable();
        }
    }

    clusters.into_iter().flatten().collect()
}

/// Mean cosine similarity of members to their centroid.
fn cohesion(vectors: &[&SparseVector]) -> f64 {
    if vectors.len() < 2 {
        return 1.0;
    }
    let center = text::centroid(vectors.iter().copied());
    vectors.iter().map(|v| text::cosine(v, &center)).sum::<f64>() / vectors.len() as f64
}

/// Count-weighted mean sentiment of members that carry one.
fn weighted_sentiment(members: &[&Signal]) -> Option<f64> {
    let scored: Vec<(f64, f64)> = members
        .iter()
        .filter_map(|s| s.sentiment.map(|v| (v.clamp(-1.0, 1.0), s.count.max(0) as f64)))
        .collect();
    if scored.is_empty() {
        return None;
    }
    let total_weight: f64 = scored.iter().map(|(_, w)| w).sum();
    if total_weight > 0.0 {
        Some(scored.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight)
    } else {
        Some(scored.iter().map(|(v, _)| v).sum::<f64>() / scored.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn clusterer() -> TermVectorClusterer {
        TermVectorClusterer::new(ClusteringConfig::default()).unwrap()
    }

    fn sig(title: &str, source: &str, count: i64, hour: u32) -> Signal {
        Signal::builder()
            .source_id(source)
            .country_code("BR")
            .timestamp(Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap())
            .title(title)
            .count(count)
            .confidence(0.8)
            .build()
    }

    #[test]
    fn empty_input_returns_no_topics() {
        let outcome = clusterer().cluster(&[]);
        assert!(outcome.topics.is_empty());
        assert_eq!(outcome.stats.input, 0);
    }

    #[test]
    fn near_identical_titles_merge_before_vectorization() {
        let signals = vec![
            sig("Brazil election results", "gdelt", 10, 1),
            sig("brazil: ELECTION results!", "trends", 5, 2),
        ];
        let outcome = clusterer().cluster(&signals);
        assert_eq!(outcome.topics.len(), 1);
        assert_eq!(outcome.stats.duplicates_merged, 1);
        let topic = &outcome.topics[0];
        assert_eq!(topic.count, 15);
        assert_eq!(topic.member_signal_ids.len(), 2);
        assert_eq!(topic.sources.len(), 2);
    }

    #[test]
    fn related_titles_cluster_and_unrelated_stay_apart() {
        let signals = vec![
            sig("Brazil election results announced", "gdelt", 40, 1),
            sig("Brazil election results contested", "trends", 20, 2),
            sig("Brazil election results spark protests", "wiki", 10, 3),
            sig("Amazon wildfire smoke reaches Manaus", "gdelt", 30, 1),
        ];
        let outcome = clusterer().cluster(&signals);
        assert_eq!(outcome.topics.len(), 2, "topics: {:?}", outcome.topics.iter().map(|t| &t.label).collect::<Vec<_>>());
        let election = &outcome.topics[0];
        assert_eq!(election.label, "Brazil election results announced");
        assert_eq!(election.count, 70);
        assert_eq!(election.member_signal_ids.len(), 3);
        assert!(election.confidence > 0.5 && election.confidence <= 0.95);
    }

    #[test]
    fn every_valid_signal_lands_in_exactly_one_topic() {
        let signals = vec![
            sig("Flood warning issued for Rio", "gdelt", 5, 1),
            sig("Rio flood warning", "trends", 3, 2),
            sig("Football final tickets sold out", "gdelt", 8, 3),
            sig("Central bank raises interest rates", "wiki", 2, 4),
            sig("Interest rates raised by central bank", "gdelt", 6, 5),
        ];
        let outcome = clusterer().cluster(&signals);
        let mut seen: Vec<uuid::Uuid> = outcome
            .topics
            .iter()
            .flat_map(|t| t.member_signal_ids.iter().copied())
            .collect();
        seen.sort();
        let mut expected: Vec<uuid::Uuid> = signals.iter().map(|s| s.id).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn single_signal_cluster_gets_confidence_floor() {
        let outcome = clusterer().cluster(&[sig("Volcano erupts near village", "gdelt", 3, 1)]);
        assert_eq!(outcome.topics.len(), 1);
        assert_eq!(outcome.topics[0].confidence, 0.5);
    }

    #[test]
    fn all_stop_word_titles_fall_back_to_one_topic_per_entry() {
        let signals = vec![
            sig("The and of", "gdelt", 3, 1),
            sig("What is this", "gdelt", 4, 2),
        ];
        let outcome = clusterer().cluster(&signals);
        assert!(outcome.stats.fallback);
        assert_eq!(outcome.topics.len(), 2);
        assert!(outcome.topics.iter().all(|t| t.confidence == 0.5));
    }

    #[test]
    fn invalid_and_short_signals_are_counted_not_fatal() {
        let mut bad = sig("Negative count headline", "gdelt", 1, 1);
        bad.count = -5;
        let signals = vec![bad, sig("ab", "gdelt", 1, 1), sig("Valid headline here", "gdelt", 1, 1)];
        let outcome = clusterer().cluster(&signals);
        assert_eq!(outcome.stats.invalid, 1);
        assert_eq!(outcome.stats.too_short, 1);
        assert_eq!(outcome.topics.len(), 1);
    }

    #[test]
    fn all_invalid_input_returns_empty() {
        let mut bad = sig("Some headline", "gdelt", 1, 1);
        bad.confidence = 3.0;
        let outcome = clusterer().cluster(&[bad]);
        assert!(outcome.topics.is_empty());
        assert_eq!(outcome.stats.invalid, 1);
    }

    #[test]
    fn topic_id_is_content_derived() {
        assert_eq!(topic_id("Climate Summit"), topic_id("climate summit"));
        assert_ne!(topic_id("Climate Summit"), topic_id("Election results"));
        assert!(topic_id("x").starts_with("topic-"));
        assert_eq!(topic_id("x").len(), "topic-".len() + 8);
    }

    #[test]
    fn merged_counts_saturate() {
        let signals = vec![
            sig("Record turnout in runoff", "gdelt", i64::MAX, 1),
            sig("record turnout in runoff", "trends", i64::MAX, 2),
            sig("Record turnout in runoff!", "wiki", i64::MAX, 3),
        ];
        let outcome = clusterer().cluster(&signals);
        assert_eq!(outcome.topics.len(), 1);
        assert_eq!(outcome.topics[0].count, u64::MAX);
    }

    #[test]
    fn sentiment_is_count_weighted() {
        let mut a = sig("Storm hits coast", "gdelt", 3, 1);
        a.sentiment = Some(-1.0);
        let mut b = sig("storm hits coast", "trends", 1, 2);
        b.sentiment = Some(1.0);
        let outcome = clusterer().cluster(&[a, b]);
        let sentiment = outcome.topics[0].sentiment.unwrap();
        assert!((sentiment - (-0.5)).abs() < 1e-10);
    }

    #[test]
    fn first_and_last_seen_span_members() {
        let signals = vec![
            sig("Storm hits coast", "gdelt", 3, 4),
            sig("storm hits coast", "trends", 1, 2),
        ];
        let topic = &clusterer().cluster(&signals).topics[0];
        assert_eq!(topic.first_seen, Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap());
        assert_eq!(topic.last_seen, Utc.with_ymd_and_hms(2026, 3, 1, 4, 0, 0).unwrap());
    }

    #[test]
    fn average_linkage_respects_threshold() {
        let a: SparseVector = vec![(0, 1.0)];
        let b: SparseVector = vec![(0, 0.8), (1, 0.6)];
        let c: SparseVector = vec![(2, 1.0)];
        let groups = average_linkage(&[&a, &b, &c], 0.5);
        assert_eq!(groups, vec![vec![0, 1], vec![2]]);
        let groups = average_linkage(&[&a, &b, &c], 0.9);
        assert_eq!(groups.len(), 3);
    }
}
