//! Pipeline: one refresh cycle from raw signals to all three views.
//!
//! 1. **Group**: signals by normalized country code
//! 2. **Cluster**: each country's signals into topics (parallel per country)
//! 3. **Aggregate**: topics into a hotspot per country
//! 4. **Detect**: flows between every pair of countries' full topic sets
//! 5. **Tessellate**: hotspot intensity onto hex cells
//!
//! Every step is a pure function of the batch, the prior totals and the
//! geometry table, so re-running a batch reproduces the same output.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pulsemap_common::{ConfigError, EngineConfig, Flow, GeometryTable, HexCell, Hotspot, Signal};

use crate::cluster::{ClusterOutcome, ClusterStats, Clusterer, TermVectorClusterer};
use crate::flow::{FlowDetector, FlowStats, TopicsByCountry};
use crate::hotspot::{HotspotAggregator, PriorTotals};
use crate::tessellate::{HexAggregator, HexMetadata};

/// One batch of signals, stamped with the time the batch was assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub as_of: DateTime<Utc>,
    pub signals: Vec<Signal>,
    /// Countries tracked this cycle. Those without signals still get a
    /// zero-intensity hotspot.
    #[serde(default)]
    pub countries: BTreeSet<String>,
}

impl Batch {
    pub fn new(as_of: DateTime<Utc>, signals: Vec<Signal>) -> Self {
        Self {
            as_of,
            signals,
            countries: BTreeSet::new(),
        }
    }

    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.countries = countries
            .into_iter()
            .filter_map(|c| normalize_country(c.as_ref()))
            .collect();
        self
    }
}

/// Degraded-condition counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct BatchReport {
    pub signals_received: usize,
    pub signals_without_country: usize,
    pub countries: usize,
    pub clustering: BTreeMap<String, ClusterStats>,
    pub flow: FlowStats,
    pub hex: HexMetadata,
}

impl BatchReport {
    pub fn signals_invalid(&self) -> usize {
        self.signals_without_country + self.clustering.values().map(|s| s.invalid).sum::<usize>()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutput {
    /// Sorted by intensity descending, ties by country code.
    pub hotspots: Vec<Hotspot>,
    /// Every topic per country; hotspots only carry the top ranked ones.
    pub topics: TopicsByCountry,
    pub flows: Vec<Flow>,
    pub hex_cells: Vec<HexCell>,
    pub report: BatchReport,
}

/// The four components wired together with one validated configuration.
pub struct PulseEngine<C: Clusterer = TermVectorClusterer> {
    clusterer: C,
    hotspots: HotspotAggregator,
    flows: FlowDetector,
    hex: HexAggregator,
}

impl PulseEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let clusterer = TermVectorClusterer::new(config.clustering.clone())?;
        Self::with_clusterer(config, clusterer)
    }
}

impl<C: Clusterer> PulseEngine<C> {
    /// Build an engine around a custom clustering strategy.
    pub fn with_clusterer(config: EngineConfig, clusterer: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            clusterer,
            hotspots: HotspotAggregator::new(config.hotspot)?,
            flows: FlowDetector::new(config.flow)?,
            hex: HexAggregator::new(config.hex)?,
        })
    }

    pub fn hex(&self) -> &HexAggregator {
        &self.hex
    }

    /// Run one refresh cycle. `resolution` falls back to the configured
    /// default; out-of-bounds requests are clamped.
    pub fn run(
        &self,
        batch: &Batch,
        prior: &PriorTotals,
        geometry: &GeometryTable,
        resolution: Option<u8>,
    ) -> BatchOutput {
        let mut report = BatchReport {
            signals_received: batch.signals.len(),
            ..Default::default()
        };

        let mut by_country: BTreeMap<String, Vec<Signal>> = batch
            .countries
            .iter()
            .map(|c| (c.clone(), Vec::new()))
            .collect();
        for signal in &batch.signals {
            match normalize_country(&signal.country_code) {
                Some(code) => by_country.entry(code).or_default().push(signal.clone()),
                None => report.signals_without_country += 1,
            }
        }
        if report.signals_without_country > 0 {
            warn!(
                dropped = report.signals_without_country,
                "Dropped signals without a country code"
            );
        }
        report.countries = by_country.len();

        let clustered: Vec<(String, Hotspot, ClusterOutcome)> = by_country
            .into_par_iter()
            .map(|(code, signals)| {
                let outcome = self.clusterer.cluster(&signals);
                let hotspot = self.hotspots.aggregate(
                    &code,
                    &outcome.topics,
                    prior.get(&code).copied(),
                    batch.as_of,
                );
                (code, hotspot, outcome)
            })
            .collect();

        let mut hotspots = Vec::with_capacity(clustered.len());
        let mut topics = TopicsByCountry::new();
        for (code, hotspot, outcome) in clustered {
            report.clustering.insert(code.clone(), outcome.stats);
            topics.insert(code, outcome.topics);
            hotspots.push(hotspot);
        }
        hotspots.sort_by(|a, b| {
            b.intensity
                .total_cmp(&a.intensity)
                .then_with(|| a.country_code.cmp(&b.country_code))
        });

        let flow_report = self.flows.detect(&topics);
        report.flow = flow_report.stats;

        let resolution = resolution.unwrap_or(self.hex.config().default_resolution);
        let hex_report = self.hex.tessellate(&hotspots, geometry, resolution);
        report.hex = hex_report.metadata;

        info!(
            signals = report.signals_received,
            countries = report.countries,
            hotspots = hotspots.len(),
            flows = flow_report.flows.len(),
            cells = hex_report.cells.len(),
            "Batch complete"
        );

        BatchOutput {
            hotspots,
            topics,
            flows: flow_report.flows,
            hex_cells: hex_report.cells,
            report,
        }
    }
}

/// Trimmed, uppercased country code; `None` when blank.
fn normalize_country(code: &str) -> Option<String> {
    let code = code.trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_uppercase())
    }
}
