//! Hex spatial aggregation of hotspot intensity.
//!
//! Each country's intensity is stamped onto every cell covering it. Border
//! cells claimed by several countries sum their intensities and cap at 1.0;
//! the sum is commutative, so per-country covers can be computed in parallel
//! and merged in any order.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use pulsemap_common::{
    ConfigError, CountryGeometry, GeometryTable, HexCell, HexCellId, HexConfig, Hotspot,
    MAX_RESOLUTION_CEILING,
};

use crate::hexgrid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct HexMetadata {
    pub resolution_requested: u8,
    pub resolution_used: u8,
    pub clamped: bool,
    pub countries_included: usize,
    /// Countries with hotspots but no usable geometry.
    pub skipped_countries: Vec<String>,
    pub skipped_missing_geometry: usize,
    /// Distinct cells before thresholding.
    pub cells_generated: usize,
    pub cells_below_threshold: usize,
    pub cells_returned: usize,
    pub smoothed: bool,
    pub max_intensity: f64,
    pub mean_intensity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct HexReport {
    pub cells: Vec<HexCell>,
    pub metadata: HexMetadata,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HexValidationError {
    #[error("cell {cell} intensity {intensity} outside [0, 1]")]
    IntensityOutOfRange { cell: HexCellId, intensity: f64 },

    #[error("cell {cell} has no contributing countries")]
    NoCountries { cell: HexCellId },

    #[error("cell {cell} appears more than once")]
    DuplicateCell { cell: HexCellId },
}

/// Running total for one cell during the merge.
#[derive(Default)]
struct CellAccum {
    intensity: f64,
    countries: BTreeSet<String>,
    /// `(intensity, country, topic)` of the strongest contributor.
    lead: Option<(f64, String, Option<String>)>,
}

impl CellAccum {
    fn add(&mut self, country: &str, intensity: f64, topic: Option<&str>) {
        self.intensity += intensity;
        self.countries.insert(country.to_string());
        let leads = match &self.lead {
            None => true,
            Some((best, best_country, _)) => {
                intensity > *best || (intensity == *best && country < best_country.as_str())
            }
        };
        if leads {
            self.lead = Some((intensity, country.to_string(), topic.map(str::to_string)));
        }
    }
}

pub struct HexAggregator {
    config: HexConfig,
}

impl HexAggregator {
    pub fn new(config: HexConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HexConfig {
        &self.config
    }

    /// Grid resolution for a map zoom level, within the configured bounds.
    pub fn resolution_for_zoom(&self, zoom: u8) -> u8 {
        self.config
            .clamp_resolution(hexgrid::resolution_for_zoom(zoom))
    }

    /// Hex cells for a batch of hotspots at `resolution`, sorted by cell id.
    pub fn tessellate(
        &self,
        hotspots: &[Hotspot],
        geometry: &GeometryTable,
        resolution: u8,
    ) -> HexReport {
        let resolution_used = self
            .config
            .clamp_resolution(resolution.min(MAX_RESOLUTION_CEILING));
        let mut metadata = HexMetadata {
            resolution_requested: resolution,
            resolution_used,
            clamped: resolution_used != resolution,
            smoothed: self.config.smoothing.enabled,
            ..Default::default()
        };
        if metadata.clamped {
            warn!(
                requested = resolution,
                used = resolution_used,
                "Hex resolution clamped to configured bounds"
            );
        }

        let mut by_country: BTreeMap<&str, &Hotspot> = BTreeMap::new();
        for hotspot in hotspots {
            by_country.insert(hotspot.country_code.as_str(), hotspot);
        }

        let mut work: Vec<(&Hotspot, &CountryGeometry)> = Vec::new();
        for (code, hotspot) in by_country {
            match geometry.get(code).filter(|g| !g.is_empty()) {
                Some(geom) => work.push((hotspot, geom)),
                None => {
                    debug!(country = code, "No geometry for country, skipping");
                    metadata.skipped_countries.push(code.to_string());
                }
            }
        }
        metadata.skipped_missing_geometry = metadata.skipped_countries.len();
        metadata.countries_included = work.len();
        if !metadata.skipped_countries.is_empty() {
            warn!(
                skipped = metadata.skipped_missing_geometry,
                countries = ?metadata.skipped_countries,
                "Countries skipped for missing geometry"
            );
        }

        let covers: Vec<BTreeSet<HexCellId>> = work
            .par_iter()
            .map(|(_, geom)| hexgrid::cover(geom, resolution_used))
            .collect();

        let mut merged: BTreeMap<HexCellId, CellAccum> = BTreeMap::new();
        for ((hotspot, _), cells) in work.iter().zip(covers) {
            let intensity = hotspot.intensity.clamp(0.0, 1.0);
            let topic = hotspot.top_topics.first().map(|t| t.label.as_str());
            for cell in cells {
                merged
                    .entry(cell)
                    .or_default()
                    .add(&hotspot.country_code, intensity, topic);
            }
        }
        metadata.cells_generated = merged.len();

        let threshold = self.config.intensity_threshold;
        let mut cells: Vec<HexCell> = merged
            .into_iter()
            .map(|(cell_id, acc)| HexCell {
                cell_id,
                intensity: acc.intensity.min(1.0),
                countries: acc.countries,
                top_topic: acc.lead.and_then(|(_, _, topic)| topic),
                interpolated: false,
            })
            .collect();
        cells.retain(|c| c.intensity >= threshold);
        metadata.cells_below_threshold = metadata.cells_generated - cells.len();

        if self.config.smoothing.enabled && !cells.is_empty() {
            cells = self.smooth(cells);
            let before = cells.len();
            cells.retain(|c| c.intensity >= threshold);
            metadata.cells_below_threshold += before - cells.len();
        }

        metadata.cells_returned = cells.len();
        metadata.max_intensity = cells.iter().map(|c| c.intensity).fold(0.0, f64::max);
        metadata.mean_intensity = if cells.is_empty() {
            0.0
        } else {
            cells.iter().map(|c| c.intensity).sum::<f64>() / cells.len() as f64
        };

        info!(
            resolution = resolution_used,
            countries = metadata.countries_included,
            skipped = metadata.skipped_missing_geometry,
            generated = metadata.cells_generated,
            returned = metadata.cells_returned,
            smoothed = metadata.smoothed,
            "Tessellation complete"
        );

        HexReport { cells, metadata }
    }

    /// Spread each cell's intensity to its ring-1..=radius neighbors with
    /// weight `decay^d`, then scale so the hottest cell is exactly 1.0.
    fn smooth(&self, cells: Vec<HexCell>) -> Vec<HexCell> {
        let radius = u32::from(self.config.smoothing.radius);
        let decay = self.config.smoothing.decay;

        let mut spread: BTreeMap<HexCellId, CellAccum> = BTreeMap::new();
        let mut originals: BTreeMap<HexCellId, Option<String>> = BTreeMap::new();
        for cell in &cells {
            originals.insert(cell.cell_id, cell.top_topic.clone());
            for d in 0..=radius {
                let weight = cell.intensity * decay.powi(d as i32);
                if weight <= 0.0 {
                    continue;
                }
                for neighbor in hexgrid::ring(cell.cell_id, d) {
                    let acc = spread.entry(neighbor).or_default();
                    acc.intensity += weight;
                    acc.countries.extend(cell.countries.iter().cloned());
                }
            }
        }

        let max = spread.values().map(|a| a.intensity).fold(0.0, f64::max);
        if max <= 0.0 {
            return cells;
        }
        spread
            .into_iter()
            .map(|(cell_id, acc)| {
                let original = originals.get(&cell_id);
                HexCell {
                    cell_id,
                    intensity: (acc.intensity / max).clamp(0.0, 1.0),
                    countries: acc.countries,
                    top_topic: original.cloned().flatten(),
                    interpolated: original.is_none(),
                }
            })
            .collect()
    }
}

/// Check the output invariants: intensity in [0, 1], contributors on every
/// non-interpolated cell, and no repeated cell ids.
pub fn validate_cells(cells: &[HexCell]) -> Result<(), HexValidationError> {
    let mut seen = BTreeSet::new();
    for cell in cells {
        if !(0.0..=1.0).contains(&cell.intensity) {
            return Err(HexValidationError::IntensityOutOfRange {
                cell: cell.cell_id,
                intensity: cell.intensity,
            });
        }
        if !cell.interpolated && cell.countries.is_empty() {
            return Err(HexValidationError::NoCountries { cell: cell.cell_id });
        }
        if !seen.insert(cell.cell_id) {
            return Err(HexValidationError::DuplicateCell { cell: cell.cell_id });
        }
    }
    Ok(())
}

/// Render cells as a GeoJSON FeatureCollection of hexagon polygons.
pub fn cells_to_geojson(cells: &[HexCell]) -> Value {
    let features: Vec<Value> = cells
        .iter()
        .map(|cell| {
            let mut ring: Vec<[f64; 2]> = hexgrid::cell_boundary(cell.cell_id)
                .into_iter()
                .map(|c| [c.lng, c.lat])
                .collect();
            if let Some(&first) = ring.first() {
                ring.push(first);
            }
            json!({
                "type": "Feature",
                "id": cell.cell_id.to_string(),
                "geometry": { "type": "Polygon", "coordinates": [ring] },
                "properties": {
                    "intensity": cell.intensity,
                    "countries": cell.countries,
                    "top_topic": cell.top_topic,
                    "interpolated": cell.interpolated,
                },
            })
        })
        .collect();
    json!({ "type": "FeatureCollection", "features": features })
}
