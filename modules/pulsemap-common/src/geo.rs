//! Country boundary geometry.
//!
//! Plain lng/lat polygons (exterior ring plus holes) with just enough
//! computational geometry for tessellation: bounding boxes, even-odd point
//! containment and horizontal scanline intervals. Loaded from a GeoJSON
//! FeatureCollection keyed by ISO alpha-2 code.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::GeometryError;

/// Country code → boundary geometry. Missing entries are tolerated downstream.
pub type GeometryTable = BTreeMap<String, CountryGeometry>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Coord {
    pub lng: f64,
    pub lat: f64,
}

impl Coord {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    fn extend(&mut self, c: Coord) {
        self.min_lng = self.min_lng.min(c.lng);
        self.min_lat = self.min_lat.min(c.lat);
        self.max_lng = self.max_lng.max(c.lng);
        self.max_lat = self.max_lat.max(c.lat);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    #[serde(default)]
    pub holes: Vec<Vec<Coord>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Coord>) -> Self {
        Self {
            exterior,
            holes: Vec::new(),
        }
    }

    pub fn with_holes(exterior: Vec<Coord>, holes: Vec<Vec<Coord>>) -> Self {
        Self { exterior, holes }
    }

    fn rings(&self) -> impl Iterator<Item = &[Coord]> {
        std::iter::once(self.exterior.as_slice()).chain(self.holes.iter().map(Vec::as_slice))
    }

    /// Every ring edge, including the closing edge of unclosed rings.
    pub fn edges(&self) -> impl Iterator<Item = (Coord, Coord)> + '_ {
        self.rings().flat_map(ring_edges)
    }

    /// Even-odd containment; points inside a hole are outside.
    pub fn contains(&self, p: Coord) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.lat > p.lat) != (b.lat > p.lat) {
                let x = a.lng + (p.lat - a.lat) * (b.lng - a.lng) / (b.lat - a.lat);
                if p.lng < x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Intervals of longitude inside the polygon along the latitude line `lat`.
    pub fn scanline(&self, lat: f64) -> Vec<(f64, f64)> {
        let mut crossings: Vec<f64> = self
            .edges()
            .filter(|(a, b)| (a.lat > lat) != (b.lat > lat))
            .map(|(a, b)| a.lng + (lat - a.lat) * (b.lng - a.lng) / (b.lat - a.lat))
            .collect();
        crossings.sort_by(f64::total_cmp);
        crossings
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    }
}

fn ring_edges(ring: &[Coord]) -> impl Iterator<Item = (Coord, Coord)> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

/// One country's boundary: one or more polygons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CountryGeometry {
    pub polygons: Vec<Polygon>,
}

impl CountryGeometry {
    pub fn from_polygon(polygon: Polygon) -> Self {
        Self {
            polygons: vec![polygon],
        }
    }

    /// Axis-aligned rectangle, handy for tests and coarse regions.
    pub fn rectangle(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self::from_polygon(Polygon::new(vec![
            Coord::new(min_lng, min_lat),
            Coord::new(max_lng, min_lat),
            Coord::new(max_lng, max_lat),
            Coord::new(min_lng, max_lat),
        ]))
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.iter().all(|p| p.exterior.len() < 3)
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        let mut coords = self.polygons.iter().flat_map(|p| p.exterior.iter().copied());
        let first = coords.next()?;
        let mut bbox = BoundingBox {
            min_lng: first.lng,
            min_lat: first.lat,
            max_lng: first.lng,
            max_lat: first.lat,
        };
        for c in coords {
            bbox.extend(c);
        }
        Some(bbox)
    }

    pub fn contains(&self, p: Coord) -> bool {
        self.polygons.iter().any(|poly| poly.contains(p))
    }

    pub fn edges(&self) -> impl Iterator<Item = (Coord, Coord)> + '_ {
        self.polygons.iter().flat_map(Polygon::edges)
    }

    pub fn scanline(&self, lat: f64) -> Vec<(f64, f64)> {
        self.polygons.iter().flat_map(|p| p.scanline(lat)).collect()
    }
}

// ---------------------------------------------------------------------------
// GeoJSON loading
// ---------------------------------------------------------------------------

const CODE_PROPERTIES: [&str; 3] = ["ISO_A2", "iso_a2", "ISO3166-1-Alpha-2"];

/// Build a geometry table from a GeoJSON FeatureCollection.
///
/// Features without a usable ISO alpha-2 code (absent or `-99`) and features
/// with unsupported geometry types are skipped. Multiple features for the
/// same code are merged.
pub fn parse_country_geojson(value: &Value) -> Result<GeometryTable, GeometryError> {
    if value.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(GeometryError::NotFeatureCollection);
    }
    let features = value
        .get("features")
        .and_then(Value::as_array)
        .ok_or(GeometryError::NotFeatureCollection)?;

    let mut table = GeometryTable::new();
    let mut skipped = 0u32;

    for feature in features {
        let code = CODE_PROPERTIES.iter().find_map(|key| {
            feature
                .get("properties")
                .and_then(|p| p.get(*key))
                .and_then(Value::as_str)
        });
        let Some(code) = code.filter(|c| !c.is_empty() && *c != "-99") else {
            skipped += 1;
            continue;
        };
        let Some(geometry) = feature.get("geometry").filter(|g| !g.is_null()) else {
            skipped += 1;
            continue;
        };

        let polygons = match geometry.get("type").and_then(Value::as_str) {
            Some("Polygon") => vec![parse_polygon(code, &geometry["coordinates"])?],
            Some("MultiPolygon") => geometry["coordinates"]
                .as_array()
                .ok_or_else(|| malformed(code, "MultiPolygon coordinates must be an array"))?
                .iter()
                .map(|p| parse_polygon(code, p))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                warn!(country = code, geometry_type = other, "Unsupported geometry type, skipping");
                skipped += 1;
                continue;
            }
            None => {
                return Err(GeometryError::UnsupportedGeometry("<missing>".to_string()));
            }
        };

        table
            .entry(code.to_string())
            .or_default()
            .polygons
            .extend(polygons);
    }

    debug!(countries = table.len(), skipped, "Loaded country geometry");
    Ok(table)
}

fn parse_polygon(country: &str, value: &Value) -> Result<Polygon, GeometryError> {
    let rings = value
        .as_array()
        .ok_or_else(|| malformed(country, "polygon must be an array of rings"))?;
    let mut parsed = rings
        .iter()
        .map(|ring| parse_ring(country, ring))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let exterior = parsed
        .next()
        .ok_or_else(|| malformed(country, "polygon has no exterior ring"))?;
    Ok(Polygon::with_holes(exterior, parsed.collect()))
}

fn parse_ring(country: &str, value: &Value) -> Result<Vec<Coord>, GeometryError> {
    value
        .as_array()
        .ok_or_else(|| malformed(country, "ring must be an array of positions"))?
        .iter()
        .map(|pos| match pos.as_array().map(Vec::as_slice) {
            Some([lng, lat, ..]) => match (lng.as_f64(), lat.as_f64()) {
                (Some(lng), Some(lat)) => Ok(Coord::new(lng, lat)),
                _ => Err(malformed(country, "position values must be numbers")),
            },
            _ => Err(malformed(country, "position must have at least two values")),
        })
        .collect()
}

fn malformed(country: &str, reason: &str) -> GeometryError {
    GeometryError::MalformedCoordinates {
        country: country.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square_with_hole() -> Polygon {
        Polygon::with_holes(
            vec![
                Coord::new(0.0, 0.0),
                Coord::new(10.0, 0.0),
                Coord::new(10.0, 10.0),
                Coord::new(0.0, 10.0),
                Coord::new(0.0, 0.0),
            ],
            vec![vec![
                Coord::new(4.0, 4.0),
                Coord::new(6.0, 4.0),
                Coord::new(6.0, 6.0),
                Coord::new(4.0, 6.0),
            ]],
        )
    }

    #[test]
    fn contains_respects_holes() {
        let poly = square_with_hole();
        assert!(poly.contains(Coord::new(1.0, 1.0)));
        assert!(!poly.contains(Coord::new(5.0, 5.0)), "point in hole is outside");
        assert!(!poly.contains(Coord::new(11.0, 5.0)));
    }

    #[test]
    fn scanline_splits_around_hole() {
        let intervals = square_with_hole().scanline(5.0);
        assert_eq!(intervals, vec![(0.0, 4.0), (6.0, 10.0)]);
    }

    #[test]
    fn scanline_outside_polygon_is_empty() {
        assert!(square_with_hole().scanline(12.0).is_empty());
    }

    #[test]
    fn bbox_covers_all_polygons() {
        let mut geom = CountryGeometry::rectangle(0.0, 0.0, 1.0, 1.0);
        geom.polygons
            .extend(CountryGeometry::rectangle(5.0, -3.0, 6.0, 2.0).polygons);
        let bbox = geom.bbox().unwrap();
        assert_eq!((bbox.min_lng, bbox.min_lat, bbox.max_lng, bbox.max_lat), (0.0, -3.0, 6.0, 2.0));
    }

    #[test]
    fn parses_polygon_and_multipolygon_features() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"ISO_A2": "AA"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"ISO_A2": "BB"},
                    "geometry": {"type": "MultiPolygon", "coordinates": [
                        [[[2,0],[3,0],[3,1],[2,0]]],
                        [[[4,0],[5,0],[5,1],[4,0]]]
                    ]}
                },
                {
                    "type": "Feature",
                    "properties": {"ISO_A2": "-99"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1]]]}
                }
            ]
        });
        let table = parse_country_geojson(&doc).unwrap();
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["AA", "BB"]);
        assert_eq!(table["BB"].polygons.len(), 2);
        assert!(table["AA"].contains(Coord::new(0.5, 0.5)));
    }

    #[test]
    fn rejects_non_feature_collection() {
        let doc = json!({"type": "Feature"});
        assert_eq!(
            parse_country_geojson(&doc),
            Err(GeometryError::NotFeatureCollection)
        );
    }

    #[test]
    fn rejects_malformed_positions() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"ISO_A2": "AA"},
                "geometry": {"type": "Polygon", "coordinates": [[[0, "x"], [1, 0]]]}
            }]
        });
        assert!(matches!(
            parse_country_geojson(&doc),
            Err(GeometryError::MalformedCoordinates { .. })
        ));
    }
}
