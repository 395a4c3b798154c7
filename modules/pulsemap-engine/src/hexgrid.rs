//! Hierarchical hexagonal grid over the lng/lat plane.
//!
//! Pointy-top hexagons in axial `(q, r)` coordinates, laid directly on an
//! equirectangular projection (x = longitude, y = latitude, degrees). Each
//! resolution step shrinks the circumradius by √7, so a parent covers roughly
//! seven children, as in the usual aperture-7 hierarchies.

use std::collections::BTreeSet;

use pulsemap_common::{Coord, CountryGeometry, HexCellId};

/// Circumradius in degrees at resolution 0.
const BASE_RADIUS_DEG: f64 = 10.0;

/// Edge sampling step as a fraction of the circumradius.
const EDGE_SAMPLE_FRACTION: f64 = 0.25;

/// Axial neighbor offsets, counter-clockwise starting east.
const DIRECTIONS: [(i32, i32); 6] = [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Center-to-corner distance of a cell at `resolution`, in degrees.
pub fn circumradius_deg(resolution: u8) -> f64 {
    BASE_RADIUS_DEG / 7f64.sqrt().powi(i32::from(resolution))
}

/// The cell containing `point` at `resolution`.
pub fn cell_at(point: Coord, resolution: u8) -> HexCellId {
    let size = circumradius_deg(resolution);
    let qf = (SQRT_3 / 3.0 * point.lng - point.lat / 3.0) / size;
    let rf = (2.0 / 3.0 * point.lat) / size;
    let (q, r) = axial_round(qf, rf);
    HexCellId { resolution, q, r }
}

pub fn cell_center(id: HexCellId) -> Coord {
    let size = circumradius_deg(id.resolution);
    let (q, r) = (f64::from(id.q), f64::from(id.r));
    Coord::new(size * SQRT_3 * (q + r / 2.0), size * 1.5 * r)
}

/// The six corners of the cell, counter-clockwise from the lower-right corner.
pub fn cell_boundary(id: HexCellId) -> Vec<Coord> {
    let size = circumradius_deg(id.resolution);
    let center = cell_center(id);
    (0..6)
        .map(|i| {
            let angle = (60.0 * f64::from(i) - 30.0).to_radians();
            Coord::new(center.lng + size * angle.cos(), center.lat + size * angle.sin())
        })
        .collect()
}

/// Grid steps between two cells of the same resolution.
pub fn hex_distance(a: HexCellId, b: HexCellId) -> u32 {
    let dq = a.q - b.q;
    let dr = a.r - b.r;
    (dq.unsigned_abs() + (dq + dr).unsigned_abs() + dr.unsigned_abs()) / 2
}

/// Cells exactly `k` steps from `center`. `k == 0` yields the center itself.
pub fn ring(center: HexCellId, k: u32) -> Vec<HexCellId> {
    if k == 0 {
        return vec![center];
    }
    let k_i = k as i32;
    let (dq, dr) = DIRECTIONS[4];
    let mut cell = HexCellId {
        q: center.q + dq * k_i,
        r: center.r + dr * k_i,
        ..center
    };
    let mut out = Vec::with_capacity(6 * k as usize);
    for &(step_q, step_r) in &DIRECTIONS {
        for _ in 0..k {
            out.push(cell);
            cell.q += step_q;
            cell.r += step_r;
        }
    }
    out
}

/// Cells within `k` steps of `center`, center included.
pub fn disk(center: HexCellId, k: u32) -> Vec<HexCellId> {
    (0..=k).flat_map(|d| ring(center, d)).collect()
}

/// Cells covering a country at `resolution`.
///
/// Interior cells are those whose center falls inside the geometry. Cells
/// crossed by the boundary are added by sampling every edge, which also keeps
/// countries smaller than one cell from vanishing.
pub fn cover(geometry: &CountryGeometry, resolution: u8) -> BTreeSet<HexCellId> {
    let mut cells = BTreeSet::new();
    let Some(bbox) = geometry.bbox() else {
        return cells;
    };
    let size = circumradius_deg(resolution);
    let row_height = 1.5 * size;
    let col_width = SQRT_3 * size;

    let r_min = (bbox.min_lat / row_height).floor() as i32;
    let r_max = (bbox.max_lat / row_height).ceil() as i32;
    for r in r_min..=r_max {
        let lat = row_height * f64::from(r);
        let shift = f64::from(r) / 2.0;
        for (west, east) in geometry.scanline(lat) {
            let q_start = (west / col_width - shift).ceil() as i32;
            let q_end = (east / col_width - shift).floor() as i32;
            for q in q_start..=q_end {
                cells.insert(HexCellId { resolution, q, r });
            }
        }
    }

    let step = size * EDGE_SAMPLE_FRACTION;
    for (a, b) in geometry.edges() {
        let length = (b.lng - a.lng).hypot(b.lat - a.lat);
        let samples = (length / step).ceil().max(1.0) as usize;
        for i in 0..=samples {
            let t = i as f64 / samples as f64;
            let p = Coord::new(a.lng + t * (b.lng - a.lng), a.lat + t * (b.lat - a.lat));
            cells.insert(cell_at(p, resolution));
        }
    }
    cells
}

/// Map zoom level to grid resolution: two zoom levels per resolution step,
/// topping out at resolution 6 from zoom 10.
pub fn resolution_for_zoom(zoom: u8) -> u8 {
    match zoom {
        0..=1 => 1,
        2..=3 => 2,
        4..=5 => 3,
        6..=7 => 4,
        8..=9 => 5,
        _ => 6,
    }
}

fn axial_round(qf: f64, rf: f64) -> (i32, i32) {
    let sf = -qf - rf;
    let (mut q, mut r, s) = (qf.round(), rf.round(), sf.round());
    let (dq, dr, ds) = ((q - qf).abs(), (r - rf).abs(), (s - sf).abs());
    if dq > dr && dq > ds {
        q = -r - s;
    } else if dr > ds {
        r = -q - s;
    }
    (q as i32, r as i32)
}
