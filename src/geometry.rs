//! Length-indexed polyline geometry.
//!
//! A shape is flattened into a path parameterized by cumulative distance in
//! meters. Projection answers "how far along the path is this position",
//! optionally constrained to look only forward of a minimum distance so a
//! route that revisits an area keeps its stops in order.

use thiserror::Error;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Where a position lands on a path: distance along it and perpendicular
/// distance from it, both in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPosition {
    pub along: f64,
    pub offset: f64,
}

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("path needs at least two points, got {got}")]
    TooFewPoints { got: usize },
}

/// Polyline with precomputed cumulative arc lengths.
#[derive(Debug)]
pub struct LengthIndexedPath {
    /// (lat, lon) pairs in path order.
    points: Vec<(f64, f64)>,
    /// cum[i] = distance from the path origin to points[i].
    cum: Vec<f64>,
}

impl LengthIndexedPath {
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, GeometryError> {
        if points.len() < 2 {
            return Err(GeometryError::TooFewPoints { got: points.len() });
        }

        let mut cum = Vec::with_capacity(points.len());
        cum.push(0.0);
        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let last = cum[cum.len() - 1];
            cum.push(last + haversine_distance(a.0, a.1, b.0, b.1));
        }

        Ok(LengthIndexedPath { points, cum })
    }

    pub fn len_meters(&self) -> f64 {
        self.cum[self.cum.len() - 1]
    }

    /// Nearest point on the whole path.
    pub fn project(&self, lat: f64, lon: f64) -> PathPosition {
        self.project_after(lat, lon, 0.0).unwrap_or(PathPosition {
            along: 0.0,
            offset: haversine_distance(lat, lon, self.points[0].0, self.points[0].1),
        })
    }

    /// Nearest point on the path at distance `min_along` or beyond. `None`
    /// only when `min_along` lies past the end of the path.
    pub fn project_after(&self, lat: f64, lon: f64, min_along: f64) -> Option<PathPosition> {
        if min_along > self.len_meters() {
            return None;
        }

        let mut best: Option<PathPosition> = None;

        for i in 0..self.points.len() - 1 {
            let seg_start = self.cum[i];
            let seg_end = self.cum[i + 1];
            if seg_end < min_along {
                continue;
            }
            let seg_len = seg_end - seg_start;

            let candidate = if seg_len <= 0.0 {
                // Degenerate segment from repeated shape points
                let (alat, alon) = self.points[i];
                PathPosition {
                    along: seg_start,
                    offset: haversine_distance(lat, lon, alat, alon),
                }
            } else {
                self.project_onto_segment(i, lat, lon, min_along)
            };

            if best.is_none_or(|b| candidate.offset < b.offset) {
                best = Some(candidate);
            }
        }

        best
    }

    /// Projects in a local equirectangular frame anchored at the segment
    /// start; accurate at the sub-kilometer scale of shape segments.
    fn project_onto_segment(&self, i: usize, lat: f64, lon: f64, min_along: f64) -> PathPosition {
        let (alat, alon) = self.points[i];
        let (blat, blon) = self.points[i + 1];
        let seg_start = self.cum[i];
        let seg_len = self.cum[i + 1] - seg_start;

        let cos_lat = alat.to_radians().cos();
        let bx = (blon - alon).to_radians() * cos_lat * EARTH_RADIUS_M;
        let by = (blat - alat).to_radians() * EARTH_RADIUS_M;
        let qx = (lon - alon).to_radians() * cos_lat * EARTH_RADIUS_M;
        let qy = (lat - alat).to_radians() * EARTH_RADIUS_M;

        let t_lo = ((min_along - seg_start) / seg_len).max(0.0);
        let t = ((qx * bx + qy * by) / (bx * bx + by * by)).clamp(t_lo, 1.0);

        let dx = qx - t * bx;
        let dy = qy - t * by;

        PathPosition {
            along: seg_start + t * seg_len,
            offset: (dx * dx + dy * dy).sqrt(),
        }
    }
}
