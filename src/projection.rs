//! Per-trip route indexes: a trip's shape as a length-indexed path plus a
//! monotonic mapping from distance along that path to the scheduled stop
//! time there.
//!
//! Indexes are built lazily the first time a trip is seen and cached for the
//! life of the process; the static schedule never changes underneath them.

use crate::geometry::{GeometryError, LengthIndexedPath, PathPosition};
use crate::schedule::{ScheduleIndex, Trip};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// A stop pinned to its distance along the trip's path.
#[derive(Debug, Clone, PartialEq)]
pub struct StopMark {
    pub along: f64,
    pub arrival: u32,
    pub departure: u32,
    pub sequence: u32,
    pub stop_id: String,
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("trip {trip_id} has no shape")]
    MissingShape { trip_id: String },
    #[error("shape {shape_id} of trip {trip_id} is not in the schedule")]
    UnknownShape { trip_id: String, shape_id: String },
    #[error("building path for trip {trip_id}: {source}")]
    Geometry {
        trip_id: String,
        source: GeometryError,
    },
    #[error("no stop of trip {trip_id} could be placed on its shape")]
    NoStopsPlaced { trip_id: String },
}

/// Distance-ordered stop timing index for one trip. `marks` is strictly
/// increasing in `along`.
#[derive(Debug)]
pub struct RouteIndex {
    path: LengthIndexedPath,
    marks: Vec<StopMark>,
}

impl RouteIndex {
    pub fn marks(&self) -> &[StopMark] {
        &self.marks
    }

    pub fn project(&self, lat: f64, lon: f64) -> PathPosition {
        self.path.project(lat, lon)
    }

    /// Floor/ceiling marks around a probe distance. Past either end both
    /// sides are the single nearest mark.
    pub fn bracket(&self, along: f64) -> (&StopMark, &StopMark) {
        let idx = self.marks.partition_point(|m| m.along <= along);
        if idx == 0 {
            (&self.marks[0], &self.marks[0])
        } else if idx == self.marks.len() {
            let last = &self.marks[self.marks.len() - 1];
            (last, last)
        } else {
            (&self.marks[idx - 1], &self.marks[idx])
        }
    }

    /// First mark at or past a probe distance; the last mark when the probe
    /// is beyond every stop.
    pub fn next_stop_after(&self, along: f64) -> &StopMark {
        let idx = self.marks.partition_point(|m| m.along < along);
        self.marks
            .get(idx)
            .unwrap_or_else(|| &self.marks[self.marks.len() - 1])
    }
}

/// Builds and caches [`RouteIndex`]es. The cache is keyed by trip id, filled
/// on first use, and never invalidated.
pub struct RouteProjector {
    schedule: Arc<ScheduleIndex>,
    cache: HashMap<String, RouteIndex>,
}

impl RouteProjector {
    pub fn new(schedule: Arc<ScheduleIndex>) -> Self {
        RouteProjector {
            schedule,
            cache: HashMap::new(),
        }
    }

    pub fn index_for(&mut self, trip: &Trip) -> Result<&RouteIndex, ProjectionError> {
        match self.cache.entry(trip.id.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let index = build_route_index(&self.schedule, trip)?;
                Ok(entry.insert(index))
            }
        }
    }

    pub fn cached_trips(&self) -> usize {
        self.cache.len()
    }
}

fn build_route_index(schedule: &ScheduleIndex, trip: &Trip) -> Result<RouteIndex, ProjectionError> {
    let shape_id = trip
        .shape_id
        .as_deref()
        .ok_or_else(|| ProjectionError::MissingShape {
            trip_id: trip.id.clone(),
        })?;
    let points = schedule
        .shape(shape_id)
        .ok_or_else(|| ProjectionError::UnknownShape {
            trip_id: trip.id.clone(),
            shape_id: shape_id.to_string(),
        })?;

    let path = LengthIndexedPath::new(points.iter().map(|p| (p.lat, p.lon)).collect()).map_err(
        |source| ProjectionError::Geometry {
            trip_id: trip.id.clone(),
            source,
        },
    )?;

    let mut marks: Vec<StopMark> = Vec::with_capacity(trip.stop_times.len());
    let mut cursor = 0.0_f64;

    for st in &trip.stop_times {
        let Some(stop) = schedule.stop(&st.stop_id) else {
            warn!(
                trip_id = %trip.id,
                stop_id = %st.stop_id,
                "stop not in schedule, excluded from timing index"
            );
            continue;
        };

        // Search only forward of the previous stop so a path revisiting an
        // area cannot pull a later stop backwards.
        let placed = match path.project_after(stop.lat, stop.lon, cursor) {
            Some(pos) => pos,
            None => path.project(stop.lat, stop.lon),
        };

        if !marks.is_empty() && placed.along <= cursor {
            warn!(
                trip_id = %trip.id,
                stop_id = %st.stop_id,
                sequence = st.sequence,
                along = placed.along,
                cursor,
                "stop does not advance along the shape, excluded from timing index"
            );
            continue;
        }

        cursor = placed.along;
        marks.push(StopMark {
            along: placed.along,
            arrival: st.arrival,
            departure: st.departure,
            sequence: st.sequence,
            stop_id: st.stop_id.clone(),
        });
    }

    if marks.is_empty() {
        return Err(ProjectionError::NoStopsPlaced {
            trip_id: trip.id.clone(),
        });
    }

    Ok(RouteIndex { path, marks })
}
