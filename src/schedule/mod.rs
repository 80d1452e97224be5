//! Read-only queryable view over a pre-built static schedule.
//!
//! The index is deserialized from a snapshot produced ahead of time; nothing
//! here parses raw GTFS text. It is loaded once at startup and never mutated
//! afterwards.

mod types;

pub use types::{ShapePoint, Stop, StopTime, Trip, service_day_origin};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// On-disk form of the schedule snapshot.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    /// IANA timezone all stop-time offsets are anchored to.
    pub timezone: Tz,
    pub stops: Vec<Stop>,
    pub trips: Vec<Trip>,
    /// Shape id -> ordered polyline.
    #[serde(default)]
    pub shapes: HashMap<String, Vec<ShapePoint>>,
    /// Service date -> service ids active on that date.
    pub calendar: HashMap<NaiveDate, Vec<String>>,
}

/// Immutable schedule index with the lookups the activation and projection
/// layers need: trips by block, shapes by id, active services by date.
pub struct ScheduleIndex {
    timezone: Tz,
    trips: Vec<Trip>,
    stops: HashMap<String, Stop>,
    shapes: HashMap<String, Vec<ShapePoint>>,
    calendar: HashMap<NaiveDate, HashSet<String>>,
    trips_by_block: HashMap<String, Vec<usize>>,
    trips_by_id: HashMap<String, usize>,
    max_stop_offset: u32,
}

impl ScheduleIndex {
    pub fn new(snapshot: ScheduleSnapshot) -> Self {
        let ScheduleSnapshot {
            timezone,
            stops,
            mut trips,
            mut shapes,
            calendar,
        } = snapshot;

        for trip in &mut trips {
            trip.stop_times.sort_by_key(|st| st.sequence);
        }
        for points in shapes.values_mut() {
            points.sort_by_key(|p| p.sequence);
        }

        let mut trips_by_block: HashMap<String, Vec<usize>> = HashMap::new();
        let mut trips_by_id = HashMap::new();
        let mut max_stop_offset = 0;

        for (idx, trip) in trips.iter().enumerate() {
            trips_by_block
                .entry(trip.block_id.clone())
                .or_default()
                .push(idx);
            trips_by_id.insert(trip.id.clone(), idx);

            for st in &trip.stop_times {
                max_stop_offset = max_stop_offset.max(st.arrival).max(st.departure);
            }
        }

        ScheduleIndex {
            timezone,
            trips,
            stops: stops.into_iter().map(|s| (s.id.clone(), s)).collect(),
            shapes,
            calendar: calendar
                .into_iter()
                .map(|(date, ids)| (date, ids.into_iter().collect()))
                .collect(),
            trips_by_block,
            trips_by_id,
            max_stop_offset,
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading schedule snapshot {}", path.display()))?;
        let snapshot: ScheduleSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("parsing schedule snapshot {}", path.display()))?;
        Ok(Self::new(snapshot))
    }

    pub fn agency_timezone(&self) -> Tz {
        self.timezone
    }

    pub fn trips_for_block(&self, block_id: &str) -> impl Iterator<Item = &Trip> {
        self.trips_by_block
            .get(block_id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.trips[idx])
    }

    pub fn trip(&self, trip_id: &str) -> Option<&Trip> {
        self.trips_by_id.get(trip_id).map(|&idx| &self.trips[idx])
    }

    pub fn trips(&self) -> &[Trip] {
        &self.trips
    }

    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }

    pub fn shape(&self, shape_id: &str) -> Option<&[ShapePoint]> {
        self.shapes.get(shape_id).map(Vec::as_slice)
    }

    pub fn service_active_on(&self, service_id: &str, date: NaiveDate) -> bool {
        self.calendar
            .get(&date)
            .is_some_and(|ids| ids.contains(service_id))
    }

    /// Largest arrival/departure offset anywhere in the schedule. Drives the
    /// default activation lookback for trips running past midnight.
    pub fn max_stop_offset(&self) -> u32 {
        self.max_stop_offset
    }
}
