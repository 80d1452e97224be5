//! Static schedule records as they appear in a pre-built snapshot.
//!
//! All times are offsets in seconds from the service date's midnight in the
//! agency timezone; offsets past 86400 belong to trips that run beyond
//! midnight on their service date.

use chrono::{DateTime, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopTime {
    pub stop_id: String,
    /// Arrival offset from service-date midnight, seconds.
    pub arrival: u32,
    /// Departure offset from service-date midnight, seconds.
    pub departure: u32,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    pub service_id: String,
    pub block_id: String,
    #[serde(default)]
    pub shape_id: Option<String>,
    pub stop_times: Vec<StopTime>,
}

impl Trip {
    /// First scheduled arrival offset, i.e. the start of the trip's active
    /// window. `None` for a trip without stop times.
    pub fn start_offset(&self) -> Option<u32> {
        self.stop_times.first().map(|st| st.arrival)
    }

    /// Last scheduled departure offset, the end of the active window.
    pub fn end_offset(&self) -> Option<u32> {
        self.stop_times.last().map(|st| st.departure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
    pub sequence: u32,
}

/// Midnight of a service date in the agency timezone, as a UTC instant.
///
/// This is the origin all stop-time offsets are measured from. On a
/// fall-back DST transition the earlier of the two local midnights is used;
/// returns `None` only for the rare zones where midnight is skipped by a
/// spring-forward transition.
pub fn service_day_origin(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}
