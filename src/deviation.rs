//! Schedule deviation from a single position fix.
//!
//! The vehicle's position is projected onto its trip's path, the scheduled
//! time at that spot is interpolated linearly between the surrounding stops,
//! and the result is compared with how far into the service day the
//! observation actually is. Positive deviation means the vehicle is behind
//! schedule. Dwell time and speed variation along a segment are ignored;
//! this is a deliberate straight-line-in-time estimate.

use crate::projection::{RouteIndex, StopMark};
use crate::schedule::service_day_origin;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviationError {
    #[error("no local midnight for {date} in {timezone}")]
    MissingServiceOrigin { date: NaiveDate, timezone: Tz },
}

/// Signed seconds of schedule deviation for a position observed at `at` on
/// `service_date`: `expected - actual`, positive when running behind.
pub fn deviation_seconds(
    index: &RouteIndex,
    lat: f64,
    lon: f64,
    at: DateTime<Utc>,
    service_date: NaiveDate,
    timezone: Tz,
) -> Result<i64, DeviationError> {
    let origin = service_day_origin(service_date, timezone).ok_or(
        DeviationError::MissingServiceOrigin {
            date: service_date,
            timezone,
        },
    )?;

    let probe = index.project(lat, lon).along;
    let (floor, ceil) = index.bracket(probe);

    let expected = interpolate_time(floor, ceil, probe);
    let actual = (at - origin).num_seconds();

    Ok(expected - actual)
}

/// Scheduled seconds at `probe`, linear between the floor stop's departure
/// and the ceiling stop's arrival. A zero-width bracket (before the first
/// stop, past the last, or two marks at one distance) yields the mark's own
/// time.
fn interpolate_time(floor: &StopMark, ceil: &StopMark, probe: f64) -> i64 {
    let span = ceil.along - floor.along;
    if span <= f64::EPSILON {
        return i64::from(floor.departure);
    }

    let fraction = (probe - floor.along) / span;
    let window = i64::from(ceil.arrival) - i64::from(floor.departure);

    i64::from(floor.departure) + (fraction * window as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::RouteProjector;
    use crate::schedule::{ScheduleIndex, ScheduleSnapshot, ShapePoint, Stop, StopTime, Trip};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Straight equatorial trip with stops at offsets {0, 600, 1200} placed
    /// at 0%, 50% and 100% of the path.
    fn fixture() -> (Arc<ScheduleIndex>, RouteProjector) {
        let schedule = Arc::new(ScheduleIndex::new(ScheduleSnapshot {
            timezone: chrono_tz::UTC,
            stops: vec![
                Stop {
                    id: "a".to_string(),
                    name: "A".to_string(),
                    lat: 0.0,
                    lon: 0.0,
                },
                Stop {
                    id: "b".to_string(),
                    name: "B".to_string(),
                    lat: 0.0,
                    lon: 0.0045,
                },
                Stop {
                    id: "c".to_string(),
                    name: "C".to_string(),
                    lat: 0.0,
                    lon: 0.009,
                },
            ],
            trips: vec![Trip {
                id: "t1".to_string(),
                route_id: "r1".to_string(),
                service_id: "wk".to_string(),
                block_id: "b1".to_string(),
                shape_id: Some("sh1".to_string()),
                stop_times: vec![
                    StopTime {
                        stop_id: "a".to_string(),
                        arrival: 0,
                        departure: 0,
                        sequence: 1,
                    },
                    StopTime {
                        stop_id: "b".to_string(),
                        arrival: 600,
                        departure: 600,
                        sequence: 2,
                    },
                    StopTime {
                        stop_id: "c".to_string(),
                        arrival: 1200,
                        departure: 1200,
                        sequence: 3,
                    },
                ],
            }],
            shapes: HashMap::from([(
                "sh1".to_string(),
                vec![
                    ShapePoint {
                        lat: 0.0,
                        lon: 0.0,
                        sequence: 1,
                    },
                    ShapePoint {
                        lat: 0.0,
                        lon: 0.0045,
                        sequence: 2,
                    },
                    ShapePoint {
                        lat: 0.0,
                        lon: 0.009,
                        sequence: 3,
                    },
                ],
            )]),
            calendar: HashMap::new(),
        }));

        let projector = RouteProjector::new(schedule.clone());
        (schedule, projector)
    }

    fn service_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()
    }

    fn at(seconds_into_day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 4, 0, 0, 0).unwrap()
            + chrono::Duration::seconds(i64::from(seconds_into_day))
    }

    #[test]
    fn test_probe_at_stop_on_time_is_zero() {
        let (schedule, mut projector) = fixture();
        let index = projector.index_for(schedule.trip("t1").unwrap()).unwrap();
        let deviation =
            deviation_seconds(&index, 0.0, 0.0045, at(600), service_date(), chrono_tz::UTC)
                .unwrap();
        assert_eq!(deviation, 0);
    }

    #[test]
    fn test_probe_late_is_negative() {
        let (schedule, mut projector) = fixture();
        let index = projector.index_for(schedule.trip("t1").unwrap()).unwrap();
        let deviation =
            deviation_seconds(&index, 0.0, 0.0045, at(660), service_date(), chrono_tz::UTC)
                .unwrap();
        assert_eq!(deviation, -60);
    }

    #[test]
    fn test_probe_early_is_positive() {
        let (schedule, mut projector) = fixture();
        let index = projector.index_for(schedule.trip("t1").unwrap()).unwrap();
        let deviation =
            deviation_seconds(&index, 0.0, 0.0045, at(540), service_date(), chrono_tz::UTC)
                .unwrap();
        assert_eq!(deviation, 60);
    }

    #[test]
    fn test_interpolated_expected_time() {
        // Probe at 55% of the path: expected = 600 + 0.1 * 600 = 660;
        // observed at 610 -> 50s of schedule still in hand
        let (schedule, mut projector) = fixture();
        let index = projector.index_for(schedule.trip("t1").unwrap()).unwrap();
        let deviation =
            deviation_seconds(&index, 0.0, 0.00495, at(610), service_date(), chrono_tz::UTC)
                .unwrap();
        assert_eq!(deviation, 50);
    }

    #[test]
    fn test_before_first_stop_uses_first_stop_time() {
        let (schedule, mut projector) = fixture();
        let index = projector.index_for(schedule.trip("t1").unwrap()).unwrap();
        // Not yet at the first stop at 30s into the day: expected 0
        let deviation =
            deviation_seconds(&index, 0.0, -0.001, at(30), service_date(), chrono_tz::UTC)
                .unwrap();
        assert_eq!(deviation, -30);
    }

    #[test]
    fn test_past_last_stop_uses_last_stop_time() {
        let (schedule, mut projector) = fixture();
        let index = projector.index_for(schedule.trip("t1").unwrap()).unwrap();
        let deviation =
            deviation_seconds(&index, 0.0, 0.010, at(1260), service_date(), chrono_tz::UTC)
                .unwrap();
        assert_eq!(deviation, -60);
    }

    #[test]
    fn test_timezone_shifts_service_origin() {
        let (schedule, mut projector) = fixture();
        let index = projector.index_for(schedule.trip("t1").unwrap()).unwrap();
        // Same wall-clock instant is 4h less elapsed in UTC-4
        let instant = Utc.with_ymd_and_hms(2025, 6, 4, 4, 10, 0).unwrap();
        let deviation = deviation_seconds(
            &index,
            0.0,
            0.0045,
            instant,
            service_date(),
            chrono_tz::America::New_York,
        )
        .unwrap();
        assert_eq!(deviation, 0);
    }
}
