//! End-to-end: vehicle snapshots in, decodable GTFS-RT feed messages out.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use gtfs_rt_feeder::feeder::Feeder;
use gtfs_rt_feeder::gtfs_rt;
use gtfs_rt_feeder::schedule::{
    ScheduleIndex, ScheduleSnapshot, ShapePoint, Stop, StopTime, Trip,
};
use gtfs_rt_feeder::sink::FeedState;
use gtfs_rt_feeder::vehicles::{Bus, BusSource, Train, TrainSource};
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;

struct StaticBuses(Vec<Bus>);

#[async_trait]
impl BusSource for StaticBuses {
    async fn fetch_buses(&self) -> Result<Vec<Bus>> {
        Ok(self.0.clone())
    }
}

struct StaticTrains(Vec<Train>);

#[async_trait]
impl TrainSource for StaticTrains {
    async fn fetch_trains(&self) -> Result<Vec<Train>> {
        Ok(self.0.clone())
    }
}

fn schedule(block_id: &str) -> Arc<ScheduleIndex> {
    Arc::new(ScheduleIndex::new(ScheduleSnapshot {
        timezone: chrono_tz::America::New_York,
        stops: vec![
            Stop {
                id: "north".to_string(),
                name: "North Terminal".to_string(),
                lat: 40.0000,
                lon: -75.1500,
            },
            Stop {
                id: "center".to_string(),
                name: "Center City".to_string(),
                lat: 39.9550,
                lon: -75.1500,
            },
            Stop {
                id: "south".to_string(),
                name: "South Terminal".to_string(),
                lat: 39.9100,
                lon: -75.1500,
            },
        ],
        trips: vec![Trip {
            id: format!("trip-{block_id}"),
            route_id: "line-a".to_string(),
            service_id: "weekday".to_string(),
            block_id: block_id.to_string(),
            shape_id: Some("line-a-south".to_string()),
            stop_times: vec![
                StopTime {
                    stop_id: "north".to_string(),
                    arrival: 28800,
                    departure: 28800,
                    sequence: 1,
                },
                StopTime {
                    stop_id: "center".to_string(),
                    arrival: 30600,
                    departure: 30660,
                    sequence: 2,
                },
                StopTime {
                    stop_id: "south".to_string(),
                    arrival: 32400,
                    departure: 32400,
                    sequence: 3,
                },
            ],
        }],
        shapes: HashMap::from([(
            "line-a-south".to_string(),
            vec![
                ShapePoint {
                    lat: 40.0000,
                    lon: -75.1500,
                    sequence: 1,
                },
                ShapePoint {
                    lat: 39.9550,
                    lon: -75.1500,
                    sequence: 2,
                },
                ShapePoint {
                    lat: 39.9100,
                    lon: -75.1500,
                    sequence: 3,
                },
            ],
        )]),
        calendar: HashMap::from([(
            NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(),
            vec!["weekday".to_string()],
        )]),
    }))
}

/// 08:45 local on the June 4 service day, inside the trip window.
fn cycle_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 4, 12, 45, 0).unwrap()
}

#[tokio::test]
async fn test_snapshots_become_decodable_feed_messages() {
    let buses = vec![Bus {
        latitude: 39.9700,
        longitude: -75.1502,
        label: "8321".to_string(),
        vehicle_id: "8321".to_string(),
        block_id: "1459".to_string(),
        direction: "SouthBound".to_string(),
        destination: Some("South Terminal".to_string()),
        offset_minutes: 1,
    }];
    let trains = vec![Train {
        latitude: 39.9400,
        longitude: -75.1498,
        train_number: "532".to_string(),
        service: "LOCAL".to_string(),
        destination: "South Terminal".to_string(),
        next_stop: "South Terminal".to_string(),
        late_minutes: 4,
        source: "feed".to_string(),
    }];

    let mut feeder = Feeder::new(
        schedule("1459"),
        schedule("532"),
        StaticBuses(buses),
        StaticTrains(trains),
        FeedState::new(),
        FeedState::new(),
    );

    let now = cycle_time();
    feeder.refresh_buses(now).await;
    feeder.refresh_trains(now).await;

    // Round-trip the positions channel through the wire encoding
    let encoded = feeder.vehicle_positions().snapshot(now).encode_to_vec();
    let positions = gtfs_rt::FeedMessage::decode(encoded.as_slice()).unwrap();

    assert_eq!(positions.header.gtfs_realtime_version, "2.0");
    let ids: Vec<&str> = positions.entity.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["BUS8321", "TRAIN532"]);

    let bus_entity = &positions.entity[0];
    let vp = bus_entity.vehicle.as_ref().unwrap();
    let trip = vp.trip.as_ref().unwrap();
    assert_eq!(trip.trip_id.as_deref(), Some("trip-1459"));
    assert_eq!(trip.start_date.as_deref(), Some("20250604"));

    // Trip updates channel carries the reported train delay on its next stop
    let encoded = feeder.trip_updates().snapshot(now).encode_to_vec();
    let updates = gtfs_rt::FeedMessage::decode(encoded.as_slice()).unwrap();

    assert_eq!(updates.entity.len(), 1);
    let tu = updates.entity[0].trip_update.as_ref().unwrap();
    assert_eq!(tu.trip.trip_id.as_deref(), Some("trip-532"));

    let stu = &tu.stop_time_update[0];
    assert_eq!(stu.stop_id.as_deref(), Some("south"));
    assert_eq!(stu.departure.as_ref().unwrap().delay, Some(240));
}

#[tokio::test]
async fn test_entities_expire_after_timeout_across_channels() {
    let trains = vec![Train {
        latitude: 39.9400,
        longitude: -75.1498,
        train_number: "532".to_string(),
        service: "LOCAL".to_string(),
        destination: "South Terminal".to_string(),
        next_stop: "South Terminal".to_string(),
        late_minutes: 0,
        source: "feed".to_string(),
    }];

    let mut feeder = Feeder::new(
        schedule("1459"),
        schedule("532"),
        StaticBuses(vec![]),
        StaticTrains(trains),
        FeedState::new(),
        FeedState::new(),
    );

    let t0 = cycle_time();
    feeder.refresh_trains(t0).await;
    assert!(feeder.vehicle_positions().contains("TRAIN532"));
    assert!(feeder.trip_updates().contains("TRAIN532"));

    feeder.expire_stale(t0 + chrono::Duration::seconds(299));
    assert!(feeder.vehicle_positions().contains("TRAIN532"));

    feeder.expire_stale(t0 + chrono::Duration::seconds(301));
    assert!(!feeder.vehicle_positions().contains("TRAIN532"));
    assert!(!feeder.trip_updates().contains("TRAIN532"));
    assert_eq!(feeder.tracked_entities(), 0);
}
