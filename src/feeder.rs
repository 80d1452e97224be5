//! Periodic feed orchestration.
//!
//! The bus refresh, train refresh and expiry sweep run as independent
//! periodic cycles on one cooperative loop, so a cycle always finishes
//! before the next starts and the last-seen map needs no locking. A vehicle that cannot be
//! matched to a trip still gets its position published; a snapshot fetch
//! failure skips that cycle and leaves previously published entities live
//! until they expire.

use crate::activation::{ActivatedTrip, BlockActivationResolver};
use crate::deviation::deviation_seconds;
use crate::gtfs_rt;
use crate::projection::RouteProjector;
use crate::schedule::ScheduleIndex;
use crate::sink::{EntityUpdate, FeedEntityPayload, IncrementalSink, IncrementalUpdate};
use crate::vehicles::{BusSource, LATE_UNKNOWN, Train, TrainSource};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Entities unseen for longer than this are deleted from both channels.
pub const EXPIRE_AFTER_SECS: i64 = 300;
/// Cadence of the expiry sweep.
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// One mode's static schedule with the resolver and projector built over it.
struct ScheduleContext {
    schedule: Arc<ScheduleIndex>,
    resolver: BlockActivationResolver,
    projector: RouteProjector,
}

impl ScheduleContext {
    fn new(schedule: Arc<ScheduleIndex>) -> Self {
        ScheduleContext {
            resolver: BlockActivationResolver::new(schedule.clone()),
            projector: RouteProjector::new(schedule.clone()),
            schedule,
        }
    }
}

pub struct Feeder<B, T, S> {
    bus_source: B,
    train_source: T,
    bus: ScheduleContext,
    rail: ScheduleContext,
    vehicle_positions: S,
    trip_updates: S,
    /// Publish time per entity id; owned and swept only by this feeder.
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl<B, T, S> Feeder<B, T, S>
where
    B: BusSource,
    T: TrainSource,
    S: IncrementalSink,
{
    pub fn new(
        bus_schedule: Arc<ScheduleIndex>,
        rail_schedule: Arc<ScheduleIndex>,
        bus_source: B,
        train_source: T,
        vehicle_positions: S,
        trip_updates: S,
    ) -> Self {
        Feeder {
            bus_source,
            train_source,
            bus: ScheduleContext::new(bus_schedule),
            rail: ScheduleContext::new(rail_schedule),
            vehicle_positions,
            trip_updates,
            last_seen: HashMap::new(),
        }
    }

    pub fn vehicle_positions(&self) -> &S {
        &self.vehicle_positions
    }

    pub fn trip_updates(&self) -> &S {
        &self.trip_updates
    }

    pub fn tracked_entities(&self) -> usize {
        self.last_seen.len()
    }

    /// Drives the three cycles until `shutdown` completes. Shutdown is
    /// immediate; an in-flight cycle is simply dropped.
    pub async fn run(
        mut self,
        bus_interval: Duration,
        rail_interval: Duration,
        shutdown: impl Future<Output = ()>,
    ) {
        let mut bus_timer = tokio::time::interval(bus_interval);
        let mut rail_timer = tokio::time::interval(rail_interval);
        let mut sweep_timer = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        for timer in [&mut bus_timer, &mut rail_timer, &mut sweep_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(
            bus_interval_secs = bus_interval.as_secs(),
            rail_interval_secs = rail_interval.as_secs(),
            "feed cycles starting"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, cancelling feed cycles");
                    return;
                }
                _ = bus_timer.tick() => self.refresh_buses(Utc::now()).await,
                _ = rail_timer.tick() => self.refresh_trains(Utc::now()).await,
                _ = sweep_timer.tick() => self.expire_stale(Utc::now()),
            }
        }
    }

    pub async fn refresh_buses(&mut self, now: DateTime<Utc>) {
        let buses = match self.bus_source.fetch_buses().await {
            Ok(buses) => buses,
            Err(e) => {
                warn!(error = %e, "bus snapshot fetch failed, previous state stays live");
                return;
            }
        };
        info!(count = buses.len(), "refreshing buses");

        let mut positions = IncrementalUpdate::default();

        for bus in &buses {
            let entity_id = format!("BUS{}", bus.vehicle_id);
            // The report is offset_minutes old; activate against the instant
            // the position was actually recorded.
            let observed = now - chrono::Duration::minutes(bus.offset_minutes);

            let trip = match self.bus.resolver.resolve(&bus.block_id, observed, None) {
                Ok(activated) => Some(trip_descriptor(&activated)),
                Err(e) => {
                    debug!(
                        vehicle = %bus.vehicle_id,
                        block = %bus.block_id,
                        error = %e,
                        "bus not matched to a trip, publishing bare position"
                    );
                    None
                }
            };

            let vehicle_position = gtfs_rt::VehiclePosition {
                trip,
                vehicle: Some(gtfs_rt::VehicleDescriptor {
                    id: Some(bus.vehicle_id.clone()),
                    label: Some(bus.label.clone()),
                    license_plate: None,
                }),
                position: Some(position(bus.latitude, bus.longitude)),
                current_stop_sequence: None,
                stop_id: None,
                current_status: None,
                timestamp: Some(observed.timestamp() as u64),
            };

            positions.upserts.push(EntityUpdate {
                id: entity_id.clone(),
                payload: FeedEntityPayload::VehiclePosition(vehicle_position),
            });
            self.last_seen.insert(entity_id, now);
        }

        if !positions.is_empty() {
            self.vehicle_positions.apply(positions);
        }
    }

    pub async fn refresh_trains(&mut self, now: DateTime<Utc>) {
        let trains = match self.train_source.fetch_trains().await {
            Ok(trains) => trains,
            Err(e) => {
                warn!(error = %e, "train snapshot fetch failed, previous state stays live");
                return;
            }
        };
        info!(count = trains.len(), "refreshing trains");

        let mut positions = IncrementalUpdate::default();
        let mut updates = IncrementalUpdate::default();

        for train in &trains {
            let entity_id = format!("TRAIN{}", train.train_number);
            let ctx = &mut self.rail;

            // A late train is where the schedule put it late_minutes ago; a
            // sentinel lateness gives nothing to correct by.
            let observed = if train.late_minutes == LATE_UNKNOWN {
                now
            } else {
                now - chrono::Duration::minutes(train.late_minutes)
            };

            let activated = match ctx.resolver.resolve(&train.train_number, observed, None) {
                Ok(activated) => Some(activated),
                Err(e) => {
                    debug!(
                        train = %train.train_number,
                        error = %e,
                        "train not matched to a trip, publishing bare position"
                    );
                    None
                }
            };
            let descriptor = activated.as_ref().map(trip_descriptor);

            let vehicle = gtfs_rt::VehicleDescriptor {
                id: Some(train.train_number.clone()),
                label: Some(train.train_number.clone()),
                license_plate: None,
            };

            let vehicle_position = gtfs_rt::VehiclePosition {
                trip: descriptor.clone(),
                vehicle: Some(vehicle.clone()),
                position: Some(position(train.latitude, train.longitude)),
                current_stop_sequence: None,
                stop_id: None,
                current_status: None,
                timestamp: Some(now.timestamp() as u64),
            };
            positions.upserts.push(EntityUpdate {
                id: entity_id.clone(),
                payload: FeedEntityPayload::VehiclePosition(vehicle_position),
            });

            if let (Some(activated), Some(descriptor)) = (&activated, descriptor) {
                if train.late_minutes != LATE_UNKNOWN {
                    let stop_time_update = next_stop_update(
                        &mut ctx.projector,
                        &ctx.schedule,
                        activated,
                        train,
                        now,
                    );
                    if let Some(stop_time_update) = stop_time_update {
                        updates.upserts.push(EntityUpdate {
                            id: entity_id.clone(),
                            payload: FeedEntityPayload::TripUpdate(gtfs_rt::TripUpdate {
                                trip: descriptor,
                                vehicle: Some(vehicle),
                                stop_time_update: vec![stop_time_update],
                                timestamp: Some(now.timestamp() as u64),
                                delay: None,
                            }),
                        });
                    }
                }
            }

            self.last_seen.insert(entity_id, now);
        }

        if !positions.is_empty() {
            self.vehicle_positions.apply(positions);
        }
        if !updates.is_empty() {
            self.trip_updates.apply(updates);
        }
    }

    /// Deletes every entity whose last publish is older than
    /// [`EXPIRE_AFTER_SECS`] from both channels.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) {
        let expired: Vec<String> = self
            .last_seen
            .iter()
            .filter(|(_, last)| (now - **last).num_seconds() > EXPIRE_AFTER_SECS)
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return;
        }
        info!(count = expired.len(), "expiring stale entities");

        for id in &expired {
            self.last_seen.remove(id);
        }
        self.trip_updates
            .apply(IncrementalUpdate::deletions(expired.clone()));
        self.vehicle_positions
            .apply(IncrementalUpdate::deletions(expired));
    }
}

fn position(lat: f64, lon: f64) -> gtfs_rt::Position {
    gtfs_rt::Position {
        latitude: lat as f32,
        longitude: lon as f32,
        bearing: None,
        odometer: None,
        speed: None,
    }
}

fn trip_descriptor(activated: &ActivatedTrip<'_>) -> gtfs_rt::TripDescriptor {
    gtfs_rt::TripDescriptor {
        trip_id: Some(activated.trip.id.clone()),
        route_id: Some(activated.trip.route_id.clone()),
        direction_id: None,
        start_time: None,
        start_date: Some(activated.service_date.format("%Y%m%d").to_string()),
        schedule_relationship: None,
    }
}

/// Delay record for the stop the train will reach next, found by projecting
/// its position onto the trip's route index. Falls back to the trip's first
/// stop when the trip has no usable geometry. The published delay is the
/// upstream-reported lateness; the interpolated estimate is logged alongside
/// for comparison.
fn next_stop_update(
    projector: &mut RouteProjector,
    schedule: &ScheduleIndex,
    activated: &ActivatedTrip<'_>,
    train: &Train,
    now: DateTime<Utc>,
) -> Option<gtfs_rt::trip_update::StopTimeUpdate> {
    let delay_secs = (train.late_minutes * 60) as i32;

    let (stop_id, stop_sequence) = match projector.index_for(activated.trip) {
        Ok(index) => {
            let probe = index.project(train.latitude, train.longitude);
            let mark = index.next_stop_after(probe.along);

            match deviation_seconds(
                index,
                train.latitude,
                train.longitude,
                now,
                activated.service_date,
                schedule.agency_timezone(),
            ) {
                Ok(estimated) => debug!(
                    train = %train.train_number,
                    trip_id = %activated.trip.id,
                    reported_secs = delay_secs,
                    estimated_secs = estimated,
                    "schedule deviation"
                ),
                Err(e) => debug!(train = %train.train_number, error = %e, "deviation estimate unavailable"),
            }

            (mark.stop_id.clone(), mark.sequence)
        }
        Err(e) => {
            debug!(
                train = %train.train_number,
                trip_id = %activated.trip.id,
                error = %e,
                "no usable geometry, delay pinned to first stop"
            );
            let first = activated.trip.stop_times.first()?;
            (first.stop_id.clone(), first.sequence)
        }
    };

    Some(gtfs_rt::trip_update::StopTimeUpdate {
        stop_sequence: Some(stop_sequence),
        stop_id: Some(stop_id),
        arrival: None,
        departure: Some(gtfs_rt::trip_update::StopTimeEvent {
            delay: Some(delay_secs),
            time: None,
            uncertainty: None,
        }),
        schedule_relationship: None,
    })
}
