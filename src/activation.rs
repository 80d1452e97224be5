//! Block-to-trip activation.
//!
//! A block id only says which vehicle duty a report belongs to; near
//! midnight the same block has runs on more than one service day. Each trip
//! of the block is checked against the observation instant on the current
//! service date and on shifted-back dates, and exactly one (trip, service
//! date) pair must fall over the instant.

use crate::schedule::{ScheduleIndex, Trip, service_day_origin};
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;

const DAY_IN_SECONDS: u32 = 60 * 60 * 24;

/// A trip pinned to the concrete service date it is operating on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivatedTrip<'a> {
    pub trip: &'a Trip,
    pub service_date: NaiveDate,
}

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("no active trip for block {block_id} at {at}")]
    NoActivation { block_id: String, at: DateTime<Utc> },
    #[error("block {block_id} activates {count} trips at {at}")]
    AmbiguousActivation {
        block_id: String,
        at: DateTime<Utc>,
        count: usize,
    },
}

pub struct BlockActivationResolver {
    schedule: Arc<ScheduleIndex>,
    auto_max_lookback: u32,
}

impl BlockActivationResolver {
    pub fn new(schedule: Arc<ScheduleIndex>) -> Self {
        let auto_max_lookback = schedule.max_stop_offset().div_ceil(DAY_IN_SECONDS);
        BlockActivationResolver {
            schedule,
            auto_max_lookback,
        }
    }

    /// Lookback used when `resolve` is called without an explicit bound:
    /// enough days to cover the longest stop offset in the schedule.
    pub fn auto_max_lookback(&self) -> u32 {
        self.auto_max_lookback
    }

    pub fn schedule(&self) -> &ScheduleIndex {
        &self.schedule
    }

    /// Resolves `block_id` at instant `at` to the unique trip whose active
    /// window contains `at` on some service date within the lookback.
    pub fn resolve(
        &self,
        block_id: &str,
        at: DateTime<Utc>,
        max_lookback: Option<u32>,
    ) -> Result<ActivatedTrip<'_>, ActivationError> {
        let max_lookback = max_lookback.unwrap_or(self.auto_max_lookback);
        let tz = self.schedule.agency_timezone();
        let today = at.with_timezone(&tz).date_naive();

        let mut matches: Vec<ActivatedTrip<'_>> = Vec::new();

        for trip in self.schedule.trips_for_block(block_id) {
            let (Some(start), Some(end)) = (trip.start_offset(), trip.end_offset()) else {
                tracing::debug!(trip_id = %trip.id, "trip has no stop times, skipping");
                continue;
            };

            for lookback in 0..=max_lookback {
                let Some(service_date) = today.checked_sub_days(Days::new(lookback.into())) else {
                    continue;
                };
                if !self.schedule.service_active_on(&trip.service_id, service_date) {
                    continue;
                }
                let Some(origin) = service_day_origin(service_date, tz) else {
                    continue;
                };

                let elapsed = (at - origin).num_seconds();
                if elapsed >= i64::from(start) && elapsed <= i64::from(end) {
                    matches.push(ActivatedTrip { trip, service_date });
                }
            }
        }

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(ActivationError::NoActivation {
                block_id: block_id.to_string(),
                at,
            }),
            count => Err(ActivationError::AmbiguousActivation {
                block_id: block_id.to_string(),
                at,
                count,
            }),
        }
    }
}
