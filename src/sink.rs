//! Incremental feed publication.
//!
//! The orchestrator pushes batches of upserted and deleted entities per
//! logical channel (vehicle positions, trip updates). [`FeedState`] keeps
//! the current entity set and can snapshot it as a full `FeedMessage`;
//! [`SnapshotFileSink`] additionally re-encodes the snapshot to disk after
//! every applied batch.

use crate::gtfs_rt;
use chrono::{DateTime, Utc};
use prost::Message;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum FeedEntityPayload {
    VehiclePosition(gtfs_rt::VehiclePosition),
    TripUpdate(gtfs_rt::TripUpdate),
}

#[derive(Debug, Clone)]
pub struct EntityUpdate {
    pub id: String,
    pub payload: FeedEntityPayload,
}

#[derive(Debug, Clone, Default)]
pub struct IncrementalUpdate {
    pub upserts: Vec<EntityUpdate>,
    pub deletes: Vec<String>,
}

impl IncrementalUpdate {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    pub fn deletions(ids: Vec<String>) -> Self {
        IncrementalUpdate {
            upserts: Vec::new(),
            deletes: ids,
        }
    }
}

pub trait IncrementalSink {
    fn apply(&mut self, update: IncrementalUpdate);
}

/// Current entity set of one feed channel.
#[derive(Debug, Default)]
pub struct FeedState {
    entities: HashMap<String, FeedEntityPayload>,
}

impl FeedState {
    pub fn new() -> Self {
        FeedState::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn get(&self, entity_id: &str) -> Option<&FeedEntityPayload> {
        self.entities.get(entity_id)
    }

    /// Full-dataset feed message of everything currently published, with
    /// entities in stable id order.
    pub fn snapshot(&self, now: DateTime<Utc>) -> gtfs_rt::FeedMessage {
        let mut ids: Vec<&String> = self.entities.keys().collect();
        ids.sort();

        let entity = ids
            .into_iter()
            .map(|id| {
                let (trip_update, vehicle) = match &self.entities[id] {
                    FeedEntityPayload::VehiclePosition(vp) => (None, Some(vp.clone())),
                    FeedEntityPayload::TripUpdate(tu) => (Some(tu.clone()), None),
                };
                gtfs_rt::FeedEntity {
                    id: id.clone(),
                    is_deleted: None,
                    trip_update,
                    vehicle,
                }
            })
            .collect();

        gtfs_rt::FeedMessage {
            header: gtfs_rt::FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                incrementality: Some(gtfs_rt::feed_header::Incrementality::FullDataset as i32),
                timestamp: Some(now.timestamp() as u64),
                feed_version: None,
            },
            entity,
        }
    }
}

impl IncrementalSink for FeedState {
    fn apply(&mut self, update: IncrementalUpdate) {
        for upsert in update.upserts {
            self.entities.insert(upsert.id, upsert.payload);
        }
        for id in update.deletes {
            self.entities.remove(&id);
        }
    }
}

/// [`FeedState`] that also writes the protobuf-encoded snapshot to a file
/// after each batch. A write failure is logged and the in-memory state kept;
/// the next batch retries.
pub struct SnapshotFileSink {
    state: FeedState,
    path: PathBuf,
}

impl SnapshotFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotFileSink {
            state: FeedState::new(),
            path: path.into(),
        }
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    fn write_snapshot(&self) {
        let message = self.state.snapshot(Utc::now());
        let encoded = message.encode_to_vec();
        match std::fs::write(&self.path, &encoded) {
            Ok(()) => debug!(
                path = %self.path.display(),
                entities = self.state.len(),
                bytes = encoded.len(),
                "feed snapshot written"
            ),
            Err(e) => warn!(path = %self.path.display(), error = %e, "feed snapshot write failed"),
        }
    }
}

impl IncrementalSink for SnapshotFileSink {
    fn apply(&mut self, update: IncrementalUpdate) {
        if update.is_empty() {
            return;
        }
        self.state.apply(update);
        self.write_snapshot();
    }
}
