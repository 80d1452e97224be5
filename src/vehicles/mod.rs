//! Live vehicle snapshots from the upstream feeds.
//!
//! A snapshot is the full set of vehicles the upstream currently knows
//! about; records live for one poll cycle only. The source traits are the
//! seams the orchestrator is tested through.

mod bus_http;
mod train_http;

pub use bus_http::HttpBusSource;
pub use train_http::HttpTrainSource;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;

/// Reported train lateness meaning "unknown"; suppresses the schedule
/// update for that train.
pub const LATE_UNKNOWN: i64 = 999;

#[derive(Debug, Clone)]
pub struct Bus {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
    pub vehicle_id: String,
    pub block_id: String,
    pub direction: String,
    pub destination: Option<String>,
    /// Minutes since this position was recorded; the observation instant
    /// trails wall-clock now by this much.
    pub offset_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct Train {
    pub latitude: f64,
    pub longitude: f64,
    pub train_number: String,
    pub service: String,
    pub destination: String,
    pub next_stop: String,
    /// Reported minutes behind schedule, or [`LATE_UNKNOWN`].
    pub late_minutes: i64,
    pub source: String,
}

#[async_trait]
pub trait BusSource: Send + Sync {
    async fn fetch_buses(&self) -> Result<Vec<Bus>>;
}

#[async_trait]
pub trait TrainSource: Send + Sync {
    async fn fetch_trains(&self) -> Result<Vec<Train>>;
}

// The upstream serializes numbers inconsistently (sometimes as strings), so
// field access is lenient about the JSON type.

fn raw_field<'a>(record: &'a Value, key: &str) -> Result<&'a Value> {
    match record.get(key) {
        Some(v) => Ok(v),
        None => bail!("missing field {key}"),
    }
}

pub(crate) fn field_f64(record: &Value, key: &str) -> Result<f64> {
    let value = raw_field(record, key)?;
    if let Some(n) = value.as_f64() {
        return Ok(n);
    }
    if let Some(s) = value.as_str() {
        if let Ok(n) = s.trim().parse() {
            return Ok(n);
        }
    }
    bail!("field {key} is not a number: {value}")
}

pub(crate) fn field_i64(record: &Value, key: &str) -> Result<i64> {
    let value = raw_field(record, key)?;
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    if let Some(s) = value.as_str() {
        if let Ok(n) = s.trim().parse() {
            return Ok(n);
        }
    }
    bail!("field {key} is not an integer: {value}")
}

pub(crate) fn field_string(record: &Value, key: &str) -> Result<String> {
    let value = raw_field(record, key)?;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => bail!("field {key} is not a string: {other}"),
    }
}

pub(crate) fn field_opt_string(record: &Value, key: &str) -> Option<String> {
    match record.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}
