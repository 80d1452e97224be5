//! Bus snapshot adapter.
//!
//! The upstream endpoint returns one object whose single member holds an
//! array of route objects, each keyed by route name with an array of bus
//! records inside. A malformed bus record is skipped; the rest of the
//! snapshot still goes through.

use super::{Bus, BusSource, field_f64, field_i64, field_opt_string, field_string};
use crate::fetch::{BasicClient, HttpClient, fetch_json};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

pub struct HttpBusSource<C = BasicClient> {
    client: C,
    url: String,
}

impl<C: HttpClient> HttpBusSource<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        HttpBusSource {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> BusSource for HttpBusSource<C> {
    async fn fetch_buses(&self) -> Result<Vec<Bus>> {
        let body: Value = fetch_json(&self.client, &self.url).await?;
        Ok(parse_bus_snapshot(&body))
    }
}

pub(crate) fn parse_bus_snapshot(body: &Value) -> Vec<Bus> {
    let mut buses = Vec::new();

    let Some(root) = body.as_object() else {
        warn!("bus snapshot is not a JSON object");
        return buses;
    };

    for routes in root.values() {
        let Some(routes) = routes.as_array() else {
            continue;
        };
        for route in routes {
            let Some(route) = route.as_object() else {
                continue;
            };
            for records in route.values() {
                let Some(records) = records.as_array() else {
                    continue;
                };
                for record in records {
                    match parse_bus(record) {
                        Ok(bus) => buses.push(bus),
                        Err(e) => {
                            warn!(error = %e, %record, "skipping malformed bus record");
                        }
                    }
                }
            }
        }
    }

    buses
}

fn parse_bus(record: &Value) -> Result<Bus> {
    Ok(Bus {
        latitude: field_f64(record, "lat")?,
        longitude: field_f64(record, "lng")?,
        label: field_string(record, "label")?,
        vehicle_id: field_string(record, "VehicleID")?,
        block_id: field_string(record, "BlockID")?,
        direction: field_string(record, "Direction")?,
        destination: field_opt_string(record, "destination"),
        offset_minutes: field_i64(record, "Offset")?,
    })
}
