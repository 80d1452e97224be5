//! Train snapshot adapter: a flat JSON array of train records.

use super::{Train, TrainSource, field_f64, field_i64, field_string};
use crate::fetch::{BasicClient, HttpClient, fetch_json};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

pub struct HttpTrainSource<C = BasicClient> {
    client: C,
    url: String,
}

impl<C: HttpClient> HttpTrainSource<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        HttpTrainSource {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> TrainSource for HttpTrainSource<C> {
    async fn fetch_trains(&self) -> Result<Vec<Train>> {
        let body: Value = fetch_json(&self.client, &self.url).await?;
        Ok(parse_train_snapshot(&body))
    }
}

pub(crate) fn parse_train_snapshot(body: &Value) -> Vec<Train> {
    let mut trains = Vec::new();

    let Some(records) = body.as_array() else {
        warn!("train snapshot is not a JSON array");
        return trains;
    };

    for record in records {
        match parse_train(record) {
            Ok(train) => trains.push(train),
            Err(e) => {
                warn!(error = %e, %record, "skipping malformed train record");
            }
        }
    }

    trains
}

fn parse_train(record: &Value) -> Result<Train> {
    Ok(Train {
        latitude: field_f64(record, "lat")?,
        longitude: field_f64(record, "lon")?,
        train_number: field_string(record, "trainno")?,
        service: field_string(record, "service")?,
        destination: field_string(record, "dest")?,
        next_stop: field_string(record, "nextstop")?,
        late_minutes: field_i64(record, "late")?,
        source: field_string(record, "SOURCE")?,
    })
}
