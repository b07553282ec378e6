// Per-interval accumulator for transactions, event details and measurements

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Detail record describing one distinct instrumented event
///
/// Append-only; the caller is responsible for only adding each digest
/// once per interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDetail {
    pub digest: String,
    pub name: String,
    pub title: String,
    pub body: String,
}

/// Accumulated numeric fields for one metric within one minute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub digest: String,
    pub name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, f64>,
}

/// Serialized form of one aggregation interval, ready for transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorPayload {
    pub transactions: Vec<serde_json::Value>,
    pub event_details: Vec<EventDetail>,
    /// Minute timestamp → flattened metric records for that minute
    pub measurements: BTreeMap<i64, Vec<MeasurementRecord>>,
}

/// Mutable accumulator for one aggregation interval
///
/// Created when an interval starts, serialized and handed off when it
/// ends, then discarded.
#[derive(Debug, Default)]
pub struct Aggregator {
    transactions: Vec<serde_json::Value>,
    event_details: Vec<EventDetail>,
    measurements: BTreeMap<i64, BTreeMap<String, MeasurementRecord>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed-transaction summary
    pub fn add_transaction(&mut self, transaction: serde_json::Value) {
        self.transactions.push(transaction);
    }

    /// Record the detail of a distinct instrumented event
    pub fn add_event_detail(
        &mut self,
        digest: impl Into<String>,
        name: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) {
        self.event_details.push(EventDetail {
            digest: digest.into(),
            name: name.into(),
            title: title.into(),
            body: body.into(),
        });
    }

    /// Accumulate a measurement into its minute bucket
    ///
    /// Buckets by the minute containing `timestamp`, keyed by digest and
    /// name within the bucket. Every numeric field adds onto what is
    /// already there; a field not seen before starts from 0.0.
    pub fn add_measurement(
        &mut self,
        digest: &str,
        name: &str,
        timestamp: i64,
        values: HashMap<String, f64>,
    ) {
        let minute = Self::rounded_timestamp(timestamp);
        let key = format!("{}_{}", digest, name);

        let record = self
            .measurements
            .entry(minute)
            .or_default()
            .entry(key)
            .or_insert_with(|| MeasurementRecord {
                digest: digest.to_string(),
                name: name.to_string(),
                fields: BTreeMap::new(),
            });

        for (field, value) in values {
            *record.fields.entry(field).or_insert(0.0) += value;
        }
    }

    /// Whether anything was recorded this interval
    pub fn any(&self) -> bool {
        !self.transactions.is_empty()
            || !self.event_details.is_empty()
            || !self.measurements.is_empty()
    }

    /// Flatten the interval into its wire form
    pub fn serialize(self) -> AggregatorPayload {
        AggregatorPayload {
            transactions: self.transactions,
            event_details: self.event_details,
            measurements: self
                .measurements
                .into_iter()
                .map(|(minute, records)| (minute, records.into_values().collect()))
                .collect(),
        }
    }

    fn rounded_timestamp(timestamp: i64) -> i64 {
        timestamp - timestamp % 60
    }
}
