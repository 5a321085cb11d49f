use serde::Serialize;
use std::collections::BTreeMap;

/// One decoded row of the data query: a raw sample, or an aggregated bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub timestamp_ms: i64,
    pub channel_name: String,
    /// `None` when the stored value is NULL or not numeric.
    pub value: Option<f64>,
}

impl RawRow {
    pub fn new(timestamp_ms: i64, channel_name: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            timestamp_ms,
            channel_name: channel_name.into(),
            value,
        }
    }
}

/// Row of the `hai_vars` metadata table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelMetadata {
    pub channel_name: String,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub ts: i64,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub records: Vec<SampleRecord>,
}

/// Channel name -> summary. Empty means no data in the window.
pub type ResultSet = BTreeMap<String, ChannelSummary>;
