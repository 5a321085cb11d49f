use crate::types::{ChannelMetadata, ChannelSummary, RawRow, ResultSet, SampleRecord};
use chrono::{TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct ChannelAccumulator {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    count: u64,
    records: Vec<SampleRecord>,
}

impl ChannelAccumulator {
    fn push(&mut self, row: RawRow) {
        if let Some(value) = row.value {
            self.min = Some(self.min.map_or(value, |min| min.min(value)));
            self.max = Some(self.max.map_or(value, |max| max.max(value)));
            self.sum += value;
            self.count += 1;
        }
        self.records.push(SampleRecord {
            ts: row.timestamp_ms,
            value: row.value,
        });
    }

    fn finish(self, metadata: Option<&ChannelMetadata>) -> ChannelSummary {
        let avg = (self.count > 0).then(|| self.sum / self.count as f64);
        let start_time = self.records.first().and_then(|r| format_timestamp(r.ts));
        let end_time = self.records.last().and_then(|r| format_timestamp(r.ts));
        ChannelSummary {
            min: self.min,
            max: self.max,
            avg,
            unit: metadata.and_then(|m| m.unit.clone()),
            description: metadata.and_then(|m| m.description.clone()),
            category: metadata.and_then(|m| m.category.clone()),
            start_time,
            end_time,
            records: self.records,
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS UTC`, truncated to whole seconds.
pub fn format_timestamp(ts_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Distinct channel names in first-seen order.
pub fn observed_channels(rows: &[RawRow]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for row in rows {
        if !seen.iter().any(|name| name == &row.channel_name) {
            seen.push(row.channel_name.clone());
        }
    }
    seen
}

/// Folds data rows into per-channel summaries.
///
/// Records keep the order rows arrive in. Rows without a numeric value are
/// recorded but do not contribute to min/max/avg. Channels without a
/// metadata row get `None` for unit, description and category.
pub fn aggregate_rows(rows: Vec<RawRow>, metadata: &[ChannelMetadata]) -> ResultSet {
    let meta_by_channel: HashMap<&str, &ChannelMetadata> = metadata
        .iter()
        .map(|meta| (meta.channel_name.as_str(), meta))
        .collect();

    let mut channels: BTreeMap<String, ChannelAccumulator> = BTreeMap::new();
    for row in rows {
        channels
            .entry(row.channel_name.clone())
            .or_default()
            .push(row);
    }

    channels
        .into_iter()
        .map(|(channel, acc)| {
            let summary = acc.finish(meta_by_channel.get(channel.as_str()).copied());
            (channel, summary)
        })
        .collect()
}
