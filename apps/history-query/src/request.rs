use crate::error::HistoryResult;
use crate::query::Aggregation;
use crate::selector::{ChannelSelector, NO_CATEGORY};
use crate::window::{resolve_time_window, TimeWindow};
use serde::Deserialize;

/// Body of `POST /v1/history/query`. Absent fields fall back to [`QueryDefaults`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub from: Option<i64>,
    #[serde(default)]
    pub to: Option<i64>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub agg_func: Option<String>,
    #[serde(default)]
    pub agg_interval: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefaults {
    pub channels: Vec<String>,
    pub time_range: String,
    pub agg_func: String,
    pub agg_interval: String,
    pub category: String,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            channels: vec![],
            time_range: "1h".to_string(),
            agg_func: "AVG".to_string(),
            agg_interval: "%Y-%m-%d %H:%M".to_string(),
            category: NO_CATEGORY.to_string(),
        }
    }
}

/// Splits a comma-separated channel list, dropping blank entries.
pub fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|channel| !channel.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub window: TimeWindow,
    pub selector: ChannelSelector,
    pub aggregation: Aggregation,
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Merges the request with the configured defaults and validates it.
///
/// Request channels are unioned with the default channels; every other field
/// overrides its default when present and non-blank.
pub fn resolve_plan(
    request: &HistoryRequest,
    defaults: &QueryDefaults,
    now_ms: i64,
) -> HistoryResult<QueryPlan> {
    let category = non_blank(request.category.as_ref()).unwrap_or(defaults.category.as_str());
    let selector = ChannelSelector::new(
        request.channels.iter().chain(defaults.channels.iter()),
        category,
    );
    selector.validate()?;

    let preset = non_blank(request.time_range.as_ref()).unwrap_or(defaults.time_range.as_str());
    let window = resolve_time_window(preset, request.from, request.to, now_ms)?;

    let agg_interval = non_blank(request.agg_interval.as_ref()).unwrap_or(defaults.agg_interval.as_str());
    let agg_func = non_blank(request.agg_func.as_ref()).unwrap_or(defaults.agg_func.as_str());
    let aggregation = Aggregation::from_parts(agg_interval, agg_func)?;

    Ok(QueryPlan {
        window,
        selector,
        aggregation,
    })
}
