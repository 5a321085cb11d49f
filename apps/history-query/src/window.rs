use crate::error::{HistoryError, HistoryResult};
use serde::Serialize;

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

pub const DEFAULT_PRESET_MS: i64 = HOUR_MS;

/// Preset name that defers to explicit request bounds.
pub const DYNAMIC_PRESET: &str = "dynamic";

const PRESETS: &[(&str, i64)] = &[
    ("15m", 15 * MINUTE_MS),
    ("1h", HOUR_MS),
    ("6h", 6 * HOUR_MS),
    ("12h", 12 * HOUR_MS),
    ("24h", 24 * HOUR_MS),
    ("2d", 2 * DAY_MS),
    ("7d", 7 * DAY_MS),
    ("30d", 30 * DAY_MS),
];

/// Inclusive `[from_ms, to_ms]` range in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub from_ms: i64,
    pub to_ms: i64,
}

impl TimeWindow {
    pub fn new(from_ms: i64, to_ms: i64) -> HistoryResult<Self> {
        if from_ms > to_ms {
            return Err(HistoryError::configuration(format!(
                "time window start {from_ms} is after end {to_ms}"
            )));
        }
        Ok(Self { from_ms, to_ms })
    }
}

pub fn preset_duration_ms(preset: &str) -> Option<i64> {
    PRESETS
        .iter()
        .find(|(name, _)| *name == preset.trim())
        .map(|(_, duration)| *duration)
}

/// Resolves the query window.
///
/// Explicit bounds win whenever both are present and non-zero. Otherwise the
/// window ends at `now_ms` and spans the preset duration; unknown presets
/// (including [`DYNAMIC_PRESET`] without bounds) fall back to one hour.
pub fn resolve_time_window(
    preset: &str,
    from_ms: Option<i64>,
    to_ms: Option<i64>,
    now_ms: i64,
) -> HistoryResult<TimeWindow> {
    if let (Some(from), Some(to)) = (from_ms, to_ms) {
        if from != 0 && to != 0 {
            return TimeWindow::new(from, to);
        }
    }

    let duration = match preset_duration_ms(preset) {
        Some(duration) => duration,
        None => {
            tracing::debug!(preset, "unrecognized time range preset; using 1h");
            DEFAULT_PRESET_MS
        }
    };
    TimeWindow::new(now_ms.saturating_sub(duration), now_ms)
}
