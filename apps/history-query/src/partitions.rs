use crate::error::HistoryResult;
use crate::store::HistoryStore;
use crate::window::TimeWindow;
use chrono::{Datelike, TimeZone, Utc};
use std::collections::HashSet;

pub const PARTITION_PREFIX: &str = "hai_data_";

/// Partition names carry a four-digit year.
const FIRST_YEAR: i32 = 0;
const LAST_YEAR: i32 = 9999;

pub fn partition_name(year: i32, month: u32) -> String {
    format!("{PARTITION_PREFIX}{year:04}{month:02}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionPlan {
    /// Nothing to scan; the response is an empty result set.
    NoData,
    /// Existing partitions in ascending month order.
    Scan(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Month {
    year: i32,
    month: u32,
}

impl Month {
    fn containing(ms: i64) -> Option<Self> {
        let at = Utc.timestamp_millis_opt(ms).single()?;
        Some(Self {
            year: at.year(),
            month: at.month(),
        })
    }

    fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    fn partition_name(self) -> String {
        partition_name(self.year, self.month)
    }
}

/// First and last month whose partition could hold rows of `window`, limited
/// to the years a partition name can express.
fn month_span(window: &TimeWindow) -> Option<(Month, Month)> {
    let earliest = Utc
        .with_ymd_and_hms(FIRST_YEAR, 1, 1, 0, 0, 0)
        .single()?
        .timestamp_millis();
    let latest = Utc
        .with_ymd_and_hms(LAST_YEAR + 1, 1, 1, 0, 0, 0)
        .single()?
        .timestamp_millis()
        - 1;
    if window.to_ms < earliest || window.from_ms > latest {
        return None;
    }
    let first = Month::containing(window.from_ms.max(earliest))?;
    let last = Month::containing(window.to_ms.min(latest))?;
    Some((first, last))
}

/// Monthly partitions from the UTC month containing `from` through the month
/// containing `to`, one per month in ascending order.
pub fn candidate_partitions(window: &TimeWindow) -> impl Iterator<Item = String> {
    let span = month_span(window);
    let mut cursor = span.map(|(first, _)| first);
    std::iter::from_fn(move || {
        let (_, last) = span?;
        let month = cursor.filter(|month| *month <= last)?;
        cursor = Some(month.next());
        Some(month.partition_name())
    })
}

/// Resolves the partitions to scan with a single existence check.
///
/// The store lists tables between the first and last candidate name; only
/// names that are candidates survive, in candidate order.
pub fn plan_partitions<S>(store: &S, window: &TimeWindow) -> HistoryResult<PartitionPlan>
where
    S: HistoryStore + ?Sized,
{
    let Some((first, last)) = month_span(window) else {
        return Ok(PartitionPlan::NoData);
    };

    let existing: HashSet<String> = store
        .partition_tables(&first.partition_name(), &last.partition_name())?
        .into_iter()
        .collect();
    if existing.is_empty() {
        return Ok(PartitionPlan::NoData);
    }

    let partitions: Vec<String> = candidate_partitions(window)
        .filter(|name| existing.contains(name))
        .collect();
    if partitions.is_empty() {
        return Ok(PartitionPlan::NoData);
    }
    tracing::debug!(count = partitions.len(), "planned partition scan");
    Ok(PartitionPlan::Scan(partitions))
}
