use crate::error::{HistoryError, HistoryResult};
use crate::selector::ChannelSelector;
use crate::sql::{quote_ident, SqlParams};
use crate::window::TimeWindow;
use rusqlite::types::Value;
use std::fmt;

/// Bucket format selecting raw rows.
pub const RAW_FORMAT: &str = "none";
/// Bucket format selecting the newest row per channel.
pub const LAST_FORMAT: &str = "last";

const UNION_ALIAS: &str = "sub";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    /// `max - min` of the bucket.
    Delta,
}

impl AggregateFunction {
    pub fn parse(raw: &str) -> HistoryResult<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AVG" => Ok(Self::Avg),
            "SUM" => Ok(Self::Sum),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "COUNT" => Ok(Self::Count),
            "DELTA" => Ok(Self::Delta),
            other => Err(HistoryError::configuration(format!(
                "unsupported aggregation function {other:?}"
            ))),
        }
    }

    fn sql_expr(self, column: &str) -> String {
        match self {
            Self::Avg => format!("AVG({column})"),
            Self::Sum => format!("SUM({column})"),
            Self::Min => format!("MIN({column})"),
            Self::Max => format!("MAX({column})"),
            Self::Count => format!("COUNT({column})"),
            Self::Delta => format!("(MAX({column}) - MIN({column}))"),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Avg => "AVG",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Count => "COUNT",
            Self::Delta => "DELTA",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    Raw,
    LastValue,
    Bucketed {
        /// strftime pattern; rows sharing the formatted value share a bucket.
        interval_format: String,
        function: AggregateFunction,
    },
}

impl Aggregation {
    /// `"none"` (or blank) selects raw rows, `"last"` the newest row per channel;
    /// any other format buckets with `function`, which is only parsed in that case.
    pub fn from_parts(bucket_format: &str, function: &str) -> HistoryResult<Self> {
        let bucket_format = bucket_format.trim();
        if bucket_format.is_empty() || bucket_format == RAW_FORMAT {
            return Ok(Self::Raw);
        }
        if bucket_format == LAST_FORMAT {
            return Ok(Self::LastValue);
        }
        if !bucket_format.contains('%') {
            return Err(HistoryError::configuration(format!(
                "bucket format {bucket_format:?} has no strftime directive"
            )));
        }
        Ok(Self::Bucketed {
            interval_format: bucket_format.to_string(),
            function: AggregateFunction::parse(function)?,
        })
    }

    pub fn label(&self) -> String {
        match self {
            Self::Raw => RAW_FORMAT.to_string(),
            Self::LastValue => LAST_FORMAT.to_string(),
            Self::Bucketed {
                interval_format,
                function,
            } => format!("{function} by {interval_format}"),
        }
    }
}

/// Statement text plus its positional parameters. Result columns are
/// `ts`, `value`, `channel_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

fn union_view(partitions: &[String]) -> String {
    partitions
        .iter()
        .map(|table| {
            format!(
                "SELECT timestamp, channel_name, value_numeric FROM {}",
                quote_ident(table)
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

/// Builds the data statement over the union of `partitions`.
///
/// The working set is every union row inside the inclusive window that the
/// selector accepts. Raw returns it ordered by timestamp, LastValue one row
/// per channel (the newest; ties resolve to whichever row SQLite picks), and
/// Bucketed one row per (channel, bucket) stamped with the bucket's earliest
/// timestamp.
pub fn build_history_query(
    partitions: &[String],
    window: &TimeWindow,
    selector: &ChannelSelector,
    aggregation: &Aggregation,
) -> HistoryQuery {
    let mut params = SqlParams::new();
    let from = params.push(window.from_ms);
    let to = params.push(window.to_ms);
    let predicate = selector.compile(UNION_ALIAS, &mut params);

    let a = UNION_ALIAS;
    let source = format!("({}) AS {a}", union_view(partitions));
    let working_set = format!("{a}.timestamp BETWEEN {from} AND {to} AND {predicate}");

    let sql = match aggregation {
        Aggregation::Raw => format!(
            "SELECT {a}.timestamp AS ts, {a}.value_numeric AS value, {a}.channel_name AS channel_name \
             FROM {source} WHERE {working_set} \
             ORDER BY ts ASC, channel_name ASC"
        ),
        // SQLite fills bare columns from the row that produced MAX().
        Aggregation::LastValue => format!(
            "SELECT MAX({a}.timestamp) AS ts, {a}.value_numeric AS value, {a}.channel_name AS channel_name \
             FROM {source} WHERE {working_set} \
             GROUP BY {a}.channel_name \
             ORDER BY ts ASC, channel_name ASC"
        ),
        Aggregation::Bucketed {
            interval_format,
            function,
        } => {
            let format = params.push(interval_format.clone());
            let value = function.sql_expr(&format!("{a}.value_numeric"));
            format!(
                "SELECT MIN({a}.timestamp) AS ts, {value} AS value, {a}.channel_name AS channel_name \
                 FROM {source} WHERE {working_set} \
                 GROUP BY {a}.channel_name, strftime({format}, {a}.timestamp / 1000, 'unixepoch') \
                 ORDER BY ts ASC, channel_name ASC"
            )
        }
    };

    HistoryQuery {
        sql,
        params: params.into_values(),
    }
}
