use crate::error::{HistoryError, HistoryResult, QueryStage};
use crate::query::HistoryQuery;
use crate::selector::METADATA_TABLE;
use crate::sql::SqlParams;
use crate::types::{ChannelMetadata, RawRow};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::path::Path;

/// Read-only access to the partitioned history database.
pub trait HistoryStore {
    /// Table names between `first` and `last` inclusive, compared as text.
    fn partition_tables(&self, first: &str, last: &str) -> HistoryResult<Vec<String>>;

    fn fetch_rows(&self, query: &HistoryQuery) -> HistoryResult<Vec<RawRow>>;

    fn channel_metadata(&self, channels: &[String]) -> HistoryResult<Vec<ChannelMetadata>>;

    /// Handle that aborts the statement currently running on this store, if it
    /// supports cancellation from another thread.
    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        None
    }
}

/// One read-only SQLite connection, closed when the store is dropped.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open_read_only(path: &Path) -> HistoryResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| HistoryError::Connection {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "opened history database");
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl HistoryStore for SqliteStore {
    fn partition_tables(&self, first: &str, last: &str) -> HistoryResult<Vec<String>> {
        let stage = |source| HistoryError::query(QueryStage::PartitionCheck, source);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name BETWEEN ?1 AND ?2 ORDER BY name",
            )
            .map_err(stage)?;
        let rows = stmt
            .query_map([first, last], |row| row.get::<_, String>(0))
            .map_err(stage)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(stage)
    }

    fn fetch_rows(&self, query: &HistoryQuery) -> HistoryResult<Vec<RawRow>> {
        let stage = |source| HistoryError::query(QueryStage::Data, source);
        let mut stmt = self.conn.prepare(&query.sql).map_err(stage)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(query.params.iter()))
            .map_err(stage)?;

        let mut out = Vec::new();
        let mut skipped = 0usize;
        while let Some(row) = rows.next().map_err(stage)? {
            let ts = decode_timestamp(row.get_ref(0).map_err(stage)?);
            let value = decode_value(row.get_ref(1).map_err(stage)?);
            let channel = row.get::<_, Option<String>>(2).map_err(stage)?;
            match (ts, channel) {
                (Some(timestamp_ms), Some(channel_name)) => out.push(RawRow {
                    timestamp_ms,
                    channel_name,
                    value,
                }),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "skipped rows without timestamp or channel name");
        }
        Ok(out)
    }

    fn channel_metadata(&self, channels: &[String]) -> HistoryResult<Vec<ChannelMetadata>> {
        if channels.is_empty() {
            return Ok(vec![]);
        }
        let mut params = SqlParams::new();
        let names = params.push_list(channels.iter().cloned());
        let sql = format!(
            "SELECT channel_name, unit, description, category FROM {METADATA_TABLE} WHERE channel_name IN ({names})"
        );

        let stage = |source| HistoryError::query(QueryStage::Metadata, source);
        let mut stmt = self.conn.prepare(&sql).map_err(stage)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.as_slice()), |row| {
                Ok(ChannelMetadata {
                    channel_name: row.get(0)?,
                    unit: row.get(1)?,
                    description: row.get(2)?,
                    category: row.get(3)?,
                })
            })
            .map_err(stage)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(stage)
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        Some(self.conn.get_interrupt_handle())
    }
}

fn decode_timestamp(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::Integer(ms) => Some(ms),
        ValueRef::Real(ms) if ms.is_finite() => Some(ms as i64),
        _ => None,
    }
}

fn decode_value(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(v) => Some(v as f64),
        ValueRef::Real(v) => Some(v),
        ValueRef::Text(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}


#[cfg(test)]
pub(crate) fn is_interrupted(err: &HistoryError) -> bool {
    matches!(
        err,
        HistoryError::Query {
            source: rusqlite::Error::SqliteFailure(failure, _),
            ..
        } if failure.code == rusqlite::ErrorCode::OperationInterrupted
    )
}
