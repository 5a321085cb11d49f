use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use tempfile::TempDir;

use crate::selector::METADATA_TABLE;
use crate::sql::quote_ident;

pub(crate) fn utc_ms(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> i64 {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .expect("valid utc datetime")
        .timestamp_millis()
}

pub(crate) fn create_metadata_table(conn: &Connection) {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {METADATA_TABLE} (
            channel_name TEXT PRIMARY KEY,
            unit TEXT,
            description TEXT,
            category TEXT
        )"
    ))
    .expect("create metadata table");
}

pub(crate) fn insert_var(conn: &Connection, channel: &str, unit: &str, description: &str, category: &str) {
    conn.execute(
        &format!(
            "INSERT INTO {METADATA_TABLE} (channel_name, unit, description, category) VALUES (?1, ?2, ?3, ?4)"
        ),
        params![channel, unit, description, category],
    )
    .expect("insert var");
}

pub(crate) fn create_partition(conn: &Connection, table: &str) {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            timestamp INTEGER NOT NULL,
            channel_name TEXT NOT NULL,
            value_numeric REAL
        )",
        quote_ident(table)
    ))
    .expect("create partition");
}

pub(crate) fn insert_sample(conn: &Connection, table: &str, ts: i64, channel: &str, value: f64) {
    conn.execute(
        &format!(
            "INSERT INTO {} (timestamp, channel_name, value_numeric) VALUES (?1, ?2, ?3)",
            quote_ident(table)
        ),
        params![ts, channel, value],
    )
    .expect("insert sample");
}

/// On-disk database that tests populate through a writable connection and then
/// query through the read-only store.
pub(crate) struct HistoryDbFixture {
    _dir: TempDir,
    pub(crate) path: PathBuf,
    pub(crate) conn: Connection,
}

impl HistoryDbFixture {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data_storage.db");
        let conn = Connection::open(&path).expect("open fixture db");
        create_metadata_table(&conn);
        Self {
            _dir: dir,
            path,
            conn,
        }
    }

    pub(crate) fn sample(&self, table: &str, ts: i64, channel: &str, value: f64) -> &Self {
        create_partition(&self.conn, table);
        insert_sample(&self.conn, table, ts, channel, value);
        self
    }

    pub(crate) fn var(&self, channel: &str, unit: &str, description: &str, category: &str) -> &Self {
        insert_var(&self.conn, channel, unit, description, category);
        self
    }
}
