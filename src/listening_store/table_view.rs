//! Read-only browsing over the stored tables.
//!
//! Each table gets a small view type that knows its columns and its natural
//! ordering; the browser never interpolates caller-provided identifiers into SQL.

use super::schema::{INGESTION_RUNS_TABLE, LISTENERS_TABLE, PLAYS_TABLE, TRACKS_TABLE};
use crate::sqlite_persistence::Table;
use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRows {
    pub table: String,
    pub columns: Vec<String>,
    pub total_rows: usize,
    pub rows: Vec<Vec<Value>>,
}

pub trait BrowsableTable: Send + Sync {
    fn schema(&self) -> &'static Table;

    /// `ORDER BY` clause used when reading rows.
    fn order_by(&self) -> &'static str;

    fn name(&self) -> &'static str {
        self.schema().name
    }

    fn columns(&self) -> Vec<&'static str> {
        self.schema().column_names()
    }

    fn read_rows(&self, conn: &Connection, limit: usize) -> Result<TableRows> {
        let columns = self.columns();
        let total_rows: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.name()),
            [],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT ?1",
            columns.join(", "),
            self.name(),
            self.order_by()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                (0..columns.len())
                    .map(|i| row.get_ref(i).map(json_value))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read rows of {}", self.name()))?;

        Ok(TableRows {
            table: self.name().to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            total_rows: total_rows as usize,
            rows,
        })
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) => Value::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::from(format!("<{} bytes>", bytes.len())),
    }
}

pub struct ListenersTable;
pub struct TracksTable;
pub struct PlaysTable;
pub struct IngestionRunsTable;

impl BrowsableTable for ListenersTable {
    fn schema(&self) -> &'static Table {
        &LISTENERS_TABLE
    }

    fn order_by(&self) -> &'static str {
        "first_seen_at ASC"
    }
}

impl BrowsableTable for TracksTable {
    fn schema(&self) -> &'static Table {
        &TRACKS_TABLE
    }

    fn order_by(&self) -> &'static str {
        "first_seen_at DESC, track_id ASC"
    }
}

impl BrowsableTable for PlaysTable {
    fn schema(&self) -> &'static Table {
        &PLAYS_TABLE
    }

    fn order_by(&self) -> &'static str {
        "played_at DESC, id DESC"
    }
}

impl BrowsableTable for IngestionRunsTable {
    fn schema(&self) -> &'static Table {
        &INGESTION_RUNS_TABLE
    }

    fn order_by(&self) -> &'static str {
        "id DESC"
    }
}

pub fn browsable_tables() -> Vec<Box<dyn BrowsableTable>> {
    vec![
        Box::new(ListenersTable),
        Box::new(TracksTable),
        Box::new(PlaysTable),
        Box::new(IngestionRunsTable),
    ]
}
