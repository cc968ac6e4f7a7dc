use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::now_s;

/// Structured event log. Called once per surfaced event.
pub trait EventSink: Send {
    fn record(&mut self, source: &str, event_type: &str, details: &serde_json::Value) -> Result<()>;
}

/// One row of the structured event log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    /// seconds since epoch
    pub timestamp: u64,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub details: serde_json::Value,
}

pub struct SqliteEventLog {
    conn: Connection,
}

impl SqliteEventLog {
    /// Open (or create) the log at `db_path`. Several writers may open the same file.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(2))?;
        let mut log = Self { conn };
        log.ensure_schema()?;
        Ok(log)
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let mut log = Self {
            conn: Connection::open_in_memory()?,
        };
        log.ensure_schema()?;
        Ok(log)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp INTEGER NOT NULL,
              source TEXT NOT NULL,
              type TEXT NOT NULL,
              details TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            "#,
        )?;
        Ok(())
    }

    /// The `limit` newest events, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, source, type, details FROM events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query(params![limit as i64])?;
        collect_events(rows)
    }

    /// The `limit` newest events of `event_type`, newest first.
    pub fn recent_of_type(&self, event_type: &str, limit: usize) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, source, type, details FROM events
             WHERE type = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query(params![event_type, limit as i64])?;
        collect_events(rows)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn collect_events(mut rows: rusqlite::Rows<'_>) -> Result<Vec<StoredEvent>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let timestamp: i64 = row.get(1)?;
        let details: String = row.get(4)?;
        out.push(StoredEvent {
            id: row.get(0)?,
            timestamp: u64::try_from(timestamp)
                .map_err(|_| anyhow!("negative timestamp in events table"))?,
            source: row.get(2)?,
            event_type: row.get(3)?,
            details: serde_json::from_str(&details)?,
        });
    }
    Ok(out)
}

impl EventSink for SqliteEventLog {
    fn record(&mut self, source: &str, event_type: &str, details: &serde_json::Value) -> Result<()> {
        let timestamp = i64::try_from(now_s()?)
            .map_err(|_| anyhow!("timestamp exceeds i64 range"))?;
        self.conn.execute(
            "INSERT INTO events (timestamp, source, type, details) VALUES (?1, ?2, ?3, ?4)",
            params![timestamp, source, event_type, serde_json::to_string(details)?],
        )?;
        Ok(())
    }
}

/// Shared in-memory log. Clones append to the same list.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventLog {
    events: Arc<Mutex<Vec<StoredEvent>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events, oldest first.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for InMemoryEventLog {
    fn record(&mut self, source: &str, event_type: &str, details: &serde_json::Value) -> Result<()> {
        let timestamp = now_s()?;
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        let id = events.len() as i64 + 1;
        events.push(StoredEvent {
            id,
            timestamp,
            source: source.to_string(),
            event_type: event_type.to_string(),
            details: details.clone(),
        });
        Ok(())
    }
}
