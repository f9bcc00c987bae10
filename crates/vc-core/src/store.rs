//! Call record persistence
//!
//! Every store is keyed by call id and overwritten on each write, so readers
//! always see the latest snapshot.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use crate::record::CallRecord;
use crate::{Error, Result};

/// Durable storage for call snapshots
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Write (or overwrite) the snapshot for `record.call_id`
    async fn persist(&self, record: &CallRecord) -> Result<()>;

    /// Load a snapshot by call id
    async fn load(&self, call_id: &str) -> Result<Option<CallRecord>>;

    /// All stored snapshots
    async fn list(&self) -> Result<Vec<CallRecord>>;
}

/// SQLite-backed call store
pub struct SqliteCallStore {
    conn: Mutex<Connection>,
}

impl SqliteCallStore {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS calls (
                call_id TEXT PRIMARY KEY,
                provider_call_id TEXT,
                state TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_calls_provider_call_id ON calls(provider_call_id)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("call store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CallStore for SqliteCallStore {
    async fn persist(&self, record: &CallRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO calls (call_id, provider_call_id, state, record, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.call_id,
                record.provider_call_id,
                record.state.to_string(),
                json,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn load(&self, call_id: &str) -> Result<Option<CallRecord>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM calls WHERE call_id = ?1",
                params![call_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<CallRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT record FROM calls ORDER BY updated_at ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for json in rows {
            let json = json?;
            match serde_json::from_str(&json) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable call snapshot: {}", e),
            }
        }
        Ok(records)
    }
}

/// In-memory call store (for testing)
#[derive(Default)]
pub struct MemoryCallStore {
    records: Mutex<HashMap<String, CallRecord>>,
    writes: Mutex<usize>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `persist` calls seen so far
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or_default()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn persist(&self, record: &CallRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::Store("call store lock poisoned".to_string()))?;
        records.insert(record.call_id.clone(), record.clone());
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
        Ok(())
    }

    async fn load(&self, call_id: &str) -> Result<Option<CallRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| Error::Store("call store lock poisoned".to_string()))?;
        Ok(records.get(call_id).cloned())
    }

    async fn list(&self) -> Result<Vec<CallRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| Error::Store("call store lock poisoned".to_string()))?;
        Ok(records.values().cloned().collect())
    }
}
