use rusqlite::{params, Connection};
use skein_core::{now_rfc3339_millis, StoredEvent};
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Error type for event store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Options for [`EventStore::replay`].
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Return only events with seq strictly greater than this. 0 = from the
    /// beginning.
    pub after_seq: u64,
    /// Maximum number of events to return. `None` = the whole tail.
    pub limit: Option<usize>,
}

impl ReplayOptions {
    pub fn after(after_seq: u64) -> Self {
        ReplayOptions {
            after_seq,
            limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// The append-only event journal.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (or create) the store at the given path.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates the schema
    /// if needed. Returns `Err` if integrity_check fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = EventStore { conn };
        store.apply_pragmas()?;
        store.integrity_check()?;
        store.apply_schema()?;
        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = EventStore { conn };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    /// Append a batch of events, assigning seq = head+1..head+N.
    ///
    /// The whole batch commits atomically and shares one timestamp. An empty
    /// batch returns an empty result without touching the store.
    pub fn append(
        &mut self,
        stream_id: &str,
        events: &[serde_json::Value],
    ) -> Result<Vec<StoredEvent<serde_json::Value>>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let tx = self.conn.transaction()?;

        let (head, last_timestamp) = {
            let mut stmt = tx.prepare(
                "SELECT seq, timestamp FROM events WHERE stream_id = ?1
                 ORDER BY seq DESC LIMIT 1",
            )?;
            let mut rows = stmt.query_map(params![stream_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            match rows.next().transpose()? {
                Some((seq, ts)) => (seq as u64, Some(ts)),
                None => (0, None),
            }
        };

        // Wall clocks can step backwards; keep per-stream timestamps
        // non-decreasing (RFC 3339 UTC strings sort lexicographically).
        let mut timestamp = now_rfc3339_millis();
        if let Some(last) = last_timestamp {
            if timestamp < last {
                timestamp = last;
            }
        }

        let mut stored = Vec::with_capacity(events.len());
        {
            let mut insert = tx.prepare(
                "INSERT INTO events (stream_id, seq, timestamp, event)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (offset, event) in events.iter().enumerate() {
                let seq = head + 1 + offset as u64;
                let payload = serde_json::to_string(event)
                    .map_err(|e| StoreError::InvalidData(format!("unserializable event: {e}")))?;
                insert.execute(params![stream_id, seq as i64, timestamp, payload])?;
                stored.push(StoredEvent {
                    seq,
                    timestamp: timestamp.clone(),
                    stream_id: stream_id.to_owned(),
                    event: event.clone(),
                });
            }
        }

        tx.commit()?;
        Ok(stored)
    }

    /// Return events with seq > `after_seq` in ascending seq order, up to
    /// `limit` if provided. Unknown streams yield an empty vec.
    pub fn replay(
        &self,
        stream_id: &str,
        options: &ReplayOptions,
    ) -> Result<Vec<StoredEvent<serde_json::Value>>, StoreError> {
        let limit = options.limit.map_or(-1i64, |n| n as i64);
        let mut stmt = self.conn.prepare(
            "SELECT seq, timestamp, event FROM events
             WHERE stream_id = ?1 AND seq > ?2
             ORDER BY seq ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![stream_id, options.after_seq as i64, limit],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            let (seq, timestamp, payload) = row?;
            let event: serde_json::Value = serde_json::from_str(&payload).map_err(|e| {
                StoreError::InvalidData(format!("corrupt event at seq {seq}: {e}"))
            })?;
            events.push(StoredEvent {
                seq: seq as u64,
                timestamp,
                stream_id: stream_id.to_owned(),
                event,
            });
        }
        Ok(events)
    }

    /// Largest seq for the stream, or 0 if the stream has no events.
    pub fn head(&self, stream_id: &str) -> Result<u64, StoreError> {
        let head: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM events WHERE stream_id = ?1",
            params![stream_id],
            |row| row.get(0),
        )?;
        Ok(head as u64)
    }

    /// Remove all events for the stream. Idempotent.
    pub fn delete(&mut self, stream_id: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM events WHERE stream_id = ?1", params![stream_id])?;
        Ok(())
    }

    /// Distinct stream ids currently holding events.
    pub fn stream_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT stream_id FROM events ORDER BY stream_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn apply_pragmas(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA wal_autocheckpoint=1000;
             PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }

    fn integrity_check(&self) -> Result<(), StoreError> {
        let result: String = self
            .conn
            .pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(StoreError::IntegrityCheckFailed(result));
        }
        Ok(())
    }

    fn apply_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }
}
