//! SQLite persistence for session event logs and provider recordings
//!
//! One database file holds both concerns, so a recorded live run and the
//! session that produced it travel together.
//!
//! # Database Schema
//!
//! 1. **events** - Append-only session logs, ordered by `(session_id, position)`
//! 2. **recordings** - One row per recording attempt; only rows with status
//!    `complete` are visible to playback
//! 3. **recording_events** - Raw provider events of a recording, in stream order
//! 4. **schema_version** - Database schema version for migrations
//!
//! Recording events are written one row at a time as they stream in, so a
//! crash mid-call leaves a `recording` row that playback ignores.
//!
//! WAL mode is enabled for file databases so readers do not block the writer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use workflow_engine_sdk::{
    AgentResult, EventId, EventStore, ProviderEvent, Recorder, RecordingEntry, RecordingId, RecordingMeta,
    RecordingSummary, SerializedEvent, SessionId, StoreError,
};

const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed [`EventStore`] and [`Recorder`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::new("open", e))?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::new("open", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::new("open", e))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, for tests and throwaway runs
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::new("open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StoreError::new("open", e))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock("initialize_schema")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                session_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                event_id TEXT NOT NULL,
                name TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                caused_by TEXT,

                PRIMARY KEY (session_id, position)
            );

            CREATE TABLE IF NOT EXISTS recordings (
                id TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                prompt TEXT NOT NULL,
                provider TEXT NOT NULL,
                agent TEXT,
                recorded_at TEXT NOT NULL,

                -- 'recording' while streaming, 'complete' once finalised
                status TEXT NOT NULL DEFAULT 'recording',
                result TEXT,
                finalized_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_recordings_hash ON recordings(hash, status);

            CREATE TABLE IF NOT EXISTS recording_events (
                recording_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                event TEXT NOT NULL,

                PRIMARY KEY (recording_id, sequence),
                FOREIGN KEY(recording_id) REFERENCES recordings(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .map_err(|e| StoreError::new("initialize_schema", e))?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::new("initialize_schema", e))?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        let conn = self.lock("schema_version")?;
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .map_err(|e| StoreError::new("schema_version", e))
    }

    /// Ids of every stored session, most recently started first
    pub fn list_sessions(&self) -> Result<Vec<SessionId>, StoreError> {
        let op = "list_sessions";
        let conn = self.lock(op)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT session_id FROM events
                WHERE position = 0
                ORDER BY timestamp DESC
                "#,
            )
            .map_err(|e| StoreError::new(op, e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::new(op, e))?;

        let mut sessions = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StoreError::new(op, e))?;
            sessions.push(raw.parse().map_err(|e| StoreError::new(op, e))?);
        }
        Ok(sessions)
    }

    fn lock(&self, operation: &str) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::new(operation, "connection lock poisoned"))
    }

    fn recording_stream(conn: &Connection, id: &str) -> Result<Vec<ProviderEvent>, StoreError> {
        let op = "load";
        let mut stmt = conn
            .prepare("SELECT event FROM recording_events WHERE recording_id = ?1 ORDER BY sequence ASC")
            .map_err(|e| StoreError::new(op, e))?;
        let rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::new(op, e))?;

        let mut stream = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StoreError::new(op, e))?;
            stream.push(serde_json::from_str(&raw).map_err(|e| StoreError::new(op, e))?);
        }
        Ok(stream)
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn append(&self, session_id: &SessionId, event: &SerializedEvent) -> Result<(), StoreError> {
        let op = "append";
        let payload = serde_json::to_string(&event.payload).map_err(|e| StoreError::new(op, e))?;

        let mut conn = self.lock(op)?;
        let tx = conn.transaction().map_err(|e| StoreError::new(op, e))?;
        tx.execute(
            r#"
            INSERT INTO events (session_id, position, event_id, name, payload, timestamp, caused_by)
            SELECT ?1, COALESCE(MAX(position) + 1, 0), ?2, ?3, ?4, ?5, ?6
            FROM events WHERE session_id = ?1
            "#,
            params![
                session_id.to_string(),
                event.id.to_string(),
                event.name,
                payload,
                event.timestamp.to_rfc3339(),
                event.caused_by.map(|id| id.to_string()),
            ],
        )
        .map_err(|e| StoreError::new(op, e))?;
        tx.commit().map_err(|e| StoreError::new(op, e))?;
        Ok(())
    }

    async fn read(&self, session_id: &SessionId) -> Result<Vec<SerializedEvent>, StoreError> {
        let op = "read";
        let conn = self.lock(op)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT event_id, name, payload, timestamp, caused_by
                FROM events
                WHERE session_id = ?1
                ORDER BY position ASC
                "#,
            )
            .map_err(|e| StoreError::new(op, e))?;
        let rows = stmt
            .query_map(params![session_id.to_string()], map_event_row)
            .map_err(|e| StoreError::new(op, e))?;

        let mut events = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StoreError::new(op, e))?;
            events.push(raw.into_event()?);
        }
        Ok(events)
    }
}

#[async_trait]
impl Recorder for SqliteStore {
    async fn load(&self, hash: &str) -> Result<Option<RecordingEntry>, StoreError> {
        let op = "load";
        let conn = self.lock(op)?;
        let row = conn
            .query_row(
                r#"
                SELECT id, prompt, provider, agent, recorded_at, result
                FROM recordings
                WHERE hash = ?1 AND status = 'complete'
                ORDER BY finalized_at DESC
                LIMIT 1
                "#,
                params![hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StoreError::new(op, e))?;

        let Some((id, prompt, provider, agent, recorded_at, result)) = row else {
            return Ok(None);
        };
        let result = result.ok_or_else(|| StoreError::new(op, format!("recording {} has no result", id)))?;
        let result: AgentResult = serde_json::from_str(&result).map_err(|e| StoreError::new(op, e))?;

        Ok(Some(RecordingEntry {
            hash: hash.to_string(),
            meta: RecordingMeta {
                prompt,
                provider,
                agent,
                recorded_at: parse_timestamp(op, &recorded_at)?,
            },
            stream: Self::recording_stream(&conn, &id)?,
            result,
        }))
    }

    async fn start_recording(&self, hash: &str, meta: RecordingMeta) -> Result<RecordingId, StoreError> {
        let op = "start_recording";
        let id = RecordingId::new();
        let conn = self.lock(op)?;
        conn.execute(
            r#"
            INSERT INTO recordings (id, hash, prompt, provider, agent, recorded_at, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'recording')
            "#,
            params![
                id.as_str(),
                hash,
                meta.prompt,
                meta.provider,
                meta.agent,
                meta.recorded_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::new(op, e))?;
        debug!(recording_id = %id, hash, "Recording started");
        Ok(id)
    }

    async fn append_event(&self, id: &RecordingId, event: &ProviderEvent) -> Result<(), StoreError> {
        let op = "append_event";
        let raw = serde_json::to_string(event).map_err(|e| StoreError::new(op, e))?;
        let conn = self.lock(op)?;
        conn.execute(
            r#"
            INSERT INTO recording_events (recording_id, sequence, event)
            SELECT ?1, COALESCE(MAX(sequence) + 1, 0), ?2
            FROM recording_events WHERE recording_id = ?1
            "#,
            params![id.as_str(), raw],
        )
        .map_err(|e| StoreError::new(op, e))?;
        Ok(())
    }

    async fn finalize_recording(&self, id: &RecordingId, result: &AgentResult) -> Result<(), StoreError> {
        let op = "finalize_recording";
        let raw = serde_json::to_string(result).map_err(|e| StoreError::new(op, e))?;

        let mut conn = self.lock(op)?;
        let tx = conn.transaction().map_err(|e| StoreError::new(op, e))?;
        let hash: String = tx
            .query_row(
                "SELECT hash FROM recordings WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::new(op, e))?
            .ok_or_else(|| StoreError::new(op, format!("unknown recording {}", id)))?;

        // Last finalisation wins
        tx.execute(
            "DELETE FROM recordings WHERE hash = ?1 AND status = 'complete' AND id != ?2",
            params![hash, id.as_str()],
        )
        .map_err(|e| StoreError::new(op, e))?;
        tx.execute(
            r#"
            UPDATE recordings
            SET status = 'complete', result = ?1, finalized_at = ?2
            WHERE id = ?3
            "#,
            params![raw, Utc::now().to_rfc3339(), id.as_str()],
        )
        .map_err(|e| StoreError::new(op, e))?;
        tx.commit().map_err(|e| StoreError::new(op, e))?;

        debug!(recording_id = %id, hash = %hash, "Recording finalized");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RecordingSummary>, StoreError> {
        let op = "list";
        let conn = self.lock(op)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT r.hash, r.prompt, r.provider, r.agent, r.recorded_at,
                       (SELECT COUNT(*) FROM recording_events e WHERE e.recording_id = r.id)
                FROM recordings r
                WHERE r.status = 'complete'
                ORDER BY r.recorded_at DESC
                "#,
            )
            .map_err(|e| StoreError::new(op, e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(|e| StoreError::new(op, e))?;

        let mut summaries = Vec::new();
        for row in rows {
            let (hash, prompt, provider, agent, recorded_at, count) = row.map_err(|e| StoreError::new(op, e))?;
            summaries.push(RecordingSummary {
                hash,
                meta: RecordingMeta {
                    prompt,
                    provider,
                    agent,
                    recorded_at: parse_timestamp(op, &recorded_at)?,
                },
                event_count: usize::try_from(count).unwrap_or(0),
            });
        }
        Ok(summaries)
    }

    async fn delete(&self, hash: &str) -> Result<bool, StoreError> {
        let op = "delete";
        let conn = self.lock(op)?;
        let deleted = conn
            .execute("DELETE FROM recordings WHERE hash = ?1", params![hash])
            .map_err(|e| StoreError::new(op, e))?;
        Ok(deleted > 0)
    }
}

/// Raw `events` row before parsing
struct EventRow {
    id: String,
    name: String,
    payload: String,
    timestamp: String,
    caused_by: Option<String>,
}

impl EventRow {
    fn into_event(self) -> Result<SerializedEvent, StoreError> {
        let op = "read";
        let id: EventId = self.id.parse().map_err(|e| StoreError::new(op, e))?;
        let caused_by = self
            .caused_by
            .map(|raw| raw.parse::<EventId>())
            .transpose()
            .map_err(|e| StoreError::new(op, e))?;
        Ok(SerializedEvent {
            id,
            name: self.name,
            payload: serde_json::from_str(&self.payload).map_err(|e| StoreError::new(op, e))?,
            timestamp: parse_timestamp(op, &self.timestamp)?,
            caused_by,
        })
    }
}

fn map_event_row(row: &Row) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        name: row.get(1)?,
        payload: row.get(2)?,
        timestamp: row.get(3)?,
        caused_by: row.get(4)?,
    })
}

fn parse_timestamp(operation: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::new(operation, e))
}
