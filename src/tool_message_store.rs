//! Durable store of the full message payload a tool call produced, keyed
//! by the event id of its tool-result event.
//!
//! One writer per id, append-only; subsequent reads are always safe. The
//! SQLite-backed adapter follows the same `spawn_blocking`-wrapped-
//! connection shape used for persistence elsewhere in this crate.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::Connection;
use tokio::task::spawn_blocking;

use crate::error::EngineError;
use crate::model::{EventId, Message};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tool_messages (
    event_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL
);
";

#[async_trait]
pub trait ToolMessageStore: Send + Sync {
    /// Stores the full message payload for `event_id`. Called at most once
    /// per id by contract; a second call for the same id overwrites.
    async fn put(&self, event_id: EventId, messages: Vec<Message>) -> Result<(), EngineError>;

    /// Loads the payload stored for `event_id`, if any.
    async fn get(&self, event_id: EventId) -> Result<Option<Vec<Message>>, EngineError>;
}

/// In-memory store, for tests and single-process deployments without
/// persistence.
#[derive(Default)]
pub struct MemoryToolMessageStore {
    entries: DashMap<EventId, Vec<Message>>,
}

impl MemoryToolMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolMessageStore for MemoryToolMessageStore {
    async fn put(&self, event_id: EventId, messages: Vec<Message>) -> Result<(), EngineError> {
        self.entries.insert(event_id, messages);
        Ok(())
    }

    async fn get(&self, event_id: EventId) -> Result<Option<Vec<Message>>, EngineError> {
        Ok(self.entries.get(&event_id).map(|m| m.clone()))
    }
}

/// SQLite-backed store. The connection is wrapped in a `Mutex` (rusqlite's
/// `Connection` is not `Sync`) and all access happens inside
/// `spawn_blocking`.
pub struct SqliteToolMessageStore {
    conn: Arc<StdMutex<Connection>>,
    path: PathBuf,
}

impl SqliteToolMessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .map_err(|e| EngineError::System(format!("opening tool message store at {}: {e}", path.display())))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| EngineError::System(format!("initializing tool message store schema: {e}")))?;
        Ok(SqliteToolMessageStore { conn: Arc::new(StdMutex::new(conn)), path })
    }
}

#[async_trait]
impl ToolMessageStore for SqliteToolMessageStore {
    async fn put(&self, event_id: EventId, messages: Vec<Message>) -> Result<(), EngineError> {
        let conn = self.conn.clone();
        let path = self.path.clone();
        let payload = serde_json::to_string(&messages)
            .map_err(|e| EngineError::System(format!("serializing tool messages: {e}")))?;
        let id_hex = event_id.to_hex();

        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "tool message store mutex poisoned, recovering");
                poisoned.into_inner()
            });
            guard
                .execute(
                    "INSERT INTO tool_messages (event_id, payload) VALUES (?1, ?2)
                     ON CONFLICT(event_id) DO UPDATE SET payload = excluded.payload",
                    rusqlite::params![id_hex, payload],
                )
                .map_err(|e| EngineError::System(format!("writing tool message: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::System(format!("tool message store task panicked: {e}")))?
    }

    async fn get(&self, event_id: EventId) -> Result<Option<Vec<Message>>, EngineError> {
        let conn = self.conn.clone();
        let id_hex = event_id.to_hex();

        let payload: Option<String> = spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard
                .query_row(
                    "SELECT payload FROM tool_messages WHERE event_id = ?1",
                    rusqlite::params![id_hex],
                    |row| row.get(0),
                )
                .ok()
        })
        .await
        .map_err(|e| EngineError::System(format!("tool message store task panicked: {e}")))?;

        match payload {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| EngineError::System(format!("deserializing tool messages: {e}"))),
        }
    }
}
