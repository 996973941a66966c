//! `ConversationStore`: the in-memory map of conversation id to
//! [`Conversation`], backed by a write-behind persistence adapter.
//!
//! Each conversation is a serial-access unit: concurrent readers may
//! observe any committed state, writers are serialized per conversation id
//! via a `tokio::sync::Mutex` held inside a `DashMap` entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::model::{AgentState, Conversation, EventId, Pubkey, TodoItem};

/// What gets written to durable storage for one conversation. Mirrors
/// [`Conversation`] with two extra fields so that a restart resumes
/// correctly: `processed_event_ids` and
/// `last_processed_index` (the latter recorded per agent, since each agent
/// progresses through history independently).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ConversationSnapshot {
    pub conversation: Conversation,
    pub processed_event_ids: Vec<EventId>,
    pub last_processed_index_by_agent: HashMap<String, usize>,
}

/// Durable storage seam. Implementations own how/where snapshots live;
/// this crate ships in-memory and SQLite-backed ones.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn initialize(&self) -> Result<(), EngineError>;
    async fn save(&self, conversation_id: &str, snapshot: &ConversationSnapshot) -> Result<(), EngineError>;
    async fn list(&self) -> Result<Vec<String>, EngineError>;
    /// `None` when no snapshot has ever been saved for `conversation_id`.
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationSnapshot>, EngineError>;
}

/// In-memory adapter, for tests and deployments without durability.
#[derive(Default)]
pub struct MemoryPersistenceAdapter {
    snapshots: dashmap::DashMap<String, ConversationSnapshot>,
}

impl MemoryPersistenceAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistenceAdapter {
    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn save(&self, conversation_id: &str, snapshot: &ConversationSnapshot) -> Result<(), EngineError> {
        self.snapshots.insert(conversation_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.snapshots.iter().map(|e| e.key().clone()).collect())
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationSnapshot>, EngineError> {
        Ok(self.snapshots.get(conversation_id).map(|e| e.clone()))
    }
}

/// SQLite-backed adapter. One row per conversation, snapshot serialized as
/// JSON; same `spawn_blocking`-wrapped-connection shape as
/// [`crate::tool_message_store::SqliteToolMessageStore`].
pub struct SqlitePersistenceAdapter {
    conn: Arc<std::sync::Mutex<rusqlite::Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    snapshot TEXT NOT NULL
);
";

impl SqlitePersistenceAdapter {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, EngineError> {
        let conn = rusqlite::Connection::open(path.as_ref())
            .map_err(|e| EngineError::System(format!("opening conversation store: {e}")))?;
        Ok(SqlitePersistenceAdapter { conn: Arc::new(std::sync::Mutex::new(conn)) })
    }
}

#[async_trait]
impl PersistenceAdapter for SqlitePersistenceAdapter {
    async fn initialize(&self) -> Result<(), EngineError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .unwrap_or_else(|p| p.into_inner())
                .execute_batch(SCHEMA)
                .map_err(|e| EngineError::System(format!("initializing conversation store schema: {e}")))
        })
        .await
        .map_err(|e| EngineError::System(format!("initialize task panicked: {e}")))?
    }

    async fn save(&self, conversation_id: &str, snapshot: &ConversationSnapshot) -> Result<(), EngineError> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        let payload = serde_json::to_string(snapshot).map_err(|e| EngineError::System(format!("serializing snapshot: {e}")))?;
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .unwrap_or_else(|p| p.into_inner())
                .execute(
                    "INSERT INTO conversations (conversation_id, snapshot) VALUES (?1, ?2)
                     ON CONFLICT(conversation_id) DO UPDATE SET snapshot = excluded.snapshot",
                    rusqlite::params![conversation_id, payload],
                )
                .map_err(|e| EngineError::System(format!("saving conversation snapshot: {e}")))
        })
        .await
        .map_err(|e| EngineError::System(format!("save task panicked: {e}")))??;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, EngineError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            let mut stmt = guard
                .prepare("SELECT conversation_id FROM conversations")
                .map_err(|e| EngineError::System(format!("listing conversations: {e}")))?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| EngineError::System(format!("listing conversations: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EngineError::System(format!("listing conversations: {e}")))?;
            Ok(ids)
        })
        .await
        .map_err(|e| EngineError::System(format!("list task panicked: {e}")))?
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationSnapshot>, EngineError> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        let payload: Option<String> = tokio::task::spawn_blocking(move || {
            conn.lock()
                .unwrap_or_else(|p| p.into_inner())
                .query_row(
                    "SELECT snapshot FROM conversations WHERE conversation_id = ?1",
                    rusqlite::params![conversation_id],
                    |row| row.get(0),
                )
                .ok()
        })
        .await
        .map_err(|e| EngineError::System(format!("load task panicked: {e}")))?;

        match payload {
            None => Ok(None),
            Some(json) => {
                serde_json::from_str(&json).map(Some).map_err(|e| EngineError::System(format!("deserializing snapshot: {e}")))
            }
        }
    }
}

/// The in-memory map plus write-behind persistence hook.
pub struct ConversationStore {
    conversations: dashmap::DashMap<String, Arc<Mutex<Conversation>>>,
    persistence: Arc<dyn PersistenceAdapter>,
}

impl ConversationStore {
    pub fn new(persistence: Arc<dyn PersistenceAdapter>) -> Self {
        ConversationStore { conversations: dashmap::DashMap::new(), persistence }
    }

    async fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<Conversation>> {
        self.conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::new(conversation_id, conversation_id))))
            .clone()
    }

    /// Appends to `conversation_id`'s history if `event`'s id is new, then
    /// writes through to persistence. Idempotent on duplicate ids.
    pub async fn upsert_event(&self, conversation_id: &str, event: crate::model::Event) -> Result<bool, EngineError> {
        let lock = self.lock_for(conversation_id).await;
        let mut conversation = lock.lock().await;
        let inserted = conversation.upsert_event(event);
        if inserted {
            self.persist_locked(conversation_id, &conversation).await?;
        }
        Ok(inserted)
    }

    /// Returns a clone of the current conversation state, if it exists.
    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        let entry = self.conversations.get(conversation_id)?.clone();
        Some(entry.lock().await.clone())
    }

    /// Applies `delta` to `agent_slug`'s state under the per-conversation
    /// lock.
    pub async fn update_agent_state(
        &self,
        conversation_id: &str,
        agent_slug: &str,
        delta: impl FnOnce(&mut AgentState),
    ) -> Result<(), EngineError> {
        let lock = self.lock_for(conversation_id).await;
        let mut conversation = lock.lock().await;
        let mut state = conversation.agent_state(agent_slug);
        delta(&mut state);
        conversation.agent_states.insert(agent_slug.to_string(), state);
        self.persist_locked(conversation_id, &conversation).await
    }

    /// Updates `phase` and appends an audit entry.
    pub async fn update_phase(
        &self,
        conversation_id: &str,
        phase: impl Into<String>,
        reason: impl Into<String>,
        actor: Pubkey,
        actor_name: impl Into<String>,
        at: i64,
    ) -> Result<(), EngineError> {
        let lock = self.lock_for(conversation_id).await;
        let mut conversation = lock.lock().await;
        let phase = phase.into();
        let from = conversation.phase.clone();
        conversation.phase = Some(phase.clone());
        conversation.phase_history.push(crate::model::PhaseTransition {
            from,
            to: phase,
            reason: reason.into(),
            actor,
            actor_name: actor_name.into(),
            at,
        });
        self.persist_locked(conversation_id, &conversation).await
    }

    /// Merges `delta` into `metadata`.
    pub async fn update_metadata(&self, conversation_id: &str, delta: HashMap<String, serde_json::Value>) -> Result<(), EngineError> {
        let lock = self.lock_for(conversation_id).await;
        let mut conversation = lock.lock().await;
        conversation.metadata.extend(delta);
        self.persist_locked(conversation_id, &conversation).await
    }

    pub async fn get_todos(&self, conversation_id: &str, agent_pubkey: Pubkey) -> Vec<TodoItem> {
        let Some(entry) = self.conversations.get(conversation_id) else {
            return Vec::new();
        };
        let conversation = entry.lock().await;
        conversation.todos_by_agent.get(&agent_pubkey.to_hex()).cloned().unwrap_or_default()
    }

    pub async fn set_todos(&self, conversation_id: &str, agent_pubkey: Pubkey, items: Vec<TodoItem>) -> Result<(), EngineError> {
        let lock = self.lock_for(conversation_id).await;
        let mut conversation = lock.lock().await;
        conversation.todos_by_agent.insert(agent_pubkey.to_hex(), items);
        self.persist_locked(conversation_id, &conversation).await
    }

    /// Marks `conversation_id` as actively executing, for `ExecutionEngine`
    /// to call at the start of a turn. Idempotent: calling it while already
    /// active just bumps `last_updated`.
    pub async fn start_execution_timing(&self, conversation_id: &str) -> Result<(), EngineError> {
        let lock = self.lock_for(conversation_id).await;
        let mut conversation = lock.lock().await;
        conversation.execution_time.is_active = true;
        conversation.execution_time.last_updated = crate::model::event::now_seconds();
        self.persist_locked(conversation_id, &conversation).await
    }

    /// Accrues elapsed time since the last `start`/`stop` into
    /// `total_seconds` and clears `is_active`. A no-op if timing wasn't
    /// active (already stopped, or never started).
    pub async fn stop_execution_timing(&self, conversation_id: &str) -> Result<(), EngineError> {
        let lock = self.lock_for(conversation_id).await;
        let mut conversation = lock.lock().await;
        if conversation.execution_time.is_active {
            let now = crate::model::event::now_seconds();
            let elapsed = (now - conversation.execution_time.last_updated).max(0) as f64;
            conversation.execution_time.total_seconds += elapsed;
            conversation.execution_time.last_updated = now;
            conversation.execution_time.is_active = false;
        }
        self.persist_locked(conversation_id, &conversation).await
    }

    /// Substring match over title and id; implementation is otherwise free.
    pub fn search(&self, query: &str) -> Vec<String> {
        let needle = query.to_lowercase();
        self.conversations
            .iter()
            .filter(|e| e.key().to_lowercase().contains(&needle))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Loads every conversation the persistence adapter knows about into
    /// memory, restoring `processed_event_ids` via `Conversation::reindex`.
    pub async fn restore(&self) -> Result<(), EngineError> {
        self.persistence.initialize().await?;
        for id in self.persistence.list().await? {
            if let Some(snapshot) = self.persistence.load(&id).await? {
                let mut conversation = snapshot.conversation;
                conversation.reindex();
                self.conversations.insert(id, Arc::new(Mutex::new(conversation)));
            }
        }
        Ok(())
    }

    async fn persist_locked(&self, conversation_id: &str, conversation: &Conversation) -> Result<(), EngineError> {
        let snapshot = ConversationSnapshot {
            conversation: conversation.clone(),
            processed_event_ids: conversation.processed_event_ids(),
            last_processed_index_by_agent: conversation
                .agent_states
                .iter()
                .map(|(slug, state)| (slug.clone(), state.last_processed_message_index))
                .collect(),
        };
        self.persistence.save(conversation_id, &snapshot).await
    }
}
