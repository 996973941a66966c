//! Conversation, AgentState, and the per-agent execution-time tracker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::event::{Event, EventId, Pubkey};
use crate::model::todo::TodoItem;

/// Agent slug: a short, stable, human-meaningful identifier for an agent
/// within a project (distinct from its `Pubkey`, which is the transport
/// identity). Role assignment and display keys off slugs; delegation
/// correlation keys off pubkeys.
pub type AgentSlug = String;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTime {
    pub total_seconds: f64,
    pub is_active: bool,
    pub last_updated: i64,
}

/// Per conversation, per agent mutable state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub last_processed_message_index: usize,
    pub last_seen_phase: Option<String>,
    pub sessions_by_phase: HashMap<String, String>,
    pub scratch: HashMap<String, serde_json::Value>,
}

/// Recorded once per `ConversationStore::update_phase` call, appended to
/// an internal audit list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Option<String>,
    pub to: String,
    pub reason: String,
    pub actor: Pubkey,
    pub actor_name: String,
    pub at: i64,
}

/// The authoritative state of one conversation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub phase: Option<String>,
    pub history: Vec<Event>,
    #[serde(skip)]
    position_index: HashMap<EventId, usize>,
    pub agent_states: HashMap<AgentSlug, AgentState>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub execution_time: ExecutionTime,
    pub todos_by_agent: HashMap<String, Vec<TodoItem>>,
    pub phase_history: Vec<PhaseTransition>,
    /// Ids already observed via `upsert_event`, for idempotent dedup and for
    /// persistence's `processed_event_ids`.
    #[serde(skip)]
    seen_ids: std::collections::HashSet<EventId>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Conversation {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Appends `event` to history if its id is new. Idempotent on
    /// duplicates.
    pub fn upsert_event(&mut self, event: Event) -> bool {
        if self.seen_ids.contains(&event.id) {
            return false;
        }
        self.seen_ids.insert(event.id);
        self.position_index.insert(event.id, self.history.len());
        self.history.push(event);
        true
    }

    pub fn position_of(&self, id: EventId) -> Option<usize> {
        self.position_index.get(&id).copied()
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.position_of(id).map(|i| &self.history[i])
    }

    pub fn agent_state(&self, slug: &str) -> AgentState {
        self.agent_states.get(slug).cloned().unwrap_or_default()
    }

    pub fn processed_event_ids(&self) -> Vec<EventId> {
        self.seen_ids.iter().copied().collect()
    }

    /// Rebuilds the position index from `history` after a deserializing
    /// persistence load. Round-tripping must preserve order.
    pub fn reindex(&mut self) {
        self.position_index.clear();
        self.seen_ids.clear();
        for (i, e) in self.history.iter().enumerate() {
            self.position_index.insert(e.id, i);
            self.seen_ids.insert(e.id);
        }
    }
}
