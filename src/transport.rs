//! The wire boundary this crate sits behind: signing, relay connections,
//! and wire decoding are someone else's job. What lives here is the seam
//! [`EntityInliner`](crate::entity_inliner) and
//! [`ExecutionEngine`](crate::execution) call through, plus a simple
//! in-memory double used by tests and examples.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::{Event, EventId};

/// Publish/fetch seam between the engine and the underlying event relay.
///
/// A real implementation signs, serializes, and ships events over whatever
/// wire protocol the deployment uses; this crate never constructs or
/// inspects that wire format directly.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Retrieves a single event by id, if the relay has (and will share) it.
    async fn fetch(&self, id: EventId) -> Result<Option<Event>, EngineError>;

    /// Publishes an event. Intermediate streaming updates are best-effort
    /// (logged and dropped on failure); terminal events are retried by the
    /// caller with bounded backoff.
    async fn publish(&self, event: Event) -> Result<(), EngineError>;
}

/// In-process `Transport` backed by a fixed event set, for tests and demos.
#[derive(Default)]
pub struct MemoryTransport {
    events: dashmap::DashMap<EventId, Event>,
    published: std::sync::Mutex<Vec<Event>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an event as fetchable, as if some peer had already published it.
    pub fn seed(&self, event: Event) {
        self.events.insert(event.id, event);
    }

    /// Snapshot of everything published through this transport, in order.
    pub fn published(&self) -> Vec<Event> {
        self.published.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, id: EventId) -> Result<Option<Event>, EngineError> {
        Ok(self.events.get(&id).map(|e| e.clone()))
    }

    async fn publish(&self, event: Event) -> Result<(), EngineError> {
        self.published.lock().expect("lock poisoned").push(event);
        Ok(())
    }
}
