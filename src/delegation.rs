//! Tracks outbound delegations and resumes the delegating agent exactly
//! once all targets have responded, timed out, or been cancelled.
//!
//! Each delegation tracks a fixed set of expected responders and becomes
//! resolvable only once every one of them has been seen, once a timeout
//! elapses, or on administrative cancellation — and must resume its waiter
//! exactly once however it resolves.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::error::EngineError;
use crate::model::{DelegationRecord, DelegationStatus, Event, Pubkey};

/// What `register` hands back: the id to correlate responses against, and
/// a receiver that resolves exactly once the delegation reaches a terminal
/// state.
pub struct Registered {
    pub delegation_id: String,
    pub resolution: oneshot::Receiver<HashMap<Pubkey, Event>>,
}

struct Entry {
    record: Mutex<DelegationRecord>,
    resume: Mutex<Option<oneshot::Sender<HashMap<Pubkey, Event>>>>,
}

/// Registry of in-flight delegations, keyed by id, with a secondary index
/// for `O(1)` lookup from RoleAssigner's `(conversation, viewer, author)`
/// branch-2 check.
#[derive(Default)]
pub struct DelegationRegistry {
    entries: dashmap::DashMap<String, Arc<Entry>>,
    by_correlation: dashmap::DashMap<(String, Pubkey, Pubkey), String>,
}

impl DelegationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending record for `delegating_agent` fanning out to
    /// `targets`. `targets` must be non-empty.
    pub fn register(
        &self,
        conversation_id: impl Into<String>,
        delegating_agent: Pubkey,
        targets: Vec<Pubkey>,
        original_request: impl Into<String>,
        started_at: i64,
        timeout_at: i64,
    ) -> Result<Registered, EngineError> {
        if targets.is_empty() {
            return Err(EngineError::validation("targets", "a delegation must target at least one agent"));
        }

        let conversation_id = conversation_id.into();
        let delegation_id = format!(
            "{}:{}:{}",
            conversation_id,
            delegating_agent.to_hex(),
            started_at
        );

        let record = DelegationRecord::new(
            delegation_id.clone(),
            delegating_agent,
            targets.clone(),
            original_request,
            started_at,
            timeout_at,
        );

        let (tx, rx) = oneshot::channel();
        let entry = Arc::new(Entry {
            record: Mutex::new(record),
            resume: Mutex::new(Some(tx)),
        });
        self.entries.insert(delegation_id.clone(), entry);

        for target in targets {
            self.by_correlation
                .insert((conversation_id.clone(), delegating_agent, target), delegation_id.clone());
        }

        Ok(Registered { delegation_id, resolution: rx })
    }

    /// `true` iff a pending delegation exists keyed by
    /// `(conversation_id, delegating_agent, responding_agent)` — the lookup
    /// RoleAssigner's branch 2 needs.
    pub async fn has_pending(&self, conversation_id: &str, delegating_agent: Pubkey, responding_agent: Pubkey) -> bool {
        let Some(delegation_id) = self
            .by_correlation
            .get(&(conversation_id.to_string(), delegating_agent, responding_agent))
            .map(|e| e.clone())
        else {
            return false;
        };
        let Some(entry) = self.entries.get(&delegation_id).map(|e| e.clone()) else {
            return false;
        };
        entry.record.lock().await.status == DelegationStatus::Pending
    }

    /// Records a response from `from_agent`. If this completes the target
    /// set, transitions to `complete` and fires the resume hook exactly
    /// once. A response from an agent outside the target set, or for an
    /// unknown/non-pending delegation, is a no-op (returns the record's
    /// current status, or `None` if the id is unknown). A second response
    /// from a target that has already answered is ignored with a warning —
    /// first-response-wins per target.
    pub async fn record_response(&self, delegation_id: &str, from_agent: Pubkey, event: Event) -> Option<DelegationStatus> {
        let entry = self.entries.get(delegation_id).map(|e| e.clone())?;
        let mut record = entry.record.lock().await;
        if record.status != DelegationStatus::Pending || !record.targets.contains(&from_agent) {
            return Some(record.status);
        }
        if record.responses.contains_key(&from_agent) {
            tracing::warn!(delegation_id, author = %from_agent.to_hex(), "ignoring extra delegation response from a target that already answered");
            return Some(record.status);
        }
        record.responses.insert(from_agent, event);
        if record.is_satisfied() {
            record.status = DelegationStatus::Complete;
            let responses = record.responses.clone();
            drop(record);
            Self::fire_resume(&entry, responses).await;
        }
        Some(DelegationStatus::Pending)
    }

    /// Resolves a pending delegation with whatever responses exist, if
    /// `now >= timeout_at`. Transitions pending→timed-out and resumes the
    /// waiter with the partial response set.
    pub async fn timeout(&self, delegation_id: &str, now: i64) -> Option<DelegationStatus> {
        let entry = self.entries.get(delegation_id).map(|e| e.clone())?;
        let mut record = entry.record.lock().await;
        if record.status != DelegationStatus::Pending || now < record.timeout_at {
            return Some(record.status);
        }
        record.status = DelegationStatus::TimedOut;
        let responses = record.responses.clone();
        drop(record);
        Self::fire_resume(&entry, responses).await;
        Some(DelegationStatus::TimedOut)
    }

    /// Administrative cancellation. Never fires the resume hook.
    pub async fn cancel(&self, delegation_id: &str) -> Option<DelegationStatus> {
        let entry = self.entries.get(delegation_id).map(|e| e.clone())?;
        let mut record = entry.record.lock().await;
        if record.status != DelegationStatus::Pending {
            return Some(record.status);
        }
        record.status = DelegationStatus::Cancelled;
        *entry.resume.lock().await = None;
        Some(DelegationStatus::Cancelled)
    }

    async fn fire_resume(entry: &Entry, responses: HashMap<Pubkey, Event>) {
        if let Some(tx) = entry.resume.lock().await.take() {
            let _ = tx.send(responses);
        }
    }

    /// Snapshot of all delegation ids currently pending, for a scheduler
    /// deciding which to sweep for timeout.
    pub fn pending_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.record.try_lock().map(|r| r.status == DelegationStatus::Pending).unwrap_or(false))
            .map(|e| e.key().clone())
            .collect()
    }
}
