//! `DelegationRecord`: the bookkeeping behind one delegation barrier.
//! [`crate::delegation::DelegationRegistry`] owns the mutable registry of
//! these; this module just defines the record shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::event::{Event, Pubkey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Complete,
    TimedOut,
    Cancelled,
}

impl DelegationStatus {
    /// Once a delegation leaves `Pending` it never returns: a delegation's
    /// status transitions at most once away from pending.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DelegationStatus::Pending)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegation_id: String,
    pub delegating_agent: Pubkey,
    /// Non-empty by construction; [`crate::delegation::DelegationRegistry::register`]
    /// rejects an empty target set.
    pub targets: Vec<Pubkey>,
    pub original_request: String,
    pub started_at: i64,
    pub timeout_at: i64,
    pub responses: HashMap<Pubkey, Event>,
    pub status: DelegationStatus,
}

impl DelegationRecord {
    pub fn new(
        delegation_id: impl Into<String>,
        delegating_agent: Pubkey,
        targets: Vec<Pubkey>,
        original_request: impl Into<String>,
        started_at: i64,
        timeout_at: i64,
    ) -> Self {
        DelegationRecord {
            delegation_id: delegation_id.into(),
            delegating_agent,
            targets,
            original_request: original_request.into(),
            started_at,
            timeout_at,
            responses: HashMap::new(),
            status: DelegationStatus::Pending,
        }
    }

    /// `true` once every target has a recorded response.
    pub fn is_satisfied(&self) -> bool {
        self.targets.iter().all(|t| self.responses.contains_key(t))
    }

    pub fn missing_targets(&self) -> Vec<Pubkey> {
        self.targets
            .iter()
            .copied()
            .filter(|t| !self.responses.contains_key(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::{EventId, EventKind};

    fn resp(id: &str, author: &str) -> Event {
        Event::new(
            EventId::from_label(id),
            Pubkey::from_label(author),
            0,
            EventKind::Message,
            "done",
            vec![],
        )
    }

    #[test]
    fn is_satisfied_requires_every_target_to_have_responded() {
        let mut rec = DelegationRecord::new(
            "d1",
            Pubkey::from_label("orchestrator"),
            vec![Pubkey::from_label("A"), Pubkey::from_label("B")],
            "go",
            0,
            1000,
        );
        assert!(!rec.is_satisfied());
        rec.responses.insert(Pubkey::from_label("A"), resp("r1", "A"));
        assert!(!rec.is_satisfied());
        rec.responses.insert(Pubkey::from_label("B"), resp("r2", "B"));
        assert!(rec.is_satisfied());
        assert!(rec.missing_targets().is_empty());
    }

    #[test]
    fn terminal_statuses_never_include_pending() {
        assert!(!DelegationStatus::Pending.is_terminal());
        assert!(DelegationStatus::Complete.is_terminal());
        assert!(DelegationStatus::TimedOut.is_terminal());
        assert!(DelegationStatus::Cancelled.is_terminal());
    }
}
