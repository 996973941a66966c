//! `TodoItem`. CRUD/safety logic lives in [`crate::todo`].

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TodoStatus,
    /// Required iff `status == Skipped`.
    pub skip_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TodoItem {
    /// `true` when the skip-reason invariant holds for this item in
    /// isolation (doesn't check list-level id uniqueness).
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            TodoStatus::Skipped => self.skip_reason.as_deref().is_some_and(|s| !s.is_empty()),
            _ => true,
        }
    }
}
