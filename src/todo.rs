//! Write-todos CRUD/safety logic over [`TodoItem`] lists.
//!
//! This module is pure bookkeeping; [`crate::store::ConversationStore`]
//! owns the actual per-conversation, per-agent list it operates on.

use std::collections::HashSet;

use crate::error::EngineError;
use crate::model::todo::{TodoItem, TodoStatus};

/// Validates and merges `new_items` against `existing`, returning the list
/// to persist. Rejects (without side effects) if:
/// - `new_items` contains duplicate ids,
/// - any new item is `skipped` with an empty `skip_reason`,
/// - dropping ids present in `existing` but missing from `new_items`
///   would lose them, and `force` is false.
///
/// Surviving items preserve `created_at` (and `description`, when the new
/// item leaves it unset) from the existing item sharing their id;
/// `updated_at` only changes when `status` changes.
pub fn write_todos(existing: &[TodoItem], new_items: Vec<TodoItem>, force: bool, now: i64) -> Result<Vec<TodoItem>, EngineError> {
    let mut seen_ids = HashSet::with_capacity(new_items.len());
    for item in &new_items {
        if !seen_ids.insert(item.id.clone()) {
            return Err(EngineError::validation("newItems", format!("duplicate id `{}`", item.id)));
        }
        if item.status == TodoStatus::Skipped && item.skip_reason.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::validation("skipReason", format!("item `{}` is skipped but has no reason", item.id)));
        }
    }

    let existing_ids: HashSet<&str> = existing.iter().map(|i| i.id.as_str()).collect();
    let new_ids: HashSet<&str> = new_items.iter().map(|i| i.id.as_str()).collect();
    let missing: Vec<&str> = existing_ids.difference(&new_ids).copied().collect();
    if !missing.is_empty() && !force {
        let mut missing_sorted = missing.clone();
        missing_sorted.sort_unstable();
        return Err(EngineError::validation(
            "newItems",
            format!("would drop existing ids without force: {}", missing_sorted.join(", ")),
        ));
    }

    let merged = new_items
        .into_iter()
        .map(|mut item| {
            if let Some(prior) = existing.iter().find(|e| e.id == item.id) {
                item.created_at = prior.created_at;
                if item.description.is_none() {
                    item.description = prior.description.clone();
                }
                item.updated_at = if item.status == prior.status { prior.updated_at } else { now };
            } else {
                item.created_at = now;
                item.updated_at = now;
            }
            item
        })
        .collect();

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, status: TodoStatus, description: Option<&str>) -> TodoItem {
        TodoItem {
            id: id.into(),
            title: "a todo".into(),
            description: description.map(String::from),
            status,
            skip_reason: if status == TodoStatus::Skipped { Some("blocked".into()) } else { None },
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn rejects_duplicate_ids_in_new_items() {
        let err = write_todos(&[], vec![item("t1", TodoStatus::Pending, None), item("t1", TodoStatus::Done, None)], false, 100)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn rejects_skipped_items_without_a_reason() {
        let mut bad = item("t1", TodoStatus::Pending, None);
        bad.status = TodoStatus::Skipped;
        bad.skip_reason = None;
        let err = write_todos(&[], vec![bad], false, 100).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn rejects_dropping_existing_ids_without_force() {
        let existing = vec![item("t1", TodoStatus::Pending, None)];
        let err = write_todos(&existing, vec![item("t2", TodoStatus::Pending, None)], false, 100).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn force_allows_dropping_existing_ids() {
        let existing = vec![item("t1", TodoStatus::Pending, None)];
        let result = write_todos(&existing, vec![item("t2", TodoStatus::Pending, None)], true, 100).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "t2");
    }

    #[test]
    fn preserves_created_at_and_description_from_existing_item() {
        let mut existing_item = item("t1", TodoStatus::Pending, Some("original description"));
        existing_item.created_at = 5;
        existing_item.updated_at = 5;
        let existing = vec![existing_item];

        let incoming = item("t1", TodoStatus::Pending, None);
        let result = write_todos(&existing, vec![incoming], false, 100).unwrap();

        assert_eq!(result[0].created_at, 5);
        assert_eq!(result[0].description.as_deref(), Some("original description"));
        assert_eq!(result[0].updated_at, 5, "status unchanged, updated_at should not bump");
    }

    #[test]
    fn bumps_updated_at_only_when_status_changes() {
        let mut existing_item = item("t1", TodoStatus::Pending, None);
        existing_item.created_at = 5;
        existing_item.updated_at = 5;
        let existing = vec![existing_item];

        let incoming = item("t1", TodoStatus::Done, None);
        let result = write_todos(&existing, vec![incoming], false, 100).unwrap();
        assert_eq!(result[0].updated_at, 100);
    }

    #[test]
    fn new_item_gets_now_for_both_timestamps() {
        let result = write_todos(&[], vec![item("t1", TodoStatus::Pending, None)], false, 42).unwrap();
        assert_eq!(result[0].created_at, 42);
        assert_eq!(result[0].updated_at, 42);
    }
}
