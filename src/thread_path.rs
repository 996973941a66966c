//! Reconstructs the root→target path through a conversation's event DAG,
//! and filters history down to one thread.

use std::collections::{HashMap, HashSet};

use crate::model::{Event, EventId};

/// Computes the ordered list of event ids from root to `target`.
///
/// - If `target` has no root (`E`) tag, the whole `history` is returned in
///   order (it's treated as the root conversation itself).
/// - Otherwise walks `target` backwards via `e` (parent) tags, stopping at
///   the root, at an orphan (no further parent, or parent missing from
///   `history`), or at a detected cycle — in which case the path collected
///   so far is returned (with the known root prepended if it's present in
///   `history`).
pub fn thread_path(history: &[Event], target: &Event) -> Vec<EventId> {
    let Some(root_id) = target.root_id() else {
        return history.iter().map(|e| e.id).collect();
    };

    let by_id: HashMap<EventId, &Event> = history.iter().map(|e| (e.id, e)).collect();

    let mut path = vec![target.id];
    let mut seen: HashSet<EventId> = HashSet::from([target.id]);
    let mut current = target;

    loop {
        if current.id == root_id {
            break;
        }
        let Some(parent_id) = current.parent_id() else {
            prepend_root_if_known(&mut path, root_id, &by_id);
            break;
        };
        if seen.contains(&parent_id) {
            tracing::warn!(?parent_id, "cycle detected while resolving thread path; stopping");
            break;
        }
        let Some(parent) = by_id.get(&parent_id) else {
            prepend_root_if_known(&mut path, root_id, &by_id);
            break;
        };
        path.insert(0, parent_id);
        seen.insert(parent_id);
        current = parent;
    }

    path
}

fn prepend_root_if_known(path: &mut Vec<EventId>, root_id: EventId, by_id: &HashMap<EventId, &Event>) {
    if by_id.contains_key(&root_id) && path.first() != Some(&root_id) {
        path.insert(0, root_id);
    }
}

/// Derives the set of events relevant to rendering `triggering`'s thread.
///
/// Falls back to the whole history for root replies, for triggers with no
/// thread context, and whenever the triggering event's parent can't be
/// found in `history`.
pub fn thread_events<'a>(history: &'a [Event], triggering: Option<&Event>) -> Vec<&'a Event> {
    let Some(triggering) = triggering else {
        return history.iter().collect();
    };

    let Some(root_id) = triggering.root_id() else {
        return history.iter().collect();
    };

    match triggering.parent_id() {
        Some(parent_id) if parent_id == root_id => history.iter().collect(),
        None => history.iter().collect(),
        Some(parent_id) => {
            let Some(parent) = history.iter().find(|e| e.id == parent_id) else {
                return history.iter().collect();
            };
            let path: HashSet<EventId> = thread_path(history, parent).into_iter().collect();
            history.iter().filter(|e| path.contains(&e.id)).collect()
        }
    }
}
