//! Decides, per tool-result message position, whether to inline a tool's
//! output verbatim or bury it behind a placeholder.
//!
//! The decision depends only on absolute output size, how deeply the
//! message is buried under more recent turns, and whether a retrieval id
//! is available — never on the retrieval id's value.

/// Below this total output size, a result is always inlined verbatim.
pub const NEVER_TRUNCATE: usize = 1_000;

/// Above this size, the burial tolerance tightens to `LARGE_BURIAL_LIMIT`.
pub const LARGE: usize = 10_000;

/// Burial-depth tolerance for outputs larger than `LARGE`.
pub const LARGE_BURIAL_LIMIT: usize = 3;

/// Burial-depth tolerance for outputs at or below `LARGE` (but at or above
/// `NEVER_TRUNCATE`).
pub const SMALL_BURIAL_LIMIT: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BudgetDecision {
    /// Keep the output as-is.
    Inline,
    /// Replace with a placeholder naming the retrieval tool and id.
    BuryWithRetrieval { size: usize, retrieval_event_id: String },
    /// Replace with a placeholder; no retrieval path exists.
    BuryNoRetrieval { size: usize },
}

impl BudgetDecision {
    /// Renders the placeholder text for a buried decision, or `None` for
    /// `Inline` (the caller keeps the original output in that case).
    pub fn placeholder(&self) -> Option<String> {
        match self {
            BudgetDecision::Inline => None,
            BudgetDecision::BuryWithRetrieval { size, retrieval_event_id } => Some(format!(
                "[Tool executed, {size} chars output truncated. Use fs_read(tool=\"{retrieval_event_id}\") to retrieve full output if needed]"
            )),
            BudgetDecision::BuryNoRetrieval { size } => Some(format!(
                "[Tool output omitted to save context ({size} chars) - no reference available for retrieval]"
            )),
        }
    }
}

/// Decides the treatment for a tool result at `current_index` out of
/// `total_messages`, given its total stringified `size` and an optional
/// retrieval event id.
pub fn decide(size: usize, current_index: usize, total_messages: usize, retrieval_event_id: Option<&str>) -> BudgetDecision {
    if size < NEVER_TRUNCATE {
        return BudgetDecision::Inline;
    }

    let burial_depth = total_messages.saturating_sub(current_index).saturating_sub(1);
    let limit = if size > LARGE { LARGE_BURIAL_LIMIT } else { SMALL_BURIAL_LIMIT };
    if burial_depth < limit {
        return BudgetDecision::Inline;
    }

    match retrieval_event_id {
        Some(id) => BudgetDecision::BuryWithRetrieval { size, retrieval_event_id: id.to_string() },
        None => BudgetDecision::BuryNoRetrieval { size },
    }
}
