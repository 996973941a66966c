//! Strips `<thinking>` spans out of model output before it is shown to a
//! viewer or fed back into another agent's context.
//!
//! Tags may carry attributes and span multiple lines; the match is
//! non-nested (a `<thinking>` run ends at the next `</thinking>`,
//! regardless of any tag-looking text in between).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::Event;

static THINKING_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<thinking[^>]*>.*?</thinking>").expect("static pattern is valid")
});

static RUN_OF_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("static pattern is valid"));

static BLANK_LINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("static pattern is valid"));

/// Removes every `<thinking>…</thinking>` span from `text`, then normalizes
/// whitespace: internal runs of two-or-more spaces collapse to one (leading
/// indentation on each line is preserved), and runs of blank lines collapse
/// to a single newline. The whole result is trimmed.
///
/// `strip(strip(t)) == strip(t)` for all `t`.
pub fn strip(text: &str) -> String {
    let without_thinking = THINKING_SPAN.replace_all(text, "");

    let despaced: String = without_thinking
        .lines()
        .map(collapse_internal_spaces)
        .collect::<Vec<_>>()
        .join("\n");

    let collapsed = BLANK_LINE_RUN.replace_all(&despaced, "\n");
    collapsed.trim().to_string()
}

/// Collapses runs of two-or-more spaces/tabs within a line to a single
/// space, leaving the line's leading indentation untouched.
fn collapse_internal_spaces(line: &str) -> String {
    let indent_len = line.len() - line.trim_start_matches([' ', '\t']).len();
    let (indent, rest) = line.split_at(indent_len);
    format!("{indent}{}", RUN_OF_SPACES.replace_all(rest, " "))
}

/// `true` iff `text` is non-empty after trimming but becomes empty once
/// stripped — i.e. it was nothing but a thinking block.
pub fn is_only_thinking(text: &str) -> bool {
    !text.trim().is_empty() && strip(text).is_empty()
}

/// `true` iff `event` carries a bare `reasoning` tag (first element
/// `"reasoning"`, no further elements).
pub fn has_reasoning_tag(event: &Event) -> bool {
    event
        .tags
        .iter()
        .any(|t| t.is_named_with_len(crate::model::event::tag_names::REASONING, 1))
}
