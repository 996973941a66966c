//! Inlines `nostr:...` entity references with the referenced event's
//! content, fetched through the [`Transport`] seam.
//!
//! Fetches run concurrently, one per occurrence: a failing or slow
//! reference never blocks or invalidates the others.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::EventId;
use crate::transport::Transport;

static NOSTR_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"nostr:(nevent1|naddr1|note1|npub1|nprofile1)[a-zA-Z0-9]+").expect("static pattern is valid")
});

/// Replaces each `nostr:...` token in `text` with
/// `<nostr-event entity="…">FETCHED_CONTENT</nostr-event>`, fetching each
/// referenced event through `transport`. A token whose fetch fails (or
/// whose event can't be found) is left unchanged and a warning is logged;
/// it never cancels sibling replacements or the call as a whole.
pub async fn inline(text: &str, transport: &dyn Transport) -> String {
    let tokens: Vec<(usize, usize, String)> = NOSTR_TOKEN
        .find_iter(text)
        .map(|m| (m.start(), m.end(), m.as_str().to_string()))
        .collect();

    if tokens.is_empty() {
        return text.to_string();
    }

    // Every occurrence is fetched concurrently: one failing reference must
    // not delay or cancel its siblings.
    let resolved = futures::future::join_all(tokens.iter().map(|(_, _, token)| resolve_token(token, transport))).await;

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for ((start, end, _), replacement) in tokens.iter().zip(resolved) {
        out.push_str(&text[cursor..*start]);
        out.push_str(&replacement);
        cursor = *end;
    }
    out.push_str(&text[cursor..]);
    out
}

async fn resolve_token(token: &str, transport: &dyn Transport) -> String {
    let Some(id) = token_to_event_id(token) else {
        tracing::warn!(token, "entity token has no decodable id; leaving unchanged");
        return token.to_string();
    };

    match transport.fetch(id).await {
        Ok(Some(event)) => format!(r#"<nostr-event entity="{token}">{}</nostr-event>"#, event.content),
        Ok(None) => {
            tracing::warn!(token, "entity fetch returned no event; leaving token unchanged");
            token.to_string()
        }
        Err(err) => {
            tracing::warn!(token, error = %err, "entity fetch failed; leaving token unchanged");
            token.to_string()
        }
    }
}

/// Wire decoding of bech32-ish nostr identifiers is out of scope; the
/// suffix after the known prefix stands in as the event's label, matching
/// how this crate's fixtures otherwise name events.
fn token_to_event_id(token: &str) -> Option<EventId> {
    let rest = token.strip_prefix("nostr:")?;
    let suffix = rest
        .strip_prefix("nevent1")
        .or_else(|| rest.strip_prefix("naddr1"))
        .or_else(|| rest.strip_prefix("note1"))
        .or_else(|| rest.strip_prefix("npub1"))
        .or_else(|| rest.strip_prefix("nprofile1"))?;
    if suffix.is_empty() {
        return None;
    }
    Some(EventId::from_label(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventKind, Pubkey};
    use crate::transport::MemoryTransport;

    fn ev(label: &str, content: &str) -> Event {
        Event::new(
            EventId::from_label(label),
            Pubkey::from_label("A"),
            0,
            EventKind::Message,
            content,
            vec![],
        )
    }

    #[tokio::test]
    async fn inlines_a_resolvable_token() {
        let t = MemoryTransport::new();
        t.seed(ev("abc123", "the referenced content"));
        let out = inline("see nostr:note1abc123 for context", &t).await;
        assert_eq!(
            out,
            "see <nostr-event entity=\"nostr:note1abc123\">the referenced content</nostr-event> for context"
        );
    }

    #[tokio::test]
    async fn leaves_token_unchanged_on_fetch_failure() {
        let t = MemoryTransport::new();
        let out = inline("see nostr:note1missing here", &t).await;
        assert_eq!(out, "see nostr:note1missing here");
    }

    #[tokio::test]
    async fn independent_failures_do_not_affect_sibling_replacements() {
        let t = MemoryTransport::new();
        t.seed(ev("good", "OK"));
        let out = inline("nostr:note1good and nostr:note1missing", &t).await;
        assert_eq!(
            out,
            "<nostr-event entity=\"nostr:note1good\">OK</nostr-event> and nostr:note1missing"
        );
    }

    #[tokio::test]
    async fn inlines_an_nprofile_token() {
        let t = MemoryTransport::new();
        t.seed(ev("xyz", "profile bio"));
        let out = inline("see nostr:nprofile1xyz", &t).await;
        assert_eq!(out, "see <nostr-event entity=\"nostr:nprofile1xyz\">profile bio</nostr-event>");
    }

    #[tokio::test]
    async fn text_with_no_tokens_is_returned_unchanged() {
        let t = MemoryTransport::new();
        let out = inline("nothing to inline here", &t).await;
        assert_eq!(out, "nothing to inline here");
    }
}
