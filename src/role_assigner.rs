//! Maps a raw event, viewed by a particular agent, to the `{role, content}`
//! pair the model actually sees.
//!
//! This module does not know how "registered project agent" or "pending
//! delegation" are determined; callers (chiefly
//! [`AgentContextBuilder`](crate::context_builder)) supply that as
//! [`AssignmentContext`] so RoleAssigner stays a pure decision table.

use std::collections::HashSet;

use crate::model::{Event, Message, Pubkey};
use crate::name_resolver::{fallback_name, NameResolver};

/// Everything the five-branch decision table below needs besides the event
/// and the processed content.
pub struct AssignmentContext<'a> {
    /// The agent viewing this event, deciding how to render it.
    pub viewer: Pubkey,
    /// `true` iff a pending delegation exists keyed by
    /// `(conversation, viewer, event.author)` — branch 2.
    pub delegation_pending: bool,
    /// `true` iff `event.author` is a human user rather than a registered
    /// agent.
    pub author_is_human: bool,
    /// The full set of registered project agent pubkeys, used to filter
    /// `p`-tag targets down to ones that matter for branch 3/4.
    pub registered_agents: &'a HashSet<Pubkey>,
}

/// Produces the message a viewer should see for one event, per the
/// five-branch table below. `content` is the already filtered/inlined text
/// (ContentFilter + EntityInliner have already run).
pub async fn assign(event: &Event, content: &str, ctx: &AssignmentContext<'_>, names: &dyn NameResolver) -> Message {
    let targeted: Vec<Pubkey> = event
        .addressees()
        .into_iter()
        .filter(|p| ctx.registered_agents.contains(p))
        .collect();

    // 1. Own words are always assistant-voiced.
    if event.author == ctx.viewer {
        return Message::assistant(content);
    }

    // 2. A pending delegation response from this sender, addressed to us.
    if !ctx.author_is_human && ctx.delegation_pending {
        let name = resolve(names, event.author).await;
        return Message::user(format!(
            "[DELEGATION RESPONSE from {name}]:\n{content}\n[END DELEGATION RESPONSE]"
        ));
    }

    // 3. From a human user.
    if ctx.author_is_human {
        if !targeted.is_empty() && !targeted.contains(&ctx.viewer) {
            let username = resolve(names, event.author).await;
            let targets = join_names(names, &targeted).await;
            return Message::system(format!("[User ({username}) → {targets}]: {content}"));
        }
        return Message::user(content.to_string());
    }

    // 4. From another agent.
    let sender_name = resolve(names, event.author).await;
    if !targeted.is_empty() {
        if targeted.contains(&ctx.viewer) {
            let viewer_name = resolve(names, ctx.viewer).await;
            return Message::user(format!("[{sender_name} → @{viewer_name}]: {content}"));
        }
        let targets = join_names(names, &targeted).await;
        return Message::system(format!("[{sender_name} → {targets}]: {content}"));
    }
    Message::system(format!("[{sender_name}]: {content}"))
}

async fn resolve(names: &dyn NameResolver, pubkey: Pubkey) -> String {
    names
        .resolve(pubkey)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| fallback_name(pubkey))
}

async fn join_names(names: &dyn NameResolver, pubkeys: &[Pubkey]) -> String {
    let mut rendered = Vec::with_capacity(pubkeys.len());
    for p in pubkeys {
        rendered.push(resolve(names, *p).await);
    }
    rendered.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::{EventId, EventKind, Tag};
    use crate::name_resolver::StaticNameResolver;

    fn ev(id: &str, author: Pubkey, tags: Vec<Tag>, content: &str) -> Event {
        Event::new(EventId::from_label(id), author, 0, EventKind::Message, content, tags)
    }

    fn names() -> StaticNameResolver {
        StaticNameResolver::new()
            .with_name(Pubkey::from_label("viewer"), "Viewer")
            .with_name(Pubkey::from_label("human"), "Alice")
            .with_name(Pubkey::from_label("peer"), "Peer")
    }

    #[tokio::test]
    async fn branch_one_own_events_are_assistant_voiced() {
        let viewer = Pubkey::from_label("viewer");
        let e = ev("e1", viewer, vec![], "hello");
        let ctx = AssignmentContext {
            viewer,
            delegation_pending: false,
            author_is_human: false,
            registered_agents: &HashSet::new(),
        };
        let msg = assign(&e, "hello", &ctx, &names()).await;
        assert_eq!(msg, Message::assistant("hello"));
    }

    #[tokio::test]
    async fn branch_two_pending_delegation_response_is_wrapped() {
        let viewer = Pubkey::from_label("viewer");
        let peer = Pubkey::from_label("peer");
        let e = ev("e1", peer, vec![], "done");
        let ctx = AssignmentContext {
            viewer,
            delegation_pending: true,
            author_is_human: false,
            registered_agents: &HashSet::new(),
        };
        let msg = assign(&e, "done", &ctx, &names()).await;
        assert_eq!(
            msg,
            Message::user("[DELEGATION RESPONSE from Peer]:\ndone\n[END DELEGATION RESPONSE]")
        );
    }

    #[tokio::test]
    async fn branch_three_human_event_not_targeting_viewer_is_system() {
        let viewer = Pubkey::from_label("viewer");
        let human = Pubkey::from_label("human");
        let other_agent = Pubkey::from_label("other");
        let mut registered = HashSet::new();
        registered.insert(other_agent);
        let e = ev("e1", human, vec![Tag::new(["p", &other_agent.to_hex()])], "do it");
        let ctx = AssignmentContext {
            viewer,
            delegation_pending: false,
            author_is_human: true,
            registered_agents: &registered,
        };
        let msg = assign(&e, "do it", &ctx, &names()).await;
        match msg {
            Message::System(s) => assert!(s.starts_with("[User (Alice) →")),
            other => panic!("expected system message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn branch_three_human_event_without_targets_is_user() {
        let viewer = Pubkey::from_label("viewer");
        let human = Pubkey::from_label("human");
        let e = ev("e1", human, vec![], "hi there");
        let ctx = AssignmentContext {
            viewer,
            delegation_pending: false,
            author_is_human: true,
            registered_agents: &HashSet::new(),
        };
        let msg = assign(&e, "hi there", &ctx, &names()).await;
        assert_eq!(msg, Message::user("hi there"));
    }

    #[tokio::test]
    async fn branch_four_agent_event_targeting_viewer_is_user() {
        let viewer = Pubkey::from_label("viewer");
        let peer = Pubkey::from_label("peer");
        let mut registered = HashSet::new();
        registered.insert(viewer);
        let e = ev("e1", peer, vec![Tag::new(["p", &viewer.to_hex()])], "go");
        let ctx = AssignmentContext {
            viewer,
            delegation_pending: false,
            author_is_human: false,
            registered_agents: &registered,
        };
        let msg = assign(&e, "go", &ctx, &names()).await;
        assert_eq!(msg, Message::user("[Peer → @Viewer]: go"));
    }

    #[tokio::test]
    async fn branch_four_agent_event_with_no_targets_is_system() {
        let viewer = Pubkey::from_label("viewer");
        let peer = Pubkey::from_label("peer");
        let e = ev("e1", peer, vec![], "broadcasting");
        let ctx = AssignmentContext {
            viewer,
            delegation_pending: false,
            author_is_human: false,
            registered_agents: &HashSet::new(),
        };
        let msg = assign(&e, "broadcasting", &ctx, &names()).await;
        assert_eq!(msg, Message::system("[Peer]: broadcasting"));
    }
}
