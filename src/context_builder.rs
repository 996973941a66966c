//! Composes the ordered message list handed to the model for one turn —
//! the composition point every other component (content filtering, entity
//! inlining, role assignment, thread resolution, tool message storage,
//! delegation lookups) ultimately feeds into.

use std::collections::HashSet;

use crate::content_filter;
use crate::delegation::DelegationRegistry;
use crate::entity_inliner;
use crate::model::{AgentState, Conversation, Event, Message, Pubkey};
use crate::name_resolver::NameResolver;
use crate::role_assigner::{self, AssignmentContext};
use crate::thread_path;
use crate::tool_message_store::ToolMessageStore;
use crate::transport::Transport;

/// Everything the three `build_messages*` compositions share: the seams
/// they call through and the identity of the viewing agent.
pub struct ContextBuilder<'a> {
    pub viewer: Pubkey,
    pub viewer_name: &'a str,
    pub registered_agents: &'a HashSet<Pubkey>,
    pub transport: &'a dyn Transport,
    pub names: &'a dyn NameResolver,
    pub tool_messages: &'a dyn ToolMessageStore,
    pub delegations: &'a DelegationRegistry,
}

impl<'a> ContextBuilder<'a> {
    /// Renders the phase-transition preamble: `"=== CURRENT
    /// PHASE: <PHASE_UPPER> ===\n\n<instructions>"`. `PHASE_UPPER` is the
    /// conversation's current phase, uppercased; if the conversation has no
    /// phase set, the instructions text itself is used as a fallback label.
    fn phase_message(phase: Option<&str>, phase_instructions: &str) -> Option<Message> {
        if phase_instructions.is_empty() {
            return None;
        }
        let label = phase.unwrap_or(phase_instructions);
        Some(Message::system(format!(
            "=== CURRENT PHASE: {} ===\n\n{phase_instructions}",
            label.to_uppercase()
        )))
    }

    /// Processes one event into zero-or-one messages, applying the
    /// skip/strip/inline/assign pipeline common to every event in history,
    /// and reused for the triggering event itself.
    async fn process_event(&self, conversation_id: &str, event: &Event) -> Option<Message> {
        if event.content.is_empty() {
            return None;
        }

        if event.is_tool_event() {
            if event.author != self.viewer {
                return None;
            }
            if let Some(stored) = self.tool_messages.get(event.id).await.ok().flatten() {
                // Stored messages are appended verbatim; there's exactly one
                // "message" conceptually here, so fold them into one system
                // message preserving their rendered order.
                if !stored.is_empty() {
                    let joined = stored.iter().map(Message::content).collect::<Vec<_>>().join("\n");
                    return Some(Message::system(joined));
                }
            }
            // Fall back to the normal pipeline over raw content.
        } else if content_filter::has_reasoning_tag(event) || content_filter::is_only_thinking(&event.content) {
            return None;
        }

        let stripped = content_filter::strip(&event.content);
        if stripped.is_empty() {
            return None;
        }
        let inlined = entity_inliner::inline(&stripped, self.transport).await;

        // Branch 2 keys on (conversation, viewer-as-delegator, event-author-as-responder):
        // the viewer is the one who delegated and is now seeing a response.
        let delegation_pending = self.delegations.has_pending(conversation_id, self.viewer, event.author).await;
        let ctx = AssignmentContext {
            viewer: self.viewer,
            delegation_pending,
            author_is_human: !self.registered_agents.contains(&event.author),
            registered_agents: self.registered_agents,
        };
        Some(role_assigner::assign(event, &inlined, &ctx, self.names).await)
    }

    /// Builds the default message list for a fresh triggering event.
    pub async fn build_messages(
        &self,
        conversation_id: &str,
        conversation: &Conversation,
        _agent_state: &AgentState,
        triggering: Option<&Event>,
        phase_instructions: Option<&str>,
    ) -> Vec<Message> {
        let relevant = thread_path::thread_events(&conversation.history, triggering);
        let mut messages = Vec::new();

        for event in relevant.iter().copied() {
            if let Some(trigger) = triggering {
                if event.id == trigger.id {
                    break;
                }
            }
            if let Some(message) = self.process_event(conversation_id, event).await {
                messages.push(message);
            }
        }

        if let Some(instructions) = phase_instructions.filter(|s| !s.is_empty()) {
            if let Some(message) = Self::phase_message(conversation.phase.as_deref(), instructions) {
                messages.push(message);
            }
        }

        if let Some(trigger) = triggering {
            if let Some(message) = self.process_event(conversation_id, trigger).await {
                messages.push(message);
            }
        }

        messages
    }

    /// Builds the "while you were away" composition for an agent resuming
    /// after missed history.
    pub async fn build_messages_with_missed_history(
        &self,
        conversation_id: &str,
        conversation_phase: Option<&str>,
        missed_events: &[Event],
        delegation_summary: Option<&str>,
        triggering: Option<&Event>,
        phase_instructions: Option<&str>,
    ) -> Vec<Message> {
        let filtered: Vec<&Event> = if let Some(trigger) = triggering {
            let path: HashSet<_> = thread_path::thread_path(missed_events, trigger).into_iter().collect();
            missed_events.iter().filter(|e| path.contains(&e.id)).collect()
        } else {
            missed_events.iter().collect()
        };

        let remaining: Vec<&Event> = filtered.into_iter().filter(|e| !content_filter::has_reasoning_tag(e)).collect();

        let mut messages = Vec::new();

        if !remaining.is_empty() {
            let mut block = String::from("=== MESSAGES WHILE YOU WERE AWAY ===\n\n");
            if let Some(summary) = delegation_summary {
                block.push_str(&format!("**Previous context**: {summary}\n\n"));
            }
            for event in remaining {
                let label = self.sender_label(event).await;
                let processed = content_filter::strip(&event.content);
                let inlined = entity_inliner::inline(&processed, self.transport).await;
                block.push_str(&format!("{label}:\n{inlined}\n\n"));
            }
            block.push_str("=== END OF HISTORY ===\nRespond to the most recent user message above, considering the context.\n\n");
            messages.push(Message::system(block));
        }

        if let Some(instructions) = phase_instructions.filter(|s| !s.is_empty()) {
            if let Some(message) = Self::phase_message(conversation_phase, instructions) {
                messages.push(message);
            }
        }

        if let Some(trigger) = triggering {
            if let Some(message) = self.process_event(conversation_id, trigger).await {
                messages.push(message);
            }
        }

        messages
    }

    async fn sender_label(&self, event: &Event) -> String {
        if event.author == self.viewer {
            format!("💬 You ({})", self.viewer_name)
        } else if !self.registered_agents.contains(&event.author) {
            "🟢 USER".to_string()
        } else {
            let name = self
                .names
                .resolve(event.author)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| crate::name_resolver::fallback_name(event.author));
            format!("💬 {name}")
        }
    }

    /// Builds the composition summarizing all delegation responses
    /// received for a single delegation.
    pub async fn build_messages_with_delegation_responses(
        &self,
        conversation_id: &str,
        conversation_phase: Option<&str>,
        responses: &[Event],
        original_request: &str,
        triggering: Option<&Event>,
        phase_instructions: Option<&str>,
    ) -> Vec<Message> {
        let mut block = String::new();
        block.push_str("=== DELEGATE RESPONSES RECEIVED ===\n\n");
        block.push_str(&format!(
            "You previously delegated the following request to {} agent(s):\n\"{original_request}\"\n\nHere are all the responses:\n\n",
            responses.len()
        ));

        for event in responses {
            if content_filter::has_reasoning_tag(event) || content_filter::is_only_thinking(&event.content) {
                continue;
            }
            let name = self
                .names
                .resolve(event.author)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| crate::name_resolver::fallback_name(event.author));
            let stripped = content_filter::strip(&event.content);
            block.push_str(&format!("### Response from {name}:\n{stripped}\n\n"));
        }

        block.push_str("=== END OF DELEGATE RESPONSES ===\n\nNow process these responses and complete your task.");

        let mut messages = vec![Message::system(block)];

        if let Some(instructions) = phase_instructions.filter(|s| !s.is_empty()) {
            if let Some(message) = Self::phase_message(conversation_phase, instructions) {
                messages.push(message);
            }
        }

        if let Some(trigger) = triggering {
            if let Some(message) = self.process_event(conversation_id, trigger).await {
                messages.push(message);
            }
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::DelegationRegistry;
    use crate::model::event::{EventId, EventKind, Tag};
    use crate::name_resolver::StaticNameResolver;
    use crate::tool_message_store::MemoryToolMessageStore;
    use crate::transport::MemoryTransport;

    fn ev(id: &str, author: Pubkey, content: &str, tags: Vec<Tag>) -> Event {
        Event::new(EventId::from_label(id), author, 0, EventKind::Message, content, tags)
    }

    fn harness() -> (MemoryTransport, StaticNameResolver, MemoryToolMessageStore, DelegationRegistry, HashSet<Pubkey>) {
        (
            MemoryTransport::new(),
            StaticNameResolver::new(),
            MemoryToolMessageStore::new(),
            DelegationRegistry::new(),
            HashSet::new(),
        )
    }

    #[tokio::test]
    async fn triggering_event_appears_exactly_once_at_the_end() {
        let (transport, names, tool_messages, delegations, registered) = harness();
        let viewer = Pubkey::from_label("viewer");
        let builder = ContextBuilder {
            viewer,
            viewer_name: "Viewer",
            registered_agents: &registered,
            transport: &transport,
            names: &names,
            tool_messages: &tool_messages,
            delegations: &delegations,
        };

        let human = Pubkey::from_label("human");
        let e1 = ev("e1", human, "first", vec![]);
        let trigger = ev("e2", human, "second", vec![]);
        let mut conversation = Conversation::new("c1", "t");
        conversation.upsert_event(e1.clone());
        conversation.upsert_event(trigger.clone());

        let agent_state = AgentState::default();
        let messages = builder.build_messages("c1", &conversation, &agent_state, Some(&trigger), None).await;

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], Message::user("second"));
    }

    #[tokio::test]
    async fn reasoning_tagged_events_contribute_zero_messages() {
        let (transport, names, tool_messages, delegations, registered) = harness();
        let viewer = Pubkey::from_label("viewer");
        let builder = ContextBuilder {
            viewer,
            viewer_name: "Viewer",
            registered_agents: &registered,
            transport: &transport,
            names: &names,
            tool_messages: &tool_messages,
            delegations: &delegations,
        };

        let human = Pubkey::from_label("human");
        let reasoning_event = ev("e1", human, "internal musing", vec![Tag::new(["reasoning"])]);
        let mut conversation = Conversation::new("c1", "t");
        conversation.upsert_event(reasoning_event);

        let agent_state = AgentState::default();
        let messages = builder.build_messages("c1", &conversation, &agent_state, None, None).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn own_tool_events_load_stored_messages_others_are_skipped() {
        let (transport, names, tool_messages, delegations, mut registered) = harness();
        let viewer = Pubkey::from_label("viewer");
        let peer = Pubkey::from_label("peer");
        registered.insert(viewer);
        registered.insert(peer);

        let own_tool_event = ev("e1", viewer, "{}", vec![Tag::new(["tool", "call-1"])]);
        tool_messages.put(own_tool_event.id, vec![Message::assistant("tool output")]).await.unwrap();
        let other_tool_event = ev("e2", peer, "{}", vec![Tag::new(["tool", "call-2"])]);

        let builder = ContextBuilder {
            viewer,
            viewer_name: "Viewer",
            registered_agents: &registered,
            transport: &transport,
            names: &names,
            tool_messages: &tool_messages,
            delegations: &delegations,
        };

        let mut conversation = Conversation::new("c1", "t");
        conversation.upsert_event(own_tool_event);
        conversation.upsert_event(other_tool_event);

        let agent_state = AgentState::default();
        let messages = builder.build_messages("c1", &conversation, &agent_state, None, None).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], Message::system("tool output".to_string()));
    }

    #[tokio::test]
    async fn phase_instructions_render_as_uppercase_preamble() {
        let (transport, names, tool_messages, delegations, registered) = harness();
        let viewer = Pubkey::from_label("viewer");
        let builder = ContextBuilder {
            viewer,
            viewer_name: "Viewer",
            registered_agents: &registered,
            transport: &transport,
            names: &names,
            tool_messages: &tool_messages,
            delegations: &delegations,
        };

        let mut conversation = Conversation::new("c1", "t");
        conversation.phase = Some("REFLECTION".to_string());
        let agent_state = AgentState::default();
        let messages = builder
            .build_messages("c1", &conversation, &agent_state, None, Some("You are now in reflection phase"))
            .await;
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0],
            Message::system("=== CURRENT PHASE: REFLECTION ===\n\nYou are now in reflection phase")
        );
    }

    #[tokio::test]
    async fn delegation_response_composition_skips_reasoning_only_responses() {
        let (transport, names, tool_messages, delegations, registered) = harness();
        let viewer = Pubkey::from_label("viewer");
        let builder = ContextBuilder {
            viewer,
            viewer_name: "Viewer",
            registered_agents: &registered,
            transport: &transport,
            names: &names,
            tool_messages: &tool_messages,
            delegations: &delegations,
        };

        let agent_a = Pubkey::from_label("A");
        let agent_b = Pubkey::from_label("B");
        let good = ev("r1", agent_a, "done with the task", vec![]);
        let reasoning_only = ev("r2", agent_b, "<thinking>hmm</thinking>", vec![]);

        let messages = builder
            .build_messages_with_delegation_responses("c1", None, &[good, reasoning_only], "do the thing", None, None)
            .await;

        assert_eq!(messages.len(), 1);
        let Message::System(text) = &messages[0] else { panic!("expected system message") };
        assert!(text.contains("done with the task"));
        assert!(!text.contains("hmm"));
    }
}
