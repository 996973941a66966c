//! `OpsRegistry` and `ExecutionEngine`: the per-turn cancellation
//! bookkeeping and the turn-runner that ties the rest of the crate
//! together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::budgeter;
use crate::context_builder::ContextBuilder;
use crate::model::event::now_seconds;
use crate::model::{Conversation, Event, EventId, EventKind, Message, Pubkey, Tag, ToolOutput};
use crate::store::ConversationStore;
use crate::streaming::{StreamUpdate, StreamingPublisher};
use crate::tool_message_store::ToolMessageStore;
use crate::tools::{ToolCallContext, ToolCatalog};
use crate::transport::Transport;

/// A cooperative cancellation flag shared between the registry and the
/// turn it was issued for. Suspension points poll `is_cancelled`; nothing
/// forcibly interrupts a running future — cancellation only takes effect
/// at those checkpoints.
#[derive(Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Map `(agent, conversation) → cancellation signal`. Registering a new
/// operation for a key trips and replaces whatever was there
/// (last-writer-wins).
#[derive(Default)]
pub struct OpsRegistry {
    operations: dashmap::DashMap<(Pubkey, String), CancellationSignal>,
}

impl OpsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh operation, cancelling and replacing any prior one
    /// under the same key.
    pub fn register_operation(&self, agent: Pubkey, conversation_id: &str) -> CancellationSignal {
        let key = (agent, conversation_id.to_string());
        if let Some((_, prior)) = self.operations.remove(&key) {
            prior.trip();
        }
        let signal = CancellationSignal::new();
        self.operations.insert(key, signal.clone());
        signal
    }

    /// Removes the entry for `(agent, conversation_id)` iff `signal` is
    /// still the one installed there (a later `register_operation` for the
    /// same key must not be torn down by a stale completion).
    pub fn complete_operation(&self, agent: Pubkey, conversation_id: &str, signal: &CancellationSignal) {
        let key = (agent, conversation_id.to_string());
        if let Some(installed) = self.operations.get(&key) {
            if Arc::ptr_eq(&installed.0, &signal.0) {
                drop(installed);
                self.operations.remove(&key);
            }
        }
    }
}

/// What triggered this turn: a fresh event, a resume after missed history,
/// or the completion of a delegation fan-out. Determines which
/// `ContextBuilder` composition runs.
pub enum Trigger<'a> {
    Fresh { event: &'a Event },
    MissedHistory { missed_events: &'a [Event], delegation_summary: Option<&'a str>, event: &'a Event },
    DelegationResponses { responses: &'a [Event], original_request: &'a str, event: &'a Event },
}

/// How a turn ended, for the caller to decide what to persist/publish
/// next.
#[derive(Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Interrupted,
    Failed { message: String },
}

/// One streamed delta the model produced during a turn, or a piece of
/// provider bookkeeping riding along the same channel.
pub enum ModelEvent {
    TextDelta { text: String, is_reasoning: bool },
    ToolCall { tool_call_id: String, tool_name: String, params: serde_json::Value },
    /// The provider's session id for this turn, for resuming the same
    /// underlying model session on a later phase.
    SessionId(String),
}

/// Runs one turn per `(agent, conversation, triggering event)`. Holds no
/// state of its own beyond its collaborators; callers own the
/// `ConversationStore`, `ToolCatalog`, etc. it's handed.
pub struct ExecutionEngine<'a> {
    pub ops: &'a OpsRegistry,
    pub tools: &'a ToolCatalog,
    pub transport: &'a dyn Transport,
    pub tool_messages: &'a dyn ToolMessageStore,
    pub conversations: &'a ConversationStore,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(
        ops: &'a OpsRegistry,
        tools: &'a ToolCatalog,
        transport: &'a dyn Transport,
        tool_messages: &'a dyn ToolMessageStore,
        conversations: &'a ConversationStore,
    ) -> Self {
        ExecutionEngine { ops, tools, transport, tool_messages, conversations }
    }

    /// Builds the prompt messages for `trigger` using the appropriate
    /// `ContextBuilder` composition.
    pub async fn build_prompt(
        &self,
        builder: &ContextBuilder<'_>,
        conversation_id: &str,
        conversation: &Conversation,
        agent_state: &crate::model::AgentState,
        trigger: &Trigger<'_>,
        phase_instructions: Option<&str>,
    ) -> Vec<crate::model::Message> {
        match trigger {
            Trigger::Fresh { event } => {
                builder.build_messages(conversation_id, conversation, agent_state, Some(event), phase_instructions).await
            }
            Trigger::MissedHistory { missed_events, delegation_summary, event } => {
                builder
                    .build_messages_with_missed_history(
                        conversation_id,
                        conversation.phase.as_deref(),
                        missed_events,
                        *delegation_summary,
                        Some(event),
                        phase_instructions,
                    )
                    .await
            }
            Trigger::DelegationResponses { responses, original_request, event } => {
                builder
                    .build_messages_with_delegation_responses(
                        conversation_id,
                        conversation.phase.as_deref(),
                        responses,
                        original_request,
                        Some(event),
                        phase_instructions,
                    )
                    .await
            }
        }
    }

    /// Runs a stream of model events to completion or cancellation.
    ///
    /// Each streamed chunk flows through an internal `StreamingPublisher`
    /// and is published to `transport` as it's flushed. Each tool call's
    /// full output is stored through `tool_messages` (keyed by the
    /// tool-result event's id, for a later own-tool-event lookup) while the
    /// budgeted, in-context copy is returned to the caller to feed back
    /// into the same turn. On completion the provider's session id (if any
    /// arrived on the stream) is persisted into the agent's per-phase
    /// session map, and a terminal status event is published with bounded
    /// retry. Execution timing on the conversation starts before the loop
    /// and always stops before returning, regardless of outcome.
    pub async fn drive_stream(
        &self,
        agent: Pubkey,
        agent_slug: &str,
        conversation_id: &str,
        phase: Option<&str>,
        signal: &CancellationSignal,
        model_events: tokio::sync::mpsc::UnboundedReceiver<ModelEvent>,
        tool_ctx: &ToolCallContext,
        retrieval_event_id_for: impl Fn(&str) -> Option<String>,
    ) -> (TurnOutcome, Vec<(String, ToolOutput)>) {
        let mut stream = UnboundedReceiverStream::new(model_events);
        let (pub_tx, mut pub_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut publisher = StreamingPublisher::new(pub_tx);

        let mut tool_results = Vec::new();
        let mut total_seen = 0usize;
        let mut session_id: Option<String> = None;

        if let Err(err) = self.conversations.start_execution_timing(conversation_id).await {
            tracing::warn!(error = %err, "failed to start execution timing");
        }

        let outcome = loop {
            if signal.is_cancelled() {
                publisher.force_flush();
                self.drain_streaming_updates(agent, &mut pub_rx).await;
                break TurnOutcome::Interrupted;
            }

            let next = stream.next().await;

            // The triggering cancellation may have landed while we were
            // suspended waiting on the model; re-check before acting on
            // whatever just arrived.
            if signal.is_cancelled() {
                publisher.force_flush();
                self.drain_streaming_updates(agent, &mut pub_rx).await;
                break TurnOutcome::Interrupted;
            }

            match next {
                None => break TurnOutcome::Completed,
                Some(ModelEvent::TextDelta { text, is_reasoning }) => {
                    publisher.feed(&text, is_reasoning).await;
                    self.drain_streaming_updates(agent, &mut pub_rx).await;
                }
                Some(ModelEvent::SessionId(id)) => {
                    session_id = Some(id);
                }
                Some(ModelEvent::ToolCall { tool_call_id, tool_name, params }) => {
                    let result = self.tools.execute(&tool_name, params, tool_ctx).await;
                    let output = match result {
                        Ok(output) => output,
                        Err(err) if err.is_tool_visible() => ToolOutput::Text(err.to_string()),
                        Err(err) => {
                            publisher.force_flush();
                            self.drain_streaming_updates(agent, &mut pub_rx).await;
                            self.conversations.stop_execution_timing(conversation_id).await.ok();
                            self.publish_terminal(Self::status_event(agent, "error", err.to_string())).await;
                            self.ops.complete_operation(agent, conversation_id, signal);
                            return (TurnOutcome::Failed { message: err.to_string() }, tool_results);
                        }
                    };

                    total_seen += 1;
                    let retrieval_id = retrieval_event_id_for(&tool_call_id);
                    let decision = budgeter::decide(output.stringified_len(), total_seen - 1, total_seen, retrieval_id.as_deref());
                    let in_context = match decision.placeholder() {
                        Some(placeholder) => ToolOutput::Text(placeholder),
                        None => output.clone(),
                    };

                    let tool_event = Event::new(
                        EventId::new_random(),
                        agent,
                        now_seconds(),
                        EventKind::ToolResult,
                        in_context.stringified(),
                        vec![Tag::new(["tool", tool_call_id.as_str()])],
                    );
                    if let Err(err) = self.tool_messages.put(tool_event.id, vec![Message::assistant(output.stringified())]).await {
                        tracing::warn!(error = %err, "failed to store full tool output");
                    }
                    self.publish_intermediate(tool_event).await;

                    tool_results.push((tool_call_id, in_context));
                }
            }
        };

        publisher.flush();
        self.drain_streaming_updates(agent, &mut pub_rx).await;

        if outcome == TurnOutcome::Completed {
            if let Some(sid) = session_id {
                let phase_key = phase.unwrap_or_default().to_string();
                if let Err(err) = self
                    .conversations
                    .update_agent_state(conversation_id, agent_slug, move |state| {
                        state.sessions_by_phase.insert(phase_key, sid);
                    })
                    .await
                {
                    tracing::warn!(error = %err, "failed to persist provider session id");
                }
            }
        }

        if let Err(err) = self.conversations.stop_execution_timing(conversation_id).await {
            tracing::warn!(error = %err, "failed to stop execution timing");
        }

        let status = match &outcome {
            TurnOutcome::Completed => "complete",
            TurnOutcome::Interrupted => "interrupted",
            TurnOutcome::Failed { .. } => "error",
        };
        self.publish_terminal(Self::status_event(agent, status, "")).await;

        self.ops.complete_operation(agent, conversation_id, signal);
        (outcome, tool_results)
    }

    fn status_event(agent: Pubkey, status: &str, message: impl Into<String>) -> Event {
        Event::new(EventId::new_random(), agent, now_seconds(), EventKind::Status, message, vec![Tag::new(["status", status])])
    }

    /// Converts whatever the publisher has flushed since the last drain
    /// into events and publishes them. Best-effort: a publish failure here
    /// is logged and dropped, never escalated into aborting the turn.
    async fn drain_streaming_updates(&self, agent: Pubkey, pub_rx: &mut tokio::sync::mpsc::UnboundedReceiver<StreamUpdate>) {
        while let Ok(update) = pub_rx.try_recv() {
            let (content, tags) = match update {
                StreamUpdate::Text(text) => (text, vec![]),
                StreamUpdate::Reasoning(text) => (text, vec![Tag::new(["reasoning"])]),
            };
            let event = Event::new(EventId::new_random(), agent, now_seconds(), EventKind::Message, content, tags);
            self.publish_intermediate(event).await;
        }
    }

    async fn publish_intermediate(&self, event: Event) {
        if let Err(err) = self.transport.publish(event).await {
            tracing::warn!(error = %err, "intermediate event publish failed; dropping");
        }
    }

    /// Publishes a turn's terminal event with bounded exponential backoff.
    /// Exhausting the retries surfaces only as a warning — the turn itself
    /// has already concluded.
    async fn publish_terminal(&self, event: Event) {
        let mut delay = Duration::from_millis(100);
        for attempt in 1..=3u32 {
            match self.transport.publish(event.clone()).await {
                Ok(()) => return,
                Err(err) if attempt < 3 => {
                    tracing::warn!(attempt, error = %err, "terminal event publish failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "terminal event publish failed after 3 attempts; giving up");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPersistenceAdapter;
    use crate::tool_message_store::MemoryToolMessageStore;
    use crate::transport::MemoryTransport;

    #[test]
    fn registering_a_new_operation_cancels_the_prior_one() {
        let registry = OpsRegistry::new();
        let agent = Pubkey::from_label("A");
        let first = registry.register_operation(agent, "c1");
        assert!(!first.is_cancelled());

        let second = registry.register_operation(agent, "c1");
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn complete_operation_is_a_no_op_if_superseded() {
        let registry = OpsRegistry::new();
        let agent = Pubkey::from_label("A");
        let first = registry.register_operation(agent, "c1");
        let _second = registry.register_operation(agent, "c1");

        // completing the now-stale `first` signal must not remove the
        // entry installed for `second`.
        registry.complete_operation(agent, "c1", &first);
        assert!(registry.operations.contains_key(&(agent, "c1".to_string())));
    }

    #[test]
    fn complete_operation_removes_the_current_entry() {
        let registry = OpsRegistry::new();
        let agent = Pubkey::from_label("A");
        let signal = registry.register_operation(agent, "c1");
        registry.complete_operation(agent, "c1", &signal);
        assert!(!registry.operations.contains_key(&(agent, "c1".to_string())));
    }

    fn engine<'a>(
        ops: &'a OpsRegistry,
        tools: &'a ToolCatalog,
        transport: &'a MemoryTransport,
        tool_messages: &'a MemoryToolMessageStore,
        conversations: &'a ConversationStore,
    ) -> ExecutionEngine<'a> {
        ExecutionEngine::new(ops, tools, transport, tool_messages, conversations)
    }

    #[tokio::test]
    async fn drive_stream_flushes_on_cancellation_and_stops() {
        let ops = OpsRegistry::new();
        let tools = ToolCatalog::new();
        let transport = MemoryTransport::new();
        let tool_messages = MemoryToolMessageStore::new();
        let conversations = ConversationStore::new(Arc::new(MemoryPersistenceAdapter::new()));
        let engine = engine(&ops, &tools, &transport, &tool_messages, &conversations);
        let agent = Pubkey::from_label("A");
        let signal = ops.register_operation(agent, "c1");

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let tool_ctx = ToolCallContext::default();

        // Drive the turn concurrently with a task that feeds one delta,
        // then cancels once the engine has had a chance to buffer it —
        // exercising the "already-streamed output still gets flushed on
        // cancellation" guarantee without needing the engine itself to
        // outlive this function (it borrows its collaborators).
        let driver_signal = signal.clone();
        let driver = async move {
            tx.send(ModelEvent::TextDelta { text: "partial".into(), is_reasoning: false }).unwrap();
            tokio::task::yield_now().await;
            driver_signal.trip();
            drop(tx);
        };

        let turn = engine.drive_stream(agent, "agent-slug", "c1", None, &signal, rx, &tool_ctx, |_| None);

        let (_, (outcome, results)) = tokio::join!(driver, turn);

        assert_eq!(outcome, TurnOutcome::Interrupted);
        assert!(results.is_empty());

        let published = transport.published();
        assert!(published.iter().any(|e| e.content == "partial"));
        assert!(published.iter().any(|e| e.tags.iter().any(|t| t.value() == Some("interrupted"))));
    }

    #[tokio::test]
    async fn drive_stream_stores_and_publishes_tool_results() {
        let ops = OpsRegistry::new();
        let mut catalog = ToolCatalog::new();
        catalog.register(Box::new(crate::tools::EchoTool));
        let transport = MemoryTransport::new();
        let tool_messages = MemoryToolMessageStore::new();
        let conversations = ConversationStore::new(Arc::new(MemoryPersistenceAdapter::new()));
        let engine = engine(&ops, &catalog, &transport, &tool_messages, &conversations);
        let agent = Pubkey::from_label("A");
        let signal = ops.register_operation(agent, "c1");

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(ModelEvent::ToolCall {
            tool_call_id: "call-1".into(),
            tool_name: "echo".into(),
            params: serde_json::json!({"text": "hello"}),
        })
        .unwrap();
        tx.send(ModelEvent::SessionId("provider-session-1".into())).unwrap();
        drop(tx);

        let tool_ctx = ToolCallContext::default();
        let (outcome, results) = engine.drive_stream(agent, "agent-slug", "c1", Some("build"), &signal, rx, &tool_ctx, |_| None).await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(results.len(), 1);

        let published = transport.published();
        let tool_event = published.iter().find(|e| e.is_tool_event()).expect("tool-result event published");
        let stored = tool_messages.get(tool_event.id).await.unwrap().expect("full payload stored");
        assert_eq!(stored, vec![Message::assistant("hello")]);

        assert!(published.iter().any(|e| e.tags.iter().any(|t| t.value() == Some("complete"))));

        let conversation = conversations.get("c1").await.unwrap();
        let state = conversation.agent_state("agent-slug");
        assert_eq!(state.sessions_by_phase.get("build"), Some(&"provider-session-1".to_string()));
        assert!(!conversation.execution_time.is_active);
    }

    /// Fails with a non-tool-visible error, exercising the path where a
    /// tool failure aborts the turn outright instead of surfacing as a
    /// structured tool result.
    struct FatalTool;

    #[async_trait::async_trait]
    impl crate::tools::Tool for FatalTool {
        fn name(&self) -> &str {
            "fatal"
        }

        fn validate(&self, _params: &serde_json::Value) -> Result<(), crate::error::EngineError> {
            Ok(())
        }

        async fn call(&self, _params: serde_json::Value, _ctx: &ToolCallContext) -> Result<ToolOutput, crate::error::EngineError> {
            Err(crate::error::EngineError::System("unrecoverable".into()))
        }
    }

    #[tokio::test]
    async fn drive_stream_publishes_an_error_status_on_a_fatal_tool_failure() {
        let ops = OpsRegistry::new();
        let mut catalog = ToolCatalog::new();
        catalog.register(Box::new(FatalTool));
        let transport = MemoryTransport::new();
        let tool_messages = MemoryToolMessageStore::new();
        let conversations = ConversationStore::new(Arc::new(MemoryPersistenceAdapter::new()));
        let engine = engine(&ops, &catalog, &transport, &tool_messages, &conversations);
        let agent = Pubkey::from_label("A");
        let signal = ops.register_operation(agent, "c1");

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(ModelEvent::ToolCall { tool_call_id: "call-1".into(), tool_name: "fatal".into(), params: serde_json::json!({}) }).unwrap();
        drop(tx);

        let tool_ctx = ToolCallContext::default();
        let (outcome, _) = engine.drive_stream(agent, "agent-slug", "c1", None, &signal, rx, &tool_ctx, |_| None).await;

        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
        let published = transport.published();
        assert!(published.iter().any(|e| e.tags.iter().any(|t| t.value() == Some("error"))));
    }
}
