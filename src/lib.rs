//! # threadloom
//!
//! The conversation & agent-execution engine behind a multi-agent runtime
//! built over a shared, threaded, signed event log. Agents observe a common
//! history, take turns producing model output and invoking tools, and
//! delegate work to one another — all coordinated through this crate.
//!
//! ## Design principles
//!
//! - **Threaded history, not a flat log**: events form a DAG (a tree in
//!   practice) via `E` (root) and `e` (parent) tags; [`thread_path`] walks
//!   it to reconstruct the path relevant to any one reply.
//! - **Per-agent prompt assembly**: [`ContextBuilder`](context_builder::ContextBuilder)
//!   turns a conversation's shared history into the exact ordered message
//!   list one agent's model call should see, filtering, inlining, and role-
//!   assigning along the way.
//! - **Bounded context under adaptive truncation**: [`budgeter`] decides,
//!   per tool result, whether to inline it, point at a retrieval reference,
//!   or drop it — purely as a function of size, burial depth, and whether a
//!   reference exists.
//! - **Cooperative cancellation**: every turn is a task carrying an explicit
//!   cancellation signal from [`OpsRegistry`](execution::OpsRegistry); a new
//!   trigger for the same `(agent, conversation)` supersedes the old one.
//! - **Delegation as an aggregation barrier**: [`DelegationRegistry`](delegation::DelegationRegistry)
//!   tracks outbound requests to one or more agents and resumes the
//!   delegator exactly once, on completion, timeout, or cancellation.
//!
//! ## Main modules
//!
//! - [`model`]: the shared data types — [`model::Event`], [`model::Message`],
//!   [`model::Conversation`], [`model::AgentState`], [`model::TodoItem`],
//!   [`model::ToolResult`], [`model::DelegationRecord`].
//! - [`content_filter`]: stripping `<thinking>` spans and detecting
//!   reasoning-only content.
//! - [`entity_inliner`]: resolving `nostr:...` entity references through the
//!   transport and inlining their content.
//! - [`role_assigner`]: the event+viewer → `{role, content}` decision table.
//! - [`thread_path`]: ancestor-chain resolution and thread filtering.
//! - [`budgeter`]: the `ToolOutputBudgeter` inline/reference/omit decision.
//! - [`tool_message_store`]: durable tool-call-id → structured-messages
//!   side channel.
//! - [`context_builder`]: [`context_builder::ContextBuilder`], the
//!   orchestrator that composes all of the above into a prompt stream.
//! - [`delegation`]: [`delegation::DelegationRegistry`], correlating and
//!   aggregating delegated responses.
//! - [`store`]: [`store::ConversationStore`] and the
//!   [`store::PersistenceAdapter`] seam (in-memory and SQLite-backed).
//! - [`execution`]: [`execution::ExecutionEngine`] and
//!   [`execution::OpsRegistry`], running one agent turn end to end.
//! - [`streaming`]: [`streaming::StreamingPublisher`], buffering and
//!   flushing streamed model output on a bounded cadence.
//! - [`todo`]: write-only-replace CRUD/safety logic over todo lists.
//! - [`tools`]: the tool-execution framework glue — [`tools::Tool`],
//!   [`tools::ToolCatalog`].
//! - [`transport`]: the [`transport::Transport`] seam this crate calls
//!   through to publish, fetch, and subscribe to events.
//! - [`name_resolver`]: pubkey → display-name lookups with a best-effort
//!   cache.
//! - [`error`]: the crate-wide [`error::EngineError`].
//!
//! Key types are re-exported at the crate root for convenience.

pub mod budgeter;
pub mod content_filter;
pub mod context_builder;
pub mod delegation;
pub mod entity_inliner;
pub mod error;
pub mod execution;
pub mod model;
pub mod name_resolver;
pub mod role_assigner;
pub mod store;
pub mod streaming;
pub mod thread_path;
pub mod todo;
pub mod tool_message_store;
pub mod tools;
pub mod transport;

pub use context_builder::ContextBuilder;
pub use delegation::DelegationRegistry;
pub use error::EngineError;
pub use execution::{ExecutionEngine, OpsRegistry, Trigger, TurnOutcome};
pub use model::{
    AgentSlug, AgentState, Conversation, DelegationRecord, DelegationStatus, Event, EventId,
    EventKind, ExecutionTime, Message, PhaseTransition, Pubkey, Tag, TodoItem, TodoStatus,
    ToolOutput, ToolResult,
};
pub use store::ConversationStore;
pub use streaming::StreamingPublisher;
pub use thread_path::{thread_events, thread_path};
pub use tool_message_store::ToolMessageStore;
pub use tools::{Tool, ToolCatalog};
pub use transport::Transport;
