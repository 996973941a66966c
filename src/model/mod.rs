//! Core data types shared across the engine: events and their ids/tags,
//! prompt messages, conversation state, todos, delegation records, and
//! tool results.

pub mod conversation;
pub mod delegation;
pub mod event;
pub mod message;
pub mod todo;
pub mod tool_result;

pub use conversation::{AgentSlug, AgentState, Conversation, ExecutionTime, PhaseTransition};
pub use delegation::{DelegationRecord, DelegationStatus};
pub use event::{now_seconds, Event, EventId, EventKind, Pubkey, Tag};
pub use message::Message;
pub use todo::{TodoItem, TodoStatus};
pub use tool_result::{ToolOutput, ToolResult};
