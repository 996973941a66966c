//! Prompt message type produced by `role_assigner` and consumed by
//! `context_builder` / the model-invocation seam.
//!
//! Constructed via `Message::system(..)`/`Message::user(..)`/
//! `Message::assistant(..)`.

/// One message in a model prompt stream, with a role drawn from
/// `{assistant, user, system}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System(String),
    User(String),
    Assistant(String),
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System(content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User(content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant(content.into())
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System(s) | Message::User(s) | Message::Assistant(s) => s,
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            Message::System(_) => "system",
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
        }
    }
}
