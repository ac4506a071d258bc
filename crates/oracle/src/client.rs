//! Oracle client abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors returned by an oracle client.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Oracle API error (status {status}): {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The endpoint answered but the reply had no usable content
    #[error("Malformed oracle response: {0}")]
    Malformed(String),
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// Caller turn
    User,
    /// Oracle turn
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it
    pub role: Role,
    /// What was said
    pub content: String,
}

impl ChatMessage {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single request to the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    /// System text
    pub system: String,
    /// Earlier turns of the same conversation
    pub history: Vec<ChatMessage>,
    /// User text for this turn
    pub user: String,
    /// Ask for a raw JSON reply
    pub json_mode: bool,
}

impl OracleRequest {
    /// Create a request without history.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            history: Vec::new(),
            user: user.into(),
            json_mode: false,
        }
    }

    /// Set JSON mode.
    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    /// Set the conversation history.
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Full message list, system first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage {
            role: Role::System,
            content: self.system.clone(),
        });
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.user.clone()));
        messages
    }
}

/// Tokens charged per message on top of its content.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Rough token count of a text (about four characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// The external generative service.
///
/// Calls are request/response; timeouts are the implementation's concern.
#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Send a request and return the raw reply text.
    async fn send_request(&self, request: &OracleRequest) -> Result<String, OracleError>;

    /// Pre-flight size of a system/user pair, in tokens.
    fn estimate_size(&self, system: &str, user: &str) -> usize {
        estimate_tokens(system) + estimate_tokens(user) + 2 * MESSAGE_OVERHEAD_TOKENS
    }
}
