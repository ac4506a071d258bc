//! Multi-turn conversations with the oracle.

use crate::client::{ChatMessage, OracleClient, OracleError, OracleRequest};

/// A conversation that remembers earlier turns.
///
/// Corrective re-prompts are sent inside the same session so the oracle
/// sees the reply it is asked to fix.
pub struct ChatSession<'a> {
    client: &'a dyn OracleClient,
    system: String,
    history: Vec<ChatMessage>,
}

impl<'a> ChatSession<'a> {
    /// Start a session with a fixed system text.
    pub fn new(client: &'a dyn OracleClient, system: impl Into<String>) -> Self {
        Self {
            client,
            system: system.into(),
            history: Vec::new(),
        }
    }

    /// Send the next user turn and record the exchange.
    ///
    /// A failed call leaves the history unchanged.
    pub async fn complete(&mut self, user: &str, json_mode: bool) -> Result<String, OracleError> {
        let request = OracleRequest::new(self.system.clone(), user)
            .with_history(self.history.clone())
            .with_json_mode(json_mode);
        let reply = self.client.send_request(&request).await?;

        self.history.push(ChatMessage::user(user));
        self.history.push(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }

    /// Turns exchanged so far.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}
