//! HTTP oracle client for OpenAI-compatible chat endpoints.

use crate::client::{ChatMessage, OracleClient, OracleError, OracleRequest};
use crate::config::OracleConfig;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::json;
use tracing::{debug, warn};

/// Chat-completions client.
#[derive(Clone)]
pub struct HttpOracleClient {
    /// HTTP client
    client: Client,

    /// API base URL
    url: String,

    /// Model name
    model: String,

    /// Bearer token, if any
    api_key: Option<String>,

    /// Sampling temperature
    temperature: f32,
}

impl HttpOracleClient {
    /// Create a client; the API key is read from `config.api_key_env`.
    ///
    /// A missing key is allowed for local endpoints that do not check it.
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                "{} is not set, sending oracle requests without authorization",
                config.api_key_env
            );
        }

        let client = ClientBuilder::new()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    /// Model this client talks to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Request body for the chat-completions endpoint.
    fn payload(&self, request: &OracleRequest) -> serde_json::Value {
        let messages: Vec<ChatMessage> = request.messages();
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if request.json_mode {
            payload["response_format"] = json!({"type": "json_object"});
        }
        payload
    }
}

#[async_trait]
impl OracleClient for HttpOracleClient {
    async fn send_request(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let payload = self.payload(request);
        debug!(
            messages = request.history.len() + 2,
            json_mode = request.json_mode,
            "Sending oracle request"
        );

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api { status, body });
        }

        #[derive(serde::Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(serde::Deserialize)]
        struct Choice {
            message: Message,
        }

        #[derive(serde::Deserialize)]
        struct Message {
            content: Option<String>,
        }

        let response_data: Response = response.json().await?;
        response_data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Malformed("reply has no message content".to_string()))
    }
}
