//! Oracle layer - everything that talks to the generative service.
//!
//! The client trait and its HTTP implementation, chat sessions, injected
//! prompt templates, reply parsing, and the counters that expose
//! degraded-mode operation.

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod http;
pub mod metrics;
pub mod parse;
pub mod prompts;
pub mod session;

pub use client::{estimate_tokens, ChatMessage, OracleClient, OracleError, OracleRequest, Role};
pub use config::OracleConfig;
pub use http::HttpOracleClient;
pub use metrics::{DegradedEvent, MetricsSnapshot, OracleMetrics};
pub use parse::ParseError;
pub use prompts::{PromptError, PromptTemplates};
pub use session::ChatSession;
