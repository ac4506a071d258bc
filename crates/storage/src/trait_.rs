//! Storage trait abstraction.

use async_trait::async_trait;
use evoloop_core::{KnowledgeId, KnowledgeItem, RoundEvent, RunId};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Persistence for accumulated knowledge and the round timeline.
///
/// Knowledge items are append-only: saving an item with an existing id
/// replaces the file, but the engine never does that.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    // === Knowledge operations ===

    /// Save a knowledge item.
    async fn save_knowledge(&mut self, item: &KnowledgeItem) -> Result<()>;

    /// Load a knowledge item by ID.
    async fn load_knowledge(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>>;

    /// List all knowledge items, oldest first.
    async fn list_knowledge(&self) -> Result<Vec<KnowledgeItem>>;

    // === Round operations ===

    /// Save a round event.
    async fn save_round(&mut self, event: &RoundEvent) -> Result<()>;

    /// List round events, optionally only those of one run, in order.
    async fn list_rounds(&self, run_id: Option<RunId>) -> Result<Vec<RoundEvent>>;
}
