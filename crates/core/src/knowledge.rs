//! Knowledge model - insight accumulated across rounds.

use crate::id::KnowledgeId;
use crate::subject::Implementation;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Marker for knowledge a retrieval strategy derives and stores.
pub trait Knowledge: std::fmt::Debug + Send + Sync + 'static {}

/// Marker for the result of querying a knowledge base.
pub trait QueriedKnowledge: std::fmt::Debug + Send + Sync + 'static {}

impl<T: Knowledge> Knowledge for Vec<T> {}

impl QueriedKnowledge for () {}

/// One recorded attempt at a sub-task and how it was judged.
///
/// Items are never edited; a newer attempt is stored as a new item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Unique identifier
    pub id: KnowledgeId,

    /// Canonical task text (see `SubTask::information`)
    pub task_information: String,

    /// The implementation that was evaluated
    pub implementation: Option<Implementation>,

    /// Rendered evaluation feedback
    pub feedback: String,

    /// Whether the evaluator accepted the implementation
    pub accepted: bool,

    /// Round the attempt was made in (1-based)
    pub round: usize,

    /// Created at
    pub created_at: Time,
}

impl KnowledgeItem {
    /// Create a new knowledge item.
    pub fn new(
        task_information: impl Into<String>,
        implementation: Option<Implementation>,
        feedback: impl Into<String>,
        accepted: bool,
        round: usize,
    ) -> Self {
        Self {
            id: KnowledgeId::new(),
            task_information: task_information.into(),
            implementation,
            feedback: feedback.into(),
            accepted,
            round,
            created_at: chrono::Utc::now(),
        }
    }
}

impl Knowledge for KnowledgeItem {}
