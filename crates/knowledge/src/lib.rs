//! Knowledge layer - the knowledge base, retrieval strategies, and
//! document extraction.

#![warn(missing_docs)]

pub mod base;
pub mod retrieval;
pub mod extraction;

pub use base::{InMemoryKnowledgeBase, KnowledgeBase, TaskKnowledge};
pub use retrieval::{QueriedTaskKnowledge, RetrievalConfig, RetrievalStrategy, TaskRetrievalStrategy};
pub use extraction::{merge_catalogs, ExtractionConfig, KnowledgeExtractor, ModelCatalog, ModelDescription};
