//! Storage abstraction and implementations for EvoLoop.
//!
//! This crate provides a trait-based storage interface with a JSON file
//! reference implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;

pub use trait_::{KnowledgeStore, StorageError, Result};
pub use json_storage::JsonStorage;
