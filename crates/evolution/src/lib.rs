//! Evolution layer - strategies that turn a subject into its next version.

#![warn(missing_docs)]

mod strategy;
mod oracle;

pub use strategy::EvolvingStrategy;
pub use oracle::OracleEvolvingStrategy;
