//! Execution layer - task scheduling, evaluation, and the round loop.

#![warn(missing_docs)]

pub mod selector;
pub mod scheduler;
pub mod evaluator;
pub mod engine;

pub use selector::{OracleSelector, RandomSelector, SelectionError, SelectorStrategy, SubTaskSelector};
pub use scheduler::{PromptBudget, Selection, SchedulerConfig, SelectionPolicy, TaskScheduler};
pub use evaluator::{CommandEvaluator, Evaluator, EvaluatorConfig};
pub use engine::{EngineConfig, EnginePhase, EvolvingEngine};
