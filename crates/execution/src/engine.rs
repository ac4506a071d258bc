//! The evolving engine - runs the round loop.

use crate::evaluator::Evaluator;
use crate::scheduler::TaskScheduler;
use evoloop_core::{EvoStep, EvolvableSubject, Feedback, FormerTraceIndex, RoundEvent, RunId, Trace};
use evoloop_evolution::EvolvingStrategy;
use evoloop_knowledge::RetrievalStrategy;
use evoloop_oracle::{DegradedEvent, OracleMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for the evolving engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Round ceiling
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Whether knowledge is generated after each round
    #[serde(default = "default_generate_knowledge")]
    pub generate_knowledge: bool,
}

fn default_max_rounds() -> usize {
    10
}

fn default_generate_knowledge() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            generate_knowledge: default_generate_knowledge(),
        }
    }
}

/// Where the engine is in its round cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Not started
    Idle,
    /// Choosing the tasks of the round
    Selecting,
    /// Producing the next subject
    Evolving,
    /// Waiting on the evaluator
    Evaluating,
    /// Appending to the trace and the knowledge base
    Recording,
    /// Nothing pending or the round ceiling is reached
    Done,
}

/// The evolving engine.
///
/// Runs the round loop:
/// ```text
/// Select → Evolve → Evaluate → Record → (Select | Done)
/// ```
/// The engine owns the live subject, the trace, and the retrieval
/// strategy. Selector and evaluator failures degrade a round but never
/// stop the loop.
pub struct EvolvingEngine<S, F, R>
where
    S: EvolvableSubject,
    F: Feedback,
    R: RetrievalStrategy<S, F>,
{
    subject: S,
    scenario: String,
    scheduler: TaskScheduler<S>,
    evolving: Box<dyn EvolvingStrategy<S, R::Queried, F>>,
    retrieval: R,
    evaluator: Box<dyn Evaluator<S, F>>,
    config: EngineConfig,
    metrics: Option<Arc<OracleMetrics>>,
    trace: Trace<S, R::Queried, F>,
    pending: BTreeSet<usize>,
    accepted: BTreeSet<usize>,
    phase: EnginePhase,
    run_id: RunId,
}

impl<S, F, R> EvolvingEngine<S, F, R>
where
    S: EvolvableSubject,
    F: Feedback,
    R: RetrievalStrategy<S, F>,
{
    /// Create an engine; every sub-task of `subject` starts pending.
    pub fn new(
        subject: S,
        scheduler: TaskScheduler<S>,
        evolving: Box<dyn EvolvingStrategy<S, R::Queried, F>>,
        retrieval: R,
        evaluator: Box<dyn Evaluator<S, F>>,
    ) -> Self {
        let pending = subject.task_indices();
        Self {
            subject,
            scenario: String::new(),
            scheduler,
            evolving,
            retrieval,
            evaluator,
            config: EngineConfig::default(),
            metrics: None,
            trace: Trace::new(),
            pending,
            accepted: BTreeSet::new(),
            phase: EnginePhase::Idle,
            run_id: RunId::new(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the scenario description passed to the selector.
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = scenario.into();
        self
    }

    /// Count missing feedback in shared metrics.
    pub fn with_metrics(mut self, metrics: Arc<OracleMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn finished(&self) -> bool {
        self.pending.is_empty() || self.trace.len() >= self.config.max_rounds
    }

    /// Run one round.
    ///
    /// Returns `None` once the engine is done.
    pub async fn run_round(&mut self) -> Option<RoundEvent> {
        if self.finished() {
            self.phase = EnginePhase::Done;
            return None;
        }
        let round = self.trace.len() + 1;
        info!("Starting round {} with {} pending tasks", round, self.pending.len());

        self.phase = EnginePhase::Selecting;
        let former_trace = FormerTraceIndex::build(&self.trace);
        let selection = self
            .scheduler
            .plan(&self.pending, &self.subject, &former_trace, &self.scenario)
            .await;
        debug!("Round {} selection: {:?}", round, selection.indices);

        self.phase = EnginePhase::Evolving;
        let queried = self.retrieval.query(&self.subject, &self.trace).await;
        let evolved = self
            .evolving
            .evolve(
                std::slice::from_ref(&self.subject),
                &selection.indices,
                &self.trace,
                queried.as_ref(),
            )
            .await;
        self.subject = evolved;

        self.phase = EnginePhase::Evaluating;
        let feedback = self.evaluator.evaluate(&self.subject, &selection.indices).await;
        if feedback.is_none() {
            match &self.metrics {
                Some(metrics) => metrics.record(
                    DegradedEvent::MissingFeedback,
                    &format!("round {} produced no feedback", round),
                ),
                None => warn!("Round {} produced no feedback", round),
            }
        }

        self.phase = EnginePhase::Recording;
        if let Some(feedback) = &feedback {
            for &index in &selection.indices {
                if feedback.is_accepted(index) {
                    self.pending.remove(&index);
                    self.accepted.insert(index);
                }
            }
        }
        let has_feedback = feedback.is_some();
        self.trace.push(
            EvoStep::new(self.subject.snapshot())
                .with_knowledge(queried)
                .with_feedback(feedback),
        );
        if self.config.generate_knowledge {
            self.retrieval.generate_knowledge(&self.trace, false).await;
        }

        let mut event = RoundEvent::new(self.run_id, round);
        event.selected = selection.indices;
        event.accepted = self.accepted.clone();
        event.pending = self.pending.clone();
        event.has_feedback = has_feedback;
        event.selection_degraded = selection.degraded;
        info!(
            "Round {} done: {} accepted, {} pending",
            round,
            self.accepted.len(),
            self.pending.len()
        );

        self.phase = if self.finished() {
            EnginePhase::Done
        } else {
            EnginePhase::Selecting
        };
        Some(event)
    }

    /// Run rounds until done.
    pub async fn run(&mut self) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.run_round().await {
            events.push(event);
        }
        info!("Run {} finished after {} rounds", self.run_id, events.len());
        events
    }

    /// Current phase.
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// The live subject.
    pub fn subject(&self) -> &S {
        &self.subject
    }

    /// Steps recorded so far.
    pub fn trace(&self) -> &Trace<S, R::Queried, F> {
        &self.trace
    }

    /// Tasks not yet accepted.
    pub fn pending(&self) -> &BTreeSet<usize> {
        &self.pending
    }

    /// Tasks accepted so far.
    pub fn accepted(&self) -> &BTreeSet<usize> {
        &self.accepted
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The retrieval strategy.
    pub fn retrieval(&self) -> &R {
        &self.retrieval
    }

    /// Consume the engine, returning the final subject and the retrieval
    /// strategy.
    pub fn into_parts(self) -> (S, R) {
        (self.subject, self.retrieval)
    }
}
