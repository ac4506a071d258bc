//! Sub-task selection policies.

use crate::scheduler::PromptBudget;
use async_trait::async_trait;
use evoloop_core::{EvolvableSubject, FormerTraceIndex};
use evoloop_oracle::parse::parse_json_reply;
use evoloop_oracle::prompts::{SELECT_SYSTEM, SELECT_USER};
use evoloop_oracle::{DegradedEvent, OracleClient, OracleMetrics, OracleRequest, PromptError, PromptTemplates};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Key holding the chosen indices in an oracle reply.
pub const SELECTION_FIELD: &str = "selected_factor";

/// Why no selection could be made.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// Not even an empty candidate list fits the prompt budget
    #[error("Selection prompt does not fit in {limit} tokens after {attempts} attempts")]
    BudgetUnsatisfiable {
        /// Token limit
        limit: usize,
        /// Prompts sized before giving up
        attempts: usize,
    },

    /// Template rendering failed
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),
}

/// Chooses which pending sub-tasks enter the next round.
#[async_trait]
pub trait SubTaskSelector<S: EvolvableSubject>: Send + Sync {
    /// Pick at most `capacity` indices out of `pending`.
    async fn select(
        &self,
        pending: &BTreeSet<usize>,
        capacity: usize,
        subject: &S,
        former_trace: &FormerTraceIndex,
        scenario: &str,
    ) -> Result<BTreeSet<usize>, SelectionError>;
}

/// Uniform sampling without replacement.
pub struct RandomSelector {
    rng: Mutex<StdRng>,
}

impl RandomSelector {
    /// Create a selector seeded from the OS.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a reproducible selector.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: EvolvableSubject> SubTaskSelector<S> for RandomSelector {
    async fn select(
        &self,
        pending: &BTreeSet<usize>,
        capacity: usize,
        _subject: &S,
        _former_trace: &FormerTraceIndex,
        _scenario: &str,
    ) -> Result<BTreeSet<usize>, SelectionError> {
        let pool: Vec<usize> = pending.iter().copied().collect();
        let mut rng = self.rng.lock().await;
        let chosen: BTreeSet<usize> = pool.choose_multiple(&mut *rng, capacity).copied().collect();
        info!("Random selection: {:?}", chosen);
        Ok(chosen)
    }
}

/// Lets the oracle pick, informed by the feedback of earlier attempts.
///
/// Only pending tasks with earlier feedback are shown to the oracle. Any
/// reply that cannot be read as a list of indices falls back to the whole
/// pending set.
pub struct OracleSelector {
    client: Arc<dyn OracleClient>,
    prompts: PromptTemplates,
    budget: PromptBudget,
    metrics: Arc<OracleMetrics>,
}

impl OracleSelector {
    /// Create a selector.
    pub fn new(
        client: Arc<dyn OracleClient>,
        prompts: PromptTemplates,
        budget: PromptBudget,
        metrics: Arc<OracleMetrics>,
    ) -> Self {
        Self {
            client,
            prompts,
            budget,
            metrics,
        }
    }

    fn fallback(&self, pending: &BTreeSet<usize>, reason: &str) -> BTreeSet<usize> {
        self.metrics.record(DegradedEvent::SelectionFallback, reason);
        pending.clone()
    }
}

fn render_candidate(index: usize, information: &str, feedback: &str) -> String {
    format!(
        "index: {}\n{}\nfeedback of the last attempt:\n{}\n",
        index, information, feedback
    )
}

/// Non-negative integer entries of the selection field.
///
/// `None` when the field is missing or not a list.
pub fn read_selection(reply: &serde_json::Map<String, Value>) -> Option<BTreeSet<usize>> {
    let entries = reply.get(SELECTION_FIELD)?.as_array()?;
    Some(
        entries
            .iter()
            .filter_map(Value::as_u64)
            .filter_map(|i| usize::try_from(i).ok())
            .collect(),
    )
}

#[async_trait]
impl<S: EvolvableSubject> SubTaskSelector<S> for OracleSelector {
    async fn select(
        &self,
        pending: &BTreeSet<usize>,
        capacity: usize,
        subject: &S,
        former_trace: &FormerTraceIndex,
        scenario: &str,
    ) -> Result<BTreeSet<usize>, SelectionError> {
        let candidates: Vec<String> = pending
            .iter()
            .filter_map(|&index| {
                let information = subject.sub_task(index)?.information();
                let feedback = former_trace.get(&information)?;
                Some(render_candidate(index, &information, feedback))
            })
            .collect();
        debug!("{} of {} pending tasks have earlier feedback", candidates.len(), pending.len());

        let system = self.prompts.render(SELECT_SYSTEM, &[("scenario", scenario)])?;
        let task_count = capacity.to_string();
        let fitted = self.budget.fit(self.client.as_ref(), &system, candidates, |entries| {
            self.prompts.render(
                SELECT_USER,
                &[("task_count", &task_count), ("sub_tasks", &entries.concat())],
            )
        });
        let user = match fitted {
            Ok(user) => user,
            Err(e) => {
                if let SelectionError::BudgetUnsatisfiable { .. } = &e {
                    self.metrics.record(DegradedEvent::BudgetUnsatisfiable, &e.to_string());
                }
                return Err(e);
            }
        };

        self.metrics.record_request();
        let request = OracleRequest::new(system, user).with_json_mode(true);
        let reply = match self.client.send_request(&request).await {
            Ok(reply) => reply,
            Err(e) => return Ok(self.fallback(pending, &format!("oracle unavailable: {}", e))),
        };

        let object = match parse_json_reply(&reply) {
            Ok(object) => object,
            Err(e) => return Ok(self.fallback(pending, &format!("unreadable reply: {}", e))),
        };
        match read_selection(&object) {
            Some(selection) => {
                info!("Oracle selection: {:?}", selection);
                Ok(selection)
            }
            None => Ok(self.fallback(
                pending,
                &format!("reply has no '{}' list", SELECTION_FIELD),
            )),
        }
    }
}

/// Selector strategies available.
pub enum SelectorStrategy {
    /// Uniform random sampling
    Random(RandomSelector),
    /// Oracle-guided choice
    Oracle(OracleSelector),
}

#[async_trait]
impl<S: EvolvableSubject> SubTaskSelector<S> for SelectorStrategy {
    async fn select(
        &self,
        pending: &BTreeSet<usize>,
        capacity: usize,
        subject: &S,
        former_trace: &FormerTraceIndex,
        scenario: &str,
    ) -> Result<BTreeSet<usize>, SelectionError> {
        match self {
            Self::Random(s) => s.select(pending, capacity, subject, former_trace, scenario).await,
            Self::Oracle(s) => s.select(pending, capacity, subject, former_trace, scenario).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoloop_core::{SubTask, TaskSubject};
    use evoloop_oracle::OracleError;
    use std::sync::Mutex as StdMutex;

    struct FixedOracle {
        reply: Result<String, String>,
        seen: StdMutex<Vec<OracleRequest>>,
    }

    impl FixedOracle {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen: StdMutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err("connection refused".to_string()),
                seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OracleClient for FixedOracle {
        async fn send_request(&self, request: &OracleRequest) -> Result<String, OracleError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().map_err(OracleError::Malformed)
        }
    }

    fn subject() -> TaskSubject {
        TaskSubject::new(
            (0..6)
                .map(|i| SubTask::new(format!("factor{}", i), format!("factor number {}", i)))
                .collect(),
        )
    }

    fn former(subject: &TaskSubject, indices: &[usize]) -> FormerTraceIndex {
        let mut index = FormerTraceIndex::default();
        for &i in indices {
            index.insert(subject.sub_tasks()[i].information(), format!("attempt {} failed", i));
        }
        index
    }

    fn oracle_selector(oracle: Arc<FixedOracle>, token_limit: usize) -> (OracleSelector, Arc<OracleMetrics>) {
        let metrics = Arc::new(OracleMetrics::new());
        let selector = OracleSelector::new(
            oracle,
            PromptTemplates::builtin(),
            PromptBudget::new(token_limit, 8),
            metrics.clone(),
        );
        (selector, metrics)
    }

    #[tokio::test]
    async fn test_random_selects_exactly_capacity() {
        let selector = RandomSelector::seeded(7);
        let pending: BTreeSet<usize> = (0..10).collect();
        let subject = subject();

        for capacity in [0, 1, 4, 10] {
            let chosen = selector
                .select(&pending, capacity, &subject, &FormerTraceIndex::default(), "")
                .await
                .unwrap();
            assert_eq!(chosen.len(), capacity);
            assert!(chosen.is_subset(&pending));
        }
    }

    #[tokio::test]
    async fn test_oracle_keeps_integer_entries() {
        let oracle = Arc::new(FixedOracle::replying(r#"{"selected_factor": [1, 2, "x", 3.5]}"#));
        let (selector, metrics) = oracle_selector(oracle.clone(), 100_000);
        let subject = subject();
        let pending = BTreeSet::from([1, 2, 3, 4]);

        let chosen = selector
            .select(&pending, 2, &subject, &former(&subject, &[1, 2, 3]), "scenario")
            .await
            .unwrap();

        assert_eq!(chosen, BTreeSet::from([1, 2]));
        assert!(!metrics.snapshot().degraded());

        let seen = oracle.seen.lock().unwrap();
        assert!(seen[0].json_mode);
        // Only tasks with earlier feedback are offered
        assert!(seen[0].user.contains("factor number 3"));
        assert!(!seen[0].user.contains("factor number 4"));
    }

    #[tokio::test]
    async fn test_oracle_fallbacks_return_pending() {
        let subject = subject();
        let pending = BTreeSet::from([0, 2, 5]);

        for reply in ["not json at all", r#"{"other": [1]}"#, r#"{"selected_factor": 3}"#] {
            let (selector, metrics) = oracle_selector(Arc::new(FixedOracle::replying(reply)), 100_000);
            let chosen = selector
                .select(&pending, 1, &subject, &former(&subject, &[0]), "scenario")
                .await
                .unwrap();
            assert_eq!(chosen, pending, "reply {:?}", reply);
            assert_eq!(metrics.snapshot().selection_fallbacks, 1);
        }

        let (selector, metrics) = oracle_selector(Arc::new(FixedOracle::failing()), 100_000);
        let chosen = selector
            .select(&pending, 1, &subject, &former(&subject, &[0]), "scenario")
            .await
            .unwrap();
        assert_eq!(chosen, pending);
        assert_eq!(metrics.snapshot().selection_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_oversized_prompt_drops_candidates() {
        let oracle = Arc::new(FixedOracle::replying(r#"{"selected_factor": [0]}"#));
        let subject = subject();
        let mut former = former(&subject, &[0, 1]);
        former.insert(subject.sub_tasks()[1].information(), "x".repeat(4_000));

        let system = PromptTemplates::builtin()
            .render(SELECT_SYSTEM, &[("scenario", "scenario")])
            .unwrap();
        let limit = oracle.estimate_size(&system, "") + 300;
        let (selector, metrics) = oracle_selector(oracle.clone(), limit);

        let chosen = selector
            .select(&BTreeSet::from([0, 1]), 1, &subject, &former, "scenario")
            .await
            .unwrap();

        assert_eq!(chosen, BTreeSet::from([0]));
        let seen = oracle.seen.lock().unwrap();
        assert!(seen[0].user.contains("factor number 0"));
        assert!(!seen[0].user.contains("factor number 1"));
        assert_eq!(metrics.snapshot().budget_unsatisfiable, 0);
    }

    #[tokio::test]
    async fn test_budget_unsatisfiable() {
        let oracle = Arc::new(FixedOracle::replying(r#"{"selected_factor": [0]}"#));
        let (selector, metrics) = oracle_selector(oracle.clone(), 10);
        let subject = subject();

        let result = selector
            .select(&BTreeSet::from([0, 1]), 1, &subject, &former(&subject, &[0, 1]), "scenario")
            .await;

        assert!(matches!(result, Err(SelectionError::BudgetUnsatisfiable { limit: 10, .. })));
        assert!(oracle.seen.lock().unwrap().is_empty());
        assert_eq!(metrics.snapshot().budget_unsatisfiable, 1);
    }

    #[test]
    fn test_read_selection() {
        let object = |s: &str| parse_json_reply(s).unwrap();
        assert_eq!(
            read_selection(&object(r#"{"selected_factor": [4, -1, true, 2]}"#)),
            Some(BTreeSet::from([2, 4]))
        );
        assert_eq!(read_selection(&object(r#"{"selected_factor": "1,2"}"#)), None);
        assert_eq!(read_selection(&object(r#"{}"#)), None);
    }
}
