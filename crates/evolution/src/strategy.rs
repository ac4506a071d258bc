//! The evolving-strategy contract.

use async_trait::async_trait;
use evoloop_core::{EvolvableSubject, Feedback, QueriedKnowledge, Trace};
use std::collections::BTreeSet;

/// Produces the next version of a subject.
///
/// `evolve` must not mutate its inputs and must leave sub-tasks outside
/// `selected` as they were in the first subject. Passing several subjects
/// lets a strategy draw on a whole cohort; the first one is the base of
/// the result.
#[async_trait]
pub trait EvolvingStrategy<S, Q, F>: Send + Sync
where
    S: EvolvableSubject,
    Q: QueriedKnowledge,
    F: Feedback,
{
    /// Evolve the selected sub-tasks.
    async fn evolve(
        &self,
        subjects: &[S],
        selected: &BTreeSet<usize>,
        trace: &Trace<S, Q, F>,
        queried_knowledge: Option<&Q>,
    ) -> S;
}
