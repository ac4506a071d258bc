//! Knowledge base contract and the in-memory implementation.

use evoloop_core::{KnowledgeItem, QueriedKnowledge};
use evoloop_storage::KnowledgeStore;
use std::collections::HashSet;
use tracing::debug;

/// Append/query store of accumulated knowledge.
///
/// What a query looks like and what it returns is up to the implementation.
pub trait KnowledgeBase: Send + Sync {
    /// Query input
    type Query: ?Sized;
    /// Query result
    type Queried: QueriedKnowledge;

    /// Look up matching knowledge; `None` when nothing matches.
    fn query(&self, query: &Self::Query) -> Option<Self::Queried>;
}

/// What is known about one task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskKnowledge {
    /// Canonical task text
    pub information: String,
    /// Latest accepted attempt at this task
    pub success: Option<KnowledgeItem>,
    /// Rejected attempts, most recent first
    pub failures: Vec<KnowledgeItem>,
    /// Accepted attempts at other, related tasks
    pub similar_successes: Vec<KnowledgeItem>,
}

impl QueriedKnowledge for TaskKnowledge {}

impl TaskKnowledge {
    /// Prompt-ready text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(success) = &self.success {
            out.push_str("An accepted implementation of this task:\n");
            push_attempt(&mut out, success);
        }
        if !self.failures.is_empty() {
            out.push_str("Earlier failed attempts at this task:\n");
            for failure in &self.failures {
                push_attempt(&mut out, failure);
            }
        }
        if !self.similar_successes.is_empty() {
            out.push_str("Accepted implementations of similar tasks:\n");
            for similar in &self.similar_successes {
                out.push_str(&format!("{}\n", similar.task_information));
                push_attempt(&mut out, similar);
            }
        }
        if out.is_empty() {
            out.push_str("(none)");
        }
        out
    }
}

fn push_attempt(out: &mut String, item: &KnowledgeItem) {
    out.push_str(&format!("--- round {} ---\n", item.round));
    if let Some(implementation) = &item.implementation {
        out.push_str(&format!("```\n{}\n```\n", implementation.code.trim_end()));
    }
    out.push_str(&format!("{}\n", item.feedback));
}

/// Label words every task description contains.
const STOP_WORDS: &[&str] = &["name", "description", "formulation", "variables", "the", "and"];

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Append-only knowledge base kept in memory for the length of a run.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeBase {
    items: Vec<KnowledgeItem>,
    /// Number of leading items already written to a store
    persisted: usize,
}

impl InMemoryKnowledgeBase {
    /// Create an empty knowledge base.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a store; the loaded items count as persisted.
    pub async fn load_from(store: &dyn KnowledgeStore) -> evoloop_storage::Result<Self> {
        let items = store.list_knowledge().await?;
        debug!("Loaded {} knowledge items", items.len());
        Ok(Self {
            persisted: items.len(),
            items,
        })
    }

    /// Write items added since the last flush; returns how many were written.
    pub async fn persist_to(&mut self, store: &mut dyn KnowledgeStore) -> evoloop_storage::Result<usize> {
        let start = self.persisted;
        while self.persisted < self.items.len() {
            store.save_knowledge(&self.items[self.persisted]).await?;
            self.persisted += 1;
        }
        Ok(self.persisted - start)
    }

    /// Append an item.
    pub fn add(&mut self, item: KnowledgeItem) {
        self.items.push(item);
    }

    /// All items, oldest first.
    pub fn items(&self) -> &[KnowledgeItem] {
        &self.items
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the base is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Latest accepted attempt at a task.
    pub fn latest_success(&self, information: &str) -> Option<&KnowledgeItem> {
        self.items
            .iter()
            .rev()
            .find(|k| k.accepted && k.task_information == information)
    }

    /// Rejected attempts at a task, most recent first.
    pub fn failures(&self, information: &str, limit: usize) -> Vec<&KnowledgeItem> {
        self.items
            .iter()
            .rev()
            .filter(|k| !k.accepted && k.task_information == information)
            .take(limit)
            .collect()
    }

    /// Accepted attempts at other tasks, ranked by shared keywords.
    pub fn similar_successes(&self, information: &str, limit: usize) -> Vec<&KnowledgeItem> {
        let query = keywords(information);
        let mut scored: Vec<_> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, k)| k.accepted && k.task_information != information)
            .map(|(pos, k)| {
                let score = keywords(&k.task_information).intersection(&query).count();
                (pos, k, score)
            })
            .filter(|(_, _, score)| *score > 0)
            .collect();

        // Higher score first, newer first on ties
        scored.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| b.0.cmp(&a.0)));

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter(|(_, k, _)| seen.insert(k.task_information.as_str()))
            .take(limit)
            .map(|(_, k, _)| k)
            .collect()
    }
}

impl KnowledgeBase for InMemoryKnowledgeBase {
    type Query = str;
    type Queried = TaskKnowledge;

    fn query(&self, information: &str) -> Option<TaskKnowledge> {
        let success = self.latest_success(information).cloned();
        let failures: Vec<_> = self.failures(information, usize::MAX).into_iter().cloned().collect();
        if success.is_none() && failures.is_empty() {
            return None;
        }
        Some(TaskKnowledge {
            information: information.to_string(),
            success,
            failures,
            similar_successes: Vec::new(),
        })
    }
}
