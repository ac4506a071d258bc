//! Bounded-retry extraction of structured model descriptions from
//! documents.
//!
//! Each document is read in its own chat session. A reply that does not
//! parse, or parses to nothing, gets a corrective re-prompt; after
//! `max_attempts` oracle calls whatever was collected is returned, which
//! may be nothing.

use evoloop_core::SubTask;
use evoloop_oracle::parse::parse_fenced_object;
use evoloop_oracle::prompts::{EXTRACT_RETRY_EMPTY, EXTRACT_RETRY_FORMAT, EXTRACT_SYSTEM};
use evoloop_oracle::{ChatSession, DegradedEvent, OracleClient, OracleMetrics, PromptError, PromptTemplates};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Oracle calls allowed per document
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_max_attempts() -> usize {
    10
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// A model as described by a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Prose description
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,

    /// Formulation text
    #[serde(default, deserialize_with = "lenient_string")]
    pub formulation: String,

    /// Variables, in whatever shape the document gave them
    #[serde(default)]
    pub variables: Value,
}

/// Accept any JSON value where a string is expected.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Named model descriptions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelDescription>,
}

impl ModelCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Look up a model by name.
    pub fn get(&self, name: &str) -> Option<&ModelDescription> {
        self.models.get(name)
    }

    /// Iterate models by name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelDescription)> {
        self.models.iter()
    }

    /// Insert unless the name is already present; returns whether it was added.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, model: ModelDescription) -> bool {
        match self.models.entry(name.into()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(model);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Turn the catalog into sub-tasks, in name order.
    pub fn into_sub_tasks(self) -> Vec<SubTask> {
        self.models
            .into_iter()
            .map(|(name, model)| {
                let mut task = SubTask::new(name, model.description).with_variables(model.variables);
                if !model.formulation.is_empty() {
                    task = task.with_formulation(model.formulation);
                }
                task
            })
            .collect()
    }
}

/// Merge catalogs from several sources.
///
/// When a name appears more than once the variant with the longest
/// formulation wins; on equal length the earlier source wins.
pub fn merge_catalogs<'a>(sources: impl IntoIterator<Item = &'a ModelCatalog>) -> ModelCatalog {
    let mut merged = ModelCatalog::new();
    for source in sources {
        for (name, model) in source.iter() {
            match merged.models.get_mut(name) {
                Some(existing) => {
                    if model.formulation.chars().count() > existing.formulation.chars().count() {
                        *existing = model.clone();
                    }
                }
                None => {
                    merged.models.insert(name.clone(), model.clone());
                }
            }
        }
    }
    merged
}

/// Extracts model catalogs from documents through the oracle.
pub struct KnowledgeExtractor {
    client: Arc<dyn OracleClient>,
    prompts: PromptTemplates,
    config: ExtractionConfig,
    metrics: Arc<OracleMetrics>,
}

impl KnowledgeExtractor {
    /// Create an extractor.
    pub fn new(client: Arc<dyn OracleClient>, prompts: PromptTemplates, metrics: Arc<OracleMetrics>) -> Self {
        Self {
            client,
            prompts,
            config: ExtractionConfig::default(),
            metrics,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ExtractionConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract the models one document describes.
    ///
    /// Only a missing or broken prompt template is an error; oracle
    /// failures end in an empty catalog.
    pub async fn extract_from_document(&self, content: &str) -> Result<ModelCatalog, PromptError> {
        let system = self.prompts.render(EXTRACT_SYSTEM, &[])?;
        let retry_format = self.prompts.render(EXTRACT_RETRY_FORMAT, &[])?;
        let retry_empty = self.prompts.render(EXTRACT_RETRY_EMPTY, &[])?;

        let mut session = ChatSession::new(self.client.as_ref(), system);
        let mut user_prompt = content.to_string();
        let mut catalog = ModelCatalog::new();

        for attempt in 1..=self.config.max_attempts {
            self.metrics.record_request();
            let reply = match session.complete(&user_prompt, false).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(attempt, "Extraction request failed: {}", e);
                    continue;
                }
            };

            match parse_fenced_object(&reply) {
                Err(e) => {
                    self.metrics.record(
                        DegradedEvent::ExtractionRetry,
                        &format!("attempt {}: {}", attempt, e),
                    );
                    user_prompt = retry_format.clone();
                }
                Ok(object) => {
                    for (name, value) in object {
                        match serde_json::from_value::<ModelDescription>(value) {
                            Ok(model) => {
                                catalog.insert_if_absent(name, model);
                            }
                            Err(e) => debug!("Skipping model '{}': {}", name, e),
                        }
                    }
                    if !catalog.is_empty() {
                        info!("Extracted {} models in {} attempts", catalog.len(), attempt);
                        return Ok(catalog);
                    }
                    self.metrics.record(
                        DegradedEvent::ExtractionRetry,
                        &format!("attempt {}: no model extracted", attempt),
                    );
                    user_prompt = retry_empty.clone();
                }
            }
        }

        self.metrics.record(
            DegradedEvent::ExtractionExhausted,
            &format!("no model extracted after {} attempts", self.config.max_attempts),
        );
        Ok(catalog)
    }

    /// Extract every `(source, content)` document, keeping source order.
    pub async fn extract_from_documents(
        &self,
        documents: &[(String, String)],
    ) -> Result<Vec<(String, ModelCatalog)>, PromptError> {
        let mut per_source = Vec::with_capacity(documents.len());
        for (source, content) in documents {
            debug!("Extracting models from {}", source);
            let catalog = self.extract_from_document(content).await?;
            info!("{}: {} models", source, catalog.len());
            per_source.push((source.clone(), catalog));
        }
        Ok(per_source)
    }
}
