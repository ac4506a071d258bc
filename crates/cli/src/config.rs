//! `evoloop` configuration file.

use evoloop_execution::{EngineConfig, EvaluatorConfig, SchedulerConfig};
use evoloop_knowledge::{ExtractionConfig, RetrievalConfig};
use evoloop_oracle::{OracleConfig, PromptTemplates};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Everything `evoloop` can be configured with. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvoConfig {
    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    /// Overrides for the built-in prompt templates
    #[serde(default)]
    pub prompts: PromptTemplates,
}

impl EvoConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.scheduler.tasks_per_round == 0, "scheduler.tasks_per_round must be at least 1"),
            (self.engine.max_rounds == 0, "engine.max_rounds must be at least 1"),
            (self.extraction.max_attempts == 0, "extraction.max_attempts must be at least 1"),
            (self.oracle.token_limit == 0, "oracle.token_limit must be at least 1"),
            (self.oracle.timeout_secs == 0, "oracle.timeout_secs must be at least 1"),
            (self.evaluator.timeout_secs == 0, "evaluator.timeout_secs must be at least 1"),
            (self.evaluator.command.is_empty(), "evaluator.command must name a program"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }

    /// Built-in templates with the configured overrides applied.
    pub fn prompt_templates(&self) -> PromptTemplates {
        let mut templates = PromptTemplates::builtin();
        templates.merge(self.prompts.clone());
        templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoloop_execution::SelectionPolicy;
    use evoloop_oracle::prompts::EXTRACT_RETRY_EMPTY;

    #[test]
    fn test_defaults() {
        let config: EvoConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.oracle.token_limit, 100_000);
        assert_eq!(config.extraction.max_attempts, 10);
        assert_eq!(config.scheduler.policy, SelectionPolicy::Random);
        assert!(config.engine.generate_knowledge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config: EvoConfig = serde_json::from_str(
            r#"{
                "scheduler": {"policy": "oracle", "tasks_per_round": 2},
                "evaluator": {"command": ["sh", "{file}"], "file_extension": "sh"},
                "prompts": {"extract_retry_empty": "Nothing found, look again."}
            }"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.policy, SelectionPolicy::Oracle);
        assert_eq!(config.scheduler.tasks_per_round, 2);
        assert_eq!(config.scheduler.max_fit_attempts, 16);
        assert_eq!(config.evaluator.timeout_secs, 600);
        assert_eq!(
            config.prompt_templates().get(EXTRACT_RETRY_EMPTY),
            Some("Nothing found, look again.")
        );
        // Untouched templates keep their built-in text
        assert!(config.prompt_templates().get("select_tasks_system").is_some());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = EvoConfig::default();
        config.scheduler.tasks_per_round = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EvoConfig::default();
        config.evaluator.command.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evoloop.json");
        std::fs::write(&path, r#"{"engine": {"max_rounds": 0}}"#).unwrap();
        assert!(matches!(EvoConfig::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, r#"{"engine": {"max_rounds": 3}}"#).unwrap();
        assert_eq!(EvoConfig::load(&path).unwrap().engine.max_rounds, 3);

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(EvoConfig::load(&path), Err(ConfigError::Json(_))));
    }
}
