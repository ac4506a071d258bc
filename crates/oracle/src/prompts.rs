//! Prompt templates.
//!
//! Templates are plain text with `{{ name }}` placeholders. Rendering is
//! strict: a placeholder without a value is an error, never an empty string.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// System prompt for choosing sub-tasks; needs `scenario`.
pub const SELECT_SYSTEM: &str = "select_tasks_system";
/// User prompt for choosing sub-tasks; needs `task_count`, `sub_tasks`.
pub const SELECT_USER: &str = "select_tasks_user";
/// System prompt for document extraction.
pub const EXTRACT_SYSTEM: &str = "extract_model_system";
/// Re-prompt after a reply that did not parse.
pub const EXTRACT_RETRY_FORMAT: &str = "extract_retry_format";
/// Re-prompt after a reply that parsed but contained nothing.
pub const EXTRACT_RETRY_EMPTY: &str = "extract_retry_empty";
/// System prompt for implementing a sub-task; needs `scenario`.
pub const EVOLVE_SYSTEM: &str = "evolve_task_system";
/// User prompt for implementing a sub-task; needs `task_information`,
/// `current_code`, `former_feedback`, `knowledge`.
pub const EVOLVE_USER: &str = "evolve_task_user";

/// Errors raised while rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    /// No template registered under this name
    #[error("Unknown prompt template: {0}")]
    UnknownTemplate(String),

    /// A placeholder had no value
    #[error("Template '{template}' references undefined variable '{variable}'")]
    UndefinedVariable {
        /// Template name
        template: String,
        /// Placeholder name
        variable: String,
    },
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("literal pattern is valid")
    })
}

/// Named prompt templates, injected into every component that talks to
/// the oracle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplates {
    templates: BTreeMap<String, String>,
}

impl PromptTemplates {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The templates shipped with EvoLoop.
    pub fn builtin() -> Self {
        Self::new()
            .with(
                SELECT_SYSTEM,
                "You schedule work for an automated implementation loop.\n\
                 Scenario:\n{{ scenario }}\n\n\
                 Each candidate task comes with the feedback of its last attempt. \
                 Prefer tasks whose feedback shows they are close to working and \
                 avoid tasks that keep failing for reasons outside the code.\n\
                 Answer with a JSON object of the form {\"selected_factor\": [<index>, ...]}.",
            )
            .with(
                SELECT_USER,
                "Select {{ task_count }} tasks to implement in the next round.\n\n\
                 Candidates:\n{{ sub_tasks }}",
            )
            .with(
                EXTRACT_SYSTEM,
                "You read research documents and extract every model they define.\n\
                 Reply with a ```json fenced block holding one object whose keys are \
                 model names and whose values are objects with the fields \
                 \"description\", \"formulation\" and \"variables\".",
            )
            .with(
                EXTRACT_RETRY_FORMAT,
                "Your reply did not contain a valid ```json block with a JSON object. Try again.",
            )
            .with(
                EXTRACT_RETRY_EMPTY,
                "No model was extracted. Read the document again and try again.",
            )
            .with(
                EVOLVE_SYSTEM,
                "You write code that implements one task of the following scenario.\n\
                 {{ scenario }}\n\n\
                 Reply with the complete program in a single fenced code block.",
            )
            .with(
                EVOLVE_USER,
                "Task:\n{{ task_information }}\n\n\
                 Current code:\n{{ current_code }}\n\n\
                 Feedback on the current code:\n{{ former_feedback }}\n\n\
                 Related knowledge:\n{{ knowledge }}",
            )
    }

    /// Add or replace a template.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.templates.insert(name.into(), text.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(name, text);
        self
    }

    /// Overlay another set; its templates win.
    pub fn merge(&mut self, overrides: PromptTemplates) {
        self.templates.extend(overrides.templates);
    }

    /// Raw template text.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(|s| s.as_str())
    }

    /// Render a template with the given variables.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let template = self
            .get(name)
            .ok_or_else(|| PromptError::UnknownTemplate(name.to_string()))?;

        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for captures in placeholder_regex().captures_iter(template) {
            let (Some(whole), Some(var)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let value = vars
                .iter()
                .find(|(k, _)| *k == var.as_str())
                .map(|(_, v)| *v)
                .ok_or_else(|| PromptError::UndefinedVariable {
                    template: name.to_string(),
                    variable: var.as_str().to_string(),
                })?;
            out.push_str(&template[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let prompts = PromptTemplates::new().with("t", "a={{a}}, b={{ b }}, a again={{a}}");
        let text = prompts.render("t", &[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(text, "a=1, b=2, a again=1");
    }

    #[test]
    fn test_render_is_strict() {
        let prompts = PromptTemplates::new().with("t", "{{ missing }}");
        assert_eq!(
            prompts.render("t", &[]),
            Err(PromptError::UndefinedVariable {
                template: "t".to_string(),
                variable: "missing".to_string(),
            })
        );
        assert_eq!(
            prompts.render("nope", &[]),
            Err(PromptError::UnknownTemplate("nope".to_string()))
        );
    }

    #[test]
    fn test_builtin_templates_render() {
        let prompts = PromptTemplates::builtin();
        let system = prompts.render(SELECT_SYSTEM, &[("scenario", "daily stock data")]).unwrap();

        assert!(system.contains("daily stock data"));
        assert!(system.contains("{\"selected_factor\""));
        assert!(prompts.render(EXTRACT_SYSTEM, &[]).is_ok());
        assert!(prompts
            .render(
                EVOLVE_USER,
                &[
                    ("task_information", "t"),
                    ("current_code", "c"),
                    ("former_feedback", "f"),
                    ("knowledge", "k"),
                ],
            )
            .is_ok());
    }

    #[test]
    fn test_merge_overrides() {
        let mut prompts = PromptTemplates::builtin();
        prompts.merge(PromptTemplates::new().with(EXTRACT_RETRY_EMPTY, "again"));
        assert_eq!(prompts.get(EXTRACT_RETRY_EMPTY), Some("again"));
        assert!(prompts.get(SELECT_USER).is_some());
    }
}
