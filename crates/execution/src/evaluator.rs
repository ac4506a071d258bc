//! Evaluation boundary and the external-command evaluator.

use async_trait::async_trait;
use evoloop_core::{EvolvableSubject, Feedback, SubjectFeedback, TaskFeedback, TaskSubject};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Placeholder replaced by the implementation file path.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Characters of process output kept in feedback.
const OUTPUT_TAIL_CHARS: usize = 2_000;

/// Judges the selected sub-tasks of a subject, once per round.
///
/// `None` means no feedback could be produced at all.
#[async_trait]
pub trait Evaluator<S: EvolvableSubject, F: Feedback>: Send + Sync {
    /// Evaluate the selected sub-tasks.
    async fn evaluate(&self, subject: &S, selected: &BTreeSet<usize>) -> Option<F>;
}

/// Settings for [`CommandEvaluator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Program and arguments; `{file}` is replaced by the implementation path
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Directory implementation files are written to
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Per-task time limit
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extension of implementation files
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

fn default_command() -> Vec<String> {
    vec!["python".to_string(), FILE_PLACEHOLDER.to_string()]
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".evoloop/workspace")
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_file_extension() -> String {
    "py".to_string()
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            workspace: default_workspace(),
            timeout_secs: default_timeout_secs(),
            file_extension: default_file_extension(),
        }
    }
}

/// What running one implementation produced.
enum RunResult {
    Finished { success: bool, output: String },
    TimedOut,
    SpawnFailed(String),
}

/// Runs an external command on each selected implementation.
///
/// Exit code 0 accepts the implementation. The tail of its output becomes
/// the feedback text.
pub struct CommandEvaluator {
    config: EvaluatorConfig,
}

impl CommandEvaluator {
    /// Create an evaluator.
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    fn task_file(&self, index: usize) -> PathBuf {
        self.config
            .workspace
            .join(format!("task_{}.{}", index, self.config.file_extension))
    }

    async fn run(&self, file: &Path) -> RunResult {
        let file = file.to_string_lossy();
        let argv: Vec<String> = self
            .config
            .command
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &file))
            .collect();
        let Some((program, args)) = argv.split_first() else {
            return RunResult::SpawnFailed("empty command".to_string());
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return RunResult::SpawnFailed(format!("{}: {}", program, e)),
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                RunResult::Finished {
                    success: output.status.success(),
                    output: tail(&text, OUTPUT_TAIL_CHARS),
                }
            }
            Ok(Err(e)) => RunResult::SpawnFailed(e.to_string()),
            Err(_) => RunResult::TimedOut,
        }
    }
}

/// Last `max` characters of `text`.
fn tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max)).collect()
}

#[async_trait]
impl Evaluator<TaskSubject, SubjectFeedback> for CommandEvaluator {
    async fn evaluate(&self, subject: &TaskSubject, selected: &BTreeSet<usize>) -> Option<SubjectFeedback> {
        if let Err(e) = tokio::fs::create_dir_all(&self.config.workspace).await {
            warn!("Cannot create workspace {}: {}", self.config.workspace.display(), e);
            return None;
        }

        let mut feedback = SubjectFeedback::with_len(subject.len());
        let mut recorded = 0;
        let mut spawn_errors = Vec::new();

        for &index in selected {
            let Some(implementation) = subject.implementation(index) else {
                feedback.set(index, TaskFeedback::rejected("not run", "no implementation was produced"));
                recorded += 1;
                continue;
            };

            let file = self.task_file(index);
            if let Err(e) = tokio::fs::write(&file, &implementation.code).await {
                warn!("Cannot write {}: {}", file.display(), e);
                spawn_errors.push(e.to_string());
                continue;
            }

            debug!("Evaluating task {} from {}", index, file.display());
            let task_feedback = match self.run(&file).await {
                RunResult::Finished { success: true, output } => {
                    TaskFeedback::accepted(output, "the command exited successfully")
                }
                RunResult::Finished { success: false, output } => {
                    TaskFeedback::rejected(output, "the command exited with an error")
                }
                RunResult::TimedOut => TaskFeedback::rejected(
                    "",
                    format!("the command timed out after {}s", self.config.timeout_secs),
                ),
                RunResult::SpawnFailed(e) => {
                    warn!("Cannot run evaluator for task {}: {}", index, e);
                    spawn_errors.push(e);
                    continue;
                }
            };
            recorded += 1;
            feedback.set(index, task_feedback);
        }

        if !spawn_errors.is_empty() {
            warn!("Evaluator could not run: {}", spawn_errors.join("; "));
            if recorded == 0 {
                return None;
            }
        }

        let accepted = selected.iter().filter(|&&i| feedback.is_accepted(i)).count();
        info!("Evaluated {} tasks, {} accepted", selected.len(), accepted);
        Some(feedback)
    }
}
