//! EvoLoop CLI - evolving optimization driven by a generative oracle.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::EvoConfig;
use evoloop_core::{
    EvolvableSubject, FormerTraceIndex, KnowledgeId, SubTask, SubjectFeedback, TaskSubject,
};
use evoloop_evolution::OracleEvolvingStrategy;
use evoloop_execution::{
    CommandEvaluator, EvolvingEngine, OracleSelector, PromptBudget, RandomSelector, SelectionPolicy,
    SelectorStrategy, SubTaskSelector, TaskScheduler,
};
use evoloop_knowledge::{
    merge_catalogs, InMemoryKnowledgeBase, KnowledgeExtractor, ModelCatalog, TaskRetrievalStrategy,
};
use evoloop_oracle::{HttpOracleClient, MetricsSnapshot, OracleClient, OracleMetrics, PromptTemplates};
use evoloop_storage::{JsonStorage, KnowledgeStore};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evoloop")]
#[command(about = "Evolving optimization driven by a generative oracle", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract model descriptions from text documents
    Extract {
        /// Documents to read, merged in this order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Write the merged catalog here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Choose the tasks of one round
    Select {
        /// Task list or model catalog (JSON)
        #[arg(long)]
        tasks: PathBuf,
        /// Pending task indices
        #[arg(long, value_delimiter = ',', required = true)]
        pending: Vec<usize>,
        /// Earlier feedback, task information to feedback text (JSON)
        #[arg(long)]
        feedback: Option<PathBuf>,
        /// Scenario text, or @file
        #[arg(long, default_value = "")]
        scenario: String,
    },
    /// Run the evolving loop
    Run {
        /// Task list or model catalog (JSON)
        #[arg(long)]
        tasks: PathBuf,
        /// Scenario text, or @file
        #[arg(long)]
        scenario: String,
        /// Knowledge and round store
        #[arg(long, default_value = ".evoloop")]
        store: PathBuf,
    },
    /// List stored knowledge, or print one item as JSON
    Knowledge {
        /// Knowledge and round store
        #[arg(long, default_value = ".evoloop")]
        store: PathBuf,

        /// Print only this item
        #[arg(long)]
        id: Option<KnowledgeId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => EvoConfig::load(path)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => EvoConfig::default(),
    };

    match cli.command {
        Commands::Extract { files, out } => extract(&config, &files, out.as_deref()).await,
        Commands::Select { tasks, pending, feedback, scenario } => {
            select(&config, &tasks, pending, feedback.as_deref(), &scenario).await
        }
        Commands::Run { tasks, scenario, store } => run(&config, &tasks, &scenario, &store).await,
        Commands::Knowledge { store, id: Some(id) } => show_knowledge(&store, id).await,
        Commands::Knowledge { store, id: None } => list_knowledge(&store).await,
    }
}

/// Logs go to stderr so stdout stays machine readable.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn oracle_client(config: &EvoConfig) -> Result<Arc<dyn OracleClient>> {
    let client = HttpOracleClient::from_config(&config.oracle).context("Creating oracle client")?;
    info!("Using oracle model {}", client.model());
    Ok(Arc::new(client))
}

fn build_selector(
    config: &EvoConfig,
    client: Arc<dyn OracleClient>,
    prompts: PromptTemplates,
    metrics: Arc<OracleMetrics>,
) -> SelectorStrategy {
    match config.scheduler.policy {
        SelectionPolicy::Random => SelectorStrategy::Random(RandomSelector::new()),
        SelectionPolicy::Oracle => SelectorStrategy::Oracle(OracleSelector::new(
            client,
            prompts,
            PromptBudget::new(config.oracle.token_limit, config.scheduler.max_fit_attempts),
            metrics,
        )),
    }
}

/// Read a task list, either as sub-tasks or as an extracted catalog.
async fn load_tasks(path: &Path) -> Result<TaskSubject> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Reading tasks {}", path.display()))?;
    let sub_tasks = match serde_json::from_str::<Vec<SubTask>>(&text) {
        Ok(sub_tasks) => sub_tasks,
        Err(_) => serde_json::from_str::<ModelCatalog>(&text)
            .with_context(|| format!("{} is neither a task list nor a model catalog", path.display()))?
            .into_sub_tasks(),
    };
    anyhow::ensure!(!sub_tasks.is_empty(), "{} contains no tasks", path.display());
    Ok(TaskSubject::new(sub_tasks))
}

async fn read_scenario(scenario: &str) -> Result<String> {
    match scenario.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Reading scenario {}", path)),
        None => Ok(scenario.to_string()),
    }
}

/// Counters go to stderr with the logs.
fn print_metrics(snapshot: &MetricsSnapshot) {
    eprintln!("Oracle requests: {}", snapshot.requests);
    if snapshot.degraded() || snapshot.extraction_retries > 0 {
        eprintln!("Degraded operation:");
        eprintln!("  selection fallbacks:   {}", snapshot.selection_fallbacks);
        eprintln!("  budget unsatisfiable:  {}", snapshot.budget_unsatisfiable);
        eprintln!("  extraction retries:    {}", snapshot.extraction_retries);
        eprintln!("  extraction exhausted:  {}", snapshot.extraction_exhausted);
        eprintln!("  evolve fallbacks:      {}", snapshot.evolve_fallbacks);
        eprintln!("  missing feedback:      {}", snapshot.missing_feedback);
    }
}

async fn extract(config: &EvoConfig, files: &[PathBuf], out: Option<&Path>) -> Result<()> {
    let metrics = Arc::new(OracleMetrics::new());
    let extractor = KnowledgeExtractor::new(oracle_client(config)?, config.prompt_templates(), metrics.clone())
        .with_config(config.extraction.clone());

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let content = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Reading {}", file.display()))?;
        documents.push((file.display().to_string(), content));
    }

    let per_source = extractor.extract_from_documents(&documents).await?;
    let merged = merge_catalogs(per_source.iter().map(|(_, catalog)| catalog));
    let json = serde_json::to_string_pretty(&merged)?;
    match out {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Writing {}", path.display()))?;
            eprintln!("Wrote {} models to {}", merged.len(), path.display());
        }
        None => println!("{}", json),
    }
    print_metrics(&metrics.snapshot());
    Ok(())
}

async fn select(
    config: &EvoConfig,
    tasks: &Path,
    pending: Vec<usize>,
    feedback: Option<&Path>,
    scenario: &str,
) -> Result<()> {
    let subject = load_tasks(tasks).await?;
    let scenario = read_scenario(scenario).await?;
    let former_trace: FormerTraceIndex = match feedback {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Reading feedback {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Parsing feedback {}", path.display()))?
        }
        None => FormerTraceIndex::default(),
    };

    let pending: BTreeSet<usize> = pending.into_iter().collect();
    let unknown: Vec<_> = pending.iter().filter(|&&i| i >= subject.len()).collect();
    anyhow::ensure!(unknown.is_empty(), "Unknown task indices: {:?}", unknown);

    let metrics = Arc::new(OracleMetrics::new());
    let selector = build_selector(config, oracle_client(config)?, config.prompt_templates(), metrics.clone());
    let capacity = config.scheduler.tasks_per_round.min(pending.len());
    let chosen = selector
        .select(&pending, capacity, &subject, &former_trace, &scenario)
        .await?;

    println!("{}", serde_json::to_string(&chosen)?);
    print_metrics(&metrics.snapshot());
    Ok(())
}

async fn run(config: &EvoConfig, tasks: &Path, scenario: &str, store: &Path) -> Result<()> {
    let subject = load_tasks(tasks).await?;
    let scenario = read_scenario(scenario).await?;
    let mut storage = JsonStorage::new(store)
        .await
        .with_context(|| format!("Opening store {}", store.display()))?;

    let knowledge_base = InMemoryKnowledgeBase::load_from(&storage).await?;
    info!("Loaded {} knowledge items", knowledge_base.len());

    let client = oracle_client(config)?;
    let prompts = config.prompt_templates();
    let metrics = Arc::new(OracleMetrics::new());

    let selector = build_selector(config, client.clone(), prompts.clone(), metrics.clone());
    let evolving = OracleEvolvingStrategy::new(client, prompts, scenario.clone(), metrics.clone());
    let retrieval = TaskRetrievalStrategy::new(knowledge_base).with_config(config.retrieval.clone());

    let mut engine: EvolvingEngine<TaskSubject, SubjectFeedback, TaskRetrievalStrategy> =
        EvolvingEngine::new(
            subject,
            TaskScheduler::new(Box::new(selector), config.scheduler.tasks_per_round),
            Box::new(evolving),
            retrieval,
            Box::new(CommandEvaluator::new(config.evaluator.clone())),
        )
        .with_config(config.engine.clone())
        .with_scenario(scenario)
        .with_metrics(metrics.clone());

    let mut rounds = 0;
    while let Some(event) = engine.run_round().await {
        if let Err(e) = storage.save_round(&event).await {
            warn!("Cannot save round {}: {}", event.round, e);
        }
        rounds += 1;
    }

    let accepted = engine.accepted().clone();
    let pending = engine.pending().clone();
    let run_id = engine.run_id();
    let (subject, mut retrieval) = engine.into_parts();
    let saved = retrieval.knowledge_base_mut().persist_to(&mut storage).await?;

    println!("Run {} finished after {} rounds", run_id, rounds);
    println!("  accepted: {:?}", accepted);
    println!("  pending:  {:?}", pending);
    println!("  new knowledge items: {}", saved);
    for index in &accepted {
        if let Some(implementation) = subject.implementation(*index) {
            let name = subject.sub_tasks().get(*index).map(|t| t.name.as_str()).unwrap_or("?");
            println!("--- {} ---\n{}", name, implementation.code.trim_end());
        }
    }
    print_metrics(&metrics.snapshot());
    Ok(())
}

async fn show_knowledge(store: &Path, id: KnowledgeId) -> Result<()> {
    let storage = JsonStorage::new(store)
        .await
        .with_context(|| format!("Opening store {}", store.display()))?;
    let item = storage.require_knowledge(id).await?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

async fn list_knowledge(store: &Path) -> Result<()> {
    let storage = JsonStorage::new(store)
        .await
        .with_context(|| format!("Opening store {}", store.display()))?;
    let items = storage.list_knowledge().await?;

    println!("Knowledge ({})", items.len());
    for item in items {
        let title = item.task_information.lines().next().unwrap_or("");
        println!(
            "  {} | round {} | {} | {}",
            item.id,
            item.round,
            if item.accepted { "accepted" } else { "rejected" },
            title,
        );
    }
    Ok(())
}
