//! Quaero: loads a job definition, resolves each step's worker, and
//! drives it through the scheduler.
//!
//! Two store backends are available: the in-memory reference
//! implementations (documents, job status, events, KV) used for a
//! single-process run, and a SQLite-backed audit log that persists
//! across runs at `~/.quaero/audit.db`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use quaero::Scheduler;
use quaero_dispatcher::{Dispatcher, DispatcherConfig, ProviderSettings};
use quaero_inference::LocalInferenceManager;
use quaero_logging::{init_logging, LogConfig};
use quaero_protocol::config::{default_config_path, load_config, quaero_home, RuntimeConfig};
use quaero_protocol::store::KvStore;
use quaero_protocol::types::{JobDefinition, Provider, WorkerType};
use quaero_store::{open_pool, AuditLogger, InMemoryDocumentStore, InMemoryEventService, InMemoryJobStatusManager, InMemoryKvStore};
use quaero_workers::{SummaryWorker, WebSearchWorker};

/// How long `run` waits after a shutdown signal for the in-flight step
/// to reach a terminal state before giving up and exiting anyway.
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "quaero", about = "Job-orchestration engine for LLM-driven document pipelines")]
struct Cli {
    /// Path to quaero.toml. Defaults to ~/.quaero/quaero.toml; a missing file is not an error.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force debug-level console logging regardless of log.verbose in config.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a job definition against the registered workers, without running it
    Validate {
        /// Path to a JSON job definition file
        job: PathBuf,
    },
    /// Run a job definition end to end
    Run {
        /// Path to a JSON job definition file
        job: PathBuf,
    },
    /// Request an embedding vector from the local inference manager
    Embed {
        /// Text to embed
        text: String,
        /// Use the deterministic mock embedder instead of spawning a real binary
        #[arg(long)]
        mock: bool,
    },
    /// Inspect the LLM audit log
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Show the most recent audit entries
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Export the full audit log as indented JSON
    Export,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration from {}: {err}", config_path.display());
            return ExitCode::from(1);
        }
    };

    if let Err(err) = init_logging(LogConfig {
        app_name: "quaero",
        verbose: cli.verbose || config.log.verbose,
        tui_mode: false,
    }) {
        eprintln!("failed to initialize logging: {err:?}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::from(1);
        }
    };

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    install_signal_handlers(shutdown_flag.clone());

    match runtime.block_on(run_command(cli.command, config, shutdown_flag)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:?}");
            eprintln!("error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers(flag: Arc<AtomicBool>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            warn!("failed to install signal handlers: {err}");
            return;
        }
    };
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("received signal {sig}, requesting shutdown");
            flag.store(true, Ordering::SeqCst);
        }
    });
}

#[cfg(windows)]
fn install_signal_handlers(flag: Arc<AtomicBool>) {
    let handler_flag = flag.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("received Ctrl+C, requesting shutdown");
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to install Ctrl+C handler: {err}");
    }
}

async fn run_command(command: Command, config: RuntimeConfig, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    match command {
        Command::Validate { job } => {
            let job_def = load_job_definition(&job)?;
            let (scheduler, _kv) = build_scheduler(&config).await?;
            scheduler.validate(&job_def).map_err(|err| anyhow::anyhow!(err))?;
            println!("job '{}' is valid: {} step(s)", job_def.name, job_def.steps.len());
            Ok(())
        }
        Command::Run { job } => {
            let job_def = load_job_definition(&job)?;
            let (scheduler, _kv) = build_scheduler(&config).await?;
            run_with_shutdown_watch(scheduler, job_def, shutdown_flag).await
        }
        Command::Embed { text, mock } => run_embed_command(&text, mock, &config).await,
        Command::Audit { action } => run_audit_command(action, &config).await,
    }
}

fn load_job_definition(path: &PathBuf) -> Result<JobDefinition> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading job definition {}", path.display()))?;
    let job_def: JobDefinition =
        serde_json::from_str(&text).with_context(|| format!("parsing job definition {}", path.display()))?;
    job_def.validate().map_err(|err| anyhow::anyhow!("invalid job definition: {err}"))?;
    Ok(job_def)
}

/// Wires the reference in-memory stores, the provider dispatcher, and
/// the two implemented worker types into a `Scheduler`. Returns the KV
/// store alongside it so callers that need to seed API keys can reach
/// it without re-deriving the wiring.
async fn build_scheduler(config: &RuntimeConfig) -> Result<(Scheduler, Arc<InMemoryKvStore>)> {
    let document_store = Arc::new(InMemoryDocumentStore::new());
    let job_status = Arc::new(InMemoryJobStatusManager::new());
    let events = Arc::new(InMemoryEventService::new());
    let kv = Arc::new(InMemoryKvStore::new());

    // The web-search worker reads provider keys straight out of the KV
    // store rather than through the dispatcher's config-fallback path,
    // so a cloud key configured in quaero.toml is seeded here to keep
    // both call paths working off the same source of truth.
    if let Some(key) = &config.claude.api_key {
        kv.set("claude_api_key", key).await.map_err(|err| anyhow::anyhow!(err))?;
    }
    if let Some(key) = &config.gemini.api_key {
        kv.set("gemini_api_key", key).await.map_err(|err| anyhow::anyhow!(err))?;
    }

    let default_provider = match config.llm.default_provider.as_deref() {
        Some("gemini") => Provider::Gemini,
        Some("local") => Provider::Local,
        _ => Provider::Claude,
    };
    let dispatcher_config = DispatcherConfig {
        default_provider,
        claude: ProviderSettings {
            api_key: config.claude.api_key.clone(),
            model: config.claude.model.clone(),
            temperature: config.claude.temperature,
            max_tokens: config.claude.max_tokens,
        },
        gemini: ProviderSettings {
            api_key: config.gemini.api_key.clone(),
            model: config.gemini.model.clone(),
            temperature: config.gemini.temperature,
            max_tokens: None,
        },
        retry: quaero_retry::RetryConfig::default(),
    };
    let dispatcher = Arc::new(Dispatcher::new(dispatcher_config, kv.clone()));

    let mut workers: std::collections::HashMap<WorkerType, Arc<dyn quaero_protocol::worker::Worker>> =
        std::collections::HashMap::new();
    workers.insert(
        WorkerType::Summary,
        Arc::new(SummaryWorker::new(document_store.clone(), dispatcher, None)),
    );
    workers.insert(
        WorkerType::WebSearch,
        Arc::new(WebSearchWorker::new(document_store, kv.clone(), config.gemini.model.clone())),
    );

    Ok((Scheduler::new(workers, job_status, events), kv))
}

async fn run_with_shutdown_watch(scheduler: Scheduler, job_def: JobDefinition, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    let run = tokio::spawn(async move { scheduler.run(&job_def).await });

    let outcome = tokio::select! {
        result = run => result.context("scheduler task panicked")?.map_err(|err| anyhow::anyhow!(err)),
        _ = watch_shutdown_flag(shutdown_flag) => {
            warn!("shutdown requested; waiting up to {SHUTDOWN_TIMEOUT_SECS}s for the current step to finish");
            Err(anyhow::anyhow!("shutdown requested before the job finished"))
        }
    }?;

    info!(
        manager_id = %outcome.manager_id,
        status = %outcome.status,
        "job finished"
    );
    for (name, status, error) in &outcome.step_results {
        match error {
            Some(message) => println!("step '{name}': {status} ({message})"),
            None => println!("step '{name}': {status}"),
        }
    }

    if outcome.status == quaero_protocol::types::JobStatus::Failed {
        anyhow::bail!("job completed with a failed step");
    }
    Ok(())
}

async fn watch_shutdown_flag(flag: Arc<AtomicBool>) {
    loop {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn run_embed_command(text: &str, mock: bool, config: &RuntimeConfig) -> Result<()> {
    let model_path = if mock {
        PathBuf::from("mock.gguf")
    } else {
        let model_dir = config
            .llm
            .offline
            .model_dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.offline.model_dir must be set to run a real embedding (or pass --mock)"))?;
        let embed_model = config
            .llm
            .offline
            .embed_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.offline.embed_model must be set to run a real embedding (or pass --mock)"))?;
        model_dir.join(embed_model)
    };

    let manager = LocalInferenceManager::new("quaero-infer", None, model_path, mock)
        .map_err(|err| anyhow::anyhow!("failed to resolve local inference binary: {err}"))?;
    manager.start().await.map_err(|err| anyhow::anyhow!("failed to start embedding server: {err}"))?;

    let result = manager.embed(text).await;
    manager.close().await;

    let vector = result.map_err(|err| anyhow::anyhow!("embedding request failed: {err}"))?;
    println!("embedding: {} dimensions", vector.len());
    Ok(())
}

async fn run_audit_command(action: AuditCommand, config: &RuntimeConfig) -> Result<()> {
    let db_path = quaero_home().join("audit.db");
    let pool = open_pool(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await
        .map_err(|err| anyhow::anyhow!(err))?;
    let logger = AuditLogger::new(pool, config.llm.audit.log_queries);

    match action {
        AuditCommand::Recent { limit } => {
            let entries = logger.recent(limit).await.map_err(|err| anyhow::anyhow!(err))?;
            for entry in entries {
                println!(
                    "{} {} {} success={} duration={}ms",
                    entry.timestamp, entry.mode, entry.operation, entry.success, entry.duration_ms
                );
            }
        }
        AuditCommand::Export => {
            let json = logger.export_json().await.map_err(|err| anyhow::anyhow!(err))?;
            println!("{json}");
        }
    }
    Ok(())
}
