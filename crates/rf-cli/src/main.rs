// SPDX-License-Identifier: MIT OR Apache-2.0
//! `rf` — the Reelforge command line.
//!
//! Plans and runs media-generation pipelines: `rf plan` shows what would
//! execute, `rf run` executes it (with `--dry-run` to stop at the plan),
//! and `rf manifest` inspects stored snapshots. Exit codes: 0 when the
//! operation succeeded, 2 when a run failed or was partial, 1 for usage,
//! document, or graph errors.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rf_blueprint::ResolvedInputs;
use rf_config::EngineConfig;
use rf_core::{ExecutionPlan, InputEvent, Manifest, RevisionId};
use rf_eventlog::EventLog;
use rf_graph::{GraphBuilder, ProducerGraph};
use rf_manifest::{ManifestError, ManifestService};
use rf_planner::{ArtifactRegeneration, PlanRequest, Planner};
use rf_provider::{HandlerRegistry, MockHandler, RegistryProduce, WarmStartRuntime};
use rf_runner::{RateLimit, RetryPolicy, RunContext, RunOptions, RunStatus, Runner};
use rf_storage::{LocalStorage, StorageContext};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod docs;

#[derive(Parser)]
#[command(name = "rf", version, about = "Build engine for media generation pipelines")]
struct Cli {
    /// Path to an engine config file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage root override.
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute and print the execution plan for a movie.
    Plan {
        /// Movie identifier.
        movie: String,
        /// Blueprint document (YAML or JSON).
        #[arg(long)]
        blueprint: PathBuf,
        /// Inputs document (YAML or JSON).
        #[arg(long)]
        inputs: PathBuf,
        /// Re-run every job at this blueprint layer and later.
        #[arg(long)]
        re_run_from: Option<usize>,
        /// Drop every job at a blueprint layer later than this.
        #[arg(long)]
        up_to_layer: Option<usize>,
        /// Artifact ids to surgically regenerate (comma separated).
        #[arg(long, value_delimiter = ',')]
        regenerate: Vec<String>,
        /// Write the plan JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Plan and execute a movie.
    Run {
        /// Movie identifier.
        movie: String,
        /// Blueprint document (YAML or JSON).
        #[arg(long)]
        blueprint: PathBuf,
        /// Inputs document (YAML or JSON).
        #[arg(long)]
        inputs: PathBuf,
        /// Re-run every job at this blueprint layer and later.
        #[arg(long)]
        re_run_from: Option<usize>,
        /// Drop every job at a blueprint layer later than this.
        #[arg(long)]
        up_to_layer: Option<usize>,
        /// Artifact ids to surgically regenerate (comma separated).
        #[arg(long, value_delimiter = ',')]
        regenerate: Vec<String>,
        /// Print the plan and stop without executing.
        #[arg(long)]
        dry_run: bool,
        /// Worker cap per layer.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Inspect stored manifests.
    Manifest {
        #[command(subcommand)]
        command: ManifestCommand,
    },
}

#[derive(Subcommand)]
enum ManifestCommand {
    /// Print the current manifest.
    Show {
        /// Movie identifier.
        movie: String,
    },
    /// List stored snapshots.
    List {
        /// Movie identifier.
        movie: String,
    },
}

struct Services {
    storage: StorageContext,
    event_log: EventLog,
    manifest_service: ManifestService,
    planner: Planner,
    config: EngineConfig,
}

fn services(cli: &Cli) -> Result<Services> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).map_err(|e| anyhow!(e.to_string()))?,
        None => EngineConfig::default(),
    };
    if let Some(root) = &cli.storage_root {
        config.storage_root = Some(root.display().to_string());
    }
    for warning in config.warnings() {
        warn!(target: "rf.cli", %warning, "config warning");
    }

    let root = config
        .storage_root
        .clone()
        .unwrap_or_else(|| ".reelforge".to_string());
    let storage = StorageContext::new(Arc::new(LocalStorage::new(root)), "reelforge");
    let event_log = EventLog::new(storage.clone());
    let manifest_service = ManifestService::new(storage.clone(), event_log.clone());
    let planner = Planner::new(event_log.clone());
    Ok(Services {
        storage,
        event_log,
        manifest_service,
        planner,
        config,
    })
}

struct Planned {
    plan: ExecutionPlan,
    graph: ProducerGraph,
    resolved: ResolvedInputs,
    manifest: Option<Manifest>,
    pending_edits: Vec<InputEvent>,
}

#[allow(clippy::too_many_arguments)]
fn compute_plan(
    services: &Services,
    movie: &str,
    blueprint_path: &PathBuf,
    inputs_path: &PathBuf,
    re_run_from: Option<usize>,
    up_to_layer: Option<usize>,
    regenerate: &[String],
) -> Result<Planned> {
    let blueprint = docs::load_blueprint(blueprint_path)?;
    let document = docs::load_inputs(inputs_path)?;
    let resolved = ResolvedInputs::from_document(&blueprint, &document)
        .map_err(|e| anyhow!(e.to_string()))?;
    let graph = GraphBuilder::new(&blueprint, &resolved)
        .build()
        .map_err(|e| anyhow!(e.to_string()))?;

    let manifest = match services.manifest_service.load_current(movie) {
        Ok((manifest, _)) => Some(manifest),
        Err(ManifestError::NotFound { .. }) => None,
        Err(e) => return Err(anyhow!(e.to_string())),
    };

    let target_revision = manifest
        .as_ref()
        .map_or_else(RevisionId::first, |m| m.revision.next());

    // Pending edits: every resolved input whose hash differs from the
    // manifest becomes one input event at the target revision.
    let mut pending_edits = Vec::new();
    for (id, value) in resolved.iter() {
        let hash = rf_core::hash_payload(value)?.hash;
        let known = manifest.as_ref().and_then(|m| m.input_hash(id));
        if known != Some(hash.as_str()) {
            pending_edits.push(InputEvent::new(
                id,
                target_revision.clone(),
                value.clone(),
                "cli",
            )?);
        }
    }

    let regenerations: Vec<ArtifactRegeneration> = regenerate
        .iter()
        .map(|artifact_id| {
            graph
                .producer_of_artifact(artifact_id)
                .map(|source_job_id| ArtifactRegeneration {
                    target_artifact_id: artifact_id.clone(),
                    source_job_id: source_job_id.to_string(),
                })
                .ok_or_else(|| anyhow!("unknown artifact: {artifact_id}"))
        })
        .collect::<Result<_>>()?;

    let plan = services
        .planner
        .plan(&PlanRequest {
            movie_id: movie,
            graph: &graph,
            manifest: manifest.as_ref(),
            target_revision,
            pending_edits: &pending_edits,
            re_run_from,
            up_to_layer,
            artifact_regenerations: &regenerations,
        })
        .map_err(|e| anyhow!(e.to_string()))?;

    Ok(Planned {
        plan,
        graph,
        resolved,
        manifest,
        pending_edits,
    })
}

fn print_plan(plan: &ExecutionPlan, output: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(plan)?;
    match output {
        Some(path) => {
            std::fs::write(path, &json).with_context(|| format!("write {}", path.display()))?;
            info!(target: "rf.cli", path = %path.display(), "plan written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Echo handlers stand in for every provider the graph names; real
/// handlers are registered by embedding the engine, not by this binary.
fn registry_for(graph: &ProducerGraph) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    let mut providers: Vec<&str> = graph.nodes().iter().map(|n| n.provider.as_str()).collect();
    providers.sort_unstable();
    providers.dedup();
    for provider in providers {
        registry.register_default(provider, MockHandler::new(format!("{provider}-echo")));
    }
    registry
}

async fn execute(services: &Services, movie: &str, planned: Planned, concurrency: Option<usize>) -> Result<RunStatus> {
    // Durable edits first: the run's revision must be reconstructible
    // from the log alone.
    for edit in &planned.pending_edits {
        services
            .event_log
            .append_input(movie, edit)
            .map_err(|e| anyhow!(e.to_string()))?;
    }

    let registry = Arc::new(registry_for(&planned.graph));
    registry
        .warm_start_all(&WarmStartRuntime {
            environment: std::env::vars().collect(),
        })
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    let produce = RegistryProduce::new(registry);

    let rate_limits: BTreeMap<String, RateLimit> = services
        .config
        .rate_limits
        .iter()
        .map(|(key, limit)| {
            (
                key.clone(),
                RateLimit {
                    max_in_flight: limit.max_in_flight,
                    deadline: limit.deadline_secs.map(Duration::from_secs),
                },
            )
        })
        .collect();

    let ctx = RunContext {
        movie_id: movie.to_string(),
        base_manifest: planned.manifest,
        storage: services.storage.clone(),
        event_log: services.event_log.clone(),
        manifest_service: services.manifest_service.clone(),
        resolved_inputs: planned.resolved,
        produce: Arc::new(produce),
    };
    let opts = RunOptions {
        concurrency: concurrency.unwrap_or(services.config.concurrency),
        retry: RetryPolicy::builder()
            .max_attempts(services.config.max_attempts)
            .build(),
        rate_limits,
        ..RunOptions::default()
    };

    let result = Runner::new().run(&planned.plan, &ctx, &opts).await?;
    for job in &result.jobs {
        info!(
            target: "rf.cli",
            job = %job.job_id,
            status = ?job.status,
            attempts = job.attempts,
            "job finished"
        );
    }

    let manifest = result.build_manifest()?;
    let hash = services
        .manifest_service
        .save(movie, &manifest)
        .map_err(|e| anyhow!(e.to_string()))?;
    info!(target: "rf.cli", movie, %hash, revision = %manifest.revision, "manifest saved");

    Ok(result.status)
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let services = services(&cli)?;
    match cli.command {
        Command::Plan {
            movie,
            blueprint,
            inputs,
            re_run_from,
            up_to_layer,
            regenerate,
            output,
        } => {
            let planned = compute_plan(
                &services,
                &movie,
                &blueprint,
                &inputs,
                re_run_from,
                up_to_layer,
                &regenerate,
            )?;
            print_plan(&planned.plan, output.as_ref())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            movie,
            blueprint,
            inputs,
            re_run_from,
            up_to_layer,
            regenerate,
            dry_run,
            concurrency,
        } => {
            let planned = compute_plan(
                &services,
                &movie,
                &blueprint,
                &inputs,
                re_run_from,
                up_to_layer,
                &regenerate,
            )?;
            if dry_run {
                print_plan(&planned.plan, None)?;
                return Ok(ExitCode::SUCCESS);
            }
            match execute(&services, &movie, planned, concurrency).await? {
                RunStatus::Succeeded => Ok(ExitCode::SUCCESS),
                RunStatus::Partial | RunStatus::Failed => Ok(ExitCode::from(2)),
            }
        }
        Command::Manifest { command } => match command {
            ManifestCommand::Show { movie } => {
                let (manifest, hash) = services
                    .manifest_service
                    .load_current(&movie)
                    .map_err(|e| anyhow!(e.to_string()))?;
                println!("{}", serde_json::to_string_pretty(&manifest)?);
                info!(target: "rf.cli", movie, %hash, "manifest shown");
                Ok(ExitCode::SUCCESS)
            }
            ManifestCommand::List { movie } => {
                for summary in services
                    .manifest_service
                    .list(&movie)
                    .map_err(|e| anyhow!(e.to_string()))?
                {
                    println!("{}\t{}", summary.revision, summary.hash);
                }
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
