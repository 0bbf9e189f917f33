//! CLI command definitions for scene-forge.
//!
//! `produce` runs a full production for one prompt, `plan` only plans it,
//! `show` reads a stored project back and `config` prints the effective
//! configuration.

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::{export_metrics, init_metrics};
use crate::production::{
    ChannelBroadcaster, LogBroadcaster, PlannedScene, ProductionConfig, ProductionOrchestrator,
    ProjectOutcome,
};
use crate::provider::StudioProvider;
use crate::storage::{MemoryStore, SceneStore, SqliteStore};

/// Default SQLite database used by `show`.
const DEFAULT_DB_PATH: &str = "scene-forge.db";

/// Plan a prompt into scenes, then generate and render them concurrently.
#[derive(Parser)]
#[command(name = "scene-forge")]
#[command(about = "Turn a prompt into a set of rendered video scenes")]
#[command(version)]
#[command(
    long_about = "scene-forge plans a prompt into scenes, generates Manim code for each scene with an LLM and renders the scenes concurrently, retrying failed scenes with error feedback.\n\nExample usage:\n  scene-forge produce --prompt \"explain gravity\" --duration 60 --events"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Plan, generate and render all scenes for a prompt.
    Produce(ProduceArgs),

    /// Plan a prompt and print the scene list without rendering.
    Plan(PlanArgs),

    /// Show a stored project and its scenes.
    Show(ShowArgs),

    /// Print the effective configuration (API key redacted).
    Config(ConfigArgs),
}

/// Arguments for `scene-forge produce`.
#[derive(Parser, Debug)]
pub struct ProduceArgs {
    /// What the video should explain or show.
    #[arg(short, long)]
    pub prompt: String,

    /// Target total duration in seconds.
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<String>,

    /// SQLite database for projects and scenes (in-memory when omitted).
    #[arg(long)]
    pub db: Option<String>,

    /// Number of scenes allowed to render at once.
    #[arg(short = 'k', long)]
    pub render_concurrency: Option<usize>,

    /// Print every production event as a JSON line.
    #[arg(long)]
    pub events: bool,

    /// Print the final outcome as JSON.
    #[arg(long)]
    pub json: bool,

    /// Print Prometheus metrics at exit.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `scene-forge plan`.
#[derive(Parser, Debug)]
pub struct PlanArgs {
    #[arg(short, long)]
    pub prompt: String,

    /// Target total duration in seconds.
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Arguments for `scene-forge show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// SQLite database written by `produce --db`.
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    pub db: String,

    /// Project id.
    #[arg(short, long)]
    pub project: String,

    /// Print as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `scene-forge config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Produce(args) => run_produce_command(args).await,
        Commands::Plan(args) => run_plan_command(args).await,
        Commands::Show(args) => run_show_command(args).await,
        Commands::Config(args) => run_config_command(args),
    }
}

/// Loads configuration: YAML file (if any), then environment overrides.
fn load_config(path: Option<&str>) -> anyhow::Result<ProductionConfig> {
    let mut config = match path {
        Some(path) => ProductionConfig::from_yaml_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", path, e))?,
        None => ProductionConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn require_api_key(config: &ProductionConfig) -> anyhow::Result<()> {
    if config.provider.api_key.is_none() {
        anyhow::bail!(
            "OPENAI_API_KEY is required but not set.\n\
             Set the OPENAI_API_KEY environment variable before running this command."
        );
    }
    Ok(())
}

async fn run_produce_command(args: ProduceArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(k) = args.render_concurrency {
        config = config.with_render_concurrency(k);
        config.validate()?;
    }
    require_api_key(&config)?;

    if args.metrics {
        init_metrics()?;
    }

    let provider = StudioProvider::from_settings(&config.provider, config.provider_timeout)?;
    let store: Arc<dyn SceneStore> = match args.db.as_deref() {
        Some(path) => Arc::new(SqliteStore::open(path).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let broadcaster = Arc::new(ChannelBroadcaster::default());

    let orchestrator = ProductionOrchestrator::new(
        config,
        Arc::new(provider),
        store,
        broadcaster.clone(),
    )?;

    let state = orchestrator.create_project(&args.prompt, args.duration).await?;
    let project_id = state.project_id.clone();

    let printer = if args.events {
        let mut events = Box::pin(broadcaster.subscribe(&project_id));
        Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                }
            }
        }))
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling production");
            on_ctrl_c.cancel();
        }
    });

    info!(project_id = %project_id, "Starting production");
    let outcome = orchestrator.run_project(state, &cancel).await?;

    if let Some(printer) = printer {
        let _ = printer.await;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if args.metrics {
        println!("{}", export_metrics());
    }

    Ok(())
}

fn print_outcome(outcome: &ProjectOutcome) {
    let verdict = if outcome.is_partial() {
        "partially ready"
    } else {
        outcome.status.as_str()
    };
    println!("Project {}: {}", outcome.project_id, verdict);
    println!(
        "  Scenes: {} ready, {} failed ({:.1}s)",
        outcome.ready_scenes(),
        outcome.failed_scenes(),
        outcome.elapsed_ms as f64 / 1000.0
    );
    for scene in &outcome.scenes {
        let detail = scene
            .media_url
            .as_deref()
            .or(scene.error.as_deref())
            .unwrap_or("-");
        println!(
            "  [{}] {:<6} retries={} {}",
            scene.index,
            scene.status.as_str(),
            scene.retry_count,
            detail
        );
    }
}

async fn run_plan_command(args: PlanArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    require_api_key(&config)?;
    let target = args
        .duration
        .unwrap_or(config.default_target_duration_seconds);

    let provider = StudioProvider::from_settings(&config.provider, config.provider_timeout)?;
    let orchestrator = ProductionOrchestrator::new(
        config,
        Arc::new(provider),
        Arc::new(MemoryStore::new()),
        Arc::new(LogBroadcaster),
    )?;

    let project_id = Uuid::new_v4().to_string();
    let tasks = orchestrator
        .plan_scenes(&project_id, &args.prompt, target, &CancellationToken::new())
        .await?;

    #[derive(Serialize)]
    struct PlanOutput {
        project_id: String,
        target_duration_seconds: f64,
        scenes: Vec<PlannedScene>,
    }

    let output = PlanOutput {
        project_id,
        target_duration_seconds: target,
        scenes: tasks.iter().map(PlannedScene::from).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let store = SqliteStore::open(&args.db).await?;
    let project = store.get_project(&args.project).await?;
    let scenes = store.list_scenes(&args.project).await?;

    if args.json {
        #[derive(Serialize)]
        struct ShowOutput<'a> {
            project: &'a crate::storage::ProjectRecord,
            scenes: &'a [crate::storage::SceneRecord],
        }

        let output = ShowOutput {
            project: &project,
            scenes: &scenes,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Project {}", project.project_id);
    println!("  Prompt:   {}", project.user_prompt);
    println!("  Status:   {}", project.status);
    println!("  Duration: {:.1}s", project.target_duration_seconds);
    println!("  Created:  {}", project.created_at.to_rfc3339());
    println!("  Scenes:   {}", scenes.len());
    for scene in &scenes {
        println!(
            "  [{}] {} ({}, retries={})",
            scene.index, scene.title, scene.status, scene.retry_count
        );
        if let Some(url) = &scene.media_url {
            println!("      media: {}", url);
        }
        if let Some(err) = &scene.last_error {
            println!("      error: {}", err.lines().next().unwrap_or_default());
        }
    }
    Ok(())
}

fn run_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    print!("{}", serde_yaml::to_string(&config.redacted())?);
    Ok(())
}
