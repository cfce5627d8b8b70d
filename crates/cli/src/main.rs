//! `mediagen` -- command-line front end for a generative media backend.
//!
//! Lists workflows, submits generate / regenerate / upload jobs and follows
//! their progress stream until the result is available. Progress is drawn
//! on stderr; the resulting media record is printed to stdout as JSON.
//!
//! # Environment variables
//!
//! | Variable                        | Default                     | Description                     |
//! |---------------------------------|-----------------------------|---------------------------------|
//! | `MEDIAGEN_API_URL`              | `http://localhost:8000/api` | Backend base URL                |
//! | `MEDIAGEN_REQUEST_TIMEOUT_SECS` | `60`                        | Per-request timeout             |
//! | `MEDIAGEN_CONNECT_TIMEOUT_SECS` | `10`                        | TCP connect timeout             |
//! | `RUST_LOG`                      | `mediagen_cli=info,mediagen_client=warn` | Log filter         |

mod title;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediagen_client::api::HttpGenerationApi;
use mediagen_client::config::ClientConfig;
use mediagen_client::events::OrchestratorEvent;
use mediagen_client::orchestrator::{GenerationOrchestrator, TaskHandle};
use mediagen_client::presenter::{PresenterPhase, PresenterSnapshot};
use mediagen_client::registry::TaskChannelRegistry;
use mediagen_client::stream::SseStreamSource;
use mediagen_core::form::{NAME_FIELD, PROMPT_FIELD};
use mediagen_core::history::HistoryEntry;
use mediagen_core::session::GenerationSession;
use mediagen_core::slots::{PreviewStore, RemoteMedia};
use mediagen_core::types::MediaKind;

use crate::title::TerminalTitle;

const APP_TITLE: &str = "mediagen";

#[derive(Debug, Parser)]
#[command(
    name = "mediagen",
    version,
    about = "Submit media generation jobs and follow their progress"
)]
struct Cli {
    /// Backend base URL; overrides MEDIAGEN_API_URL.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the workflows offered by the backend.
    Workflows(WorkflowsArgs),
    /// Run a workflow and wait for its result.
    Generate(GenerateArgs),
    /// Regenerate selected fields of an existing record.
    Regenerate(RegenerateArgs),
    /// Upload a media file into the library.
    Upload(UploadArgs),
}

#[derive(Debug, Parser)]
struct WorkflowsArgs {
    /// Print the raw workflow schemas as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long, short)]
    workflow: String,
    #[arg(long, short, default_value = "")]
    prompt: String,
    #[arg(long)]
    name: Option<String>,
    /// Use this seed instead of a random one.
    #[arg(long)]
    seed: Option<u32>,
    /// Local image for the next free image slot (repeatable).
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    /// Stored image URL for the next free image slot (repeatable).
    #[arg(long = "image-url")]
    image_urls: Vec<String>,
    #[arg(long = "audio")]
    audio: Vec<PathBuf>,
    #[arg(long = "audio-url")]
    audio_urls: Vec<String>,
    /// Extra form field as `key=value`; JSON values are parsed.
    #[arg(long = "set", value_parser = parse_field)]
    fields: Vec<(String, Value)>,
}

#[derive(Debug, Parser)]
struct RegenerateArgs {
    #[arg(long)]
    uid: String,
    /// Field to regenerate (repeatable).
    #[arg(long = "field", required = true)]
    fields: Vec<String>,
}

#[derive(Debug, Parser)]
struct UploadArgs {
    path: PathBuf,
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediagen_cli=info,mediagen_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("mediagen error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.api_url {
        config.api_url = url.trim_end_matches('/').to_string();
    }
    tracing::debug!(api_url = %config.api_url, "Loaded configuration");

    let api = Arc::new(HttpGenerationApi::new(&config)?);
    let source = Arc::new(SseStreamSource::new(&config)?);
    let registry = TaskChannelRegistry::new(source);
    let orchestrator = GenerationOrchestrator::new(
        api,
        Arc::clone(&registry),
        Arc::new(TerminalTitle::new(APP_TITLE)),
    );
    let events = orchestrator.subscribe_events();

    let result = match cli.command {
        Command::Workflows(args) => list_workflows(&orchestrator, args).await,
        Command::Generate(args) => generate(&orchestrator, events, args).await,
        Command::Regenerate(args) => regenerate(&orchestrator, events, args).await,
        Command::Upload(args) => upload(&orchestrator, events, args).await,
    };

    registry.shutdown().await;
    result
}

// ---- commands ----

async fn list_workflows(orchestrator: &GenerationOrchestrator, args: WorkflowsArgs) -> Result<()> {
    let workflows = orchestrator
        .workflows()
        .await
        .map_err(|e| anyhow!(e.user_message()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }
    for workflow in &workflows {
        println!(
            "{:<28} {:<8} images={} audio={} orientation={}",
            workflow.name,
            format!("{:?}", workflow.kind).to_lowercase(),
            workflow.required_image_slots,
            workflow.required_audio_slots,
            if workflow.detects_orientation() {
                "detect"
            } else {
                workflow.orientation.as_str()
            },
        );
    }
    Ok(())
}

async fn generate(
    orchestrator: &GenerationOrchestrator,
    events: broadcast::Receiver<OrchestratorEvent>,
    args: GenerateArgs,
) -> Result<()> {
    let workflow = orchestrator
        .workflows()
        .await
        .map_err(|e| anyhow!(e.user_message()))?
        .into_iter()
        .find(|w| w.name == args.workflow)
        .with_context(|| format!("Unknown workflow '{}'", args.workflow))?;

    let mut session = GenerationSession::new(PreviewStore::new());
    session.select_workflow(workflow);
    session.form.set_text(PROMPT_FIELD, args.prompt)?;
    if let Some(name) = args.name {
        session.form.set_text(NAME_FIELD, name)?;
    }
    for (field, value) in args.fields {
        session
            .form
            .set(field.clone(), value)
            .with_context(|| format!("Invalid value for '{field}'"))?;
    }
    if let Some(seed) = args.seed {
        session.form.set_seed(seed);
        session.form.set_seed_locked(true);
    }
    attach(&mut session, MediaKind::Image, &args.images, &args.image_urls).await?;
    attach(&mut session, MediaKind::Audio, &args.audio, &args.audio_urls).await?;

    let handle = orchestrator
        .generate(&mut session)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    tracing::info!(task_id = %handle.task_id, seed = session.form.seed(), "Generation started");

    follow(orchestrator, events, handle).await
}

async fn regenerate(
    orchestrator: &GenerationOrchestrator,
    events: broadcast::Receiver<OrchestratorEvent>,
    args: RegenerateArgs,
) -> Result<()> {
    let handle = orchestrator
        .regenerate(&args.uid, args.fields)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    tracing::info!(task_id = %handle.task_id, uid = %args.uid, "Regeneration started");

    follow(orchestrator, events, handle).await
}

async fn upload(
    orchestrator: &GenerationOrchestrator,
    events: broadcast::Receiver<OrchestratorEvent>,
    args: UploadArgs,
) -> Result<()> {
    let bytes = tokio::fs::read(&args.path)
        .await
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    let handle = orchestrator
        .upload_media(&file_name_of(&args.path, "upload"), bytes)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    tracing::info!(task_id = %handle.task_id, "Upload started");

    follow(orchestrator, events, handle).await
}

// ---- helpers ----

/// Fill slots of `kind` in order: local files first, then URLs.
async fn attach(
    session: &mut GenerationSession,
    kind: MediaKind,
    files: &[PathBuf],
    urls: &[String],
) -> Result<()> {
    let capacity = session.media.slots(kind).capacity();
    let total = files.len() + urls.len();
    if total > capacity {
        bail!("Workflow accepts at most {capacity} {kind} input(s), got {total}");
    }

    for (index, path) in files.iter().enumerate() {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = file_name_of(path, &format!("{kind}_{index}"));
        session.media.slots_mut(kind).set_local(index, bytes, file_name);
    }
    for (offset, url) in urls.iter().enumerate() {
        session
            .media
            .slots_mut(kind)
            .set_remote(files.len() + offset, RemoteMedia::new(url.clone()));
    }
    Ok(())
}

fn file_name_of(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

/// Draw progress until the task settles, then print its record.
///
/// Ctrl-C detaches from the task; the backend job keeps running.
async fn follow(
    orchestrator: &GenerationOrchestrator,
    mut events: broadcast::Receiver<OrchestratorEvent>,
    handle: TaskHandle,
) -> Result<()> {
    let render = tokio::spawn(render_progress(handle.presenter.watch()));

    let outcome = tokio::select! {
        outcome = wait_for_result(&mut events, &handle.task_id) => outcome,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.detach(handle.role).await;
            render.abort();
            eprintln!();
            bail!("Interrupted; task {} keeps running on the server", handle.task_id);
        }
    };

    let _ = render.await;
    let entry = outcome?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

async fn wait_for_result(
    events: &mut broadcast::Receiver<OrchestratorEvent>,
    task_id: &str,
) -> Result<HistoryEntry> {
    loop {
        match events.recv().await {
            Ok(OrchestratorEvent::ResultReady {
                task_id: id, entry, ..
            }) if id == task_id => return Ok(entry),
            Ok(OrchestratorEvent::TaskFailed {
                task_id: id, error, ..
            }) if id == task_id => bail!(error),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => bail!("Event channel closed"),
        }
    }
}

async fn render_progress(mut rx: watch::Receiver<PresenterSnapshot>) {
    loop {
        let snapshot = rx.borrow_and_update().clone();
        if snapshot.phase != PresenterPhase::Hidden {
            draw(&snapshot);
        }
        if snapshot.phase.is_settled() {
            eprintln!();
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn draw(snapshot: &PresenterSnapshot) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(
        stderr,
        "\r\x1b[2K[{:>3}%] {}",
        snapshot.percentage,
        snapshot.display_message()
    );
    let _ = stderr.flush();
}
