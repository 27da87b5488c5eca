//! Reqflow Server
//!
//! Axum server exposing the document pipeline one stage per endpoint, with
//! live progress over server-sent events. The `process` subcommand runs the
//! whole pipeline over local files without a server.

mod api;

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use reqflow_core::config::PipelineConfig;
use reqflow_core::pipeline::{Orchestrator, PipelineOutcome, UploadInput, UploadedFile};
use reqflow_core::progress::{ProgressEvent, ProgressStore};
use reqflow_core::skills::Prompts;
use reqflow_core::state::RequirementDb;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use api::{AppState, SharedState};

const DEFAULT_PORT: u16 = 8080;

#[derive(Parser, Clone)]
#[command(author, version, about = "Reqflow - turn documents into requirements")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Reqflow server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run the pipeline over local files and print progress as JSON lines
    Process {
        /// Owning project id
        #[arg(long)]
        project: String,
        /// Job id; generated when omitted
        #[arg(long)]
        document: Option<String>,
        /// Files to process
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Build the process-wide services: database, prompts, progress store
fn build_orchestrator(config: PipelineConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let db = RequirementDb::open_at(&config.db_path)
        .with_context(|| format!("Failed to open database at {:?}", config.db_path))?;

    match db.seed_prompts() {
        Ok(count) if count > 0 => tracing::info!(count, "Seeded default prompts"),
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to seed prompts: {}", e),
    }
    let prompts = db.load_prompts().unwrap_or_else(|e| {
        tracing::warn!("Failed to load stored prompts, using defaults: {}", e);
        Prompts::defaults()
    });

    let progress = Arc::new(ProgressStore::new(
        config.progress.subscriber_buffer,
        Duration::from_secs(config.progress.gc_grace_secs),
    ));
    Ok(Arc::new(
        Orchestrator::new(progress, Arc::new(db), config).with_prompts(prompts),
    ))
}

pub async fn run_server(config: PipelineConfig, port: u16) -> anyhow::Result<()> {
    let gateway = config.progress.gateway();
    let gc_period = Duration::from_secs(config.progress.gc_period_secs.max(1));
    let orchestrator = build_orchestrator(config)?;
    let _gc = orchestrator.progress().spawn_gc(gc_period);

    let state: SharedState = Arc::new(AppState {
        orchestrator,
        gateway,
    });
    let app = api::router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "Reqflow server running");
    tracing::info!("Stages:   /api/v1/documents/upload, /extract, /analyze, /store");
    tracing::info!("Progress: /api/v1/documents/progress/:document_id (SSE)");
    tracing::info!("OpenAPI:  /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn print_event(event: &ProgressEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Failed to encode event: {}", e),
    }
}

async fn run_process(
    config: PipelineConfig,
    project: String,
    document: Option<String>,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;

    let mut uploads = Vec::with_capacity(files.len());
    for path in &files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        uploads.push(UploadedFile { file_name, bytes });
    }

    // The id must be known up front to subscribe before the first event
    let document_id = match document {
        Some(id) => id,
        None => format!("cli-{}", SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis()),
    };
    let (_, mut subscription) = orchestrator.progress().subscribe_with_history(&document_id);
    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => print_event(&event),
                    None => break,
                },
                _ = &mut done_rx => {
                    while let Some(event) = subscription.try_recv() {
                        print_event(&event);
                    }
                    break;
                }
            }
        }
    });

    let outcome = orchestrator
        .run_to_completion(UploadInput {
            project_id: project,
            document_id: Some(document_id),
            files: uploads,
        })
        .await;
    let _ = done_tx.send(());
    let _ = printer.await;

    match outcome? {
        PipelineOutcome::Stored(output) => {
            tracing::info!(
                saved = output.saved_requirements,
                failed = output.failed_requirements,
                "Requirements stored"
            );
            println!("{}", serde_json::to_string(&output)?);
        }
        PipelineOutcome::AwaitingAnswers(output) => {
            tracing::info!(
                questions = output.dynamic_questions.len(),
                "Gaps found; answer the questionnaire and call generate-requirements-from-document"
            );
            println!("{}", serde_json::to_string(&output)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = PipelineConfig::load().await?;

    match args.command {
        Some(CliCommand::Process {
            project,
            document,
            files,
        }) => run_process(config, project, document, files).await,
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, DEFAULT_PORT).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_arguments() {
        let args = Args::try_parse_from([
            "reqflow", "process", "--project", "proj", "a.pdf", "b.md",
        ])
        .unwrap();
        match args.command {
            Some(CliCommand::Process {
                project,
                document,
                files,
            }) => {
                assert_eq!(project, "proj");
                assert!(document.is_none());
                assert_eq!(files.len(), 2);
            }
            _ => panic!("expected process"),
        }
    }

    #[test]
    fn test_serve_defaults_to_8080() {
        let args = Args::try_parse_from(["reqflow", "serve"]).unwrap();
        assert!(matches!(args.command, Some(CliCommand::Serve { port: 8080 })));
        assert!(Args::try_parse_from(["reqflow", "process", "--project", "p"]).is_err());
    }
}
