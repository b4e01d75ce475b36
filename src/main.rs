//! `canvas-sync`: inspect and rearrange a dashboard canvas from the shell.

use std::sync::Arc;

use canvas_sync::{
    BackendError, BatchOutcome, Canvas, CanvasBackend, CanvasConfig, CanvasError, ConfigError, ErrorCode,
    GestureBatch, HttpBackend, Placement,
};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing API token; pass --token or set CANVAS_API_TOKEN")]
    MissingToken,
    #[error("no item with server id {0} on this dashboard")]
    UnknownItem(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend setup failed: {0}")]
    Backend(#[from] BackendError),
    #[error("{} ({})", .0, .0.error_code())]
    Canvas(#[from] CanvasError),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "canvas-sync", about = "Dashboard canvas inspection and layout CLI")]
struct Cli {
    /// Overrides `CANVAS_API_URL`.
    #[arg(long)]
    api_url: Option<String>,

    /// Overrides `CANVAS_API_TOKEN`.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the hydrated items of a dashboard.
    Show { dashboard: String },
    /// Move or resize one item as a single gesture.
    Move {
        dashboard: String,
        server_id: String,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    },
    /// Remove one item and wait for the backend delete.
    Remove { dashboard: String, server_id: String },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, ".env not loaded"),
    }

    let cli = Cli::parse();
    let mut config = CanvasConfig::from_env()?;
    if let Some(url) = cli.api_url {
        config.api.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(token) = cli.token {
        config.api.token = Some(token);
    }
    if config.api.token.is_none() {
        return Err(CliError::MissingToken);
    }

    let backend = Arc::new(HttpBackend::new(&config.api)?);
    let ready = backend.ready();
    let backend: Arc<dyn CanvasBackend> = backend;
    let build = |dashboard: String| {
        Canvas::builder(dashboard, Arc::clone(&backend))
            .columns(config.grid_columns)
            .event_capacity(config.event_capacity)
            .ready(ready.clone())
            .build()
    };

    match cli.command {
        Command::Show { dashboard } => run_show(&build(dashboard)).await,
        Command::Move { dashboard, server_id, x, y, w, h } => {
            run_move(&build(dashboard), &server_id, Placement::new(x, y, w, h)).await
        }
        Command::Remove { dashboard, server_id } => run_remove(&build(dashboard), &server_id).await,
    }
}

async fn run_show(canvas: &Canvas) -> Result<(), CliError> {
    canvas.load().await?;
    print_json(&canvas.items())
}

async fn run_move(canvas: &Canvas, server_id: &str, placement: Placement) -> Result<(), CliError> {
    canvas.load().await?;
    let item = canvas
        .find_by_server_id(server_id)
        .ok_or_else(|| CliError::UnknownItem(server_id.to_string()))?;

    let batch: GestureBatch = [(item.local_id, placement)].into_iter().collect();
    match canvas.on_gesture_end(batch).await? {
        BatchOutcome::Unchanged => println!("unchanged"),
        BatchOutcome::AllSucceeded { .. } => println!("saved"),
        outcome => {
            for (_, err) in outcome.failed() {
                eprintln!("{err} ({})", err.error_code());
            }
            return Err(CliError::Canvas(CanvasError::Network("layout not saved".into())));
        }
    }
    print_json(&canvas.find_by_server_id(server_id))
}

async fn run_remove(canvas: &Canvas, server_id: &str) -> Result<(), CliError> {
    canvas.load().await?;
    let item = canvas
        .find_by_server_id(server_id)
        .ok_or_else(|| CliError::UnknownItem(server_id.to_string()))?;
    let removal = canvas.remove(item.local_id)?;
    removal.delete.wait().await?;
    println!("deleted {server_id}");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
