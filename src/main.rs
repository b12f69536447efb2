use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codeidx::config::IndexMode;
use codeidx::service::IndexService;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "codeidx")]
#[command(version)]
#[command(about = "Codebase indexing and retrieval engine (BM25 + symbols + optional dense vectors)")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a full index of the workspace and print the resulting status as JSON.
    Index {
        workspace: PathBuf,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Run a query against a workspace's index.
    Search {
        workspace: PathBuf,
        query: String,
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Watch the workspace for changes and keep the index synchronized.
    Watch { workspace: PathBuf },
    /// Print the cached index status and project summary.
    Status { workspace: PathBuf },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Structural,
    Semantic,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum SearchMode {
    Lexical,
    Hybrid,
    Symbol,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("codeidx=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Index { workspace, mode } => run_index(workspace, mode).await,
        Command::Search { workspace, query, mode, top_k } => run_search(workspace, query, mode, top_k).await,
        Command::Watch { workspace } => run_watch(workspace).await,
        Command::Status { workspace } => run_status(workspace).await,
    }
}

fn canonical(workspace: PathBuf) -> Result<PathBuf> {
    workspace.canonicalize().with_context(|| format!("workspace not found: {}", workspace.display()))
}

async fn run_index(workspace: PathBuf, mode: Option<ModeArg>) -> Result<()> {
    let workspace = canonical(workspace)?;
    let service = IndexService::new(workspace);
    service.initialize().await?;
    if let Some(m) = mode {
        let mode = match m {
            ModeArg::Structural => IndexMode::Structural,
            ModeArg::Semantic => IndexMode::Semantic,
        };
        service.set_mode(mode).await?;
    }
    service.index_workspace().await?;
    println!("{}", serde_json::to_string_pretty(&service.status())?);
    Ok(())
}

async fn run_search(workspace: PathBuf, query: String, mode: SearchMode, top_k: usize) -> Result<()> {
    let workspace = canonical(workspace)?;
    let service = IndexService::new(workspace);
    service.initialize().await?;

    match mode {
        SearchMode::Lexical => {
            let results = service.search(&query, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        SearchMode::Hybrid => {
            let results = service.hybrid_search(&query, top_k).await?;
            let rendered: Vec<_> = results
                .into_iter()
                .map(|r| serde_json::json!({
                    "rel_path": r.rel_path,
                    "start_line": r.start_line,
                    "end_line": r.end_line,
                    "score": r.score,
                    "content": r.content,
                }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        SearchMode::Symbol => {
            let results = service.search_symbols(&query, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }
    Ok(())
}

async fn run_watch(workspace: PathBuf) -> Result<()> {
    let workspace = canonical(workspace)?;
    let service = std::sync::Arc::new(IndexService::new(workspace.clone()));
    service.initialize().await?;
    if !service.has_index().await? {
        service.index_workspace().await?;
    }

    let cfg = service.config();
    let Some(watcher) = codeidx::watcher::Watcher::start(&workspace, &cfg.ignored_dirs, &[]) else {
        anyhow::bail!("failed to start file watcher for {}", workspace.display());
    };
    let mut rx = watcher.subscribe();
    let debounce = std::time::Duration::from_millis(cfg.debounce_ms);

    tracing::info!(workspace = %workspace.display(), debounce_ms = cfg.debounce_ms, "watching for changes");

    // Debounce timer only runs while a change is buffered; a fresh event
    // pushes it back out by `debounce_ms` (§4.7 Idle -> Buffering -> Flushing).
    let sleep = tokio::time::sleep(debounce);
    tokio::pin!(sleep);
    let mut pending = false;

    loop {
        tokio::select! {
            recv = rx.recv() => {
                match recv {
                    Ok(event) => {
                        if service.push_change_event(event.kind, event.path) {
                            flush(&service).await;
                            pending = false;
                        } else {
                            pending = true;
                            sleep.as_mut().reset(tokio::time::Instant::now() + debounce);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "watcher lagged, some events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = &mut sleep, if pending => {
                flush(&service).await;
                pending = false;
                sleep.as_mut().reset(tokio::time::Instant::now() + debounce);
            }
        }
    }
    Ok(())
}

async fn flush(service: &IndexService) {
    if let Err(e) = service.flush_change_buffer().await {
        tracing::warn!(error = %e, "failed to flush change buffer");
    }
}

async fn run_status(workspace: PathBuf) -> Result<()> {
    let workspace = canonical(workspace)?;
    let service = IndexService::new(workspace);
    service.initialize().await?;
    let status = service.status();
    let summary = service.project_summary().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": status,
            "summary": summary,
        }))?
    );
    Ok(())
}
