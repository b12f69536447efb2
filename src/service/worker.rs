//! Semantic full-index worker. §4.9, §5, §9
//!
//! Runs on a separate tokio task and streams `WorkerMessage`s back over a
//! bounded channel: `progress`, then zero or more `result` batches (each a
//! commit point for the service), then exactly one `complete` or `error`.
//! Modeled per §9 as a tagged sum type consumed exhaustively, not untyped
//! heterogeneous callbacks.

use crate::chunker;
use crate::config::Config;
use crate::embedder::Embedder;
use crate::scanner::{self, FileEntry};
use crate::vector_store::VectorRow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Progress { indexed_files: u32, total_files: u32 },
    Result { rows: Vec<VectorRow> },
    Complete { total_files: u32, total_chunks: u32 },
    Error(String),
}

const EMBED_BATCH_FILES: usize = 20;

/// Spawns the worker and returns the receiving end of its message channel.
/// `existing_hashes` lets the worker skip files whose content hasn't changed
/// since the last semantic index.
pub fn spawn(
    workspace: PathBuf,
    config: Config,
    existing_hashes: HashMap<String, String>,
    embedder: Arc<Embedder>,
) -> mpsc::Receiver<WorkerMessage> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        if let Err(e) = run(&workspace, &config, &existing_hashes, &embedder, &tx).await {
            let _ = tx.send(WorkerMessage::Error(e.to_string())).await;
        }
    });

    rx
}

async fn run(
    workspace: &std::path::Path,
    config: &Config,
    existing_hashes: &HashMap<String, String>,
    embedder: &Arc<Embedder>,
    tx: &mpsc::Sender<WorkerMessage>,
) -> anyhow::Result<()> {
    let files = scanner::collect_workspace_files(workspace, config)?;
    let total_files = files.len() as u32;
    let mut indexed_files = 0u32;
    let mut total_chunks = 0u32;

    for batch in files.chunks(EMBED_BATCH_FILES) {
        let mut rows = Vec::new();
        for entry in batch {
            indexed_files += 1;
            if unchanged(entry, existing_hashes) {
                continue;
            }
            let Ok(bytes) = std::fs::read(&entry.abs_path) else {
                continue;
            };
            let chunks = chunker::chunk_file(&entry.abs_path, &bytes, workspace, config);
            if chunks.is_empty() {
                continue;
            }
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let embeddings = embedder.embed_batch(&texts).await?;
            for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
                total_chunks += 1;
                rows.push(VectorRow { chunk, embedding });
            }
        }

        if !rows.is_empty() {
            tx.send(WorkerMessage::Result { rows }).await.ok();
        }
        tx.send(WorkerMessage::Progress { indexed_files, total_files }).await.ok();
    }

    tx.send(WorkerMessage::Complete { total_files, total_chunks }).await.ok();
    Ok(())
}

fn unchanged(entry: &FileEntry, existing_hashes: &HashMap<String, String>) -> bool {
    let Some(prior) = existing_hashes.get(&entry.abs_path.to_string_lossy().replace('\\', "/")) else {
        return false;
    };
    let Ok(bytes) = std::fs::read(&entry.abs_path) else {
        return false;
    };
    *prior == crate::chunk::sha256_hex(&bytes)
}
