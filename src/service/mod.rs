//! Index Service: per-workspace orchestrator owning the chunker, lexical and
//! symbol indices, summary, vector store, embedder, and watcher subscription
//! exclusively. §4.9

pub mod hybrid;
pub mod worker;

use crate::change_buffer::{ChangeBuffer, ChangeKind};
use crate::chunk::Chunk;
use crate::chunker;
use crate::config::{Config, IndexMode};
use crate::embedder::{ConnectionTestResult, Embedder, EmbeddingConfig};
use crate::error::{IndexError, Result};
use crate::lexical::LexicalIndex;
use crate::scanner;
use crate::summary::{self, ProjectSummary};
use crate::symbol_index::{SymbolIndex, SymbolKind, SymbolMatch, SymbolRecord};
use crate::vector_store::VectorStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Indexing,
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub lifecycle: String,
    pub total_files: u32,
    pub total_chunks: u32,
    pub indexed_files: u32,
    pub is_indexing: bool,
    pub error: Option<String>,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

struct StructuralState {
    lexical: LexicalIndex,
    symbols: SymbolIndex,
    language_counts: HashMap<String, u32>,
    file_symbols: HashMap<String, Vec<SymbolRecord>>,
    summary: Option<ProjectSummary>,
}

impl Default for StructuralState {
    fn default() -> Self {
        Self { lexical: LexicalIndex::new(), symbols: SymbolIndex::new(), language_counts: HashMap::new(), file_symbols: HashMap::new(), summary: None }
    }
}

struct SemanticState {
    vector_store: VectorStore,
    embedder: Arc<Embedder>,
}

pub struct IndexService {
    workspace: PathBuf,
    config: StdMutex<Config>,
    lifecycle: StdMutex<Lifecycle>,
    is_indexing: AtomicBool,
    structural: AsyncMutex<StructuralState>,
    semantic: AsyncMutex<Option<SemanticState>>,
    change_buffer: StdMutex<ChangeBuffer>,
    last_progress_ms: AtomicU64,
    last_error: StdMutex<Option<String>>,
    counters: StdMutex<(u32, u32, u32)>, // (total_files, total_chunks, indexed_files)
}

impl IndexService {
    pub fn new(workspace: PathBuf) -> Self {
        let config = Config::load(&workspace);
        let change_buffer = ChangeBuffer::new(config.debounce_ms, config.max_buffer_size, config.max_wait_ms);
        Self {
            workspace,
            config: StdMutex::new(config),
            lifecycle: StdMutex::new(Lifecycle::Uninitialized),
            is_indexing: AtomicBool::new(false),
            structural: AsyncMutex::new(StructuralState::default()),
            semantic: AsyncMutex::new(None),
            change_buffer: StdMutex::new(change_buffer),
            last_progress_ms: AtomicU64::new(0),
            last_error: StdMutex::new(None),
            counters: StdMutex::new((0, 0, 0)),
        }
    }

    fn config_snapshot(&self) -> Config {
        self.config.lock().unwrap().clone()
    }

    /// Current configuration snapshot, e.g. for wiring up an external file
    /// watcher with the same ignore rules used during indexing.
    pub fn config(&self) -> Config {
        self.config_snapshot()
    }

    fn set_lifecycle(&self, l: Lifecycle) {
        *self.lifecycle.lock().unwrap() = l;
    }

    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    /// Open the chunker (stateless, nothing to do), load prior structural
    /// state if present, and open the vector store when mode is semantic.
    pub async fn initialize(&self) -> Result<()> {
        let cfg = self.config_snapshot();
        if let Some(s) = summary::load(&self.workspace) {
            self.structural.lock().await.summary = Some(s);
        }
        self.load_structural_snapshot().await;

        if cfg.mode == IndexMode::Semantic {
            self.ensure_semantic_initialized(&cfg).await?;
        }
        self.set_lifecycle(Lifecycle::Initialized);
        Ok(())
    }

    async fn ensure_semantic_initialized(&self, cfg: &Config) -> Result<()> {
        let mut semantic = self.semantic.lock().await;
        if semantic.is_some() {
            return Ok(());
        }
        let embedder = Arc::new(Embedder::new(cfg.embedding.clone())?);
        let store = VectorStore::new(self.workspace.join(".codeidx").join("index"), embedder.dimensions());
        store.initialize().await?;
        *semantic = Some(SemanticState { vector_store: store, embedder });
        Ok(())
    }

    /// Lazily initializes semantic components on switch to `semantic`; no
    /// data migration occurs between modes.
    pub async fn set_mode(&self, mode: IndexMode) -> Result<()> {
        {
            let mut cfg = self.config.lock().unwrap();
            cfg.mode = mode;
            cfg.save(&self.workspace);
        }
        if mode == IndexMode::Semantic {
            let cfg = self.config_snapshot();
            self.ensure_semantic_initialized(&cfg).await?;
        }
        Ok(())
    }

    pub async fn has_index(&self) -> Result<bool> {
        let structural = self.structural.lock().await;
        if structural.lexical.len() > 0 || structural.summary.is_some() {
            return Ok(true);
        }
        drop(structural);
        let semantic = self.semantic.lock().await;
        if let Some(s) = semantic.as_ref() {
            return s.vector_store.has_index().await;
        }
        Ok(false)
    }

    fn begin_indexing(&self) -> Result<()> {
        if self.is_indexing.swap(true, Ordering::SeqCst) {
            return Err(IndexError::AlreadyIndexing);
        }
        self.set_lifecycle(Lifecycle::Indexing);
        Ok(())
    }

    fn end_indexing(&self) {
        self.is_indexing.store(false, Ordering::SeqCst);
        self.set_lifecycle(Lifecycle::Initialized);
    }

    fn maybe_emit_progress(&self, indexed: u32, total: u32, force: bool) {
        let now = now_ms();
        let last = self.last_progress_ms.load(Ordering::Relaxed);
        if !force && now.saturating_sub(last) < 100 {
            return;
        }
        self.last_progress_ms.store(now, Ordering::Relaxed);
        tracing::debug!(indexed_files = indexed, total_files = total, "indexing progress");
    }

    /// Full (re)index. Refuses to start if one is already running.
    pub async fn index_workspace(&self) -> Result<()> {
        self.begin_indexing()?;
        *self.last_error.lock().unwrap() = None;

        let cfg = self.config_snapshot();
        let result = if cfg.mode == IndexMode::Semantic {
            self.index_workspace_semantic(&cfg).await
        } else {
            self.index_workspace_structural(&cfg).await
        };

        if let Err(ref e) = result {
            *self.last_error.lock().unwrap() = Some(e.to_string());
        }
        self.end_indexing();
        self.maybe_emit_progress(0, 0, true);
        result
    }

    async fn index_workspace_structural(&self, cfg: &Config) -> Result<()> {
        let files = scanner::collect_workspace_files(&self.workspace, cfg).map_err(|e| IndexError::Io { path: self.workspace.clone(), source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()) })?;

        let mut structural = self.structural.lock().await;
        structural.lexical.clear();
        structural.symbols.clear();
        structural.language_counts.clear();
        structural.file_symbols.clear();

        let total = files.len() as u32;
        let mut total_chunks = 0u32;
        for (i, entry) in files.iter().enumerate() {
            let Ok(bytes) = std::fs::read(&entry.abs_path) else {
                tracing::warn!(path = %entry.abs_path.display(), "failed to read file, skipping");
                continue;
            };
            let chunks = chunker::chunk_file(&entry.abs_path, &bytes, &self.workspace, cfg);
            total_chunks += chunks.len() as u32;
            index_chunks(&mut structural, &entry.rel_path, chunks);
            *structural.language_counts.entry(language_of(&entry.abs_path)).or_insert(0) += 1;

            if (i + 1) % 20 == 0 {
                self.maybe_emit_progress(i as u32 + 1, total, false);
            }
        }

        structural.lexical.build();
        let summary = summary::generate(&structural.file_symbols, &structural.language_counts, total, now_ms());
        summary::save(&self.workspace, &summary);
        structural.summary = Some(summary);

        *self.counters.lock().unwrap() = (total, total_chunks, total);
        self.persist_structural_snapshot(&structural, total).ok();
        Ok(())
    }

    async fn index_workspace_semantic(&self, cfg: &Config) -> Result<()> {
        self.ensure_semantic_initialized(cfg).await?;
        let semantic = self.semantic.lock().await;
        let Some(state) = semantic.as_ref() else { return Err(IndexError::NotInitialized) };
        let existing_hashes = state.vector_store.file_hashes().await?;
        let embedder = state.embedder.clone();
        let vector_store = state.vector_store.clone();
        drop(semantic);

        let mut rx = worker::spawn(self.workspace.clone(), cfg.clone(), existing_hashes, embedder);
        let mut total_files = 0u32;
        let mut total_chunks = 0u32;
        while let Some(msg) = rx.recv().await {
            match msg {
                worker::WorkerMessage::Progress { indexed_files, total_files: t } => {
                    total_files = t;
                    self.maybe_emit_progress(indexed_files, t, false);
                }
                worker::WorkerMessage::Result { rows } => {
                    vector_store.add_batch(&rows).await?;
                }
                worker::WorkerMessage::Complete { total_files: t, total_chunks: c } => {
                    total_files = t;
                    total_chunks = c;
                    break;
                }
                worker::WorkerMessage::Error(e) => return Err(IndexError::UpstreamFatal(e)),
            }
        }
        *self.counters.lock().unwrap() = (total_files, total_chunks, total_files);
        Ok(())
    }

    /// Incremental maintenance for a batch of paths: skip non-allow-listed
    /// extensions, delete missing files, otherwise rechunk and replace.
    pub async fn update_files(&self, paths: &[PathBuf]) -> Result<()> {
        let cfg = self.config_snapshot();
        let mut structural = self.structural.lock().await;

        for path in paths {
            if !cfg.is_allowed_ext(path) {
                continue;
            }
            let rel_path = path.strip_prefix(&self.workspace).unwrap_or(path).to_string_lossy().replace('\\', "/");

            if !path.exists() {
                delete_from_structural(&mut structural, &rel_path);
                continue;
            }
            let bytes = match std::fs::read(path) {
                Ok(b) if b.len() as u64 <= cfg.max_file_size => b,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read file during incremental update");
                    continue;
                }
            };
            delete_from_structural(&mut structural, &rel_path);
            let chunks = chunker::chunk_file(path, &bytes, &self.workspace, &cfg);
            index_chunks(&mut structural, &rel_path, chunks);
        }

        structural.lexical.build();
        self.persist_structural_snapshot(&structural, structural.file_symbols.len() as u32).ok();
        Ok(())
    }

    pub async fn delete_file_index(&self, path: &Path) -> Result<()> {
        let rel_path = path.strip_prefix(&self.workspace).unwrap_or(path).to_string_lossy().replace('\\', "/");
        let mut structural = self.structural.lock().await;
        delete_from_structural(&mut structural, &rel_path);
        structural.lexical.build();

        if let Some(state) = self.semantic.lock().await.as_ref() {
            state.vector_store.delete_file(&path.to_string_lossy()).await?;
        }
        Ok(())
    }

    /// Lexical search in structural mode; dense ANN in semantic mode.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<crate::lexical::LexicalSearchResult>> {
        let cfg = self.config_snapshot();
        if cfg.mode == IndexMode::Structural {
            let structural = self.structural.lock().await;
            return Ok(structural.lexical.search(query, top_k));
        }
        Err(IndexError::Config("use ann_search via the vector store handle in semantic mode".into()))
    }

    pub async fn hybrid_search(&self, query: &str, top_k: usize) -> Result<Vec<hybrid::FusedResult>> {
        let cfg = self.config_snapshot();
        if cfg.mode == IndexMode::Structural {
            let structural = self.structural.lock().await;
            let lexical_results = structural.lexical.search(query, top_k * 2);
            let symbol_results = structural.symbols.search(query, top_k);
            return Ok(hybrid::structural_fuse(&lexical_results, &symbol_results, top_k));
        }

        let semantic = self.semantic.lock().await;
        let Some(state) = semantic.as_ref() else { return Err(IndexError::NotInitialized) };
        let query_vector = state.embedder.embed(query).await?;
        let dense = state.vector_store.ann_search(&query_vector, top_k * 2).await?;
        let keywords = extract_keywords(query);
        let keyword = state.vector_store.keyword_scan(&keywords, top_k * 2).await?;
        Ok(hybrid::semantic_fuse(&dense, &keyword, top_k))
    }

    pub async fn search_symbols(&self, query: &str, top_k: usize) -> Result<Vec<SymbolMatch>> {
        let structural = self.structural.lock().await;
        Ok(structural.symbols.search(query, top_k))
    }

    pub async fn project_summary(&self) -> Option<ProjectSummary> {
        self.structural.lock().await.summary.clone()
    }

    pub async fn project_summary_text(&self) -> Option<String> {
        self.project_summary().await.map(|s| summary::to_text(&s))
    }

    pub async fn file_symbols(&self, rel_path: &str) -> Vec<SymbolRecord> {
        self.structural.lock().await.symbols.file_symbols(rel_path)
    }

    pub async fn clear_index(&self) -> Result<()> {
        let mut structural = self.structural.lock().await;
        structural.lexical.clear();
        structural.symbols.clear();
        structural.language_counts.clear();
        structural.file_symbols.clear();
        structural.summary = None;
        if let Some(state) = self.semantic.lock().await.as_ref() {
            state.vector_store.clear().await?;
        }
        Ok(())
    }

    pub async fn update_embedding_config(&self, embedding: EmbeddingConfig) -> Result<()> {
        {
            let mut cfg = self.config.lock().unwrap();
            cfg.embedding = embedding;
            cfg.save(&self.workspace);
        }
        let mut semantic = self.semantic.lock().await;
        *semantic = None;
        let cfg = self.config_snapshot();
        if cfg.mode == IndexMode::Semantic {
            drop(semantic);
            self.ensure_semantic_initialized(&cfg).await?;
        }
        Ok(())
    }

    pub async fn test_embedding_connection(&self) -> Result<ConnectionTestResult> {
        let cfg = self.config_snapshot();
        let embedder = Embedder::new(cfg.embedding)?;
        Ok(embedder.test_connection().await)
    }

    /// Best-effort cancellable: terminates any in-flight worker handle by
    /// dropping the service's state and marking it destroyed.
    pub async fn destroy(&self) -> Result<()> {
        self.set_lifecycle(Lifecycle::Destroyed);
        *self.semantic.lock().await = None;
        Ok(())
    }

    pub fn status(&self) -> IndexStatus {
        let (total_files, total_chunks, indexed_files) = *self.counters.lock().unwrap();
        let lifecycle = match self.lifecycle() {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Initialized => "initialized",
            Lifecycle::Indexing => "indexing",
            Lifecycle::Destroyed => "destroyed",
        };
        IndexStatus {
            lifecycle: lifecycle.to_string(),
            total_files,
            total_chunks,
            indexed_files,
            is_indexing: self.is_indexing.load(Ordering::SeqCst),
            error: self.last_error.lock().unwrap().clone(),
        }
    }

    /// Feed one filesystem change event into the buffer; returns `true` if
    /// the caller should flush immediately.
    pub fn push_change_event(&self, kind: ChangeKind, path: PathBuf) -> bool {
        let event = crate::change_buffer::ChangeEvent { kind, path, at: std::time::Instant::now() };
        self.change_buffer.lock().unwrap().push(event)
    }

    pub async fn flush_change_buffer(&self) -> Result<()> {
        let batch = self.change_buffer.lock().unwrap().flush();
        for path in &batch.deletes {
            self.delete_file_index(path).await?;
        }
        self.update_files(&batch.creates_or_updates).await
    }

    /// Best-effort reload of the prior structural snapshot (missing or
    /// corrupt file is tolerated the same way as `Config::load`).
    async fn load_structural_snapshot(&self) {
        let path = self.workspace.join(".codeidx").join("structural-index.json");
        let Ok(text) = std::fs::read_to_string(&path) else { return };
        let Ok(snapshot) = serde_json::from_str::<StructuralSnapshot>(&text) else { return };

        let mut structural = self.structural.lock().await;
        structural.lexical = LexicalIndex::from_snapshot(snapshot.bm25);
        structural.symbols = SymbolIndex::from_serializable(snapshot.symbols);
        structural.file_symbols.clear();
        for record in structural.symbols.entries().cloned().collect::<Vec<_>>() {
            structural.file_symbols.entry(record.file.clone()).or_default().push(record);
        }
        *self.counters.lock().unwrap() = (snapshot.total_files, structural.lexical.len() as u32, snapshot.total_files);
    }

    fn persist_structural_snapshot(&self, structural: &StructuralState, total_files: u32) -> anyhow::Result<()> {
        let snapshot = StructuralSnapshot {
            bm25: structural.lexical.to_snapshot(),
            symbols: structural.symbols.to_serializable(),
            total_files,
            saved_at: now_ms(),
        };
        let dir = self.workspace.join(".codeidx");
        std::fs::create_dir_all(&dir)?;
        let text = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(dir.join("structural-index.json"), text)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StructuralSnapshot {
    bm25: crate::lexical::LexicalSnapshot,
    symbols: crate::symbol_index::SerializableSymbolIndex,
    total_files: u32,
    saved_at: u64,
}

fn index_chunks(structural: &mut StructuralState, rel_path: &str, chunks: Vec<Chunk>) {
    let mut records = Vec::new();
    for chunk in &chunks {
        structural.lexical.add_document(chunk);
        for name in &chunk.symbols {
            let record = SymbolRecord {
                name: name.clone(),
                kind: kind_for_chunk(chunk),
                file: rel_path.to_string(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                signature: None,
            };
            structural.symbols.add(record.clone());
            records.push(record);
        }
    }
    if !records.is_empty() {
        structural.file_symbols.entry(rel_path.to_string()).or_default().extend(records);
    }
}

fn kind_for_chunk(chunk: &Chunk) -> SymbolKind {
    match chunk.kind {
        crate::chunk::ChunkKind::Function => SymbolKind::Function,
        crate::chunk::ChunkKind::Class => SymbolKind::Class,
        _ => SymbolKind::Other,
    }
}

fn delete_from_structural(structural: &mut StructuralState, rel_path: &str) {
    structural.lexical.delete_file(rel_path);
    structural.symbols.delete_file(rel_path);
    structural.file_symbols.remove(rel_path);
}

fn language_of(path: &Path) -> String {
    chunker::languages::language_tag_for_path(path).unwrap_or("text").to_string()
}

fn extract_keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|t| t.len() >= 2 && !t.chars().all(|c| c.is_ascii_digit()))
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_keywords_drops_short_and_numeric_tokens() {
        let kws = extract_keywords("foo 12 a bar-baz");
        assert_eq!(kws, vec!["foo", "bar", "baz"]);
    }

    #[tokio::test]
    async fn status_starts_uninitialized_with_zero_counters() {
        let dir = tempfile::tempdir().unwrap();
        let svc = IndexService::new(dir.path().to_path_buf());
        let status = svc.status();
        assert_eq!(status.lifecycle, "uninitialized");
        assert_eq!(status.total_files, 0);
        assert!(!status.is_indexing);
    }

    #[tokio::test]
    async fn structural_index_then_search_finds_symbol() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn process_request() {\n    let x = 1;\n    x\n}\n").unwrap();
        let svc = IndexService::new(dir.path().to_path_buf());
        svc.initialize().await.unwrap();
        svc.index_workspace().await.unwrap();
        let results = svc.search("process_request", 5).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn scenario_4_incremental_update_replaces_renamed_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "fn foo() {\n    let x = 1;\n    x\n}\n").unwrap();
        let svc = IndexService::new(dir.path().to_path_buf());
        svc.initialize().await.unwrap();
        svc.index_workspace().await.unwrap();
        assert!(!svc.search("foo", 5).await.unwrap().is_empty());

        std::fs::write(&file, "fn bar() {\n    let x = 1;\n    x\n}\n").unwrap();
        svc.update_files(&[file.clone()]).await.unwrap();

        assert!(svc.search("foo", 5).await.unwrap().is_empty());
        assert!(!svc.search("bar", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_index_workspace_calls_second_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let svc = Arc::new(IndexService::new(dir.path().to_path_buf()));
        svc.initialize().await.unwrap();
        svc.is_indexing.store(true, Ordering::SeqCst);
        let err = svc.index_workspace().await.unwrap_err();
        assert!(matches!(err, IndexError::AlreadyIndexing));
    }
}
