//! Error taxonomy for the indexing engine (kinds, not a catch-all).
//!
//! Per-file errors never abort a batch; only `UpstreamFatal` and embedding
//! failures are surfaced into `IndexStatus.error`. See `service` for
//! propagation policy.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding provider rate-limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    #[error("upstream embedding provider error (transient): {0}")]
    UpstreamTransient(String),

    #[error("upstream embedding provider error (fatal): {0}")]
    UpstreamFatal(String),

    #[error("vector store schema mismatch, table dropped and recreated: {0}")]
    SchemaMismatch(String),

    #[error("operation already in progress for this workspace")]
    AlreadyIndexing,

    #[error("semantic components are not initialized")]
    NotInitialized,

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(PathBuf),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Retryable per §4.5: timeouts, connection resets, 429, 5xx.
    pub fn is_retryable_status(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }
}
