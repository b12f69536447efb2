//! Engine configuration. Mirrors the enumerated config of §6, persisted the
//! same best-effort way the teacher persists its own config: JSON, missing
//! file tolerated, corrupt file falls back to defaults.

use crate::embedder::EmbeddingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-workspace state directory (`W/<state-dir>/`).
pub const STATE_DIR: &str = ".codeidx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    Structural,
    Semantic,
}

impl Default for IndexMode {
    fn default() -> Self {
        IndexMode::Structural
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: IndexMode,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_file_size: u64,
    pub ignored_dirs: Vec<String>,
    pub included_exts: Vec<String>,
    pub embedding: EmbeddingConfig,
    /// `debounce_ms` / `max_buffer_size` / `max_wait_ms` for the change buffer.
    pub debounce_ms: u64,
    pub max_buffer_size: usize,
    pub max_wait_ms: u64,
}

fn default_ignored_dirs() -> Vec<String> {
    vec![
        "node_modules".into(),
        ".git".into(),
        "dist".into(),
        "build".into(),
        STATE_DIR.into(),
    ]
}

fn default_included_exts() -> Vec<String> {
    [
        "ts", "tsx", "js", "jsx", "py", "go", "rs", "java", "cpp", "c", "h", "hpp", "cs", "rb",
        "php", "swift", "kt", "scala", "vue", "svelte",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: IndexMode::default(),
            chunk_size: 80,
            chunk_overlap: 10,
            max_file_size: 1024 * 1024,
            ignored_dirs: default_ignored_dirs(),
            included_exts: default_included_exts(),
            embedding: EmbeddingConfig::default(),
            debounce_ms: 500,
            max_buffer_size: 50,
            max_wait_ms: 5000,
        }
    }
}

impl Config {
    /// `max_chunk_chars = chunk_size * 50` per §4.1.
    pub fn max_chunk_chars(&self) -> usize {
        self.chunk_size.saturating_mul(50)
    }

    pub fn state_dir(&self, workspace: &Path) -> PathBuf {
        workspace.join(STATE_DIR)
    }

    pub fn config_path(workspace: &Path) -> PathBuf {
        workspace.join(STATE_DIR).join("config.json")
    }

    pub fn load(workspace: &Path) -> Self {
        let path = Self::config_path(workspace);
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|_| Self::default())
    }

    pub fn save(&self, workspace: &Path) {
        let dir = self.state_dir(workspace);
        if std::fs::create_dir_all(&dir).is_err() {
            return;
        }
        if let Ok(text) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(Self::config_path(workspace), text);
        }
    }

    pub fn is_allowed_ext(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.included_exts.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = Config::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back.chunk_size, cfg.chunk_size);
        assert_eq!(back.max_file_size, cfg.max_file_size);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path());
        assert_eq!(cfg.chunk_size, 80);
    }

    #[test]
    fn max_chunk_chars_matches_spec_formula() {
        let cfg = Config::default();
        assert_eq!(cfg.max_chunk_chars(), 4000);
    }
}
