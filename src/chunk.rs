//! `Chunk`: a contiguous, line-addressed region of one file. See §3.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Semantic kind of a chunk. `file` for whole-file fallback, `block` for
/// syntactic fallback / gap-filled regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    File,
    Function,
    Class,
    Block,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::File => "file",
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Block => "block",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from `(absolute path, start line)`.
    pub id: String,
    pub abs_path: PathBuf,
    /// Workspace-relative path with `/` separators.
    pub rel_path: String,
    /// sha-256 hex of the *whole file's* bytes at index time.
    pub file_hash: String,
    pub content: String,
    /// 1-indexed, inclusive.
    pub start_line: u32,
    /// 1-indexed, inclusive.
    pub end_line: u32,
    pub kind: ChunkKind,
    pub language: String,
    pub symbols: Vec<String>,
}

/// Marker appended to truncated chunk content so a reader can tell the chunk
/// was cut short rather than legitimately ending there.
pub const TRUNCATION_MARKER: &str = "\n/* … truncated … */";

pub fn chunk_id(abs_path: &Path, start_line: u32) -> String {
    format!("{}:{}", abs_path.to_string_lossy().replace('\\', "/"), start_line)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl Chunk {
    pub fn new(
        abs_path: PathBuf,
        rel_path: String,
        file_hash: String,
        content: String,
        start_line: u32,
        end_line: u32,
        kind: ChunkKind,
        language: String,
        symbols: Vec<String>,
    ) -> Self {
        let id = chunk_id(&abs_path, start_line);
        Self {
            id,
            abs_path,
            rel_path,
            file_hash,
            content,
            start_line,
            end_line,
            kind,
            language,
            symbols,
        }
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable_for_same_path_and_line() {
        let p = PathBuf::from("/repo/src/a.rs");
        assert_eq!(chunk_id(&p, 3), chunk_id(&p, 3));
        assert_ne!(chunk_id(&p, 3), chunk_id(&p, 4));
    }

    #[test]
    fn invariant_end_line_ge_start_line_ge_one() {
        let c = Chunk::new(
            PathBuf::from("/repo/a.rs"),
            "a.rs".into(),
            sha256_hex(b"x"),
            "fn a() {}".into(),
            2,
            4,
            ChunkKind::Function,
            "rust".into(),
            vec!["a".into()],
        );
        assert!(c.end_line >= c.start_line);
        assert!(c.start_line >= 1);
    }
}
