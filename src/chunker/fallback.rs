//! Line-based chunker: used when no grammar is registered, parsing fails, or
//! the capture query yields nothing. §4.1.

use crate::chunk::{Chunk, ChunkKind};
use crate::config::Config;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn semantic_patterns() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*(?:pub\s+|export\s+|async\s+)*(?:function|class|interface|struct|trait|impl|type|def|enum)\b",
        )
        .unwrap()
    })
}

fn language_tag(path: &Path) -> String {
    super::languages::language_tag_for_path(path).unwrap_or("text").to_string()
}

/// Entry point for the whole fallback path, given already-decoded text.
pub fn line_chunk(abs_path: &Path, rel_path: &str, file_hash: &str, text: &str, cfg: &Config) -> Vec<Chunk> {
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();
    let language = language_tag(abs_path);

    if total == 0 {
        return Vec::new();
    }

    if total as f64 <= 1.5 * cfg.chunk_size as f64 {
        return vec![Chunk::new(
            abs_path.to_path_buf(),
            rel_path.to_string(),
            file_hash.to_string(),
            text.to_string(),
            1,
            total as u32,
            ChunkKind::File,
            language,
            Vec::new(),
        )];
    }

    let boundaries: Vec<usize> = semantic_patterns()
        .find_iter(text)
        .map(|m| text[..m.start()].matches('\n').count() + 1)
        .collect();

    if !boundaries.is_empty() {
        return semantic_chunks(abs_path, rel_path, file_hash, &lines, &boundaries, &language, cfg);
    }

    window_chunks(abs_path, rel_path, file_hash, &lines, &language, cfg)
}

fn semantic_chunks(
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
    lines: &[&str],
    boundaries: &[usize],
    language: &str,
    cfg: &Config,
) -> Vec<Chunk> {
    let total = lines.len();
    let mut starts = boundaries.to_vec();
    starts.sort_unstable();
    starts.dedup();

    let mut spans: Vec<(usize, usize)> = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|n| n - 1).unwrap_or(total);
        spans.push((start, end));
    }
    if let Some(&first_start) = starts.first() {
        if first_start > 1 {
            spans.insert(0, (1, first_start - 1));
        }
    }

    let mut chunks = Vec::new();
    for (start, end) in spans {
        if end < start {
            continue;
        }
        let span_lines = end - start + 1;
        if span_lines > 2 * cfg.chunk_size {
            let sub_text = lines[(start - 1)..end].join("\n");
            let sub = window_chunks_from_offset(abs_path, rel_path, file_hash, &lines[(start - 1)..end], language, cfg, start as u32);
            if sub.is_empty() {
                push_plain(abs_path, rel_path, file_hash, &sub_text, start as u32, end as u32, language, &mut chunks);
            } else {
                chunks.extend(sub);
            }
            continue;
        }
        let content = lines[(start - 1)..end].join("\n");
        if content.trim().is_empty() {
            continue;
        }
        push_plain(abs_path, rel_path, file_hash, &content, start as u32, end as u32, language, &mut chunks);
    }
    chunks
}

fn push_plain(
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
    content: &str,
    start: u32,
    end: u32,
    language: &str,
    out: &mut Vec<Chunk>,
) {
    out.push(Chunk::new(
        abs_path.to_path_buf(),
        rel_path.to_string(),
        file_hash.to_string(),
        content.to_string(),
        start,
        end,
        ChunkKind::Block,
        language.to_string(),
        Vec::new(),
    ));
}

/// Overlapping line windows: stride `chunk_size - chunk_overlap`, window
/// `chunk_size` lines; empty-after-trim windows are skipped.
fn window_chunks(abs_path: &Path, rel_path: &str, file_hash: &str, lines: &[&str], language: &str, cfg: &Config) -> Vec<Chunk> {
    window_chunks_from_offset(abs_path, rel_path, file_hash, lines, language, cfg, 1)
}

fn window_chunks_from_offset(
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
    lines: &[&str],
    language: &str,
    cfg: &Config,
    line_offset: u32,
) -> Vec<Chunk> {
    let stride = cfg.chunk_size.saturating_sub(cfg.chunk_overlap).max(1);
    let window = cfg.chunk_size.max(1);
    let total = lines.len();

    let mut chunks = Vec::new();
    let mut pos = 0usize;
    while pos < total {
        let end = (pos + window).min(total);
        let content = lines[pos..end].join("\n");
        if !content.trim().is_empty() {
            let start_line = line_offset + pos as u32;
            let end_line = line_offset + end as u32 - 1;
            push_plain(abs_path, rel_path, file_hash, &content, start_line, end_line, language, &mut chunks);
        }
        if end == total {
            break;
        }
        pos += stride;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cfg_with_chunk_size(n: usize) -> Config {
        let mut cfg = Config::default();
        cfg.chunk_size = n;
        cfg.chunk_overlap = n / 8;
        cfg
    }

    #[test]
    fn small_file_yields_single_file_chunk() {
        let cfg = cfg_with_chunk_size(80);
        let text = (1..=50).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let chunks = line_chunk(&PathBuf::from("/repo/notes.txt"), "notes.txt", "hash", &text, &cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::File);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 50);
    }

    #[test]
    fn large_plain_file_uses_overlapping_windows_with_expected_ranges() {
        let cfg = cfg_with_chunk_size(80);
        let text = (1..=400).map(|i| format!("data line {i}")).collect::<Vec<_>>().join("\n");
        let chunks = line_chunk(&PathBuf::from("/repo/data.csv"), "data.csv", "hash", &text, &cfg);
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 80);
        assert_eq!(chunks[1].start_line, 71);
        assert_eq!(chunks[1].end_line, 150);
    }

    #[test]
    fn semantic_pass_splits_on_function_boundaries() {
        let cfg = cfg_with_chunk_size(80);
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&format!("function f{i}() {{\n  return {i};\n}}\n\n"));
        }
        let chunks = line_chunk(&PathBuf::from("/repo/app.js"), "app.js", "hash", &text, &cfg);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Block));
    }
}
