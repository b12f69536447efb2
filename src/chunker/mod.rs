//! File → ordered `Chunk` list. §4.1.
//!
//! Syntax-aware path first (tree-sitter capture query, iterative oversized-node
//! splitting, gap filling), falling back to the line chunker when no grammar
//! is registered, parsing fails, or the query yields no captures.

pub mod fallback;
pub mod languages;

use crate::chunk::{sha256_hex, Chunk, ChunkKind, TRUNCATION_MARKER};
use crate::config::Config;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tree_sitter::{Node, Parser, QueryCursor, StreamingIterator};

/// One-shot per-language parse-failure marker so repeated failures on the
/// same language don't spam logs across a large batch. §4.1 failure semantics.
fn warned_languages() -> &'static std::sync::Mutex<HashSet<String>> {
    static SET: OnceLock<std::sync::Mutex<HashSet<String>>> = OnceLock::new();
    SET.get_or_init(|| std::sync::Mutex::new(HashSet::new()))
}

fn warn_once(language: &str, message: &str) {
    let mut seen = warned_languages().lock().unwrap();
    if seen.insert(language.to_string()) {
        tracing::warn!(language, "{message}");
    }
}

struct Span {
    start_line: u32,
    end_line: u32,
}

/// Entry point: classify by extension, try the syntax path, else fall back.
pub fn chunk_file(abs_path: &Path, raw_bytes: &[u8], workspace_root: &Path, cfg: &Config) -> Vec<Chunk> {
    if raw_bytes.len() as u64 > cfg.max_file_size {
        return Vec::new();
    }
    let text = String::from_utf8_lossy(raw_bytes).into_owned();
    let rel_path = abs_path
        .strip_prefix(workspace_root)
        .unwrap_or(abs_path)
        .to_string_lossy()
        .replace('\\', "/");
    let file_hash = sha256_hex(raw_bytes);

    let Some(language_tag) = languages::language_tag_for_path(abs_path) else {
        return fallback::line_chunk(abs_path, &rel_path, &file_hash, &text, cfg);
    };

    match syntax_chunk(abs_path, &rel_path, &file_hash, &text, language_tag, cfg) {
        Some(chunks) if !chunks.is_empty() => chunks,
        _ => fallback::line_chunk(abs_path, &rel_path, &file_hash, &text, cfg),
    }
}

fn syntax_chunk(
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
    text: &str,
    language_tag: &str,
    cfg: &Config,
) -> Option<Vec<Chunk>> {
    let (language, query) = languages::grammar_for_path(abs_path)?;

    let mut parser = Parser::new();
    if parser.set_language(&language).is_err() {
        warn_once(language_tag, "failed to set tree-sitter language on parser");
        return None;
    }
    let tree = parser.parse(text, None)?;
    if tree.root_node().has_error() {
        // Still attempt extraction; partial trees often still yield usable captures.
    }

    let mut cursor = QueryCursor::new();
    let bytes = text.as_bytes();
    let mut captures: Vec<(Node, ChunkKind)> = Vec::new();
    let mut matches = cursor.matches(&query, tree.root_node(), bytes);
    while let Some(m) = matches.next() {
        for cap in m.captures {
            let name = query.capture_names()[cap.index as usize];
            let Some(kind) = languages::capture_kind(name) else { continue };
            let chunk_kind = match kind {
                languages::CaptureKind::Function => ChunkKind::Function,
                languages::CaptureKind::Class => ChunkKind::Class,
                languages::CaptureKind::Block => ChunkKind::Block,
            };
            captures.push((cap.node, chunk_kind));
        }
    }
    if captures.is_empty() {
        return None;
    }
    captures.sort_by_key(|(n, _)| n.start_byte());

    let max_chars = cfg.max_chunk_chars();
    let mut chunks = Vec::new();
    let mut covered: Vec<Span> = Vec::new();

    for (node, kind) in captures {
        let start_line = node.start_position().row as u32 + 1;
        let end_line = node.end_position().row as u32 + 1;
        if end_line.saturating_sub(start_line) + 1 < 3 {
            continue;
        }

        let node_text = node.utf8_text(bytes).unwrap_or("");
        if node_text.len() > max_chars {
            emit_split(node, bytes, max_chars, kind, abs_path, rel_path, file_hash, language_tag, &mut chunks, &mut covered);
        } else {
            push_chunk(abs_path, rel_path, file_hash, node_text, start_line, end_line, kind, language_tag, &mut chunks);
            covered.push(Span { start_line, end_line });
        }
    }

    if chunks.is_empty() {
        return None;
    }

    gap_fill(text, &covered, abs_path, rel_path, file_hash, language_tag, &mut chunks);
    chunks.sort_by_key(|c| c.start_line);
    Some(chunks)
}

/// Iterative oversized-node split via an explicit stack (never the call stack).
#[allow(clippy::too_many_arguments)]
fn emit_split(
    node: Node,
    bytes: &[u8],
    max_chars: usize,
    kind: ChunkKind,
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
    language_tag: &str,
    chunks: &mut Vec<Chunk>,
    covered: &mut Vec<Span>,
) {
    let mut stack = vec![node];
    let mut any_split = false;

    while let Some(n) = stack.pop() {
        let mut cursor = n.walk();
        let children: Vec<Node> = n.children(&mut cursor).filter(|c| c.end_byte() - c.start_byte() > 50).collect();
        if children.is_empty() {
            continue;
        }
        any_split = true;
        for child in children {
            let child_text = child.utf8_text(bytes).unwrap_or("");
            if child_text.len() > max_chars {
                stack.push(child);
                continue;
            }
            let start_line = child.start_position().row as u32 + 1;
            let end_line = child.end_position().row as u32 + 1;
            if end_line.saturating_sub(start_line) + 1 < 3 {
                continue;
            }
            push_chunk(abs_path, rel_path, file_hash, child_text, start_line, end_line, ChunkKind::Block, language_tag, chunks);
            covered.push(Span { start_line, end_line });
        }
    }

    if !any_split {
        let start_line = node.start_position().row as u32 + 1;
        let end_line = node.end_position().row as u32 + 1;
        let text = node.utf8_text(bytes).unwrap_or("");
        let mut truncated: String = text.chars().take(max_chars).collect();
        truncated.push_str(TRUNCATION_MARKER);
        push_chunk(abs_path, rel_path, file_hash, &truncated, start_line, end_line, kind, language_tag, chunks);
        covered.push(Span { start_line, end_line });
    }
}

#[allow(clippy::too_many_arguments)]
fn push_chunk(
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
    content: &str,
    start_line: u32,
    end_line: u32,
    kind: ChunkKind,
    language: &str,
    chunks: &mut Vec<Chunk>,
) {
    let symbols = extract_symbol_name(content).into_iter().collect();
    chunks.push(Chunk::new(
        abs_path.to_path_buf(),
        rel_path.to_string(),
        file_hash.to_string(),
        content.to_string(),
        start_line,
        end_line,
        kind,
        language.to_string(),
        symbols,
    ));
}

/// Best-effort: the first identifier-looking word on the declaration line.
fn extract_symbol_name(text: &str) -> Option<String> {
    let first_line = text.lines().next()?;
    let mut best: Option<String> = None;
    let mut current = String::new();
    for ch in first_line.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else {
            if current.len() >= 2 && current.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false) {
                best = Some(current.clone());
            }
            current.clear();
        }
    }
    if current.len() >= 2 {
        best = Some(current);
    }
    best.filter(|n| !is_keyword(n))
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "fn" | "function"
            | "class"
            | "struct"
            | "enum"
            | "trait"
            | "impl"
            | "interface"
            | "type"
            | "def"
            | "pub"
            | "async"
            | "export"
            | "const"
            | "static"
            | "module"
            | "mod"
    )
}

#[allow(clippy::too_many_arguments)]
fn gap_fill(
    text: &str,
    covered: &[Span],
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
    language_tag: &str,
    chunks: &mut Vec<Chunk>,
) {
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len() as u32;
    if total == 0 {
        return;
    }

    let mut covered_lines = vec![false; total as usize + 1];
    for span in covered {
        for l in span.start_line..=span.end_line.min(total) {
            if (l as usize) < covered_lines.len() {
                covered_lines[l as usize] = true;
            }
        }
    }

    let mut gap_start: Option<u32> = None;
    let mut new_chunks = Vec::new();
    for line in 1..=total {
        if !covered_lines[line as usize] {
            if gap_start.is_none() {
                gap_start = Some(line);
            }
        } else if let Some(start) = gap_start.take() {
            close_gap(start, line - 1, &lines, abs_path, rel_path, file_hash, language_tag, &mut new_chunks);
        }
    }
    if let Some(start) = gap_start {
        close_gap(start, total, &lines, abs_path, rel_path, file_hash, language_tag, &mut new_chunks);
    }
    chunks.extend(new_chunks);
}

#[allow(clippy::too_many_arguments)]
fn close_gap(
    start: u32,
    end: u32,
    lines: &[&str],
    abs_path: &Path,
    rel_path: &str,
    file_hash: &str,
    language_tag: &str,
    out: &mut Vec<Chunk>,
) {
    if end < start || end - start + 1 <= 5 {
        return;
    }
    let slice = &lines[(start as usize - 1)..(end as usize).min(lines.len())];
    let non_ws: usize = slice.iter().map(|l| l.trim().len()).sum();
    if non_ws <= 50 {
        return;
    }
    let content = slice.join("\n");
    push_chunk(abs_path, rel_path, file_hash, &content, start, end, ChunkKind::Block, language_tag, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn small_rust_file_yields_function_chunks() {
        let cfg = Config::default();
        let src = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\nfn sub(a: i32, b: i32) -> i32 {\n    a - b\n}\n";
        let chunks = chunk_file(&PathBuf::from("/repo/src/lib.rs"), src.as_bytes(), Path::new("/repo"), &cfg);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().any(|c| c.symbols.iter().any(|s| s == "add")));
    }

    #[test]
    fn file_with_no_grammar_falls_back() {
        let cfg = Config::default();
        let content = "plain text\nwith a few\nshort lines\n";
        let chunks = chunk_file(&PathBuf::from("/repo/notes.txt"), content.as_bytes(), Path::new("/repo"), &cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::File);
    }

    #[test]
    fn oversized_file_produces_no_chunks() {
        let mut cfg = Config::default();
        cfg.max_file_size = 4;
        let chunks = chunk_file(&PathBuf::from("/repo/big.rs"), b"fn a() {}", Path::new("/repo"), &cfg);
        assert!(chunks.is_empty());
    }
}
