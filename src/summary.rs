//! Project summary generator. §4.6
//!
//! Persisted to `<workspace>/.codeidx/summary/summary.json`, best-effort like
//! the rest of this engine's cached state: absence is not an error.

use crate::config::STATE_DIR;
use crate::symbol_index::SymbolRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const TOP_N: usize = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub language_counts: Vec<(String, u32)>,
    pub total_files: u32,
    pub top_symbols: Vec<(String, u32)>,
    pub generated_at_ms: u64,
}

/// Build a summary from a file -> symbols map and a language histogram.
/// `total_files` is the true indexed-file count, not `file_symbols.len()`:
/// files chunked by the fallback/line chunker carry no symbols and would
/// otherwise be dropped from the count.
pub fn generate(
    file_symbols: &HashMap<String, Vec<SymbolRecord>>,
    language_counts: &HashMap<String, u32>,
    total_files: u32,
    generated_at_ms: u64,
) -> ProjectSummary {
    let mut symbol_freq: HashMap<&str, u32> = HashMap::new();
    for records in file_symbols.values() {
        for r in records {
            *symbol_freq.entry(r.name.as_str()).or_insert(0) += 1;
        }
    }

    let mut top_symbols: Vec<(String, u32)> = symbol_freq.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    top_symbols.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_symbols.truncate(TOP_N);

    let mut language_counts: Vec<(String, u32)> = language_counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    language_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    ProjectSummary {
        language_counts,
        total_files,
        top_symbols,
        generated_at_ms,
    }
}

/// Stable human-readable rendering. External string only; no consumer parses
/// it back.
pub fn to_text(summary: &ProjectSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Project summary ({} files)\n", summary.total_files));
    out.push_str("Languages:\n");
    for (lang, count) in &summary.language_counts {
        out.push_str(&format!("  {lang}: {count}\n"));
    }
    out.push_str(&format!("Top symbols (showing up to {TOP_N}):\n"));
    for (name, count) in &summary.top_symbols {
        out.push_str(&format!("  {name} ({count})\n"));
    }
    out
}

fn summary_path(workspace: &Path) -> std::path::PathBuf {
    workspace.join(STATE_DIR).join("summary").join("summary.json")
}

pub fn save(workspace: &Path, summary: &ProjectSummary) {
    let path = summary_path(workspace);
    if let Some(dir) = path.parent() {
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
    }
    if let Ok(text) = serde_json::to_string_pretty(summary) {
        let _ = std::fs::write(path, text);
    }
}

pub fn load(workspace: &Path) -> Option<ProjectSummary> {
    let text = std::fs::read_to_string(summary_path(workspace)).ok()?;
    serde_json::from_str(&text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol_index::SymbolKind;

    fn rec(name: &str) -> SymbolRecord {
        SymbolRecord { name: name.into(), kind: SymbolKind::Function, file: "a.rs".into(), start_line: 1, end_line: 2, signature: None }
    }

    #[test]
    fn top_symbols_ranked_by_frequency_then_name() {
        let mut files = HashMap::new();
        files.insert("a.rs".to_string(), vec![rec("foo"), rec("bar"), rec("foo")]);
        let langs = HashMap::from([("rust".to_string(), 1)]);
        let summary = generate(&files, &langs, 1, 0);
        assert_eq!(summary.top_symbols[0], ("foo".to_string(), 2));
    }

    #[test]
    fn top_symbols_capped_at_200() {
        let mut files = HashMap::new();
        let records: Vec<SymbolRecord> = (0..300).map(|i| rec(&format!("sym{i}"))).collect();
        files.insert("a.rs".to_string(), records);
        let summary = generate(&files, &HashMap::new(), 1, 0);
        assert_eq!(summary.top_symbols.len(), 200);
    }

    #[test]
    fn load_missing_summary_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = HashMap::new();
        files.insert("a.rs".to_string(), vec![rec("foo")]);
        let summary = generate(&files, &HashMap::new(), 1, 42);
        save(dir.path(), &summary);
        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.total_files, 1);
        assert_eq!(loaded.generated_at_ms, 42);
    }
}
