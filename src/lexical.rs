//! BM25 lexical index, keyed by chunk id. §4.2
//!
//! Hand-rolled rather than a stock crate: the `+2` symbol-name bonus and the
//! `/10` published-score scaling are specific to this engine's contract.

use crate::chunk::Chunk;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

const K1: f64 = 1.2;
const B: f64 = 0.75;
const SYMBOL_BONUS: f64 = 2.0;
const EPSILON: f64 = 1e-9;

fn word_splitter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w]+").unwrap())
}

/// Lowercase, split on non-word characters, drop tokens shorter than 2 chars
/// or purely numeric.
pub fn tokenize(text: &str) -> Vec<String> {
    word_splitter()
        .split(&text.to_lowercase())
        .filter(|t| t.len() >= 2 && !t.chars().all(|c| c.is_ascii_digit()))
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Document {
    pub id: String,
    pub file_path: String,
    pub relative_path: String,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub language: String,
    pub symbols: Vec<String>,
    pub term_freq: Vec<(String, u32)>,
    pub doc_length: u32,
}

impl Bm25Document {
    fn from_chunk(chunk: &Chunk) -> Self {
        let tokens = tokenize(&chunk.content);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for t in &tokens {
            *counts.entry(t.clone()).or_insert(0) += 1;
        }
        let mut term_freq: Vec<(String, u32)> = counts.into_iter().collect();
        term_freq.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            id: chunk.id.clone(),
            file_path: chunk.abs_path.to_string_lossy().replace('\\', "/"),
            relative_path: chunk.rel_path.clone(),
            content: chunk.content.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            kind: chunk.kind.as_str().to_string(),
            language: chunk.language.clone(),
            symbols: chunk.symbols.clone(),
            term_freq,
            doc_length: tokens.len() as u32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalSearchResult {
    pub chunk_id: String,
    pub relative_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LexicalIndex {
    documents: Vec<Bm25Document>,
    avg_doc_length: f64,
    idf: HashMap<String, f64>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, chunk: &Chunk) {
        self.documents.push(Bm25Document::from_chunk(chunk));
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.avg_doc_length = 0.0;
        self.idf.clear();
    }

    /// Recompute `avgdl` and the per-term `idf` table. Idempotent.
    pub fn build(&mut self) {
        let n = self.documents.len();
        if n == 0 {
            self.avg_doc_length = 0.0;
            self.idf.clear();
            return;
        }

        let total_len: u64 = self.documents.iter().map(|d| d.doc_length as u64).sum();
        self.avg_doc_length = total_len as f64 / n as f64;

        let mut doc_freq: HashMap<&str, u32> = HashMap::new();
        for doc in &self.documents {
            for (term, _) in &doc.term_freq {
                *doc_freq.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        self.idf.clear();
        for (term, df) in doc_freq {
            let idf = ((n as f64 - df as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln();
            self.idf.insert(term.to_string(), idf);
        }
    }

    fn score(&self, doc: &Bm25Document, query_terms: &[String]) -> f64 {
        let mut score = 0.0;
        let dl = doc.doc_length as f64;
        let avgdl = if self.avg_doc_length > 0.0 { self.avg_doc_length } else { 1.0 };

        for term in query_terms {
            let Some(&idf) = self.idf.get(term) else { continue };
            let tf = doc
                .term_freq
                .iter()
                .find(|(t, _)| t == term)
                .map(|(_, c)| *c as f64)
                .unwrap_or(0.0);
            if tf == 0.0 {
                continue;
            }
            let numer = idf * tf * (K1 + 1.0);
            let denom = tf + K1 * (1.0 - B + B * dl / avgdl);
            score += numer / denom;
        }

        let q_lower: Vec<String> = query_terms.iter().map(|t| t.to_lowercase()).collect();
        if doc.symbols.iter().any(|s| {
            let sl = s.to_lowercase();
            q_lower.iter().any(|q| sl.contains(q.as_str()))
        }) {
            score += SYMBOL_BONUS;
        }

        score
    }

    /// Top-k by score, strictly sorted descending, score >= epsilon.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<LexicalSearchResult> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &Bm25Document)> = self
            .documents
            .iter()
            .map(|d| (self.score(d, &terms), d))
            .filter(|(s, _)| *s >= EPSILON)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| LexicalSearchResult {
                chunk_id: doc.id.clone(),
                relative_path: doc.relative_path.clone(),
                start_line: doc.start_line,
                end_line: doc.end_line,
                content: doc.content.clone(),
                score: score / 10.0,
            })
            .collect()
    }

    /// Remove all documents whose file matches `relative_path`. Caller must
    /// call `build()` after a batch of deletions.
    pub fn delete_file(&mut self, relative_path: &str) {
        self.documents.retain(|d| d.relative_path != relative_path);
    }

    pub fn has_file(&self, relative_path: &str) -> bool {
        self.documents.iter().any(|d| d.relative_path == relative_path)
    }

    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    pub fn to_snapshot(&self) -> LexicalSnapshot {
        let mut idf: Vec<(String, f64)> = self.idf.iter().map(|(k, v)| (k.clone(), *v)).collect();
        idf.sort_by(|a, b| a.0.cmp(&b.0));
        LexicalSnapshot {
            documents: self.documents.clone(),
            avg_doc_length: self.avg_doc_length,
            idf,
        }
    }

    pub fn from_snapshot(snapshot: LexicalSnapshot) -> Self {
        Self {
            documents: snapshot.documents,
            avg_doc_length: snapshot.avg_doc_length,
            idf: snapshot.idf.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalSnapshot {
    pub documents: Vec<Bm25Document>,
    #[serde(rename = "avgDocLength")]
    pub avg_doc_length: f64,
    pub idf: Vec<(String, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKind;
    use std::path::PathBuf;

    fn chunk(rel: &str, content: &str, symbols: Vec<&str>) -> Chunk {
        Chunk::new(
            PathBuf::from(format!("/repo/{rel}")),
            rel.into(),
            crate::chunk::sha256_hex(content.as_bytes()),
            content.into(),
            1,
            3,
            ChunkKind::Function,
            "rust".into(),
            symbols.into_iter().map(String::from).collect(),
        )
    }

    #[test]
    fn build_is_idempotent_and_avgdl_matches_mean() {
        let mut idx = LexicalIndex::new();
        idx.add_document(&chunk("a.rs", "fn foo bar baz", vec![]));
        idx.add_document(&chunk("b.rs", "fn qux", vec![]));
        idx.build();
        let sum: u64 = idx.documents.iter().map(|d| d.doc_length as u64).sum();
        assert!((sum as f64 / idx.documents.len() as f64 - idx.avg_doc_length()).abs() < 1e-9);
        let avgdl_before = idx.avg_doc_length();
        idx.build();
        assert_eq!(idx.avg_doc_length(), avgdl_before);
    }

    #[test]
    fn search_returns_sorted_results_within_top_k() {
        let mut idx = LexicalIndex::new();
        idx.add_document(&chunk("a.rs", "foo foo foo bar", vec![]));
        idx.add_document(&chunk("b.rs", "foo", vec![]));
        idx.add_document(&chunk("c.rs", "unrelated content here", vec![]));
        idx.build();
        let results = idx.search("foo", 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].relative_path, "a.rs");
    }

    #[test]
    fn symbol_bonus_boosts_matching_document() {
        let mut idx = LexicalIndex::new();
        idx.add_document(&chunk("a.rs", "some generic text", vec!["processRequest"]));
        idx.add_document(&chunk("b.rs", "some generic text", vec![]));
        idx.build();
        let results = idx.search("processRequest", 10);
        assert_eq!(results[0].relative_path, "a.rs");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn delete_file_removes_documents_for_that_path() {
        let mut idx = LexicalIndex::new();
        idx.add_document(&chunk("a.rs", "foo", vec![]));
        idx.add_document(&chunk("b.rs", "foo", vec![]));
        idx.delete_file("a.rs");
        idx.build();
        assert!(!idx.has_file("a.rs"));
        assert!(idx.has_file("b.rs"));
    }

    #[test]
    fn empty_query_after_tokenization_returns_empty() {
        let mut idx = LexicalIndex::new();
        idx.add_document(&chunk("a.rs", "foo", vec![]));
        idx.build();
        assert!(idx.search("123 a", 10).is_empty());
    }

    #[test]
    fn round_trip_preserves_search_results() {
        let mut idx = LexicalIndex::new();
        idx.add_document(&chunk("a.rs", "foo bar baz", vec![]));
        idx.build();
        let snapshot = idx.to_snapshot();
        let text = serde_json::to_string(&snapshot).unwrap();
        let back: LexicalSnapshot = serde_json::from_str(&text).unwrap();
        let idx2 = LexicalIndex::from_snapshot(back);
        let a = idx.search("foo", 5);
        let b = idx2.search("foo", 5);
        assert_eq!(a.len(), b.len());
        assert!((a[0].score - b[0].score).abs() < 1e-12);
    }
}
