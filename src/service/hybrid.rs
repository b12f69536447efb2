//! Fusion rules for `hybrid_search`. §4.9
//!
//! Two independent formulas, selected by index mode: structural mode keeps a
//! non-normalized BM25 score plus a rank term plus a flat symbol bonus
//! (§9 explicitly preserves this over a cleaner RRF-only alternative);
//! semantic mode uses weighted Reciprocal Rank Fusion, adapted from the
//! pack's unweighted `rrf_fusion` (ingestor-core's `rrf.rs`) to the spec's
//! 0.7/0.3 dense/keyword weighting.

use crate::lexical::LexicalSearchResult;
use crate::symbol_index::SymbolMatch;
use crate::vector_store::VectorSearchResult;
use std::collections::HashMap;

const K_RRF: f64 = 60.0;
const DENSE_WEIGHT: f64 = 0.7;
const KEYWORD_WEIGHT: f64 = 0.3;
const SYMBOL_BUCKET_BONUS: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct FusedResult {
    pub rel_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub score: f64,
}

fn bucket_key(rel_path: &str, start_line: u32) -> (String, u32) {
    (rel_path.to_string(), start_line)
}

/// `result.score + (N - rank) / N`, `+0.5` if the same bucket also appears in
/// the symbol results.
pub fn structural_fuse(lexical: &[LexicalSearchResult], symbols: &[SymbolMatch], top_k: usize) -> Vec<FusedResult> {
    let n = lexical.len().max(1) as f64;
    let symbol_buckets: std::collections::HashSet<(String, u32)> =
        symbols.iter().map(|m| (m.record.file.clone(), m.record.start_line)).collect();

    let mut buckets: HashMap<(String, u32), FusedResult> = HashMap::new();
    for (rank, r) in lexical.iter().enumerate() {
        let mut score = r.score + (n - rank as f64) / n;
        if symbol_buckets.contains(&bucket_key(&r.relative_path, r.start_line)) {
            score += SYMBOL_BUCKET_BONUS;
        }
        buckets.insert(
            bucket_key(&r.relative_path, r.start_line),
            FusedResult { rel_path: r.relative_path.clone(), start_line: r.start_line, end_line: r.end_line, content: r.content.clone(), score },
        );
    }

    let mut out: Vec<FusedResult> = buckets.into_values().collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(top_k);
    out
}

/// Weighted RRF over dense ANN results and a keyword scan; falls back to the
/// dense side untouched when the keyword side is empty.
pub fn semantic_fuse(dense: &[VectorSearchResult], keyword: &[VectorSearchResult], top_k: usize) -> Vec<FusedResult> {
    if keyword.is_empty() {
        return dense
            .iter()
            .take(top_k)
            .map(|r| FusedResult { rel_path: r.rel_path.clone(), start_line: r.start_line, end_line: r.end_line, content: r.content.clone(), score: r.score })
            .collect();
    }

    let mut scores: HashMap<(String, u32), f64> = HashMap::new();
    let mut payload: HashMap<(String, u32), &VectorSearchResult> = HashMap::new();

    for (rank, r) in dense.iter().enumerate() {
        let key = bucket_key(&r.rel_path, r.start_line);
        *scores.entry(key.clone()).or_insert(0.0) += DENSE_WEIGHT / (K_RRF + rank as f64 + 1.0);
        payload.entry(key).or_insert(r);
    }
    for (rank, r) in keyword.iter().enumerate() {
        let key = bucket_key(&r.rel_path, r.start_line);
        *scores.entry(key.clone()).or_insert(0.0) += KEYWORD_WEIGHT / (K_RRF + rank as f64 + 1.0);
        payload.entry(key).or_insert(r);
    }

    let mut out: Vec<FusedResult> = scores
        .into_iter()
        .filter_map(|(key, score)| {
            payload.get(&key).map(|r| FusedResult { rel_path: r.rel_path.clone(), start_line: r.start_line, end_line: r.end_line, content: r.content.clone(), score })
        })
        .collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(top_k);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol_index::{SymbolKind, SymbolRecord};

    fn vr(path: &str, line: u32, score: f64) -> VectorSearchResult {
        VectorSearchResult { chunk_id: format!("{path}:{line}"), rel_path: path.into(), start_line: line, end_line: line + 2, content: "x".into(), score }
    }

    fn lr(path: &str, line: u32, score: f64) -> LexicalSearchResult {
        LexicalSearchResult { chunk_id: format!("{path}:{line}"), relative_path: path.into(), start_line: line, end_line: line + 2, content: "x".into(), score }
    }

    fn sym(path: &str, line: u32) -> SymbolMatch {
        SymbolMatch {
            record: SymbolRecord { name: "thing".into(), kind: SymbolKind::Function, file: path.into(), start_line: line, end_line: line + 2, signature: None },
            score: 100,
        }
    }

    #[test]
    fn structural_fuse_bonus_requires_matching_start_line_not_just_file() {
        let lexical = vec![lr("a.rs", 1, 1.0), lr("a.rs", 50, 1.0)];
        // Symbol match is in the same file but a different bucket (start_line 1, not 50).
        let symbols = vec![sym("a.rs", 1)];
        let fused = structural_fuse(&lexical, &symbols, 10);

        let bucket_1 = fused.iter().find(|r| r.start_line == 1).unwrap();
        let bucket_50 = fused.iter().find(|r| r.start_line == 50).unwrap();
        assert!(bucket_1.score > bucket_50.score, "matching bucket should get the symbol bonus, the other bucket in the same file should not");
    }

    #[test]
    fn scenario_5_rrf_orders_by_fused_score() {
        let dense = vec![vr("X", 1, 0.9), vr("Y", 1, 0.8), vr("Z", 1, 0.7)];
        let keyword = vec![vr("Y", 1, 3.0), vr("W", 1, 2.0)];
        let fused = semantic_fuse(&dense, &keyword, 10);
        let order: Vec<&str> = fused.iter().map(|r| r.rel_path.as_str()).collect();
        assert_eq!(order, vec!["Y", "X", "Z", "W"]);

        let y = fused.iter().find(|r| r.rel_path == "Y").unwrap();
        let expected_y = 0.7 / 62.0 + 0.3 / 61.0;
        assert!((y.score - expected_y).abs() < 1e-9);
    }

    #[test]
    fn empty_keyword_side_returns_dense_top_k() {
        let dense = vec![vr("X", 1, 0.9), vr("Y", 1, 0.8)];
        let fused = semantic_fuse(&dense, &[], 1);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].rel_path, "X");
    }
}
