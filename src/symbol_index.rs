//! Symbol index: two non-owning views over the same `SymbolRecord` set. §4.3

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Variable,
    Interface,
    Enum,
    Type,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: Option<String>,
}

#[derive(Debug, Default)]
pub struct SymbolIndex {
    by_name: HashMap<String, Vec<SymbolRecord>>,
    by_file: HashMap<String, Vec<SymbolRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub record: SymbolRecord,
    pub score: i64,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: SymbolRecord) {
        self.by_file.entry(record.file.clone()).or_default().push(record.clone());
        self.by_name.entry(record.name.clone()).or_default().push(record);
    }

    pub fn add_many(&mut self, records: impl IntoIterator<Item = SymbolRecord>) {
        for r in records {
            self.add(r);
        }
    }

    /// Remove every record for `file` from both views, dropping name buckets
    /// that become empty.
    pub fn delete_file(&mut self, file: &str) {
        self.by_file.remove(file);
        let mut empty_names = Vec::new();
        for (name, records) in self.by_name.iter_mut() {
            records.retain(|r| r.file != file);
            if records.is_empty() {
                empty_names.push(name.clone());
            }
        }
        for name in empty_names {
            self.by_name.remove(&name);
        }
    }

    pub fn file_symbols(&self, file: &str) -> Vec<SymbolRecord> {
        self.by_file.get(file).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_file.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_file.clear();
    }

    /// Cascade: exact (100) > case-insensitive prefix (80) > substring (50) >
    /// camelCase/underscore token prefix (30); ties by insertion order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SymbolMatch> {
        if query.is_empty() {
            return Vec::new();
        }
        let q_lower = query.to_lowercase();

        let mut matches: Vec<(usize, i64, SymbolRecord)> = Vec::new();
        let mut insertion_order = 0usize;
        for records in self.by_name.values() {
            for record in records {
                if let Some(score) = match_score(&record.name, query, &q_lower) {
                    matches.push((insertion_order, score, record.clone()));
                    insertion_order += 1;
                }
            }
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        matches
            .into_iter()
            .take(top_k)
            .map(|(_, score, record)| SymbolMatch { record, score })
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.by_file.values().flatten()
    }

    /// Serialize to ordered vectors of `(key, value)` per §6's schema shape.
    pub fn to_serializable(&self) -> SerializableSymbolIndex {
        SerializableSymbolIndex {
            by_name: sorted_entries(&self.by_name),
            by_file: sorted_entries(&self.by_file),
        }
    }

    pub fn from_serializable(data: SerializableSymbolIndex) -> Self {
        let mut idx = Self::new();
        for (_, records) in data.by_file {
            for r in records {
                idx.add(r);
            }
        }
        idx
    }
}

fn sorted_entries(map: &HashMap<String, Vec<SymbolRecord>>) -> Vec<(String, Vec<SymbolRecord>)> {
    let mut v: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    v.sort_by(|a, b| a.0.cmp(&b.0));
    v
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableSymbolIndex {
    pub by_name: Vec<(String, Vec<SymbolRecord>)>,
    pub by_file: Vec<(String, Vec<SymbolRecord>)>,
}

fn match_score(name: &str, query: &str, query_lower: &str) -> Option<i64> {
    if name == query {
        return Some(100);
    }
    let name_lower = name.to_lowercase();
    if name_lower.starts_with(query_lower) {
        return Some(80);
    }
    if name_lower.contains(query_lower) {
        return Some(50);
    }
    for token in split_tokens(name) {
        if token.to_lowercase().starts_with(query_lower) {
            return Some(30);
        }
    }
    None
}

/// Split a name on camelCase boundaries and underscores into tokens.
fn split_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase();
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, file: &str, line: u32) -> SymbolRecord {
        SymbolRecord {
            name: name.into(),
            kind: SymbolKind::Function,
            file: file.into(),
            start_line: line,
            end_line: line + 2,
            signature: None,
        }
    }

    #[test]
    fn exact_match_ranks_above_prefix_and_substring() {
        let mut idx = SymbolIndex::new();
        idx.add(rec("foo", "a.rs", 1));
        idx.add(rec("fooBar", "a.rs", 5));
        idx.add(rec("xxfooyy", "a.rs", 9));
        let results = idx.search("foo", 10);
        assert_eq!(results[0].record.name, "foo");
        assert_eq!(results[0].score, 100);
        assert_eq!(results[1].record.name, "fooBar");
        assert_eq!(results[2].record.name, "xxfooyy");
    }

    #[test]
    fn camel_case_token_prefix_matches() {
        let mut idx = SymbolIndex::new();
        idx.add(rec("handleFooEvent", "a.rs", 1));
        let results = idx.search("Foo", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 30);
    }

    #[test]
    fn delete_file_removes_from_both_views_and_drops_empty_buckets() {
        let mut idx = SymbolIndex::new();
        idx.add(rec("foo", "a.rs", 1));
        idx.delete_file("a.rs");
        assert!(idx.file_symbols("a.rs").is_empty());
        assert!(idx.search("foo", 10).is_empty());
        assert!(idx.is_empty());
    }

    #[test]
    fn round_trip_preserves_search_behaviour() {
        let mut idx = SymbolIndex::new();
        idx.add(rec("foo", "a.rs", 1));
        idx.add(rec("bar", "b.rs", 3));
        let serialized = idx.to_serializable();
        let text = serde_json::to_string(&serialized).unwrap();
        let back: SerializableSymbolIndex = serde_json::from_str(&text).unwrap();
        let idx2 = SymbolIndex::from_serializable(back);
        assert_eq!(idx.search("foo", 5).len(), idx2.search("foo", 5).len());
        assert_eq!(idx2.file_symbols("b.rs").len(), 1);
    }

    #[test]
    fn empty_query_returns_empty_result_set() {
        let mut idx = SymbolIndex::new();
        idx.add(rec("foo", "a.rs", 1));
        assert!(idx.search("", 10).is_empty());
    }
}
