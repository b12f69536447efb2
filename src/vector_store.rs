//! Persistent, append-mostly columnar vector store keyed by `chunk_id`. §4.4
//!
//! Built on the embedded LanceDB/Arrow generation of the teacher's on-disk
//! table (its flat-file JSON generation predates a real dimensionality
//! invariant and was dropped). Schema: `{id, abs_path, rel_path, file_hash,
//! content, start_line, end_line, kind, language, symbols(csv), embedding}`.

use crate::chunk::Chunk;
use crate::error::{IndexError, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const TABLE_NAME: &str = "chunks";

#[derive(Debug, Clone)]
pub struct VectorRow {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct VectorStats {
    pub row_count: usize,
    pub file_count: usize,
}

#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    pub chunk_id: String,
    pub rel_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub score: f64,
}

#[derive(Clone)]
pub struct VectorStore {
    db_dir: PathBuf,
    dimensions: usize,
}

/// Strip quote/comment/statement-terminator characters and cap length before
/// interpolating into a SQL filter string. Parameter binding is unavailable
/// through lancedb's filter API, so this sanitizer is the primary defence,
/// not "defence in depth" over a bind call that doesn't exist here.
fn sanitize_literal(raw: &str) -> String {
    let mut s = raw.replace('\'', "''").replace(['\n', '\r'], " ");
    s = s.replace("--", "").replace("/*", "").replace("*/", "").replace(';', "");
    s.truncate(1000);
    s
}

fn sanitize_keyword(raw: &str) -> String {
    let base = sanitize_literal(raw);
    base.replace('%', "").replace('_', "")
}

impl VectorStore {
    pub fn new(db_dir: impl Into<PathBuf>, dimensions: usize) -> Self {
        Self { db_dir: db_dir.into(), dimensions }
    }

    async fn connect(&self) -> Result<lancedb::Connection> {
        std::fs::create_dir_all(&self.db_dir)
            .map_err(|e| IndexError::Io { path: self.db_dir.clone(), source: e })?;
        lancedb::connect(self.db_dir.to_string_lossy().as_ref())
            .execute()
            .await
            .map_err(|e| IndexError::SchemaMismatch(e.to_string()))
    }

    /// Open or create storage, validating the schema by probing `abs_path`
    /// and `file_hash` columns; on mismatch the table is dropped.
    pub async fn initialize(&self) -> Result<()> {
        let db = self.connect().await?;
        let Ok(table) = db.open_table(TABLE_NAME).execute().await else {
            return Ok(());
        };
        let schema_ok = table
            .query()
            .select(lancedb::query::Select::columns(&["abs_path", "file_hash"]))
            .limit(1)
            .execute()
            .await
            .is_ok();
        if !schema_ok {
            let _ = db.drop_table(TABLE_NAME).await;
        }
        Ok(())
    }

    pub async fn has_index(&self) -> Result<bool> {
        Ok(self.stats().await?.row_count > 0)
    }

    pub async fn stats(&self) -> Result<VectorStats> {
        let db = self.connect().await?;
        let Ok(table) = db.open_table(TABLE_NAME).execute().await else {
            return Ok(VectorStats::default());
        };
        let row_count = table.count_rows(None).await.unwrap_or(0);
        let hashes = self.file_hashes_from(&table).await?;
        Ok(VectorStats { row_count, file_count: hashes.len() })
    }

    /// Projected scan over `abs_path`, keeping only the first hash seen per
    /// path.
    pub async fn file_hashes(&self) -> Result<HashMap<String, String>> {
        let db = self.connect().await?;
        let Ok(table) = db.open_table(TABLE_NAME).execute().await else {
            return Ok(HashMap::new());
        };
        self.file_hashes_from(&table).await
    }

    async fn file_hashes_from(&self, table: &lancedb::Table) -> Result<HashMap<String, String>> {
        let mut stream = table
            .query()
            .select(lancedb::query::Select::columns(&["abs_path", "file_hash"]))
            .execute()
            .await
            .map_err(|e| IndexError::SchemaMismatch(e.to_string()))?;

        let mut out = HashMap::new();
        while let Some(batch) = stream.try_next().await.map_err(|e| IndexError::SchemaMismatch(e.to_string()))? {
            let Some(path_col) = batch.column_by_name("abs_path").and_then(|c| c.as_any().downcast_ref::<StringArray>()) else {
                continue;
            };
            let Some(hash_col) = batch.column_by_name("file_hash").and_then(|c| c.as_any().downcast_ref::<StringArray>()) else {
                continue;
            };
            for i in 0..batch.num_rows() {
                if !path_col.is_valid(i) || !hash_col.is_valid(i) {
                    continue;
                }
                out.entry(path_col.value(i).to_string()).or_insert_with(|| hash_col.value(i).to_string());
            }
        }
        Ok(out)
    }

    /// Replace the table atomically with `rows`.
    pub async fn create(&self, rows: &[VectorRow]) -> Result<()> {
        let db = self.connect().await?;
        let _ = db.drop_table(TABLE_NAME).await;
        if rows.is_empty() {
            return Ok(());
        }
        let reader = rows_to_record_batch_reader(rows, self.dimensions)?;
        db.create_table(TABLE_NAME, reader)
            .execute()
            .await
            .map_err(|e| IndexError::SchemaMismatch(e.to_string()))?;
        Ok(())
    }

    pub async fn add_batch(&self, rows: &[VectorRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let db = self.connect().await?;
        let reader = rows_to_record_batch_reader(rows, self.dimensions)?;
        match db.open_table(TABLE_NAME).execute().await {
            Ok(table) => {
                table.add(reader).execute().await.map_err(|e| IndexError::SchemaMismatch(e.to_string()))?;
            }
            Err(_) => {
                db.create_table(TABLE_NAME, reader).execute().await.map_err(|e| IndexError::SchemaMismatch(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Delete all rows for `path`, then append `rows`.
    pub async fn upsert_file(&self, path: &str, rows: &[VectorRow]) -> Result<()> {
        self.delete_file(path).await?;
        self.add_batch(rows).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let db = self.connect().await?;
        let Ok(table) = db.open_table(TABLE_NAME).execute().await else {
            return Ok(());
        };
        let filter = format!("abs_path = '{}'", sanitize_literal(path));
        table.delete(&filter).await.map_err(|e| IndexError::SchemaMismatch(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_files(&self, paths: &[String]) -> Result<()> {
        for p in paths {
            self.delete_file(p).await?;
        }
        Ok(())
    }

    /// Top-k by cosine distance; exposed score is `1 - distance`.
    pub async fn ann_search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<VectorSearchResult>> {
        let db = self.connect().await?;
        let table = db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|_| IndexError::NotInitialized)?;

        let mut stream = table
            .vector_search(query_vector.to_vec())
            .map_err(|e| IndexError::SchemaMismatch(e.to_string()))?
            .column("embedding")
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| IndexError::SchemaMismatch(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(|e| IndexError::SchemaMismatch(e.to_string()))? {
            out.extend(rows_from_batch_with_distance(&batch));
        }
        out.truncate(top_k);
        Ok(out)
    }

    /// `WHERE content LIKE %kw% OR symbols LIKE %kw% OR rel_path LIKE %kw%`
    /// for any keyword, scored out-of-store.
    pub async fn keyword_scan(&self, keywords: &[String], top_k: usize) -> Result<Vec<VectorSearchResult>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.connect().await?;
        let Ok(table) = db.open_table(TABLE_NAME).execute().await else {
            return Ok(Vec::new());
        };

        let clauses: Vec<String> = keywords
            .iter()
            .map(|kw| {
                let kw = sanitize_keyword(kw);
                format!(
                    "(content LIKE '%{kw}%' OR symbols LIKE '%{kw}%' OR rel_path LIKE '%{kw}%')"
                )
            })
            .collect();
        let filter = clauses.join(" OR ");

        let mut stream = table
            .query()
            .only_if(filter)
            .limit((top_k * 4).max(top_k))
            .execute()
            .await
            .map_err(|e| IndexError::SchemaMismatch(e.to_string()))?;

        let mut scored = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(|e| IndexError::SchemaMismatch(e.to_string()))? {
            for row in rows_from_batch_plain(&batch) {
                let score = keyword_score(&row, keywords);
                scored.push((score, row));
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(top_k).map(|(score, mut r)| {
            r.score = score;
            r
        }).collect())
    }

    pub async fn clear(&self) -> Result<()> {
        let db = self.connect().await?;
        let _ = db.drop_table(TABLE_NAME).await;
        Ok(())
    }
}

fn keyword_score(row: &VectorSearchResult, keywords: &[String]) -> f64 {
    let content_lower = row.content.to_lowercase();
    let mut score = 0.0;
    for kw in keywords {
        let kw_lower = kw.to_lowercase();
        if row.rel_path.to_lowercase().contains(&kw_lower) {
            score += 0.3;
        }
        let count = content_lower.matches(&kw_lower).count();
        if count > 0 {
            score += (0.1 * count as f64).min(0.5);
        }
    }
    score.min(1.0)
}

fn rows_from_batch_plain(batch: &RecordBatch) -> Vec<VectorSearchResult> {
    extract_rows(batch, None)
}

fn rows_from_batch_with_distance(batch: &RecordBatch) -> Vec<VectorSearchResult> {
    extract_rows(batch, Some("_distance"))
}

fn extract_rows(batch: &RecordBatch, distance_col: Option<&str>) -> Vec<VectorSearchResult> {
    let col = |name: &str| batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let Some(id) = col("id") else { return Vec::new() };
    let Some(rel_path) = col("rel_path") else { return Vec::new() };
    let Some(content) = col("content") else { return Vec::new() };
    let start = batch.column_by_name("start_line").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
    let end = batch.column_by_name("end_line").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
    let distance = distance_col.and_then(|n| batch.column_by_name(n)).and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if !id.is_valid(i) {
            continue;
        }
        let score = distance.filter(|d| d.is_valid(i)).map(|d| 1.0 - d.value(i) as f64).unwrap_or(0.0);
        out.push(VectorSearchResult {
            chunk_id: id.value(i).to_string(),
            rel_path: rel_path.value(i).to_string(),
            start_line: start.filter(|a| a.is_valid(i)).map(|a| a.value(i)).unwrap_or(0),
            end_line: end.filter(|a| a.is_valid(i)).map(|a| a.value(i)).unwrap_or(0),
            content: content.value(i).to_string(),
            score,
        });
    }
    out
}

fn rows_to_record_batch_reader(
    rows: &[VectorRow],
    dimensions: usize,
) -> Result<Box<dyn arrow_array::RecordBatchReader + Send>> {
    let n = rows.len();
    let mut flat: Vec<f32> = Vec::with_capacity(n * dimensions);
    for r in rows {
        if r.embedding.len() != dimensions {
            return Err(IndexError::SchemaMismatch(format!(
                "embedding dimension {} does not match declared {dimensions}",
                r.embedding.len()
            )));
        }
        flat.extend_from_slice(&r.embedding);
    }

    let ids: Vec<String> = rows.iter().map(|r| r.chunk.id.clone()).collect();
    let abs_paths: Vec<String> = rows.iter().map(|r| r.chunk.abs_path.to_string_lossy().replace('\\', "/")).collect();
    let rel_paths: Vec<String> = rows.iter().map(|r| r.chunk.rel_path.clone()).collect();
    let hashes: Vec<String> = rows.iter().map(|r| r.chunk.file_hash.clone()).collect();
    let contents: Vec<String> = rows.iter().map(|r| r.chunk.content.clone()).collect();
    let starts: Vec<u32> = rows.iter().map(|r| r.chunk.start_line).collect();
    let ends: Vec<u32> = rows.iter().map(|r| r.chunk.end_line).collect();
    let kinds: Vec<String> = rows.iter().map(|r| r.chunk.kind.as_str().to_string()).collect();
    let languages: Vec<String> = rows.iter().map(|r| r.chunk.language.clone()).collect();
    let symbols: Vec<String> = rows.iter().map(|r| r.chunk.symbols.join(",")).collect();

    let values: arrow_array::ArrayRef = Arc::new(Float32Array::from(flat));
    let item_field = Arc::new(Field::new("item", DataType::Float32, false));
    let embedding_arr: arrow_array::ArrayRef = Arc::new(
        FixedSizeListArray::try_new(item_field.clone(), dimensions as i32, values, None)
            .map_err(|e| IndexError::SchemaMismatch(e.to_string()))?,
    );

    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("abs_path", DataType::Utf8, false),
        Field::new("rel_path", DataType::Utf8, false),
        Field::new("file_hash", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("start_line", DataType::UInt32, false),
        Field::new("end_line", DataType::UInt32, false),
        Field::new("kind", DataType::Utf8, false),
        Field::new("language", DataType::Utf8, false),
        Field::new("symbols", DataType::Utf8, false),
        Field::new("embedding", DataType::FixedSizeList(item_field, dimensions as i32), false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(abs_paths)),
            Arc::new(StringArray::from(rel_paths)),
            Arc::new(StringArray::from(hashes)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(starts)),
            Arc::new(UInt32Array::from(ends)),
            Arc::new(StringArray::from(kinds)),
            Arc::new(StringArray::from(languages)),
            Arc::new(StringArray::from(symbols)),
            embedding_arr,
        ],
    )
    .map_err(|e| IndexError::SchemaMismatch(e.to_string()))?;

    let iter = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema);
    Ok(Box::new(iter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_literal_strips_quotes_comments_and_terminators() {
        let raw = "a'; DROP TABLE x; --/* comment */";
        let clean = sanitize_literal(raw);
        assert!(!clean.contains(';'));
        assert!(!clean.contains("--"));
        assert!(!clean.contains("/*"));
    }

    #[test]
    fn sanitize_literal_caps_length() {
        let raw = "a".repeat(5000);
        assert_eq!(sanitize_literal(&raw).len(), 1000);
    }

    #[test]
    fn sanitize_keyword_escapes_like_wildcards() {
        let clean = sanitize_keyword("50%_off");
        assert!(!clean.contains('%'));
        assert!(!clean.contains('_'));
    }

    #[test]
    fn keyword_score_caps_at_one() {
        let row = VectorSearchResult {
            chunk_id: "x".into(),
            rel_path: "foo.rs".into(),
            start_line: 1,
            end_line: 2,
            content: "foo ".repeat(50),
            score: 0.0,
        };
        let score = keyword_score(&row, &["foo".to_string()]);
        assert!(score <= 1.0);
    }
}
