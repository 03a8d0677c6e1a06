//! SQLite backend: vectors as little-endian f32 BLOBs next to their chunk
//! metadata in `index.sqlite`. Search scans every row; suited to corpora of
//! tens of thousands of chunks.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::{rank, IndexEntry, IndexSpec, SearchHit, VectorIndex};
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{RagError, Result};
use crate::migrate;
use crate::models::{ChunkMetadata, StructuredOrigin};

pub struct SqliteIndex {
    spec: IndexSpec,
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open or create the database, recording `spec` on first use. Opening
    /// an index built with another model fails.
    pub async fn open(path: &Path, spec: IndexSpec) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;

        let stored = sqlx::query("SELECT model, dims FROM index_meta WHERE id = 1")
            .fetch_optional(&pool)
            .await?;
        match stored {
            Some(row) => {
                let dims: i64 = row.try_get("dims")?;
                spec.check(&IndexSpec::new(row.try_get::<String, _>("model")?, dims as usize))?;
            }
            None => {
                sqlx::query("INSERT INTO index_meta (id, model, dims, created_at) VALUES (1, ?, ?, ?)")
                    .bind(&spec.model)
                    .bind(spec.dims as i64)
                    .bind(chrono::Utc::now().timestamp())
                    .execute(&pool)
                    .await?;
            }
        }

        Ok(Self { spec, pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<IndexEntry> {
    let chunk_id: String = row.try_get("chunk_id")?;
    let origin_json: Option<String> = row.try_get("origin_json")?;
    let origin: Option<StructuredOrigin> = match origin_json {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    let blob: Vec<u8> = row.try_get("embedding")?;
    if blob.len() % 4 != 0 {
        return Err(RagError::IndexCorruption(format!(
            "embedding for {} is {} bytes",
            chunk_id,
            blob.len()
        )));
    }
    let chunk_index: i64 = row.try_get("chunk_index")?;

    Ok(IndexEntry {
        vector: blob_to_vec(&blob),
        metadata: ChunkMetadata {
            document_id: row.try_get("document_id")?,
            filename: row.try_get("filename")?,
            chunk_index: chunk_index as usize,
            text: row.try_get("text")?,
            origin,
        },
        chunk_id,
    })
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    async fn add_batch(&self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            self.spec.check_vector(&entry.vector)?;
        }

        let mut tx = self.pool.begin().await?;
        for entry in &entries {
            let origin_json = entry
                .metadata
                .origin
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors
                    (chunk_id, document_id, filename, chunk_index, text, origin_json, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    filename = excluded.filename,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    origin_json = excluded.origin_json,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&entry.chunk_id)
            .bind(&entry.metadata.document_id)
            .bind(&entry.metadata.filename)
            .bind(entry.metadata.chunk_index as i64)
            .bind(&entry.metadata.text)
            .bind(origin_json)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.spec.check_vector(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT chunk_id, document_id, filename, chunk_index, text, origin_json, embedding FROM chunk_vectors",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = row_to_entry(row)?;
            hits.push(SearchHit {
                score: cosine_similarity(query, &entry.vector),
                chunk_id: entry.chunk_id,
                metadata: entry.metadata,
            });
        }
        rank(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        // Commits are already durable; fold the WAL back into the main file.
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load(&self, tracked: &HashSet<String>) -> Result<usize> {
        let docs: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT document_id FROM chunk_vectors")
                .fetch_all(&self.pool)
                .await?;

        let mut dropped = 0;
        let mut tx = self.pool.begin().await?;
        for doc in docs.iter().filter(|d| !tracked.contains(*d)) {
            let result = sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
                .bind(doc)
                .execute(&mut *tx)
                .await?;
            dropped += result.rows_affected() as usize;
        }
        tx.commit().await?;

        let bad: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE dims != ?")
            .bind(self.spec.dims as i64)
            .fetch_one(&self.pool)
            .await?;
        if bad > 0 {
            return Err(RagError::IndexCorruption(format!(
                "{} stored vectors do not have {} dimensions",
                bad, self.spec.dims
            )));
        }

        info!(dropped, "opened SQLite vector index");
        Ok(dropped)
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn document_vector_counts(&self) -> Result<HashMap<String, usize>> {
        let rows = sqlx::query("SELECT document_id, COUNT(*) AS n FROM chunk_vectors GROUP BY document_id")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = HashMap::new();
        for row in rows {
            let n: i64 = row.try_get("n")?;
            counts.insert(row.try_get("document_id")?, n as usize);
        }
        Ok(counts)
    }
}
