//! Chunk persistence.
//!
//! [`KnowledgeStore`] owns every read and write against `knowledge_chunks`.
//! Chunks arrive in bulk from ingestion (one transaction per document) and
//! leave through the similarity scan or the keyword-only fallback lookup.
//! Removal is always a soft delete: `is_active` flips to 0 and the partial
//! unique index on `content_hash` stops guarding the text, so the same
//! content can be re-ingested later.

use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{ChunkHit, ChunkStatistics, KnowledgeChunk, SourceType};

/// A fully staged chunk, embedded and ready to persist.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub id: String,
    pub source_type: SourceType,
    pub disease_category: String,
    pub disease_id: Option<String>,
    pub document_title: String,
    pub section_title: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub embedding_model_id: String,
}

/// A stored chunk loaded for the similarity scan.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub disease_category: String,
    pub document_title: String,
    pub section_title: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub retrieval_count: i64,
}

#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    pool: SqlitePool,
}

impl KnowledgeStore {
    pub fn new(pool: SqlitePool) -> KnowledgeStore {
        KnowledgeStore { pool }
    }

    /// Whether an active chunk already stores this content hash.
    pub async fn active_hash_exists(&self, content_hash: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM knowledge_chunks WHERE content_hash = ? AND is_active = 1",
        )
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Persist a batch of embedded chunks as one transaction. Either every
    /// chunk lands or none does.
    pub async fn insert_chunks(&self, chunks: &[NewChunk]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks
                    (id, source_type, disease_category, disease_id, document_title,
                     section_title, chunk_index, chunk_text, content_hash,
                     embedding, embedding_model_id, retrieval_count, is_active, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(chunk.source_type.as_str())
            .bind(&chunk.disease_category)
            .bind(&chunk.disease_id)
            .bind(&chunk.document_title)
            .bind(&chunk.section_title)
            .bind(chunk.chunk_index)
            .bind(&chunk.chunk_text)
            .bind(&chunk.content_hash)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(&chunk.embedding_model_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load all active chunks that carry an embedding, optionally filtered
    /// by category. This is the candidate set for the brute-force scan.
    pub async fn active_embedded_chunks(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<StoredChunk>> {
        let rows = match category {
            Some(cat) => {
                sqlx::query(
                    r#"
                    SELECT id, disease_category, document_title, section_title,
                           chunk_index, chunk_text, embedding, retrieval_count
                    FROM knowledge_chunks
                    WHERE is_active = 1 AND embedding IS NOT NULL AND disease_category = ?
                    "#,
                )
                .bind(cat)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, disease_category, document_title, section_title,
                           chunk_index, chunk_text, embedding, retrieval_count
                    FROM knowledge_chunks
                    WHERE is_active = 1 AND embedding IS NOT NULL
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let chunks = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                StoredChunk {
                    id: row.get("id"),
                    disease_category: row.get("disease_category"),
                    document_title: row.get("document_title"),
                    section_title: row.get("section_title"),
                    chunk_index: row.get("chunk_index"),
                    chunk_text: row.get("chunk_text"),
                    embedding: blob_to_vec(&blob),
                    retrieval_count: row.get("retrieval_count"),
                }
            })
            .collect();

        Ok(chunks)
    }

    /// Bump `retrieval_count` for the returned chunks. Counters are
    /// best-effort usage statistics, not ledger entries.
    pub async fn bump_retrieval_counts(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            sqlx::query(
                "UPDATE knowledge_chunks SET retrieval_count = retrieval_count + 1 WHERE id = ?",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Load one chunk with its full provenance, active or not.
    pub async fn get_chunk(&self, id: &str) -> Result<Option<KnowledgeChunk>> {
        let row = sqlx::query("SELECT * FROM knowledge_chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let source_type: String = row.get("source_type");
        let embedding: Option<Vec<u8>> = row.get("embedding");

        Ok(Some(KnowledgeChunk {
            id: row.get("id"),
            source_type: SourceType::parse(&source_type).ok_or_else(|| {
                Error::Config(format!("unknown source type '{}' in store", source_type))
            })?,
            disease_category: row.get("disease_category"),
            disease_id: row.get("disease_id"),
            document_title: row.get("document_title"),
            section_title: row.get("section_title"),
            chunk_index: row.get("chunk_index"),
            chunk_text: row.get("chunk_text"),
            content_hash: row.get("content_hash"),
            embedding: embedding.map(|blob| blob_to_vec(&blob)),
            embedding_model_id: row.get("embedding_model_id"),
            retrieval_count: row.get("retrieval_count"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
        }))
    }

    /// Keyword-only fallback: the most-retrieved active chunks of a
    /// category, used when a matched category produced no vector hits.
    pub async fn fallback_chunks(&self, category: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, disease_category, document_title, section_title,
                   chunk_index, chunk_text
            FROM knowledge_chunks
            WHERE is_active = 1 AND disease_category = ?
            ORDER BY retrieval_count DESC, chunk_index ASC
            LIMIT ?
            "#,
        )
        .bind(category)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| ChunkHit {
                id: row.get("id"),
                document_title: row.get("document_title"),
                section_title: row.get("section_title"),
                disease_category: row.get("disease_category"),
                chunk_index: row.get("chunk_index"),
                text: row.get("chunk_text"),
                similarity: None,
            })
            .collect();

        Ok(hits)
    }

    /// Soft-delete every chunk of a document, optionally scoped to one
    /// category. Returns how many rows were deactivated.
    pub async fn deactivate_document(
        &self,
        document_title: &str,
        category: Option<&str>,
    ) -> Result<u64> {
        let result = match category {
            Some(cat) => {
                sqlx::query(
                    "UPDATE knowledge_chunks SET is_active = 0 \
                     WHERE document_title = ? AND disease_category = ? AND is_active = 1",
                )
                .bind(document_title)
                .bind(cat)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE knowledge_chunks SET is_active = 0 \
                     WHERE document_title = ? AND is_active = 1",
                )
                .bind(document_title)
                .execute(&self.pool)
                .await?
            }
        };

        let count = result.rows_affected();
        info!(document_title, count, "deactivated document chunks");
        Ok(count)
    }

    /// Corpus-wide counts for the admin statistics view.
    pub async fn statistics(&self) -> Result<ChunkStatistics> {
        let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks")
            .fetch_one(&self.pool)
            .await?;

        let active_chunks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await?;

        let embedded_chunks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM knowledge_chunks WHERE is_active = 1 AND embedding IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT disease_category, COUNT(*) AS chunk_count
            FROM knowledge_chunks
            WHERE is_active = 1
            GROUP BY disease_category
            ORDER BY chunk_count DESC, disease_category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let by_category = rows
            .iter()
            .map(|row| (row.get("disease_category"), row.get("chunk_count")))
            .collect();

        Ok(ChunkStatistics {
            total_chunks,
            active_chunks,
            inactive_chunks: total_chunks - active_chunks,
            embedded_chunks,
            by_category,
        })
    }
}
