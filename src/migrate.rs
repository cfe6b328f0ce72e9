use sqlx::SqlitePool;

use crate::error::Result;

/// Create the schema. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Chunk table. Chunks are soft-deleted only: removal flips is_active,
    // which is why hash uniqueness is scoped to active rows via a partial
    // index rather than a column constraint.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            disease_category TEXT NOT NULL,
            disease_id TEXT,
            document_title TEXT NOT NULL,
            section_title TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            embedding BLOB,
            embedding_model_id TEXT,
            retrieval_count INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_active_hash
        ON knowledge_chunks(content_hash) WHERE is_active = 1
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_chunks_category_disease
        ON knowledge_chunks(disease_category, disease_id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_document_title ON knowledge_chunks(document_title)",
    )
    .execute(pool)
    .await?;

    // Embedding endpoint configurations, admin-managed.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_configs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            provider TEXT NOT NULL,
            model_id TEXT NOT NULL,
            api_url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            vector_dimension INTEGER NOT NULL,
            max_input_length INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            is_default INTEGER NOT NULL DEFAULT 0,
            test_status TEXT NOT NULL DEFAULT 'untested',
            last_tested_at INTEGER,
            test_error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
