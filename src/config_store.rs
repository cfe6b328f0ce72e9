//! Embedding configuration store.
//!
//! Admin-managed CRUD over `embedding_configs`, plus the two operations the
//! retrieval path depends on: `resolve_active` (which configuration should a
//! request use) and `set_default` (transactional, so there is never a window
//! with zero or two defaults).

use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::{EmbeddingConfig, ProviderKind, TestStatus};

/// Fields supplied when registering a new endpoint.
#[derive(Debug, Clone)]
pub struct NewEmbeddingConfig {
    pub name: String,
    pub provider: ProviderKind,
    pub model_id: String,
    pub api_url: String,
    pub api_key: String,
    pub vector_dimension: usize,
    pub max_input_length: usize,
}

/// Result of `ConfigStore::test`, persisted onto the config row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TestReport {
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub vector_dimension: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> ConfigStore {
        ConfigStore { pool }
    }

    /// Register a new endpoint. New configurations start inactive and
    /// untested; an admin activates them after a successful test.
    pub async fn create(&self, new: NewEmbeddingConfig) -> Result<EmbeddingConfig> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO embedding_configs
                (id, name, provider, model_id, api_url, api_key,
                 vector_dimension, max_input_length, is_active, is_default,
                 test_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 'untested', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(new.provider.as_str())
        .bind(&new.model_id)
        .bind(&new.api_url)
        .bind(&new.api_key)
        .bind(new.vector_dimension as i64)
        .bind(new.max_input_length as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(name = %new.name, model = %new.model_id, "created embedding config");

        self.get(&id)
            .await?
            .ok_or_else(|| Error::ConfigNotFound(id))
    }

    pub async fn get(&self, id: &str) -> Result<Option<EmbeddingConfig>> {
        let row = sqlx::query("SELECT * FROM embedding_configs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| config_from_row(&r)).transpose()
    }

    pub async fn list(&self) -> Result<Vec<EmbeddingConfig>> {
        let rows = sqlx::query("SELECT * FROM embedding_configs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(config_from_row).collect()
    }

    /// Resolve the configuration a request should embed with.
    ///
    /// An explicit id must name an active configuration. Without one, the
    /// active default wins; failing that, the newest active configuration.
    /// No active configuration at all is an explicit error — retrieval must
    /// never degrade into an empty success.
    pub async fn resolve_active(&self, id: Option<&str>) -> Result<EmbeddingConfig> {
        let row = match id {
            Some(id) => {
                sqlx::query("SELECT * FROM embedding_configs WHERE id = ? AND is_active = 1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                let default = sqlx::query(
                    "SELECT * FROM embedding_configs WHERE is_default = 1 AND is_active = 1",
                )
                .fetch_optional(&self.pool)
                .await?;

                match default {
                    Some(row) => Some(row),
                    None => {
                        sqlx::query(
                            "SELECT * FROM embedding_configs WHERE is_active = 1 \
                             ORDER BY created_at DESC LIMIT 1",
                        )
                        .fetch_optional(&self.pool)
                        .await?
                    }
                }
            }
        };

        match row {
            Some(row) => config_from_row(&row),
            None => Err(Error::NoActiveConfiguration),
        }
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE embedding_configs SET is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(active)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ConfigNotFound(id.to_string()));
        }

        info!(id, active, "updated embedding config activation");
        Ok(())
    }

    /// Promote a configuration to default. The unset of the previous default
    /// and the set of the new one commit together, so concurrent readers
    /// never observe zero or two defaults.
    pub async fn set_default(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE embedding_configs SET is_default = 0, updated_at = ? WHERE is_default = 1")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE embedding_configs SET is_default = 1, is_active = 1, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::ConfigNotFound(id.to_string()));
        }

        tx.commit().await?;
        info!(id, "set default embedding config");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM embedding_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Probe the endpoint with a fixed sentence, verify the returned
    /// dimension against the configured one, and persist the outcome.
    pub async fn test(&self, client: &EmbeddingClient, id: &str) -> Result<TestReport> {
        let config = self
            .get(id)
            .await?
            .ok_or_else(|| Error::ConfigNotFound(id.to_string()))?;

        let report = match client.probe(&config).await {
            Ok(outcome) => {
                if outcome.vector_dimension == config.vector_dimension {
                    TestReport {
                        success: true,
                        latency_ms: Some(outcome.latency_ms),
                        vector_dimension: Some(outcome.vector_dimension),
                        error: None,
                    }
                } else {
                    TestReport {
                        success: false,
                        latency_ms: Some(outcome.latency_ms),
                        vector_dimension: Some(outcome.vector_dimension),
                        error: Some(format!(
                            "dimension mismatch: expected {}, got {}",
                            config.vector_dimension, outcome.vector_dimension
                        )),
                    }
                }
            }
            Err(e) => TestReport {
                success: false,
                latency_ms: None,
                vector_dimension: None,
                error: Some(e.to_string()),
            },
        };

        let status = if report.success {
            TestStatus::Success
        } else {
            TestStatus::Failed
        };
        self.record_test(id, status, report.error.as_deref()).await?;

        Ok(report)
    }

    async fn record_test(&self, id: &str, status: TestStatus, error: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE embedding_configs
            SET test_status = ?, last_tested_at = ?, test_error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn config_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<EmbeddingConfig> {
    let provider: String = row.get("provider");
    let test_status: String = row.get("test_status");
    let vector_dimension: i64 = row.get("vector_dimension");
    let max_input_length: i64 = row.get("max_input_length");

    Ok(EmbeddingConfig {
        id: row.get("id"),
        name: row.get("name"),
        provider: ProviderKind::parse(&provider)
            .ok_or_else(|| Error::Config(format!("unknown provider '{}' in store", provider)))?,
        model_id: row.get("model_id"),
        api_url: row.get("api_url"),
        api_key: row.get("api_key"),
        vector_dimension: vector_dimension as usize,
        max_input_length: max_input_length as usize,
        is_active: row.get("is_active"),
        is_default: row.get("is_default"),
        test_status: TestStatus::parse(&test_status).unwrap_or(TestStatus::Untested),
        last_tested_at: row.get("last_tested_at"),
        test_error_message: row.get("test_error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
