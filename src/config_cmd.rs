//! Embedding configuration administration commands.
//!
//! The CLI face of [`ConfigStore`]: register endpoints, probe them, and
//! manage the active/default flags that the retrieval path resolves
//! against.

use crate::config::Config;
use crate::config_store::{ConfigStore, NewEmbeddingConfig};
use crate::db;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::models::ProviderKind;

#[allow(clippy::too_many_arguments)]
pub async fn run_config_add(
    config: &Config,
    name: &str,
    provider: ProviderKind,
    model_id: &str,
    api_url: &str,
    api_key: &str,
    vector_dimension: usize,
    max_input_length: usize,
) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let configs = ConfigStore::new(pool.clone());

    let created = configs
        .create(NewEmbeddingConfig {
            name: name.to_string(),
            provider,
            model_id: model_id.to_string(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            vector_dimension,
            max_input_length,
        })
        .await?;

    println!("created config {} ({})", created.name, created.id);
    println!("  new configs start inactive; run `medkb config test {}` then activate it", created.id);

    pool.close().await;
    Ok(())
}

pub async fn run_config_list(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let configs = ConfigStore::new(pool.clone());

    let rows = configs.list().await?;
    if rows.is_empty() {
        println!("No embedding configs. Add one with `medkb config add`.");
        pool.close().await;
        return Ok(());
    }

    for cfg in &rows {
        println!("{}", cfg.id);
        println!("  name:       {}", cfg.name);
        println!("  provider:   {}", cfg.provider.as_str());
        println!("  model:      {}", cfg.model_id);
        println!("  url:        {}", cfg.api_url);
        println!("  dimension:  {}", cfg.vector_dimension);
        println!("  active:     {}", cfg.is_active);
        println!("  default:    {}", cfg.is_default);
        println!("  tested:     {}", cfg.test_status.as_str());
        if let Some(ref err) = cfg.test_error_message {
            println!("  last error: {}", err);
        }
        println!();
    }

    pool.close().await;
    Ok(())
}

pub async fn run_config_test(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let configs = ConfigStore::new(pool.clone());
    let client = EmbeddingClient::new(&config.embedding)?;

    let report = configs.test(&client, id).await?;
    if report.success {
        println!(
            "test passed: {} ms, dimension {}",
            report.latency_ms.unwrap_or(0),
            report.vector_dimension.unwrap_or(0)
        );
    } else {
        println!(
            "test failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    pool.close().await;
    Ok(())
}

pub async fn run_config_set_default(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    ConfigStore::new(pool.clone()).set_default(id).await?;
    println!("config {} is now the active default", id);
    pool.close().await;
    Ok(())
}

pub async fn run_config_set_active(config: &Config, id: &str, active: bool) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    ConfigStore::new(pool.clone()).set_active(id, active).await?;
    println!(
        "config {} {}",
        id,
        if active { "activated" } else { "deactivated" }
    );
    pool.close().await;
    Ok(())
}

pub async fn run_config_remove(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let removed = ConfigStore::new(pool.clone()).delete(id).await?;
    if removed {
        println!("removed config {}", id);
    } else {
        println!("no config with id {}", id);
    }
    pool.close().await;
    Ok(())
}
