use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingHttpConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub keywords: KeywordsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chunk_size: default_min_chunk_size(),
            separators: default_separators(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    100
}
fn default_separators() -> Vec<String> {
    ["\n## ", "\n### ", "\n\n", "\n", ". ", " "]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// HTTP behavior when talking to the embedding endpoint. The endpoint
/// itself (URL, key, model) lives in the database, not here.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingHttpConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingHttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks fetched per category during hybrid selection.
    #[serde(default = "default_per_category_k")]
    pub per_category_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Category searched when no keyword category matched at all.
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            per_category_k: default_per_category_k(),
            min_similarity: default_min_similarity(),
            fallback_category: default_fallback_category(),
        }
    }
}

fn default_per_category_k() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.6
}
fn default_fallback_category() -> String {
    "general".to_string()
}

/// Score-fusion weights. The literal values mirror the original selector;
/// they are tunable here rather than baked into the ranking code.
#[derive(Debug, Deserialize, Clone)]
pub struct FusionConfig {
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_corroboration_bonus")]
    pub corroboration_bonus: f64,
    #[serde(default = "default_pediatric_age_boost")]
    pub pediatric_age_boost: u32,
    #[serde(default = "default_pediatric_age_threshold")]
    pub pediatric_age_threshold: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_keyword_weight(),
            vector_weight: default_vector_weight(),
            corroboration_bonus: default_corroboration_bonus(),
            pediatric_age_boost: default_pediatric_age_boost(),
            pediatric_age_threshold: default_pediatric_age_threshold(),
        }
    }
}

fn default_keyword_weight() -> f64 {
    0.6
}
fn default_vector_weight() -> f64 {
    0.4
}
fn default_corroboration_bonus() -> f64 {
    1.2
}
fn default_pediatric_age_boost() -> u32 {
    2
}
fn default_pediatric_age_threshold() -> u32 {
    18
}

/// Where the category keyword table comes from. Without a path the builtin
/// table ships with the binary.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KeywordsConfig {
    pub path: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read config file {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(Error::Config("chunking.chunk_size must be > 0".to_string()));
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        return Err(Error::Config(
            "chunking.overlap must be smaller than chunking.chunk_size".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_similarity) {
        return Err(Error::Config(
            "retrieval.min_similarity must be in [0.0, 1.0]".to_string(),
        ));
    }
    if config.fusion.keyword_weight < 0.0 || config.fusion.vector_weight < 0.0 {
        return Err(Error::Config(
            "fusion weights must be non-negative".to_string(),
        ));
    }
    if config.fusion.corroboration_bonus < 1.0 {
        return Err(Error::Config(
            "fusion.corroboration_bonus must be >= 1.0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_original_constants() {
        let config: Config = toml::from_str("[db]\npath = \"kb.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.per_category_k, 5);
        assert!((config.retrieval.min_similarity - 0.6).abs() < 1e-6);
        assert!((config.fusion.keyword_weight - 0.6).abs() < 1e-9);
        assert!((config.fusion.vector_weight - 0.4).abs() < 1e-9);
        assert!((config.fusion.corroboration_bonus - 1.2).abs() < 1e-9);
        assert_eq!(config.fusion.pediatric_age_boost, 2);
        assert_eq!(config.fusion.pediatric_age_threshold, 18);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let config: Config = toml::from_str(
            "[db]\npath = \"kb.sqlite\"\n[chunking]\nchunk_size = 100\noverlap = 100\n",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_min_similarity_bounds() {
        let config: Config = toml::from_str(
            "[db]\npath = \"kb.sqlite\"\n[retrieval]\nmin_similarity = 1.5\n",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }
}
