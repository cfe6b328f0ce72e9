//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one document: section extraction →
//! chunking → dedup → batched embedding → atomic persistence. Embedding is
//! the only step that can fail mid-flight, and everything is staged in
//! memory until it succeeds — a document either lands whole or not at all.

use std::collections::HashSet;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::chunk::TextChunker;
use crate::config::Config;
use crate::config_store::ConfigStore;
use crate::db;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::{IngestReport, SourceType};
use crate::store::{KnowledgeStore, NewChunk};

/// Section title used when a document has no headers at all.
const UNTITLED_SECTION: &str = "General";
/// Section title for text before the first header.
const PREAMBLE_SECTION: &str = "Introduction";

pub struct Ingestor {
    store: KnowledgeStore,
    configs: ConfigStore,
    embedder: EmbeddingClient,
    chunker: TextChunker,
}

struct StagedChunk {
    section_title: String,
    chunk_index: i64,
    text: String,
    content_hash: String,
}

impl Ingestor {
    pub fn new(
        store: KnowledgeStore,
        configs: ConfigStore,
        embedder: EmbeddingClient,
        chunker: TextChunker,
    ) -> Ingestor {
        Ingestor {
            store,
            configs,
            embedder,
            chunker,
        }
    }

    /// Ingest one document. Identical text is stored exactly once: a chunk
    /// whose hash is already active (or already staged earlier in this same
    /// call) counts as a duplicate and is skipped.
    pub async fn ingest(
        &self,
        document_text: &str,
        title: &str,
        category: &str,
        disease_id: Option<&str>,
        source_type: SourceType,
    ) -> Result<IngestReport> {
        info!(title, category, "starting ingestion");

        let sections = extract_sections(document_text);

        let mut staged: Vec<StagedChunk> = Vec::new();
        let mut staged_hashes: HashSet<String> = HashSet::new();
        let mut duplicates = 0usize;

        for (section_title, section_body) in &sections {
            let chunks = self.chunker.split(section_body);
            for (i, text) in chunks.into_iter().enumerate() {
                let content_hash = hash_text(&text);

                if staged_hashes.contains(&content_hash)
                    || self.store.active_hash_exists(&content_hash).await?
                {
                    debug!(hash = %&content_hash[..16], "duplicate chunk skipped");
                    duplicates += 1;
                    continue;
                }

                staged_hashes.insert(content_hash.clone());
                staged.push(StagedChunk {
                    section_title: section_title.clone(),
                    chunk_index: i as i64,
                    text,
                    content_hash,
                });
            }
        }

        if staged.is_empty() {
            info!(title, duplicates, "nothing new to ingest");
            return Ok(IngestReport {
                total_chunks: duplicates,
                new_chunks: 0,
                duplicates,
                chunk_ids: Vec::new(),
            });
        }

        // Embed everything before anything is written. A failure here must
        // leave the store untouched.
        let config = self.configs.resolve_active(None).await?;
        let texts: Vec<String> = staged.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .generate_batch(&texts, &config)
            .await
            .map_err(|e| Error::Ingestion {
                source: Box::new(e),
            })?;

        // Stored vectors must match the configured dimension; a model that
        // answers with the wrong size poisons every later scan.
        if let Some(bad) = embeddings.iter().find(|v| v.len() != config.vector_dimension) {
            return Err(Error::Ingestion {
                source: Box::new(Error::Format(format!(
                    "embedding dimension mismatch for model '{}': expected {}, got {}",
                    config.model_id,
                    config.vector_dimension,
                    bad.len()
                ))),
            });
        }

        let new_chunks: Vec<NewChunk> = staged
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| NewChunk {
                id: Uuid::new_v4().to_string(),
                source_type,
                disease_category: category.to_string(),
                disease_id: disease_id.map(|s| s.to_string()),
                document_title: title.to_string(),
                section_title: chunk.section_title,
                chunk_index: chunk.chunk_index,
                chunk_text: chunk.text,
                content_hash: chunk.content_hash,
                embedding,
                embedding_model_id: config.model_id.clone(),
            })
            .collect();

        self.store.insert_chunks(&new_chunks).await?;

        let chunk_ids: Vec<String> = new_chunks.iter().map(|c| c.id.clone()).collect();
        info!(
            title,
            new_chunks = chunk_ids.len(),
            duplicates,
            "ingestion complete"
        );

        Ok(IngestReport {
            total_chunks: chunk_ids.len() + duplicates,
            new_chunks: chunk_ids.len(),
            duplicates,
            chunk_ids,
        })
    }
}

/// SHA-256 hex digest of the normalized (trimmed) chunk text. This is the
/// dedup key, so it must be stable across re-ingestions.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract `(section_title, section_body)` pairs by scanning for `##` /
/// `###` markdown headers. Text before the first header is its own
/// "Introduction" section; a document with no headers is one "General"
/// section.
fn extract_sections(content: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut title: Option<String> = None;
    let mut body = String::new();
    let mut saw_header = false;

    for line in content.lines() {
        match header_title(line) {
            Some(new_title) => {
                saw_header = true;
                let trimmed = body.trim();
                if !trimmed.is_empty() {
                    let section = title
                        .take()
                        .unwrap_or_else(|| PREAMBLE_SECTION.to_string());
                    sections.push((section, trimmed.to_string()));
                }
                title = Some(new_title);
                body.clear();
            }
            None => {
                body.push_str(line);
                body.push('\n');
            }
        }
    }

    if !saw_header {
        return vec![(UNTITLED_SECTION.to_string(), content.to_string())];
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        let section = title.unwrap_or_else(|| PREAMBLE_SECTION.to_string());
        sections.push((section, trimmed.to_string()));
    }

    sections
}

fn header_title(line: &str) -> Option<String> {
    let line = line.trim_start();
    if let Some(rest) = line.strip_prefix("### ") {
        return Some(rest.trim().to_string());
    }
    if let Some(rest) = line.strip_prefix("## ") {
        return Some(rest.trim().to_string());
    }
    None
}

/// CLI entry point: ingest a file and print the report.
pub async fn run_ingest(
    config: &Config,
    file: &Path,
    title: &str,
    category: &str,
    disease_id: Option<&str>,
    source_type: SourceType,
) -> Result<()> {
    let document_text = std::fs::read_to_string(file)?;

    let pool = db::connect(&config.db.path).await?;
    let ingestor = Ingestor::new(
        KnowledgeStore::new(pool.clone()),
        ConfigStore::new(pool.clone()),
        EmbeddingClient::new(&config.embedding)?,
        TextChunker::from_config(&config.chunking)?,
    );

    let report = ingestor
        .ingest(&document_text, title, category, disease_id, source_type)
        .await?;

    println!("ingest {}", title);
    println!("  total chunks: {}", report.total_chunks);
    println!("  new chunks:   {}", report.new_chunks);
    println!("  duplicates:   {}", report.duplicates);

    pool.close().await;
    Ok(())
}

/// CLI entry point: soft-delete a document's chunks.
pub async fn run_retire(config: &Config, title: &str, category: Option<&str>) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let store = KnowledgeStore::new(pool.clone());

    let count = store.deactivate_document(title, category).await?;
    println!("retired {} chunk(s) of '{}'", count, title);

    pool.close().await;
    Ok(())
}
