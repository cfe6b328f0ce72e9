//! Brute-force cosine similarity search.
//!
//! Embeds the query, scans every active embedded chunk (optionally one
//! category), and ranks by cosine similarity. O(N·D) per query — fine at
//! guideline-corpus scale. The [`ChunkSearcher`] trait is the seam where an
//! approximate index could replace the scan without touching callers.

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::config_store::ConfigStore;
use crate::db;
use crate::embedding::{cosine_similarity, EmbeddingClient};
use crate::error::Result;
use crate::models::ChunkHit;
use crate::store::{KnowledgeStore, StoredChunk};

#[async_trait]
pub trait ChunkSearcher: Send + Sync {
    /// Top-k most similar chunks for a query, at or above `min_similarity`.
    /// Returned chunks get their retrieval counters bumped.
    async fn search(
        &self,
        query_text: &str,
        category: Option<&str>,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<ChunkHit>>;
}

pub struct SimilaritySearcher {
    store: KnowledgeStore,
    configs: ConfigStore,
    embedder: EmbeddingClient,
}

impl SimilaritySearcher {
    pub fn new(
        store: KnowledgeStore,
        configs: ConfigStore,
        embedder: EmbeddingClient,
    ) -> SimilaritySearcher {
        SimilaritySearcher {
            store,
            configs,
            embedder,
        }
    }
}

#[async_trait]
impl ChunkSearcher for SimilaritySearcher {
    async fn search(
        &self,
        query_text: &str,
        category: Option<&str>,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<ChunkHit>> {
        let config = self.configs.resolve_active(None).await?;
        let query_vec = self.embedder.generate(query_text, &config).await?;

        let candidates = self.store.active_embedded_chunks(category).await?;
        debug!(
            candidates = candidates.len(),
            category = category.unwrap_or("*"),
            "scanning chunks"
        );

        let mut scored: Vec<(StoredChunk, f32)> = candidates
            .into_iter()
            .map(|chunk| {
                let similarity = cosine_similarity(&query_vec, &chunk.embedding);
                (chunk, similarity)
            })
            .filter(|(_, similarity)| *similarity >= min_similarity)
            .collect();

        // Similarity first; ties go to the more-retrieved chunk, then to the
        // earlier position in the document, so ordering is reproducible.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.retrieval_count.cmp(&a.0.retrieval_count))
                .then_with(|| a.0.chunk_index.cmp(&b.0.chunk_index))
        });
        scored.truncate(top_k);

        let ids: Vec<String> = scored.iter().map(|(chunk, _)| chunk.id.clone()).collect();
        self.store.bump_retrieval_counts(&ids).await?;

        Ok(scored
            .into_iter()
            .map(|(chunk, similarity)| ChunkHit {
                id: chunk.id,
                document_title: chunk.document_title,
                section_title: chunk.section_title,
                disease_category: chunk.disease_category,
                chunk_index: chunk.chunk_index,
                text: chunk.chunk_text,
                similarity: Some(similarity),
            })
            .collect())
    }
}

/// CLI entry point: raw similarity search with provenance.
pub async fn run_search(
    config: &Config,
    query: &str,
    category: Option<&str>,
    top_k: usize,
    min_similarity: f32,
) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let searcher = SimilaritySearcher::new(
        KnowledgeStore::new(pool.clone()),
        ConfigStore::new(pool.clone()),
        EmbeddingClient::new(&config.embedding)?,
    );

    let hits = searcher
        .search(query, category, top_k, min_similarity)
        .await?;

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} / {} (chunk {})",
            i + 1,
            hit.similarity.unwrap_or(0.0),
            hit.document_title,
            hit.section_title,
            hit.chunk_index
        );
        println!("    category: {}", hit.disease_category);
        println!("    id: {}", hit.id);
        println!(
            "    excerpt: \"{}\"",
            excerpt(&hit.text, 160).replace('\n', " ")
        );
        println!();
    }

    pool.close().await;
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}
