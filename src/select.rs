//! Hybrid source selection.
//!
//! Fuses the keyword matcher's lexical signal with the similarity
//! searcher's semantic signal into one ranked list of knowledge sources.
//! Every selected source carries a human-readable reason, and the overall
//! reasoning string is the audit trail the diagnosis workflow uses to cite
//! sources back to the end user.

use std::collections::BTreeMap;

use tracing::info;

use crate::config::{Config, FusionConfig, RetrievalConfig};
use crate::config_store::ConfigStore;
use crate::db;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::matcher::{CategoryMatcher, KeywordTable};
use crate::models::{CategoryMatch, ChunkHit, KnowledgeSource, RetrievalResult};
use crate::search::{ChunkSearcher, SimilaritySearcher};
use crate::store::KnowledgeStore;

pub struct HybridSelector {
    matcher: CategoryMatcher,
    searcher: Box<dyn ChunkSearcher>,
    store: KnowledgeStore,
    retrieval: RetrievalConfig,
    fusion: FusionConfig,
}

/// One category after score fusion, before chunk attachment.
#[derive(Debug, Clone)]
struct FusedCategory {
    category: String,
    combined_score: f64,
    reason: String,
}

impl HybridSelector {
    pub fn new(
        matcher: CategoryMatcher,
        searcher: Box<dyn ChunkSearcher>,
        store: KnowledgeStore,
        retrieval: RetrievalConfig,
        fusion: FusionConfig,
    ) -> HybridSelector {
        HybridSelector {
            matcher,
            searcher,
            store,
            retrieval,
            fusion,
        }
    }

    /// Select the `top_k` most relevant knowledge sources for a symptom
    /// description.
    ///
    /// Keyword matching always runs; vector search runs per matched
    /// category when enabled (falling back to the configured default
    /// category when nothing matched, so the semantic signal is never
    /// silently skipped). Provider or configuration failures propagate —
    /// the caller must be able to tell "no knowledge" from "engine down".
    pub async fn select(
        &self,
        symptoms: &str,
        patient_age: Option<u32>,
        patient_gender: Option<&str>,
        top_k: usize,
        use_vector_search: bool,
    ) -> Result<RetrievalResult> {
        info!(
            age = ?patient_age,
            gender = ?patient_gender,
            use_vector_search,
            "selecting knowledge sources"
        );

        let keyword_matches = self.matcher.match_symptoms(symptoms, patient_age);
        let all_matched: Vec<String> = keyword_matches
            .iter()
            .map(|m| m.category.clone())
            .collect();
        info!(categories = ?all_matched, "keyword matching done");

        let mut vector_hits: BTreeMap<String, Vec<ChunkHit>> = BTreeMap::new();
        if use_vector_search {
            let categories: Vec<String> = if all_matched.is_empty() {
                vec![self.retrieval.fallback_category.clone()]
            } else {
                all_matched.clone()
            };

            for category in &categories {
                let hits = self
                    .searcher
                    .search(
                        symptoms,
                        Some(category),
                        self.retrieval.per_category_k,
                        self.retrieval.min_similarity,
                    )
                    .await?;
                if !hits.is_empty() {
                    vector_hits.insert(category.clone(), hits);
                }
            }
        }

        let fused = fuse(&keyword_matches, &vector_hits, &self.fusion);

        let mut sources = Vec::new();
        for scored in fused.into_iter().take(top_k) {
            let chunks = match vector_hits.get(&scored.category) {
                Some(hits) => hits.clone(),
                // A matched category without vector hits still cites its
                // most-consulted chunks.
                None => {
                    self.store
                        .fallback_chunks(&scored.category, self.retrieval.per_category_k)
                        .await?
                }
            };

            sources.push(KnowledgeSource {
                category: scored.category,
                relevance_score: scored.combined_score,
                selection_reason: scored.reason,
                chunks,
            });
        }

        let selection_reasoning = build_reasoning(&sources);
        let total_chunks = sources.iter().map(|s| s.chunks.len()).sum();

        info!(
            sources = sources.len(),
            total_chunks, "knowledge source selection complete"
        );

        Ok(RetrievalResult {
            sources,
            selection_reasoning,
            total_chunks,
            all_matched_categories: all_matched,
        })
    }
}

/// Fuse keyword and vector signals per category.
///
/// Keyword scores are normalized against the strongest keyword match so
/// both signals live on a comparable [0, 1] scale; the vector signal is the
/// best similarity seen for the category. Categories present in both
/// signals earn the corroboration bonus. Pure and synchronous so ranking
/// behavior is testable without a store.
fn fuse(
    keyword_matches: &[CategoryMatch],
    vector_hits: &BTreeMap<String, Vec<ChunkHit>>,
    fusion: &FusionConfig,
) -> Vec<FusedCategory> {
    let max_keyword_score = keyword_matches
        .iter()
        .map(|m| m.final_score)
        .fold(0.0f64, f64::max);

    // Union of both signals, keyword categories first.
    let mut categories: Vec<String> = keyword_matches.iter().map(|m| m.category.clone()).collect();
    for category in vector_hits.keys() {
        if !categories.iter().any(|c| c == category) {
            categories.push(category.clone());
        }
    }

    let mut fused: Vec<FusedCategory> = categories
        .into_iter()
        .map(|category| {
            let keyword = keyword_matches.iter().find(|m| m.category == category);
            let hits = vector_hits.get(&category);

            let normalized_keyword = match keyword {
                Some(m) if max_keyword_score > 0.0 => m.final_score / max_keyword_score,
                _ => 0.0,
            };
            let max_similarity = hits
                .map(|hits| {
                    hits.iter()
                        .filter_map(|h| h.similarity)
                        .fold(0.0f32, f32::max) as f64
                })
                .unwrap_or(0.0);

            let mut combined_score = fusion.keyword_weight * normalized_keyword
                + fusion.vector_weight * max_similarity;
            if keyword.is_some() && hits.is_some() {
                combined_score *= fusion.corroboration_bonus;
            }

            let reason = match (keyword, hits) {
                (Some(m), Some(_)) => format!(
                    "Keyword match: {}; vector similarity: {:.2}",
                    top_keywords(m),
                    max_similarity
                ),
                (Some(m), None) => format!("Keyword match: {}", top_keywords(m)),
                (None, _) => format!("Vector similarity: {:.2}", max_similarity),
            };

            FusedCategory {
                category,
                combined_score,
                reason,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.category.cmp(&b.category))
    });

    fused
}

fn top_keywords(m: &CategoryMatch) -> String {
    m.matched_keywords
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_reasoning(sources: &[KnowledgeSource]) -> String {
    if sources.is_empty() {
        return "No specific knowledge base matched. Using general medical knowledge.".to_string();
    }

    let lines: Vec<String> = sources
        .iter()
        .map(|s| {
            format!(
                "{} (score: {:.2}): {}",
                s.category, s.relevance_score, s.selection_reason
            )
        })
        .collect();

    format!(
        "Based on symptom analysis, the following knowledge bases were selected:\n{}",
        lines.join("\n")
    )
}

/// CLI entry point: run hybrid selection and print the result.
pub async fn run_select(
    config: &Config,
    symptoms: &str,
    patient_age: Option<u32>,
    patient_gender: Option<&str>,
    top_k: usize,
    use_vector_search: bool,
) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;

    let table = match &config.keywords.path {
        Some(path) => KeywordTable::load(path)?,
        None => KeywordTable::builtin(),
    };

    let selector = HybridSelector::new(
        CategoryMatcher::new(table, &config.fusion),
        Box::new(SimilaritySearcher::new(
            KnowledgeStore::new(pool.clone()),
            ConfigStore::new(pool.clone()),
            EmbeddingClient::new(&config.embedding)?,
        )),
        KnowledgeStore::new(pool.clone()),
        config.retrieval.clone(),
        config.fusion.clone(),
    );

    let result = selector
        .select(symptoms, patient_age, patient_gender, top_k, use_vector_search)
        .await?;

    if result.sources.is_empty() {
        println!("No knowledge sources selected.");
    }

    for (i, source) in result.sources.iter().enumerate() {
        println!(
            "{}. {} (score: {:.2})",
            i + 1,
            source.category,
            source.relevance_score
        );
        println!("   reason: {}", source.selection_reason);
        for chunk in &source.chunks {
            match chunk.similarity {
                Some(sim) => println!(
                    "   - [{:.3}] {} / {} (chunk {}, id {})",
                    sim, chunk.document_title, chunk.section_title, chunk.chunk_index, chunk.id
                ),
                None => println!(
                    "   - [keyword] {} / {} (chunk {}, id {})",
                    chunk.document_title, chunk.section_title, chunk.chunk_index, chunk.id
                ),
            }
        }
        println!();
    }

    println!("{}", result.selection_reasoning);
    println!("total chunks: {}", result.total_chunks);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword_match(category: &str, final_score: f64) -> CategoryMatch {
        CategoryMatch {
            category: category.to_string(),
            score: final_score as u32,
            matched_keywords: vec!["kw".to_string()],
            priority: 1,
            final_score,
        }
    }

    fn hit(category: &str, similarity: f32) -> ChunkHit {
        ChunkHit {
            id: format!("{}-{}", category, similarity),
            document_title: "doc".to_string(),
            section_title: "sec".to_string(),
            disease_category: category.to_string(),
            chunk_index: 0,
            text: "text".to_string(),
            similarity: Some(similarity),
        }
    }

    fn hits_map(entries: &[(&str, f32)]) -> BTreeMap<String, Vec<ChunkHit>> {
        let mut map = BTreeMap::new();
        for (category, sim) in entries {
            map.entry(category.to_string())
                .or_insert_with(Vec::new)
                .push(hit(category, *sim));
        }
        map
    }

    #[test]
    fn test_ranking_is_non_increasing() {
        let keyword = vec![
            keyword_match("respiratory", 4.0),
            keyword_match("pediatric", 3.0),
            keyword_match("digestive", 1.0),
        ];
        let vectors = hits_map(&[("respiratory", 0.9), ("neurological", 0.7)]);
        let fused = fuse(&keyword, &vectors, &FusionConfig::default());

        for pair in fused.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
    }

    #[test]
    fn test_dual_signal_scores_at_least_single_signal() {
        let fusion = FusionConfig::default();
        let keyword = vec![keyword_match("respiratory", 4.0)];

        let kw_only = fuse(&keyword, &BTreeMap::new(), &fusion);
        let vec_only = fuse(&[], &hits_map(&[("respiratory", 0.8)]), &fusion);
        let both = fuse(&keyword, &hits_map(&[("respiratory", 0.8)]), &fusion);

        assert!(both[0].combined_score >= kw_only[0].combined_score);
        assert!(both[0].combined_score >= vec_only[0].combined_score);
    }

    #[test]
    fn test_corroboration_bonus_applied() {
        let fusion = FusionConfig::default();
        let keyword = vec![keyword_match("respiratory", 4.0)];
        let both = fuse(&keyword, &hits_map(&[("respiratory", 0.5)]), &fusion);

        // 1.2 × (0.6 × 1.0 + 0.4 × 0.5)
        assert!((both[0].combined_score - 0.96).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_scores_normalized_against_best() {
        let fusion = FusionConfig::default();
        let keyword = vec![
            keyword_match("respiratory", 8.0),
            keyword_match("digestive", 2.0),
        ];
        let fused = fuse(&keyword, &BTreeMap::new(), &fusion);

        assert!((fused[0].combined_score - 0.6).abs() < 1e-9);
        assert!((fused[1].combined_score - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_vector_only_category_included() {
        let fused = fuse(
            &[],
            &hits_map(&[("general", 0.75)]),
            &FusionConfig::default(),
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].category, "general");
        assert!((fused[0].combined_score - 0.3).abs() < 1e-9);
        assert!(fused[0].reason.starts_with("Vector similarity"));
    }

    #[test]
    fn test_reason_names_both_signals() {
        let keyword = vec![keyword_match("respiratory", 4.0)];
        let fused = fuse(
            &keyword,
            &hits_map(&[("respiratory", 0.82)]),
            &FusionConfig::default(),
        );
        assert!(fused[0].reason.contains("Keyword match"));
        assert!(fused[0].reason.contains("0.82"));
    }

    #[test]
    fn test_deterministic_tie_break_by_category() {
        let keyword = vec![keyword_match("b-cat", 2.0), keyword_match("a-cat", 2.0)];
        let fused = fuse(&keyword, &BTreeMap::new(), &FusionConfig::default());
        assert_eq!(fused[0].category, "a-cat");
        assert_eq!(fused[1].category, "b-cat");
    }

    #[test]
    fn test_empty_reasoning_sentence() {
        assert!(build_reasoning(&[]).contains("No specific knowledge base matched"));
    }
}
