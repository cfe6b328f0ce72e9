//! Core data models of the knowledge engine.
//!
//! These types represent the chunks, embedding configurations, and retrieval
//! results that flow through the ingestion and selection pipeline.

use serde::{Deserialize, Serialize};

/// Kind of source document a chunk was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Guideline,
    MedicalDocument,
    ResearchPaper,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Guideline => "guideline",
            SourceType::MedicalDocument => "medical_document",
            SourceType::ResearchPaper => "research_paper",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        match s {
            "guideline" => Some(SourceType::Guideline),
            "medical_document" => Some(SourceType::MedicalDocument),
            "research_paper" => Some(SourceType::ResearchPaper),
            _ => None,
        }
    }
}

/// Wire protocol family of an embedding endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Qwen,
    Other,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Qwen => "qwen",
            ProviderKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<ProviderKind> {
        match s {
            "openai" => Some(ProviderKind::Openai),
            "qwen" => Some(ProviderKind::Qwen),
            "other" => Some(ProviderKind::Other),
            _ => None,
        }
    }
}

/// Outcome of the most recent connectivity probe against a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Untested,
    Success,
    Failed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Untested => "untested",
            TestStatus::Success => "success",
            TestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TestStatus> {
        match s {
            "untested" => Some(TestStatus::Untested),
            "success" => Some(TestStatus::Success),
            "failed" => Some(TestStatus::Failed),
            _ => None,
        }
    }
}

/// One embedding-model endpoint, persisted and admin-managed.
///
/// Among active rows at most one may be the default; `ConfigStore::set_default`
/// maintains that invariant transactionally.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    pub model_id: String,
    pub api_url: String,
    pub api_key: String,
    pub vector_dimension: usize,
    pub max_input_length: usize,
    pub is_active: bool,
    pub is_default: bool,
    pub test_status: TestStatus,
    pub last_tested_at: Option<i64>,
    pub test_error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EmbeddingConfig {
    /// Whether requests to this endpoint use the Qwen/DashScope wire shape.
    /// Some deployments advertise `openai` but sit on a DashScope URL, so
    /// the URL is sniffed as well.
    pub fn is_qwen_style(&self) -> bool {
        let url = self.api_url.to_lowercase();
        self.provider == ProviderKind::Qwen || url.contains("dashscope") || url.contains("aliyun")
    }
}

/// A stored, retrievable unit of a source document.
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub id: String,
    pub source_type: SourceType,
    pub disease_category: String,
    /// Weak reference into the external disease catalog; lookup only.
    pub disease_id: Option<String>,
    pub document_title: String,
    pub section_title: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model_id: Option<String>,
    pub retrieval_count: i64,
    pub is_active: bool,
    pub created_at: i64,
}

/// Report returned by one ingestion call.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub total_chunks: usize,
    pub new_chunks: usize,
    pub duplicates: usize,
    pub chunk_ids: Vec<String>,
}

/// A chunk returned from retrieval, with full provenance for citation.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub id: String,
    pub document_title: String,
    pub section_title: String,
    pub disease_category: String,
    pub chunk_index: i64,
    pub text: String,
    /// Cosine similarity against the query; `None` for chunks attached via
    /// the keyword-only fallback lookup.
    pub similarity: Option<f32>,
}

/// One keyword-table hit for a category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryMatch {
    pub category: String,
    pub score: u32,
    pub matched_keywords: Vec<String>,
    pub priority: u8,
    pub final_score: f64,
}

/// One selected knowledge source in a retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeSource {
    pub category: String,
    pub relevance_score: f64,
    pub selection_reason: String,
    pub chunks: Vec<ChunkHit>,
}

/// The ranked, explained output of hybrid selection. Ephemeral; handed to
/// the diagnosis workflow, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub sources: Vec<KnowledgeSource>,
    pub selection_reasoning: String,
    pub total_chunks: usize,
    pub all_matched_categories: Vec<String>,
}

/// Corpus-wide chunk counts, per category and in total.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkStatistics {
    pub total_chunks: i64,
    pub active_chunks: i64,
    pub inactive_chunks: i64,
    pub embedded_chunks: i64,
    pub by_category: Vec<(String, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            id: "c1".to_string(),
            name: "test".to_string(),
            provider: ProviderKind::Openai,
            model_id: "text-embedding-3-small".to_string(),
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: "sk-test".to_string(),
            vector_dimension: 1536,
            max_input_length: 8192,
            is_active: true,
            is_default: false,
            test_status: TestStatus::Untested,
            last_tested_at: None,
            test_error_message: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_source_type_roundtrip() {
        for st in [
            SourceType::Guideline,
            SourceType::MedicalDocument,
            SourceType::ResearchPaper,
        ] {
            assert_eq!(SourceType::parse(st.as_str()), Some(st));
        }
        assert_eq!(SourceType::parse("bogus"), None);
    }

    #[test]
    fn test_qwen_detection_by_provider() {
        let mut config = test_config();
        config.provider = ProviderKind::Qwen;
        assert!(config.is_qwen_style());
    }

    #[test]
    fn test_qwen_detection_by_url() {
        let mut config = test_config();
        config.api_url = "https://dashscope.aliyuncs.com/api/v1".to_string();
        assert!(config.is_qwen_style());
    }

    #[test]
    fn test_openai_not_qwen() {
        assert!(!test_config().is_qwen_style());
    }
}
