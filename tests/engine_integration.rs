//! End-to-end tests driving the engine against a scratch SQLite database
//! and a mocked embedding endpoint.

use sqlx::SqlitePool;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use medkb::chunk::TextChunker;
use medkb::config::{EmbeddingHttpConfig, FusionConfig, RetrievalConfig};
use medkb::config_store::{ConfigStore, NewEmbeddingConfig};
use medkb::db;
use medkb::embedding::EmbeddingClient;
use medkb::error::Error;
use medkb::ingest::Ingestor;
use medkb::matcher::{CategoryMatcher, KeywordTable};
use medkb::migrate;
use medkb::models::{ProviderKind, SourceType};
use medkb::search::{ChunkSearcher, SimilaritySearcher};
use medkb::select::HybridSelector;
use medkb::store::KnowledgeStore;

const GUIDELINE: &str = "## 哮喘概述\n\n支气管哮喘是儿童期最常见的慢性呼吸道疾病，典型表现为反复发作的咳嗽、喘息、气促和胸闷，症状常在夜间及凌晨加重。发作常由呼吸道感染、过敏原暴露、运动或冷空气诱发，缓解期可无任何症状。\n\n## 诊断要点\n\n对于反复咳嗽喘息的患儿，应详细询问发作频率、诱因和家族过敏史，结合肺功能检查与支气管舒张试验判断气流受限的可逆性。排除异物吸入、先天气道畸形等其他引起喘息的疾病后方可确诊。\n\n## 治疗原则\n\n治疗目标是控制症状、维持正常活动水平并预防急性发作。首选吸入性糖皮质激素进行长期控制，急性发作时使用短效支气管舒张剂缓解，并按阶梯方案定期评估和调整治疗强度。";

/// Answers the OpenAI-compatible wire shape with one fixed unit vector per
/// input item, so any query is maximally similar to any stored chunk.
struct FixedVectorResponder;

impl Respond for FixedVectorResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let count = match body.get("input") {
            Some(serde_json::Value::Array(items)) => items.len(),
            Some(serde_json::Value::String(_)) => 1,
            _ => 0,
        };
        let data: Vec<serde_json::Value> = (0..count)
            .map(|i| serde_json::json!({"embedding": [1.0, 0.0, 0.0, 0.0], "index": i}))
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": data}))
    }
}

/// Like [`FixedVectorResponder`] but each item's vector encodes its batch
/// position, for order-preservation checks.
struct IndexVectorResponder;

impl Respond for IndexVectorResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let count = match body.get("input") {
            Some(serde_json::Value::Array(items)) => items.len(),
            Some(serde_json::Value::String(_)) => 1,
            _ => 0,
        };
        let data: Vec<serde_json::Value> = (0..count)
            .map(|i| serde_json::json!({"embedding": [i as f64, 1.0, 0.0, 0.0], "index": i}))
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": data}))
    }
}

/// Qwen/DashScope wire shape: `input.texts` in, `output.embeddings` out.
struct QwenResponder;

impl Respond for QwenResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let texts = body["input"]["texts"].as_array().unwrap();
        let embeddings: Vec<serde_json::Value> = (0..texts.len())
            .map(|i| serde_json::json!({"embedding": [0.0, 1.0, 0.0, 0.0], "text_index": i}))
            .collect();
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"output": {"embeddings": embeddings}}))
    }
}

async fn setup_db() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("medkb.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, pool)
}

async fn register_default_config(pool: &SqlitePool, api_url: &str, dimension: usize) -> String {
    let configs = ConfigStore::new(pool.clone());
    let created = configs
        .create(NewEmbeddingConfig {
            name: "mock".to_string(),
            provider: ProviderKind::Openai,
            model_id: "mock-embed".to_string(),
            api_url: api_url.to_string(),
            api_key: "test-key".to_string(),
            vector_dimension: dimension,
            max_input_length: 8192,
        })
        .await
        .unwrap();
    configs.set_default(&created.id).await.unwrap();
    created.id
}

fn embedder() -> EmbeddingClient {
    EmbeddingClient::new(&EmbeddingHttpConfig::default()).unwrap()
}

fn ingestor(pool: &SqlitePool) -> Ingestor {
    let separators = vec![
        "\n## ".to_string(),
        "\n### ".to_string(),
        "\n\n".to_string(),
        "\n".to_string(),
        ". ".to_string(),
        " ".to_string(),
    ];
    Ingestor::new(
        KnowledgeStore::new(pool.clone()),
        ConfigStore::new(pool.clone()),
        embedder(),
        TextChunker::new(120, 20, 20, separators).unwrap(),
    )
}

fn searcher(pool: &SqlitePool) -> SimilaritySearcher {
    SimilaritySearcher::new(
        KnowledgeStore::new(pool.clone()),
        ConfigStore::new(pool.clone()),
        embedder(),
    )
}

fn selector(pool: &SqlitePool) -> HybridSelector {
    HybridSelector::new(
        CategoryMatcher::new(KeywordTable::builtin(), &FusionConfig::default()),
        Box::new(searcher(pool)),
        KnowledgeStore::new(pool.clone()),
        RetrievalConfig::default(),
        FusionConfig::default(),
    )
}

#[tokio::test]
async fn test_ingestion_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(FixedVectorResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    register_default_config(&pool, &server.uri(), 4).await;

    let ingestor = ingestor(&pool);
    let first = ingestor
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await
        .unwrap();
    assert!(first.new_chunks > 0);
    assert_eq!(first.duplicates, 0);
    assert_eq!(first.chunk_ids.len(), first.new_chunks);

    let second = ingestor
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await
        .unwrap();
    assert_eq!(second.new_chunks, 0);
    assert_eq!(second.duplicates, first.new_chunks);
    assert!(second.chunk_ids.is_empty());
}

#[tokio::test]
async fn test_embedding_failure_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    register_default_config(&pool, &server.uri(), 4).await;

    let result = ingestor(&pool)
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await;
    assert!(matches!(result, Err(Error::Ingestion { .. })));

    let stats = KnowledgeStore::new(pool.clone()).statistics().await.unwrap();
    assert_eq!(stats.total_chunks, 0);
}

#[tokio::test]
async fn test_dimension_mismatch_aborts_ingestion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(FixedVectorResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    // Config promises 8 dims; the endpoint answers with 4.
    register_default_config(&pool, &server.uri(), 8).await;

    let result = ingestor(&pool)
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await;
    assert!(matches!(result, Err(Error::Ingestion { .. })));

    let stats = KnowledgeStore::new(pool.clone()).statistics().await.unwrap();
    assert_eq!(stats.total_chunks, 0);
}

#[tokio::test]
async fn test_retired_document_can_be_reingested() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(FixedVectorResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    register_default_config(&pool, &server.uri(), 4).await;
    let store = KnowledgeStore::new(pool.clone());

    let ingestor = ingestor(&pool);
    let first = ingestor
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await
        .unwrap();

    let retired = store.deactivate_document("哮喘指南", None).await.unwrap();
    assert_eq!(retired as usize, first.new_chunks);

    // Inactive rows no longer guard their hashes, so the same content
    // stores fresh again.
    let again = ingestor
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await
        .unwrap();
    assert_eq!(again.new_chunks, first.new_chunks);
    assert_eq!(again.duplicates, 0);

    let stats = store.statistics().await.unwrap();
    assert_eq!(stats.active_chunks as usize, first.new_chunks);
    assert_eq!(stats.inactive_chunks as usize, first.new_chunks);
}

#[tokio::test]
async fn test_set_default_is_exclusive() {
    let (_tmp, pool) = setup_db().await;
    let configs = ConfigStore::new(pool.clone());

    let a = configs
        .create(NewEmbeddingConfig {
            name: "a".to_string(),
            provider: ProviderKind::Openai,
            model_id: "model-a".to_string(),
            api_url: "https://a.example.com/v1".to_string(),
            api_key: "key-a".to_string(),
            vector_dimension: 4,
            max_input_length: 8192,
        })
        .await
        .unwrap();
    let b = configs
        .create(NewEmbeddingConfig {
            name: "b".to_string(),
            provider: ProviderKind::Qwen,
            model_id: "model-b".to_string(),
            api_url: "https://b.example.com/v1".to_string(),
            api_key: "key-b".to_string(),
            vector_dimension: 4,
            max_input_length: 8192,
        })
        .await
        .unwrap();

    configs.set_default(&a.id).await.unwrap();
    configs.set_default(&b.id).await.unwrap();

    let all = configs.list().await.unwrap();
    let defaults: Vec<_> = all.iter().filter(|c| c.is_default && c.is_active).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, b.id);

    let resolved = configs.resolve_active(None).await.unwrap();
    assert_eq!(resolved.id, b.id);
}

#[tokio::test]
async fn test_resolve_prefers_default_then_any_active() {
    let (_tmp, pool) = setup_db().await;
    let configs = ConfigStore::new(pool.clone());

    let a = configs
        .create(NewEmbeddingConfig {
            name: "a".to_string(),
            provider: ProviderKind::Openai,
            model_id: "model-a".to_string(),
            api_url: "https://a.example.com/v1".to_string(),
            api_key: "key-a".to_string(),
            vector_dimension: 4,
            max_input_length: 8192,
        })
        .await
        .unwrap();

    // New configs start inactive: nothing resolvable yet.
    assert!(matches!(
        configs.resolve_active(None).await,
        Err(Error::NoActiveConfiguration)
    ));

    configs.set_active(&a.id, true).await.unwrap();
    assert_eq!(configs.resolve_active(None).await.unwrap().id, a.id);

    // An explicit id must be active.
    configs.set_active(&a.id, false).await.unwrap();
    assert!(matches!(
        configs.resolve_active(Some(&a.id)).await,
        Err(Error::NoActiveConfiguration)
    ));
}

#[tokio::test]
async fn test_select_fails_without_active_config() {
    let (_tmp, pool) = setup_db().await;

    let result = selector(&pool)
        .select("孩子咳嗽喘息3天", Some(6), None, 3, true)
        .await;
    assert!(matches!(result, Err(Error::NoActiveConfiguration)));
}

#[tokio::test]
async fn test_deactivating_all_configs_breaks_selection_loudly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(FixedVectorResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    let id = register_default_config(&pool, &server.uri(), 4).await;

    let configs = ConfigStore::new(pool.clone());
    configs.set_active(&id, false).await.unwrap();

    let result = selector(&pool)
        .select("孩子咳嗽喘息3天", Some(6), None, 3, true)
        .await;
    assert!(matches!(result, Err(Error::NoActiveConfiguration)));
}

#[tokio::test]
async fn test_pediatric_respiratory_scenario() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(FixedVectorResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    register_default_config(&pool, &server.uri(), 4).await;

    ingestor(&pool)
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await
        .unwrap();

    let result = selector(&pool)
        .select("孩子咳嗽喘息3天", Some(6), None, 3, true)
        .await
        .unwrap();

    let categories: Vec<&str> = result.sources.iter().map(|s| s.category.as_str()).collect();
    assert!(categories.contains(&"respiratory"));
    assert!(categories.contains(&"pediatric"));
    assert!(result
        .all_matched_categories
        .iter()
        .any(|c| c == "respiratory"));

    // Corroborated respiratory outranks keyword-only pediatric.
    assert_eq!(result.sources[0].category, "respiratory");
    assert!(result.sources[0].relevance_score > result.sources[1].relevance_score);

    // At least one cited chunk with a real similarity score.
    let best_hit = result.sources[0]
        .chunks
        .iter()
        .filter_map(|c| c.similarity)
        .fold(0.0f32, f32::max);
    assert!(best_hit > 0.0);

    // Cardinality contracts.
    assert!(result.sources.len() <= 3);
    for source in &result.sources {
        assert!(source.chunks.len() <= 5);
    }

    // Audit trail: chunks are traceable and the reasoning names signals.
    for chunk in &result.sources[0].chunks {
        assert!(!chunk.id.is_empty());
        assert_eq!(chunk.document_title, "哮喘指南");
        assert!(!chunk.section_title.is_empty());
    }

    // A cited id resolves back to the full stored chunk.
    let store = KnowledgeStore::new(pool.clone());
    let cited = store
        .get_chunk(&result.sources[0].chunks[0].id)
        .await
        .unwrap()
        .expect("cited chunk must exist");
    assert_eq!(cited.document_title, "哮喘指南");
    assert_eq!(cited.source_type, SourceType::Guideline);
    assert_eq!(cited.embedding.as_ref().unwrap().len(), 4);
    assert_eq!(cited.embedding_model_id.as_deref(), Some("mock-embed"));
    assert!(cited.is_active);

    assert!(result.selection_reasoning.contains("respiratory"));
    assert!(result.sources[0].selection_reason.contains("Keyword match"));
    assert!(result.sources[0].selection_reason.contains("vector similarity"));
}

#[tokio::test]
async fn test_keyword_only_selection_skips_vector_search() {
    // No embedding config registered at all: with vector search off,
    // selection must still work from the keyword signal alone.
    let (_tmp, pool) = setup_db().await;

    let result = selector(&pool)
        .select("孩子咳嗽喘息3天", Some(6), None, 3, false)
        .await
        .unwrap();

    assert!(!result.sources.is_empty());
    assert!(result
        .sources
        .iter()
        .all(|s| s.selection_reason.starts_with("Keyword match")));
}

#[tokio::test]
async fn test_search_ranks_and_counts_retrievals() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(FixedVectorResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    register_default_config(&pool, &server.uri(), 4).await;

    ingestor(&pool)
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await
        .unwrap();

    let searcher = searcher(&pool);
    let hits = searcher
        .search("咳嗽喘息", Some("respiratory"), 2, 0.6)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.len() <= 2);
    for hit in &hits {
        let sim = hit.similarity.unwrap();
        assert!(sim >= 0.6);
        assert!((-1.0..=1.0).contains(&sim));
    }

    // Returned chunks got their counters bumped.
    let store = KnowledgeStore::new(pool.clone());
    let chunks = store.active_embedded_chunks(Some("respiratory")).await.unwrap();
    let total_retrievals: i64 = chunks.iter().map(|c| c.retrieval_count).sum();
    assert_eq!(total_retrievals as usize, hits.len());

    // Category filter: nothing stored under an unrelated category.
    let none = searcher
        .search("咳嗽喘息", Some("dermatology"), 5, 0.0)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_min_similarity_threshold_filters() {
    let server = MockServer::start().await;
    // Stored chunks get [1,0,0,0]; the marked query text gets an orthogonal
    // vector so every similarity lands at 0, below the threshold.
    struct QueryAwareResponder;
    impl Respond for QueryAwareResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let items = body["input"].as_array().unwrap();
            let data: Vec<serde_json::Value> = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let embedding = if item.as_str().unwrap_or("").contains("不相关") {
                        serde_json::json!([0.0, 1.0, 0.0, 0.0])
                    } else {
                        serde_json::json!([1.0, 0.0, 0.0, 0.0])
                    };
                    serde_json::json!({"embedding": embedding, "index": i})
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": data}))
        }
    }
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(QueryAwareResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    register_default_config(&pool, &server.uri(), 4).await;

    ingestor(&pool)
        .ingest(GUIDELINE, "哮喘指南", "respiratory", None, SourceType::Guideline)
        .await
        .unwrap();

    // Orthogonal query vector: similarity 0 for everything, below threshold.
    let hits = searcher(&pool)
        .search("不相关的查询", Some("respiratory"), 5, 0.6)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_generate_batch_preserves_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(IndexVectorResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    let id = register_default_config(&pool, &server.uri(), 4).await;
    let configs = ConfigStore::new(pool.clone());
    let config = configs.get(&id).await.unwrap().unwrap();

    let texts: Vec<String> = (0..7).map(|i| format!("text {}", i)).collect();
    let vectors = embedder().generate_batch(&texts, &config).await.unwrap();

    assert_eq!(vectors.len(), 7);
    for (i, vector) in vectors.iter().enumerate() {
        assert!((vector[0] - i as f32).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_qwen_wire_shape_roundtrip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(QwenResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    let configs = ConfigStore::new(pool.clone());
    let created = configs
        .create(NewEmbeddingConfig {
            name: "qwen".to_string(),
            provider: ProviderKind::Qwen,
            model_id: "text-embedding-v3".to_string(),
            api_url: server.uri(),
            api_key: "qwen-key".to_string(),
            vector_dimension: 4,
            max_input_length: 2048,
        })
        .await
        .unwrap();
    let config = configs.get(&created.id).await.unwrap().unwrap();

    // 12 texts exceed the Qwen batch cap of 10, forcing two requests that
    // must reassemble in order.
    let texts: Vec<String> = (0..12).map(|i| format!("文本 {}", i)).collect();
    let vectors = embedder().generate_batch(&texts, &config).await.unwrap();
    assert_eq!(vectors.len(), 12);
    assert!(vectors.iter().all(|v| v.len() == 4));
}

#[tokio::test]
async fn test_provider_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    let id = register_default_config(&pool, &server.uri(), 4).await;
    let config = ConfigStore::new(pool.clone()).get(&id).await.unwrap().unwrap();

    let result = embedder().generate("probe", &config).await;
    match result {
        Err(Error::Provider { status, body }) => {
            assert_eq!(status, 429);
            assert!(body.contains("rate limited"));
        }
        other => panic!("expected provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_config_probe_persists_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(FixedVectorResponder)
        .mount(&server)
        .await;

    let (_tmp, pool) = setup_db().await;
    let configs = ConfigStore::new(pool.clone());

    // Configured dimension disagrees with what the endpoint returns.
    let wrong = configs
        .create(NewEmbeddingConfig {
            name: "wrong-dims".to_string(),
            provider: ProviderKind::Openai,
            model_id: "mock-embed".to_string(),
            api_url: server.uri(),
            api_key: "k".to_string(),
            vector_dimension: 8,
            max_input_length: 8192,
        })
        .await
        .unwrap();

    let report = configs.test(&embedder(), &wrong.id).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.vector_dimension, Some(4));
    let stored = configs.get(&wrong.id).await.unwrap().unwrap();
    assert_eq!(stored.test_status.as_str(), "failed");
    assert!(stored.test_error_message.unwrap().contains("mismatch"));
    assert!(stored.last_tested_at.is_some());

    let right = configs
        .create(NewEmbeddingConfig {
            name: "right-dims".to_string(),
            provider: ProviderKind::Openai,
            model_id: "mock-embed".to_string(),
            api_url: server.uri(),
            api_key: "k".to_string(),
            vector_dimension: 4,
            max_input_length: 8192,
        })
        .await
        .unwrap();

    let report = configs.test(&embedder(), &right.id).await.unwrap();
    assert!(report.success);
    let stored = configs.get(&right.id).await.unwrap().unwrap();
    assert_eq!(stored.test_status.as_str(), "success");
    assert!(stored.test_error_message.is_none());
}
