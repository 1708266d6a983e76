use super::*;
use crate::document::MetadataValue;
use std::sync::Mutex;

/// Backend that records the configuration it received and returns canned chunks
struct RecordingBackend {
    results: Vec<RetrievedChunk>,
    seen: Mutex<Vec<(String, String, RetrievalConfig)>>,
}

impl RecordingBackend {
    fn returning(results: Vec<RetrievedChunk>) -> Self {
        Self {
            results,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SearchBackend for RecordingBackend {
    async fn search(
        &self,
        collection: &Collection,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievedChunk>> {
        self.seen.lock().expect("lock should not be poisoned").push((
            collection.name.clone(),
            query.to_string(),
            *config,
        ));
        Ok(self.results.clone())
    }
}

struct FailingBackend;

#[async_trait]
impl SearchBackend for FailingBackend {
    async fn search(
        &self,
        _collection: &Collection,
        _query: &str,
        _config: &RetrievalConfig,
    ) -> Result<Vec<RetrievedChunk>> {
        Err(RagError::embedding("model 'ghost' not found"))
    }
}

fn docs_collection() -> Collection {
    Collection {
        name: "docs".to_string(),
        embedding_model: "model-a".to_string(),
    }
}

fn chunk(content: &str, source: &str) -> RetrievedChunk {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), MetadataValue::from(source));
    RetrievedChunk {
        content: content.to_string(),
        metadata,
        score: Some(0.9),
    }
}

#[test]
fn top_k_bounds() {
    for value in [0.0, 101.0, -3.0] {
        let err = build_config("top_k", Some(value)).expect_err("out of range must fail");
        assert!(matches!(err, RagError::InvalidParameter { .. }), "{err:?}");
    }

    assert_eq!(
        build_config("top_k", Some(1.0)).expect("1 is valid"),
        RetrievalConfig::TopK { k: 1 }
    );
    assert_eq!(
        build_config("top_k", Some(100.0)).expect("100 is valid"),
        RetrievalConfig::TopK { k: 100 }
    );
}

#[test]
fn top_k_requires_whole_number() {
    let err = build_config("top_k", Some(2.5)).expect_err("fractional k must fail");
    assert!(matches!(err, RagError::InvalidParameter { .. }));

    let err = build_config("top_k", None).expect_err("missing k must fail");
    assert!(matches!(err, RagError::InvalidParameter { .. }));
}

#[test]
fn similarity_threshold_bounds() {
    let config = build_config("similarity_threshold", Some(0.0)).expect("0.0 is valid");
    assert_eq!(config, RetrievalConfig::SimilarityThreshold { min_score: 0.0 });

    assert!(build_config("similarity_threshold", Some(100.0)).is_ok());
    assert!(build_config("similarity_threshold", Some(0.75)).is_ok());

    for value in [-0.01, 100.01, f64::NAN, f64::INFINITY] {
        let err = build_config("similarity_threshold", Some(value))
            .expect_err("out of range threshold must fail");
        assert!(matches!(err, RagError::InvalidParameter { .. }), "{err:?}");
    }

    assert!(build_config("similarity_threshold", None).is_err());
}

#[test]
fn mmr_needs_no_parameter() {
    assert_eq!(
        build_config("mmr", None).expect("mmr is valid"),
        RetrievalConfig::Mmr
    );
    assert_eq!(
        build_config("mmr", Some(7.0)).expect("parameter is ignored"),
        RetrievalConfig::Mmr
    );
}

#[test]
fn unknown_mode() {
    for parameter in [None, Some(3.0), Some(0.5)] {
        let err = build_config("unknown_mode", parameter).expect_err("must fail");
        assert!(matches!(err, RagError::UnknownMode(ref mode) if mode == "unknown_mode"));
        assert!(err.is_recoverable());
    }
}

#[test]
fn mode_parsing_accepts_cli_spellings() {
    assert_eq!("top-k".parse::<RetrievalMode>().ok(), Some(RetrievalMode::TopK));
    assert_eq!("TOPK".parse::<RetrievalMode>().ok(), Some(RetrievalMode::TopK));
    assert_eq!(
        "threshold".parse::<RetrievalMode>().ok(),
        Some(RetrievalMode::SimilarityThreshold)
    );
    assert_eq!(RetrievalMode::SimilarityThreshold.to_string(), "similarity_threshold");
}

#[test]
fn error_messages_carry_context() {
    let err = build_config("top_k", Some(101.0)).expect_err("must fail");
    let message = err.to_string();
    assert!(message.contains("top_k"), "{message}");
    assert!(message.contains("101"), "{message}");
}

#[test]
fn request_builds_config() {
    let request = RetrievalRequest {
        query: "what is rust?".to_string(),
        mode: RetrievalMode::TopK,
        parameter: Some(3.0),
    };
    assert_eq!(
        request.config().expect("valid request"),
        RetrievalConfig::TopK { k: 3 }
    );

    let request = RetrievalRequest {
        parameter: Some(0.0),
        ..request
    };
    assert!(matches!(
        request.config(),
        Err(RagError::InvalidParameter { .. })
    ));
}

#[tokio::test]
async fn execute_forwards_config_and_results() {
    let backend = RecordingBackend::returning(vec![
        chunk("first", "https://example.com/a"),
        chunk("second", "https://example.com/b"),
    ]);
    let config = RetrievalConfig::TopK { k: 2 };

    let results = execute(&backend, &config, "question", &docs_collection())
        .await
        .expect("execute should succeed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].content, "first");
    assert_eq!(results[1].content, "second");

    let seen = backend.seen.lock().expect("lock should not be poisoned");
    assert_eq!(
        *seen,
        vec![("docs".to_string(), "question".to_string(), config)]
    );
}

#[tokio::test]
async fn execute_with_no_matches_is_empty_not_error() {
    let backend = RecordingBackend::returning(Vec::new());
    let config = build_config("similarity_threshold", Some(0.0)).expect("valid config");

    let results = execute(&backend, &config, "question", &docs_collection())
        .await
        .expect("no matches is not an error");
    assert!(results.is_empty());
}

#[tokio::test]
async fn execute_propagates_backend_failure() {
    let err = execute(
        &FailingBackend,
        &RetrievalConfig::Mmr,
        "question",
        &docs_collection(),
    )
    .await
    .expect_err("backend failure must surface");

    assert!(matches!(err, RagError::External { .. }));
    assert!(err.to_string().contains("model 'ghost' not found"));
}

#[tokio::test]
async fn execute_rejects_empty_query_before_calling_backend() {
    let backend = RecordingBackend::returning(vec![chunk("first", "a")]);

    let err = execute(
        &backend,
        &RetrievalConfig::TopK { k: 1 },
        "   ",
        &docs_collection(),
    )
    .await
    .expect_err("empty query must fail");

    assert!(matches!(err, RagError::InvalidParameter { .. }));
    assert!(backend.seen.lock().expect("lock").is_empty());
}
