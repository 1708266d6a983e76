use std::sync::Mutex;

use async_trait::async_trait;

use super::*;
use crate::document::Metadata;
use crate::retrieval::RetrievalConfig;

struct CannedBackend {
    chunks: Vec<RetrievedChunk>,
}

#[async_trait]
impl SearchBackend for CannedBackend {
    async fn search(
        &self,
        _collection: &Collection,
        _query: &str,
        _config: &RetrievalConfig,
    ) -> Result<Vec<RetrievedChunk>> {
        Ok(self.chunks.clone())
    }
}

struct BrokenBackend;

#[async_trait]
impl SearchBackend for BrokenBackend {
    async fn search(
        &self,
        _collection: &Collection,
        _query: &str,
        _config: &RetrievalConfig,
    ) -> Result<Vec<RetrievedChunk>> {
        Err(RagError::vector_store("table is unreadable"))
    }
}

#[derive(Default)]
struct RecordingModel {
    prompts: Mutex<Vec<String>>,
}

impl LanguageModel for RecordingModel {
    fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .expect("lock should not be poisoned")
            .push(prompt.to_string());
        Ok("Ownership means one owner.".to_string())
    }
}

fn chunk(content: &str) -> RetrievedChunk {
    RetrievedChunk {
        content: content.to_string(),
        metadata: Metadata::new(),
        score: Some(0.9),
    }
}

fn docs() -> Collection {
    Collection {
        name: "docs".to_string(),
        embedding_model: "model-a".to_string(),
    }
}

#[test]
fn prompt_joins_chunks_in_order() {
    let prompt = build_prompt(&[chunk("one"), chunk("two")], "what?");

    assert_eq!(
        prompt,
        "Answer the question based only on the following context:\n\none\n\n---\n\ntwo\n\n---\n\nAnswer the question based on the above context: what?"
    );
}

#[test]
fn state_accumulates_messages() {
    let state = ConversationState::new()
        .with_user_message("hi")
        .with_assistant_message("hello");

    assert_eq!(state.len(), 2);
    assert_eq!(state.messages()[0].role, Role::User);
    assert_eq!(state.messages()[1].role, Role::Assistant);
    assert_eq!(state.messages()[1].content, "hello");
}

#[test]
fn role_serializes_lowercase() {
    let json = serde_json::to_string(&Message {
        role: Role::Assistant,
        content: "x".to_string(),
    })
    .expect("should serialize");
    assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
}

#[tokio::test]
async fn turn_without_selection_uses_canned_reply() {
    let model = RecordingModel::default();

    let (state, outcome) = chat_turn(&ConversationState::new(), "hello?", None, &model)
        .await
        .expect("turn should succeed");

    assert_eq!(outcome.reply, NO_SELECTION_REPLY);
    assert_eq!(outcome.prompt, None);
    assert_eq!(state.len(), 2);
    assert!(model.prompts.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn turn_with_no_results_skips_model() {
    let model = RecordingModel::default();
    let backend = CannedBackend { chunks: Vec::new() };
    let target = ChatTarget {
        backend: &backend,
        collection: docs(),
        mode: RetrievalMode::TopK,
        parameter: Some(4.0),
    };

    let (state, outcome) = chat_turn(&ConversationState::new(), "anything?", Some(&target), &model)
        .await
        .expect("turn should succeed");

    assert_eq!(outcome.reply, NO_RESULTS_REPLY);
    assert_eq!(state.messages()[1].content, NO_RESULTS_REPLY);
    assert!(model.prompts.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn turn_with_results_prompts_model() {
    let model = RecordingModel::default();
    let backend = CannedBackend {
        chunks: vec![chunk("Each value has one owner."), chunk("Values drop at scope end.")],
    };
    let target = ChatTarget {
        backend: &backend,
        collection: docs(),
        mode: RetrievalMode::Mmr,
        parameter: None,
    };
    let earlier = ConversationState::new()
        .with_user_message("first")
        .with_assistant_message("reply");

    let (state, outcome) = chat_turn(&earlier, "  What is ownership?  ", Some(&target), &model)
        .await
        .expect("turn should succeed");

    assert_eq!(outcome.reply, "Ownership means one owner.");
    assert_eq!(outcome.chunks.len(), 2);
    let prompt = outcome.prompt.expect("prompt should be exposed");
    assert!(prompt.contains("Each value has one owner.\n\n---\n\nValues drop at scope end."));
    assert!(prompt.ends_with("What is ownership?"));
    assert_eq!(model.prompts.lock().expect("lock").as_slice(), [prompt]);

    assert_eq!(earlier.len(), 2, "input state must not change");
    assert_eq!(state.len(), 4);
    assert_eq!(state.messages()[2].content, "What is ownership?");
    assert_eq!(state.messages()[3].content, "Ownership means one owner.");
}

#[tokio::test]
async fn retrieval_failure_propagates() {
    let model = RecordingModel::default();
    let target = ChatTarget {
        backend: &BrokenBackend,
        collection: docs(),
        mode: RetrievalMode::TopK,
        parameter: Some(1.0),
    };

    let err = chat_turn(&ConversationState::new(), "why?", Some(&target), &model)
        .await
        .expect_err("failure should propagate");
    assert!(matches!(err, RagError::External { .. }));
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let model = RecordingModel::default();
    let err = chat_turn(&ConversationState::new(), "   ", None, &model)
        .await
        .expect_err("empty question must fail");
    assert!(matches!(err, RagError::InvalidParameter { .. }));
}

#[tokio::test]
async fn invalid_retrieval_parameter_fails_the_turn() {
    let model = RecordingModel::default();
    let target = ChatTarget {
        backend: &BrokenBackend,
        collection: docs(),
        mode: RetrievalMode::TopK,
        parameter: Some(0.0),
    };

    let err = chat_turn(&ConversationState::new(), "why?", Some(&target), &model)
        .await
        .expect_err("k = 0 must fail");
    assert!(matches!(err, RagError::InvalidParameter { .. }));
    assert!(model.prompts.lock().expect("lock").is_empty());
}

#[test]
fn target_builds_request_for_question() {
    let backend = CannedBackend { chunks: Vec::new() };
    let target = ChatTarget {
        backend: &backend,
        collection: docs(),
        mode: RetrievalMode::SimilarityThreshold,
        parameter: Some(0.4),
    };

    let request = target.retrieval_request("borrowing");
    assert_eq!(request.query, "borrowing");
    assert_eq!(
        request.config().expect("valid request"),
        RetrievalConfig::SimilarityThreshold { min_score: 0.4 }
    );
}
