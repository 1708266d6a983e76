// Chat module
// Retrieval-augmented question answering over a collection, one turn at a time

#[cfg(test)]
mod tests;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embeddings::OllamaClient;
use crate::registry::Collection;
use crate::retrieval::{self, RetrievalMode, RetrievalRequest, RetrievedChunk, SearchBackend};
use crate::{RagError, Result};

/// Prompt sent to the language model; `{context}` and `{question}` are filled in
pub const PROMPT_TEMPLATE: &str = "Answer the question based only on the following context:\n\n{context}\n\n---\n\nAnswer the question based on the above context: {question}";

/// Separator placed between retrieved chunks inside the prompt
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Reply when retrieval finds nothing; the language model is not consulted
pub const NO_RESULTS_REPLY: &str = "Sorry, I couldn't find any relevant information.";

/// Reply when no database and collection have been chosen
pub const NO_SELECTION_REPLY: &str = "Please select a database and collection to start chatting.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// The transcript of a conversation. Each turn produces a new state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[inline]
    pub fn with_user_message(self, content: impl Into<String>) -> Self {
        self.with_message(Role::User, content.into())
    }

    #[inline]
    pub fn with_assistant_message(self, content: impl Into<String>) -> Self {
        self.with_message(Role::Assistant, content.into())
    }

    fn with_message(mut self, role: Role, content: String) -> Self {
        self.messages.push(Message { role, content });
        self
    }
}

/// Fill [`PROMPT_TEMPLATE`] with the chunk texts and the question
#[inline]
pub fn build_prompt(chunks: &[RetrievedChunk], question: &str) -> String {
    let context = chunks.iter().map(|chunk| chunk.content.as_str()).join(CONTEXT_SEPARATOR);
    PROMPT_TEMPLATE
        .replace("{context}", &context)
        .replace("{question}", question)
}

/// A chat model that answers a single prompt
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// [`LanguageModel`] backed by an Ollama chat model
pub struct OllamaChat<'a> {
    client: &'a OllamaClient,
    model: String,
}

impl<'a> OllamaChat<'a> {
    #[inline]
    pub fn new(client: &'a OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl LanguageModel for OllamaChat<'_> {
    #[inline]
    fn complete(&self, prompt: &str) -> Result<String> {
        self.client.chat(&self.model, prompt)
    }
}

/// The collection a conversation talks to, and how to search it
pub struct ChatTarget<'a> {
    pub backend: &'a dyn SearchBackend,
    pub collection: Collection,
    pub mode: RetrievalMode,
    /// Result count for top_k or minimum score for similarity_threshold
    pub parameter: Option<f64>,
}

impl ChatTarget<'_> {
    /// The retrieval request for one question
    #[inline]
    pub fn retrieval_request(&self, question: &str) -> RetrievalRequest {
        RetrievalRequest {
            query: question.to_string(),
            mode: self.mode,
            parameter: self.parameter,
        }
    }
}

/// What a turn produced besides the updated state
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    /// Full prompt sent to the model, when one was sent
    pub prompt: Option<String>,
    /// Chunks retrieved for the question
    pub chunks: Vec<RetrievedChunk>,
}

/// Answer `question` and return the conversation extended by the question and reply.
///
/// `state` is left untouched, so on error the caller still holds the previous
/// conversation.
#[inline]
pub async fn chat_turn(
    state: &ConversationState,
    question: &str,
    target: Option<&ChatTarget<'_>>,
    model: &dyn LanguageModel,
) -> Result<(ConversationState, TurnOutcome)> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::InvalidParameter {
            mode: "chat".to_string(),
            parameter: "question".to_string(),
            reason: "question cannot be empty".to_string(),
        });
    }

    let state = state.clone().with_user_message(question);

    let Some(target) = target else {
        debug!("No collection selected, skipping retrieval");
        let outcome = TurnOutcome {
            reply: NO_SELECTION_REPLY.to_string(),
            prompt: None,
            chunks: Vec::new(),
        };
        return Ok((state.with_assistant_message(NO_SELECTION_REPLY), outcome));
    };

    let request = target.retrieval_request(question);
    let config = request.config()?;
    let chunks =
        retrieval::execute(target.backend, &config, &request.query, &target.collection).await?;

    if chunks.is_empty() {
        info!("No chunks retrieved from '{}'", target.collection.name);
        let outcome = TurnOutcome {
            reply: NO_RESULTS_REPLY.to_string(),
            prompt: None,
            chunks,
        };
        return Ok((state.with_assistant_message(NO_RESULTS_REPLY), outcome));
    }

    let prompt = build_prompt(&chunks, question);
    debug!(
        "Prompting with {} chunks ({} chars)",
        chunks.len(),
        prompt.len()
    );
    let reply = model.complete(&prompt)?;

    let outcome = TurnOutcome {
        reply: reply.clone(),
        prompt: Some(prompt),
        chunks,
    };
    Ok((state.with_assistant_message(reply), outcome))
}
