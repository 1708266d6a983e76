
use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OllamaConfig;
use crate::{RagError, Result};

/// Embedding models offered when creating a collection
pub const SUGGESTED_EMBEDDING_MODELS: [&str; 5] = [
    "mxbai-embed-large",
    "all-minilm",
    "nomic-embed-text",
    "granite-embedding",
    "paraphrase-multilingual",
];

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    batch_size: u32,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub details: Option<ModelDetails>,
}

/// The parts of Ollama's model details shown by `easy-rag models`
#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

/// Whether an installed model tag satisfies a requested model name (`llama3.1` matches `llama3.1:latest`)
#[inline]
pub fn model_matches(installed: &str, requested: &str) -> bool {
    installed == requested
        || (!requested.contains(':') && installed.strip_suffix(":latest") == Some(requested))
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .map_err(|e| RagError::Config(format!("Failed to generate Ollama URL: {}", e)))?;

        Ok(Self {
            base_url,
            batch_size: config.batch_size.max(1),
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Test connection to the Ollama server and verify `model` is installed
    #[inline]
    pub fn health_check(&self, model: &str) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping()?;
        self.validate_model(model)?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        debug!("Pinging Ollama server at {}", self.base_url);
        self.get("/api/tags")
            .context("Failed to ping Ollama server")
            .map_err(|e| RagError::embedding(format!("{:#}", e)))?;
        debug!("Server ping successful");
        Ok(())
    }

    /// Validate that `model` is installed on the server
    #[inline]
    pub fn validate_model(&self, model: &str) -> Result<()> {
        let names = self.model_names()?;

        if names.iter().any(|name| model_matches(name, model)) {
            debug!("Model {} is available", model);
            Ok(())
        } else {
            warn!("Model {} not found. Available models: {:?}", model, names);
            Err(RagError::embedding(format!(
                "Model '{}' is not available. Available models: {:?}",
                model, names
            )))
        }
    }

    /// List all locally installed models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response_text = self
            .get("/api/tags")
            .context("Failed to fetch models")
            .map_err(|e| RagError::embedding(format!("{:#}", e)))?;

        let models_response: ModelsResponse = serde_json::from_str(&response_text)
            .map_err(|e| RagError::embedding(format!("Failed to parse models response: {}", e)))?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Names of the locally installed models, in server order
    #[inline]
    pub fn model_names(&self) -> Result<Vec<String>> {
        Ok(self
            .list_models()?
            .into_iter()
            .map(|model| model.name)
            .collect())
    }

    /// Generate an embedding for a single text
    #[inline]
    pub fn generate_embedding(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.generate_embeddings(model, &[text.to_string()])?;
        embeddings
            .pop()
            .ok_or_else(|| RagError::embedding("Ollama returned no embedding"))
    }

    /// Generate embeddings for multiple texts, `batch_size` texts per request
    #[inline]
    pub fn generate_embeddings(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Generating embeddings for {} texts with model {}",
            texts.len(),
            model
        );

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let embeddings = self.embed_batch(model, batch).map_err(|e| {
                RagError::embedding(format!(
                    "Failed to embed batch of {} texts with model '{}': {:#}",
                    batch.len(),
                    model,
                    e
                ))
            })?;
            results.extend(embeddings);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn embed_batch(&self, model: &str, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model,
            input: texts,
        };
        let response_text = self.post_json("/api/embed", &request)?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            bail!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            );
        }

        Ok(response.embeddings)
    }

    /// Send a single-turn, non-streaming chat request and return the reply text
    #[inline]
    pub fn chat(&self, model: &str, prompt: &str) -> Result<String> {
        debug!(
            "Sending chat request to model {} (prompt length: {})",
            model,
            prompt.len()
        );

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
        };

        let response_text = self
            .post_json("/api/chat", &request)
            .map_err(|e| RagError::language_model(format!("Model '{}': {:#}", model, e)))?;

        let response: ChatResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::language_model(format!("Failed to parse chat response: {}", e))
        })?;

        debug!("Received reply of {} chars", response.message.content.len());
        Ok(response.message.content)
    }

    fn get(&self, path: &str) -> anyhow::Result<String> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))?;
        debug!("GET {}", url);
        read_response(self.agent.get(url.as_str()).call(), &url)
    }

    fn post_json<T: Serialize>(&self, path: &str, body: &T) -> anyhow::Result<String> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))?;
        let request_json = serde_json::to_string(body).context("Failed to serialize request")?;
        debug!("POST {}", url);
        read_response(
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json),
            &url,
        )
    }
}

/// Turn a ureq result into the response body, surfacing Ollama's `{"error": ...}` payloads
fn read_response(
    result: std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    url: &Url,
) -> anyhow::Result<String> {
    let mut response = result.map_err(|e| anyhow!("Request to {} failed: {}", url, e))?;
    let status = response.status();
    let body = response
        .body_mut()
        .read_to_string()
        .with_context(|| format!("Failed to read response body from {}", url))?;

    if status.is_success() {
        return Ok(body);
    }

    let detail = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    warn!("Ollama returned HTTP {} for {}: {}", status.as_u16(), url, detail);
    bail!("HTTP {}: {}", status.as_u16(), detail)
}
