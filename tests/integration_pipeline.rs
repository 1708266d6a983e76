#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end flow: database, registry, sitemap ingest, retrieval and a chat turn,
// with the web pages and the Ollama API served by one mock server

use easy_rag::chat::{ChatTarget, ConversationState, OllamaChat, chat_turn};
use easy_rag::config::{LoaderConfig, OllamaConfig};
use easy_rag::database::Database;
use easy_rag::database::lancedb::vector_store::{VectorSearcher, VectorStore};
use easy_rag::document::SOURCE_KEY;
use easy_rag::embeddings::{ChunkingConfig, OllamaClient};
use easy_rag::ingest::{Ingestor, Source};
use easy_rag::loaders::HttpFetcher;
use easy_rag::retrieval::{self, RetrievalConfig, RetrievalMode};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const EMBEDDING_MODEL: &str = "bow-embed";
const CHAT_MODEL: &str = "tiny-chat";

/// Words counted by the bag-of-words embedder, one dimension each
const VOCABULARY: [&str; 4] = ["owner", "borrow", "lifetime", "async"];

const OWNERSHIP_TEXT: &str =
    "Each value in Rust has an owner. There can only be one owner at a time.";
const BORROWING_TEXT: &str =
    "A borrow lets code use a value without taking ownership. Every borrow has a lifetime.";

/// Embeds each input as keyword counts plus a constant dimension
struct BagOfWords;

fn bag_of_words(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| lower.matches(word).count() as f32)
        .collect();
    vector.push(0.1);
    vector
}

impl Respond for BagOfWords {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .map(|input| bag_of_words(input.as_str().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

fn html(title: &str, body: &str) -> String {
    format!("<html><head><title>{title}</title></head><body><h1>{title}</h1><p>{body}</p></body></html>")
}

async fn start_server() -> MockServer {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/ownership"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(html("Ownership", OWNERSHIP_TEXT), "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/borrowing"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(html("Borrowing", BORROWING_TEXT), "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
    <url><loc>{base}/ownership</loc></url>
    <url><loc>{base}/borrowing</loc></url>
</urlset>"#
            ),
            "application/xml",
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(BagOfWords)
        .mount(&server)
        .await;

    server
}

fn ollama_client(server: &MockServer) -> OllamaClient {
    let address = server.address();
    OllamaClient::new(&OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        timeout_seconds: 5,
        chat_model: CHAT_MODEL.to_string(),
        ..OllamaConfig::default()
    })
    .expect("Failed to create Ollama client")
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(&LoaderConfig {
        timeout_seconds: 5,
        ..LoaderConfig::default()
    })
}

fn database_with_collection(root: &TempDir) -> Database {
    let database = Database::create(root.path(), "rustbook").expect("should create database");
    let registry = database
        .load_registry()
        .expect("should load registry")
        .assign("book", EMBEDDING_MODEL)
        .expect("should assign model");
    database
        .save_registry(&registry)
        .expect("should save registry");
    database
}

#[tokio::test]
async fn ingest_query_and_chat() {
    let server = start_server().await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let database = database_with_collection(&temp_dir);
    let store = VectorStore::open(&database)
        .await
        .expect("should open store");
    let client = ollama_client(&server);
    let chunking = ChunkingConfig::default();

    let reports = Ingestor::new(&store, &client, &chunking)
        .ingest(
            &database,
            &["book".to_string()],
            &Source::Sitemap(format!("{}/sitemap.xml", server.uri())),
            &fetcher(),
        )
        .await
        .expect("ingest should succeed");

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].embedding_model, EMBEDDING_MODEL);
    assert_eq!(reports[0].chunks, 2);
    assert_eq!(reports[0].replaced, 0);
    assert_eq!(store.count("book").await.expect("should count"), 2);

    // The database reopens with the same collection and chunks
    let reopened = Database::open(temp_dir.path(), "data_rustbook").expect("should reopen");
    let collection = reopened
        .load_registry()
        .expect("should load registry")
        .collection("book")
        .expect("collection should be registered");
    assert_eq!(collection.embedding_model, EMBEDDING_MODEL);

    let searcher = VectorSearcher::new(&store, &client);
    let chunks = retrieval::execute(
        &searcher,
        &RetrievalConfig::TopK { k: 1 },
        "Who is the owner of a value?",
        &collection,
    )
    .await
    .expect("query should succeed");

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].content.contains(OWNERSHIP_TEXT));
    assert_eq!(
        chunks[0].metadata.get(SOURCE_KEY).map(ToString::to_string),
        Some(format!("{}/ownership", server.uri()))
    );

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains(CHAT_MODEL))
        .and(body_string_contains(OWNERSHIP_TEXT))
        .and(body_string_contains("Answer the question based on the above context"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": CHAT_MODEL,
            "message": { "role": "assistant", "content": "Every value has one owner." },
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let model = OllamaChat::new(&client, CHAT_MODEL);
    let target = ChatTarget {
        backend: &searcher,
        collection,
        mode: RetrievalMode::TopK,
        parameter: Some(1.0),
    };
    let (state, outcome) = chat_turn(
        &ConversationState::new(),
        "Who is the owner of a value?",
        Some(&target),
        &model,
    )
    .await
    .expect("chat turn should succeed");

    assert_eq!(outcome.reply, "Every value has one owner.");
    assert_eq!(outcome.chunks.len(), 1);
    assert_eq!(state.len(), 2);
}

#[tokio::test]
async fn reingest_replaces_chunks() {
    let server = start_server().await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let database = database_with_collection(&temp_dir);
    let store = VectorStore::open(&database)
        .await
        .expect("should open store");
    let client = ollama_client(&server);
    let chunking = ChunkingConfig::default();
    let ingestor = Ingestor::new(&store, &client, &chunking);
    let page = Source::Page(format!("{}/borrowing", server.uri()));

    ingestor
        .ingest(&database, &["book".to_string()], &page, &fetcher())
        .await
        .expect("first ingest should succeed");
    let reports = ingestor
        .ingest(&database, &["book".to_string()], &page, &fetcher())
        .await
        .expect("second ingest should succeed");

    assert_eq!(reports[0].replaced, 1);
    assert_eq!(store.count("book").await.expect("should count"), 1);

    let removed = store
        .delete_by_source("book", &format!("{}/borrowing", server.uri()))
        .await
        .expect("should delete");
    assert_eq!(removed, 1);
    assert_eq!(store.count("book").await.expect("should count"), 0);
}

#[tokio::test]
async fn threshold_query_filters_unrelated_chunks() {
    let server = start_server().await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let database = database_with_collection(&temp_dir);
    let store = VectorStore::open(&database)
        .await
        .expect("should open store");
    let client = ollama_client(&server);
    let chunking = ChunkingConfig::default();

    Ingestor::new(&store, &client, &chunking)
        .ingest(
            &database,
            &["book".to_string()],
            &Source::Sitemap(format!("{}/sitemap.xml", server.uri())),
            &fetcher(),
        )
        .await
        .expect("ingest should succeed");

    let collection = database
        .load_registry()
        .expect("should load registry")
        .collection("book")
        .expect("collection should be registered");
    let config = retrieval::build_config("similarity_threshold", Some(0.5))
        .expect("config should be valid");

    let chunks = retrieval::execute(
        &VectorSearcher::new(&store, &client),
        &config,
        "borrow lifetime",
        &collection,
    )
    .await
    .expect("query should succeed");

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].content.contains(BORROWING_TEXT));
}
