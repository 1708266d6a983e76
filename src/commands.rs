use anyhow::{Context, Result};
use dialoguer::{Input, Select};
use tracing::{debug, info};

use crate::chat::{ChatTarget, ConversationState, OllamaChat, chat_turn};
use crate::config::Config;
use crate::database::lancedb::vector_store::{VectorSearcher, VectorStore};
use crate::database::{self, Database};
use crate::embeddings::OllamaClient;
use crate::embeddings::ollama::{SUGGESTED_EMBEDDING_MODELS, model_matches};
use crate::ingest::{Ingestor, Source, resolve_targets};
use crate::loaders::{HttpFetcher, validate_url};
use crate::retrieval::{self, RetrievalConfig, RetrievalMode, RetrievedChunk};

/// Words that end an interactive chat session
const EXIT_WORDS: [&str; 3] = ["/exit", "/quit", "/bye"];

/// Longest excerpt printed per chunk by `query`
const PREVIEW_CHARS: usize = 300;

fn open_database(config: &Config, name: &str) -> Result<Database> {
    Database::open(&config.databases_dir(), name)
        .with_context(|| format!("Failed to open database '{}'", name))
}

fn ollama_client(config: &Config) -> Result<OllamaClient> {
    OllamaClient::new(&config.ollama).context("Failed to create Ollama client")
}

/// Create a new, empty database
#[inline]
pub fn create_database(config: &Config, name: &str) -> Result<()> {
    let database = Database::create(&config.databases_dir(), name)?;
    println!("✓ Created database '{}'", database.name());
    println!("  Location: {}", database.path().display());
    Ok(())
}

/// List all databases with their collection counts
#[inline]
pub fn list_databases(config: &Config) -> Result<()> {
    let root = config.databases_dir();
    let databases = database::list_databases(&root)?;

    if databases.is_empty() {
        println!("No databases found in {}.", root.display());
        println!("Use 'easy-rag db create <name>' to create one.");
        return Ok(());
    }

    println!("Databases ({} total):", databases.len());
    for database in &databases {
        match database.load_registry() {
            Ok(registry) => println!(
                "  📁 {} ({} collections)",
                database.name(),
                registry.len()
            ),
            Err(e) => println!("  📁 {} (⚠️  {})", database.name(), e),
        }
    }
    Ok(())
}

/// Register a new collection, using the configured default model when none is given
#[inline]
pub fn create_collection(
    config: &Config,
    database: &str,
    collection: &str,
    model: Option<String>,
) -> Result<()> {
    let database = open_database(config, database)?;
    let model = match model {
        Some(model) => model,
        None => pick_embedding_model(config)?,
    };

    let registry = database.load_registry()?;
    if registry.resolve(collection).ok() == Some(model.as_str()) {
        println!(
            "Collection '{}' already exists with model '{}'",
            collection, model
        );
        return Ok(());
    }

    let updated = registry.assign(collection, &model)?;
    database.save_registry(&updated)?;
    info!(
        "Created collection '{}' in '{}' with model {}",
        collection,
        database.name(),
        model
    );
    println!(
        "✓ Created collection '{}' in database '{}'",
        collection,
        database.name()
    );
    println!("  Embedding model: {}", model);
    Ok(())
}

/// Ask for an embedding model when attached to a terminal, else use the configured default
fn pick_embedding_model(config: &Config) -> Result<String> {
    let default = config.ollama.embedding_model.clone();
    if !console::user_attended() {
        return Ok(default);
    }

    let mut choices: Vec<String> = SUGGESTED_EMBEDDING_MODELS
        .iter()
        .map(ToString::to_string)
        .collect();
    if !choices.contains(&default) {
        choices.insert(0, default.clone());
    }
    let default_index = choices.iter().position(|m| *m == default).unwrap_or(0);

    let index = Select::new()
        .with_prompt("Embedding model")
        .default(default_index)
        .items(&choices)
        .interact()?;
    Ok(choices.swap_remove(index))
}

/// Bind an embedding model to a collection; fails if a different model is already bound
#[inline]
pub fn assign_collection(
    config: &Config,
    database: &str,
    collection: &str,
    model: &str,
) -> Result<()> {
    let database = open_database(config, database)?;
    let updated = database.load_registry()?.assign(collection, model)?;
    database.save_registry(&updated)?;
    println!("✓ Collection '{}' uses model '{}'", collection, model);
    Ok(())
}

/// List the collections of a database, including stored tables with no model assigned
#[inline]
pub async fn list_collections(config: &Config, database: &str) -> Result<()> {
    let database = open_database(config, database)?;
    let registry = database.load_registry()?;
    let store = VectorStore::open(&database).await?;

    let mut names: Vec<String> = registry.iter().map(|(name, _)| name.to_string()).collect();
    for stored in store.list_collections().await? {
        if !registry.contains(&stored) {
            names.push(stored);
        }
    }
    names.sort();

    if names.is_empty() {
        println!("Database '{}' has no collections.", database.name());
        println!(
            "Use 'easy-rag collection create --db {} <name>' to create one.",
            database.name()
        );
        return Ok(());
    }

    println!(
        "Collections in '{}' ({} total):",
        database.name(),
        names.len()
    );
    for name in &names {
        let chunks = store.count(name).await?;
        match registry.resolve(name) {
            Ok(model) => println!("  📚 {} [{}] {} chunks", name, model, chunks),
            Err(_) => println!(
                "  📚 {} [no model assigned] {} chunks (use 'collection assign')",
                name, chunks
            ),
        }
    }
    Ok(())
}

/// Load a page or sitemap into one or more collections
#[inline]
pub async fn ingest(
    config: &Config,
    database: &str,
    collections: &[String],
    source: Source,
) -> Result<()> {
    let database = open_database(config, database)?;
    let client = ollama_client(config)?;
    for target in resolve_targets(&database, collections)? {
        client
            .health_check(&target.embedding_model)
            .with_context(|| format!("Collection '{}' cannot be embedded", target.name))?;
    }

    let store = VectorStore::open(&database).await?;
    let fetcher = HttpFetcher::new(&config.loader);

    let ingestor = Ingestor::new(&store, &client, &config.chunking);
    let reports = ingestor
        .ingest(&database, collections, &source, &fetcher)
        .await
        .with_context(|| format!("Failed to ingest {}", source))?;

    println!("✓ Ingested {}", source);
    for report in &reports {
        println!(
            "  {}: {} chunks embedded with {}",
            report.collection, report.chunks, report.embedding_model
        );
        if report.replaced > 0 {
            println!("    replaced {} previously stored chunks", report.replaced);
        }
    }
    Ok(())
}

/// Delete every chunk that came from `source`
#[inline]
pub async fn remove_source(
    config: &Config,
    database: &str,
    collections: &[String],
    source: &str,
) -> Result<()> {
    let database = open_database(config, database)?;
    let store = VectorStore::open(&database).await?;
    let source = validate_url(source).map_or_else(|_| source.to_string(), String::from);

    for collection in collections {
        if !store.has_collection(collection).await? {
            println!("Collection '{}' has no stored chunks", collection);
            continue;
        }
        let removed = store.delete_by_source(collection, &source).await?;
        println!(
            "✓ Removed {} chunks from '{}' for {}",
            removed, collection, source
        );
    }
    Ok(())
}

/// Run a retrieval and print the chunks it returns
#[inline]
pub async fn query(
    config: &Config,
    database: &str,
    collection: &str,
    mode: &str,
    parameter: Option<f64>,
    query: &str,
) -> Result<()> {
    let retrieval_config = retrieval::build_config(mode, parameter)?;
    let database = open_database(config, database)?;
    let collection = database.load_registry()?.collection(collection)?;

    let store = VectorStore::open(&database).await?;
    let client = ollama_client(config)?;
    client.health_check(&collection.embedding_model)?;
    let searcher = VectorSearcher::new(&store, &client);

    let chunks = retrieval::execute(&searcher, &retrieval_config, query, &collection).await?;

    if chunks.is_empty() {
        println!("No matching chunks in '{}'.", collection.name);
        return Ok(());
    }

    println!(
        "{} chunks from '{}' ({}):",
        chunks.len(),
        collection.name,
        retrieval_config.mode()
    );
    for (rank, chunk) in chunks.iter().enumerate() {
        print_chunk(rank + 1, chunk);
    }
    Ok(())
}

fn print_chunk(rank: usize, chunk: &RetrievedChunk) {
    let score = chunk
        .score
        .map_or_else(String::new, |score| format!(" score {:.4}", score));
    let source = chunk
        .metadata
        .get(crate::document::SOURCE_KEY)
        .map_or_else(|| "unknown source".to_string(), ToString::to_string);

    println!();
    println!("#{}{} · {}", rank, score, source);
    let preview: String = chunk.content.chars().take(PREVIEW_CHARS).collect();
    let ellipsis = if chunk.content.chars().count() > PREVIEW_CHARS {
        "…"
    } else {
        ""
    };
    println!("{}{}", preview.trim(), ellipsis);
}

/// Interactive chat over a collection. Without a database and collection every
/// question gets the "please select" reply.
#[inline]
pub async fn chat(
    config: &Config,
    database: Option<&str>,
    collection: Option<&str>,
    mode: &str,
    parameter: Option<f64>,
    show_prompt: bool,
) -> Result<()> {
    let mode: RetrievalMode = mode.parse()?;
    let retrieval_config = RetrievalConfig::for_mode(mode, parameter)?;
    let client = ollama_client(config)?;
    client.health_check(&config.ollama.chat_model)?;
    let model = OllamaChat::new(&client, config.ollama.chat_model.clone());

    let selection = match (database, collection) {
        (Some(database), Some(collection)) => {
            let database = open_database(config, database)?;
            let collection = database.load_registry()?.collection(collection)?;
            client.health_check(&collection.embedding_model)?;
            let store = VectorStore::open(&database).await?;
            Some((collection, store))
        }
        _ => None,
    };
    let searcher = selection
        .as_ref()
        .map(|(_, store)| VectorSearcher::new(store, &client));
    let target = selection
        .as_ref()
        .zip(searcher.as_ref())
        .map(|((collection, _), searcher)| ChatTarget {
            backend: searcher,
            collection: collection.clone(),
            mode,
            parameter,
        });

    match &target {
        Some(target) => println!(
            "💬 Chatting with '{}' using {} ({} retrieval). Type /exit to leave.",
            target.collection.name,
            config.ollama.chat_model,
            retrieval_config.mode()
        ),
        None => println!("💬 No collection selected. Type /exit to leave."),
    }

    let mut state = ConversationState::new();
    loop {
        let question: String = Input::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()?;
        let question = question.trim();

        if question.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&question) {
            break;
        }

        match chat_turn(&state, question, target.as_ref(), &model).await {
            Ok((next, outcome)) => {
                state = next;
                if show_prompt {
                    if let Some(prompt) = &outcome.prompt {
                        println!("----- prompt -----\n{}\n------------------", prompt);
                    }
                }
                println!("🤖 {}", outcome.reply);
            }
            Err(e) if e.is_recoverable() => println!("⚠️  {}", e),
            Err(e) => return Err(e.into()),
        }
    }

    debug!("Chat ended after {} messages", state.len());
    Ok(())
}

/// List models installed on the Ollama server
#[inline]
pub fn list_models(config: &Config) -> Result<()> {
    let client = ollama_client(config)?;
    let models = client
        .list_models()
        .with_context(|| format!("Failed to list models from {}", client.base_url()))?;

    if models.is_empty() {
        println!("No models installed on {}.", client.base_url());
        println!(
            "Pull an embedding model with e.g. 'ollama pull {}'.",
            config.ollama.embedding_model
        );
        return Ok(());
    }

    println!("Installed models on {}:", client.base_url());
    for model in &models {
        let size = model
            .size
            .map_or_else(String::new, |bytes| format!(" {:.1} GB", bytes as f64 / 1e9));
        let mut tags = Vec::new();
        if SUGGESTED_EMBEDDING_MODELS
            .iter()
            .any(|known| model_matches(&model.name, known))
        {
            tags.push("embedding");
        }
        if model_matches(&model.name, &config.ollama.chat_model) {
            tags.push("chat");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        let details = model.details.as_ref().map_or_else(String::new, |details| {
            let parts: Vec<&str> = [
                details.family.as_deref(),
                details.parameter_size.as_deref(),
                details.quantization_level.as_deref(),
            ]
            .into_iter()
            .flatten()
            .collect();
            if parts.is_empty() {
                String::new()
            } else {
                format!(" ({})", parts.join(", "))
            }
        });
        println!("  {}{}{}{}", model.name, size, details, tags);
    }
    Ok(())
}
