use std::path::PathBuf;

use clap::{Parser, Subcommand};
use easy_rag::Result;
use easy_rag::commands::{
    assign_collection, chat, create_collection, create_database, ingest, list_collections,
    list_databases, list_models, query, remove_source,
};
use easy_rag::config::{Config, run_interactive_config, show_config};
use easy_rag::ingest::Source;

#[derive(Parser)]
#[command(name = "easy-rag")]
#[command(about = "Build vector databases from web pages and chat with them through Ollama")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// List models installed on the Ollama server
    Models,
    /// Create and list databases
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Create, assign and list collections
    Collection {
        #[command(subcommand)]
        command: CollectionCommand,
    },
    /// Load a web page or sitemap into collections
    Ingest {
        /// Database to ingest into
        #[arg(long)]
        db: String,
        /// Target collection; repeat to embed into several collections
        #[arg(long = "collection", required = true)]
        collections: Vec<String>,
        #[command(subcommand)]
        source: SourceCommand,
    },
    /// Delete every chunk ingested from a source URL
    Remove {
        #[arg(long)]
        db: String,
        #[arg(long = "collection", required = true)]
        collections: Vec<String>,
        /// Source URL the chunks came from
        #[arg(long)]
        source: String,
    },
    /// Retrieve the chunks that match a query
    Query {
        #[arg(long)]
        db: String,
        #[arg(long)]
        collection: String,
        /// Retrieval mode: top_k, similarity_threshold or mmr
        #[arg(long, default_value = "mmr")]
        mode: String,
        /// Result count for top_k (1-100) or minimum score for similarity_threshold (0-100)
        #[arg(long)]
        param: Option<f64>,
        /// Question or search text
        query: String,
    },
    /// Chat with a collection through the configured chat model
    Chat {
        #[arg(long)]
        db: Option<String>,
        #[arg(long)]
        collection: Option<String>,
        /// Retrieval mode: top_k, similarity_threshold or mmr
        #[arg(long, default_value = "mmr")]
        mode: String,
        /// Result count for top_k (1-100) or minimum score for similarity_threshold (0-100)
        #[arg(long)]
        param: Option<f64>,
        /// Print the full prompt sent to the model
        #[arg(long)]
        show_prompt: bool,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Create a new database
    Create { name: String },
    /// List all databases
    List,
}

#[derive(Subcommand)]
enum CollectionCommand {
    /// Create a collection bound to an embedding model
    Create {
        #[arg(long)]
        db: String,
        name: String,
        /// Embedding model (defaults to the configured one)
        #[arg(long)]
        model: Option<String>,
    },
    /// Bind an embedding model to an existing collection
    Assign {
        #[arg(long)]
        db: String,
        name: String,
        #[arg(long)]
        model: String,
    },
    /// List the collections of a database
    List {
        #[arg(long)]
        db: String,
    },
}

#[derive(Subcommand)]
enum SourceCommand {
    /// A single web page
    Page { url: String },
    /// Every page listed in a sitemap
    Sitemap { url: String },
}

impl From<SourceCommand> for Source {
    fn from(command: SourceCommand) -> Self {
        match command {
            SourceCommand::Page { url } => Self::Page(url),
            SourceCommand::Sitemap { url } => Self::Sitemap(url),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir().map_err(|e| easy_rag::RagError::Config(e.to_string()))?,
    };

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&config_dir)?;
        } else {
            run_interactive_config(&config_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Models => list_models(&config)?,
        Commands::Db { command } => match command {
            DbCommand::Create { name } => create_database(&config, &name)?,
            DbCommand::List => list_databases(&config)?,
        },
        Commands::Collection { command } => match command {
            CollectionCommand::Create { db, name, model } => {
                create_collection(&config, &db, &name, model)?;
            }
            CollectionCommand::Assign { db, name, model } => {
                assign_collection(&config, &db, &name, &model)?;
            }
            CollectionCommand::List { db } => list_collections(&config, &db).await?,
        },
        Commands::Ingest {
            db,
            collections,
            source,
        } => ingest(&config, &db, &collections, source.into()).await?,
        Commands::Remove {
            db,
            collections,
            source,
        } => remove_source(&config, &db, &collections, &source).await?,
        Commands::Query {
            db,
            collection,
            mode,
            param,
            query: text,
        } => query(&config, &db, &collection, &mode, param, &text).await?,
        Commands::Chat {
            db,
            collection,
            mode,
            param,
            show_prompt,
        } => {
            chat(
                &config,
                db.as_deref(),
                collection.as_deref(),
                &mode,
                param,
                show_prompt,
            )
            .await?;
        }
    }

    Ok(())
}
