//! # medkb CLI
//!
//! The `medkb` binary is the operator interface to the knowledge engine.
//! It provides commands for database initialization, document ingestion,
//! retrieval queries, embedding-endpoint administration, and statistics.
//!
//! ## Usage
//!
//! ```bash
//! medkb --config ./config/medkb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `medkb init` | Create the SQLite database and run schema migrations |
//! | `medkb ingest <file>` | Chunk, dedup, embed, and store a document |
//! | `medkb retire <title>` | Soft-delete a document's chunks |
//! | `medkb get <id>` | Resolve a chunk citation to its provenance |
//! | `medkb search "<query>"` | Raw cosine similarity search |
//! | `medkb select "<symptoms>"` | Hybrid keyword + vector source selection |
//! | `medkb config <action>` | Manage embedding endpoint configurations |
//! | `medkb stats` | Corpus statistics |

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use medkb::config;
use medkb::config_cmd;
use medkb::db;
use medkb::get;
use medkb::ingest;
use medkb::migrate;
use medkb::models::{ProviderKind, SourceType};
use medkb::search;
use medkb::select;
use medkb::stats;

/// medkb — a hybrid retrieval engine for medical guideline documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/medkb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "medkb",
    about = "medkb — a hybrid keyword + vector retrieval engine for medical guidelines",
    version,
    long_about = "medkb ingests guideline documents into deduplicated, embedded chunks and \
    answers retrieval queries by fusing keyword category matching with cosine similarity, \
    returning ranked and citable knowledge sources."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/medkb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest a guideline document.
    ///
    /// Extracts sections, chunks them, skips duplicates, embeds the rest
    /// with the active embedding configuration, and stores everything as
    /// one atomic unit.
    Ingest {
        /// Path to the document (markdown or plain text).
        file: PathBuf,

        /// Document title stored with every chunk.
        #[arg(long)]
        title: String,

        /// Disease category the document belongs to (e.g. `respiratory`).
        #[arg(long)]
        category: String,

        /// Optional id of the disease catalog entry this document covers.
        #[arg(long)]
        disease_id: Option<String>,

        /// Source kind: guideline, medical_document, or research_paper.
        #[arg(long, default_value = "guideline")]
        source_type: String,
    },

    /// Soft-delete a document's chunks.
    ///
    /// Chunks are never hard-deleted; this flips them inactive so they
    /// stop matching queries and stop guarding their content hash.
    Retire {
        /// Document title whose chunks should be deactivated.
        title: String,

        /// Restrict to one category.
        #[arg(long)]
        category: Option<String>,
    },

    /// Retrieve a chunk by its id.
    ///
    /// Resolves a citation back to its document, section, and text.
    Get {
        /// Chunk id.
        id: String,
    },

    /// Raw cosine similarity search over stored chunks.
    Search {
        /// The query text.
        query: String,

        /// Filter to one disease category.
        #[arg(long)]
        category: Option<String>,

        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Minimum cosine similarity for a hit.
        #[arg(long, default_value_t = 0.6)]
        min_similarity: f32,
    },

    /// Hybrid knowledge source selection for a symptom description.
    ///
    /// Fuses keyword category matching with per-category vector search and
    /// prints ranked sources with their chunks and selection reasoning.
    Select {
        /// Symptom description (Chinese or English).
        symptoms: String,

        /// Patient age in years; boosts pediatric categories when young.
        #[arg(long)]
        age: Option<u32>,

        /// Patient gender (recorded in the audit log).
        #[arg(long)]
        gender: Option<String>,

        /// Maximum number of knowledge sources.
        #[arg(long, default_value_t = 3)]
        top_k: usize,

        /// Skip vector search and rank by keywords alone.
        #[arg(long)]
        no_vector: bool,
    },

    /// Manage embedding endpoint configurations.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Corpus statistics: chunk counts, embedding coverage, categories.
    Stats,
}

/// Embedding configuration subcommands.
#[derive(Subcommand)]
enum ConfigAction {
    /// Register a new embedding endpoint (starts inactive and untested).
    Add {
        /// Display name for the configuration.
        #[arg(long)]
        name: String,

        /// Wire protocol family: openai, qwen, or other.
        #[arg(long, default_value = "openai")]
        provider: String,

        /// Model identifier sent with every request.
        #[arg(long)]
        model_id: String,

        /// Endpoint base URL (the `/embeddings` route is appended).
        #[arg(long)]
        api_url: String,

        /// Bearer token for the endpoint.
        #[arg(long)]
        api_key: String,

        /// Expected embedding dimension.
        #[arg(long, default_value_t = 1536)]
        vector_dimension: usize,

        /// Maximum input length accepted by the model.
        #[arg(long, default_value_t = 8192)]
        max_input_length: usize,
    },

    /// List all configurations with their status.
    List,

    /// Probe a configuration and persist the outcome.
    Test {
        /// Configuration id.
        id: String,
    },

    /// Make a configuration the active default (transactional).
    SetDefault {
        /// Configuration id.
        id: String,
    },

    /// Activate a configuration.
    Activate {
        /// Configuration id.
        id: String,
    },

    /// Deactivate a configuration.
    Deactivate {
        /// Configuration id.
        id: String,
    },

    /// Delete a configuration.
    Remove {
        /// Configuration id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            title,
            category,
            disease_id,
            source_type,
        } => {
            let source_type = match SourceType::parse(&source_type) {
                Some(st) => st,
                None => bail!(
                    "unknown source type '{}'. Use guideline, medical_document, or research_paper.",
                    source_type
                ),
            };
            ingest::run_ingest(
                &cfg,
                &file,
                &title,
                &category,
                disease_id.as_deref(),
                source_type,
            )
            .await?;
        }
        Commands::Retire { title, category } => {
            ingest::run_retire(&cfg, &title, category.as_deref()).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Search {
            query,
            category,
            top_k,
            min_similarity,
        } => {
            search::run_search(&cfg, &query, category.as_deref(), top_k, min_similarity).await?;
        }
        Commands::Select {
            symptoms,
            age,
            gender,
            top_k,
            no_vector,
        } => {
            select::run_select(&cfg, &symptoms, age, gender.as_deref(), top_k, !no_vector).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Add {
                name,
                provider,
                model_id,
                api_url,
                api_key,
                vector_dimension,
                max_input_length,
            } => {
                let provider = match ProviderKind::parse(&provider) {
                    Some(p) => p,
                    None => bail!(
                        "unknown provider '{}'. Use openai, qwen, or other.",
                        provider
                    ),
                };
                config_cmd::run_config_add(
                    &cfg,
                    &name,
                    provider,
                    &model_id,
                    &api_url,
                    &api_key,
                    vector_dimension,
                    max_input_length,
                )
                .await?;
            }
            ConfigAction::List => {
                config_cmd::run_config_list(&cfg).await?;
            }
            ConfigAction::Test { id } => {
                config_cmd::run_config_test(&cfg, &id).await?;
            }
            ConfigAction::SetDefault { id } => {
                config_cmd::run_config_set_default(&cfg, &id).await?;
            }
            ConfigAction::Activate { id } => {
                config_cmd::run_config_set_active(&cfg, &id, true).await?;
            }
            ConfigAction::Deactivate { id } => {
                config_cmd::run_config_set_active(&cfg, &id, false).await?;
            }
            ConfigAction::Remove { id } => {
                config_cmd::run_config_remove(&cfg, &id).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
