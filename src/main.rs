//! # ragbase CLI (`rag`)
//!
//! Thin command dispatcher over the `ragbase` library.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Enable pgvector, create the table, trigger, and ANN index |
//! | `rag ingest <file>` | Load, chunk, embed, and store a document |
//! | `rag query "<text>"` | Ranked similarity search |
//! | `rag ask "<text>"` | Search plus answer synthesis |
//! | `rag delete <source>` | Remove all records for a source |
//! | `rag reindex` | Drop and recreate the ANN index |
//!
//! ## Examples
//!
//! ```bash
//! rag init --config ./rag.toml
//! rag ingest docs/handbook.pdf
//! rag query "vacation policy" --top-k 5
//! rag ask "how many vacation days do new hires get?"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragbase::config::{self, Config};
use ragbase::embedding::{Embedder, OllamaEmbedder};
use ragbase::generation::OllamaGenerator;
use ragbase::store::{PgVectorStore, VectorStore};
use ragbase::{answer, db, ingest, loader, retrieval};

/// ragbase — document ingestion and similarity retrieval over
/// Postgres/pgvector.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "Ingest documents into a pgvector store and answer similarity queries against it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file falls back to
    /// built-in defaults (local Postgres, local Ollama).
    #[arg(long, global = true, default_value = "./rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the store.
    ///
    /// Enables the pgvector extension and creates the embeddings table,
    /// the updated_at trigger, and the ANN index. Idempotent.
    Init,

    /// Ingest a document file.
    ///
    /// Extracts text (pdf, docx, doc, pptx, txt), splits it into
    /// overlapping chunks, embeds each chunk, and stores the vectors.
    /// A file whose bytes were already ingested is skipped.
    Ingest {
        /// Path to the document.
        file: PathBuf,

        /// Override the configured chunk size (characters).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override the configured overlap (characters).
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Search for chunks similar to a query.
    Query {
        /// The query text.
        text: String,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Maximum distance a result may have (lower distance = more
        /// similar).
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Answer a question from retrieved context.
    Ask {
        /// The question text.
        text: String,

        /// Maximum number of context chunks.
        #[arg(long)]
        top_k: Option<usize>,

        /// Maximum distance a context chunk may have.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Delete all records ingested from a source.
    Delete {
        /// Source identifier, as shown in query results (typically the
        /// ingested file path).
        source: String,
    },

    /// Drop and recreate the ANN index with the configured parameters.
    ///
    /// Approximate-index recall degrades as the table grows past the
    /// parameters chosen at creation time; rebuilding is an explicit
    /// operator action, never automatic.
    Reindex,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest {
            file,
            chunk_size,
            overlap,
        } => run_ingest(&config, &file, chunk_size, overlap).await,
        Commands::Query {
            text,
            top_k,
            threshold,
        } => run_query(&config, &text, top_k, threshold).await,
        Commands::Ask {
            text,
            top_k,
            threshold,
        } => run_ask(&config, &text, top_k, threshold).await,
        Commands::Delete { source } => run_delete(&config, &source).await,
        Commands::Reindex => run_reindex(&config).await,
    }
}

async fn open_store(config: &Config) -> Result<PgVectorStore> {
    let pool = db::connect(config).await?;
    Ok(PgVectorStore::new(pool, config)?)
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    db::enable_vector_extension(&pool).await?;
    let store = PgVectorStore::new(pool, config)?;
    store.create_table().await?;
    store.create_index().await?;
    println!("init {}", config.store.table);
    println!("  dimensions: {}", config.store.dimensions);
    println!("  metric: {:?}", config.store.metric);
    println!("  index: {:?}", config.index.kind);
    println!("ok");
    Ok(())
}

async fn run_ingest(
    config: &Config,
    file: &std::path::Path,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<()> {
    let raw_bytes = std::fs::read(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let text = loader::extract(&extension, &raw_bytes)?;

    let mut options = ingest::IngestOptions::from_config(config);
    if let Some(size) = chunk_size {
        options.chunk_size_chars = size;
    }
    if let Some(overlap) = overlap {
        options.overlap_chars = overlap;
    }
    if options.overlap_chars >= options.chunk_size_chars {
        bail!(
            "overlap ({}) must be smaller than chunk size ({})",
            options.overlap_chars,
            options.chunk_size_chars
        );
    }

    let store: Arc<dyn VectorStore> = Arc::new(open_store(config).await?);
    let embedder: Arc<dyn Embedder> =
        Arc::new(OllamaEmbedder::new(&config.embedding, config.store.dimensions)?);

    let source = file.display().to_string();
    let report = ingest::ingest(store, embedder, &raw_bytes, &text, &source, &options).await;

    println!("ingest {source}");
    if report.skipped {
        println!("  skipped: already ingested");
    } else {
        println!("  chunks total: {}", report.chunks_total);
        println!("  chunks processed: {}", report.chunks_processed);
        if !report.errors.is_empty() {
            println!("  chunks failed: {}", report.errors.len());
            for failure in &report.errors {
                eprintln!("  chunk {}: {}", failure.chunk_index, failure.error);
            }
        }
    }
    println!("  duration: {:.2}s", report.duration_ms as f64 / 1000.0);

    if !report.success {
        bail!("{}", report.message);
    }
    println!("ok");
    Ok(())
}

async fn run_query(
    config: &Config,
    text: &str,
    top_k: Option<usize>,
    threshold: Option<f64>,
) -> Result<()> {
    let store = open_store(config).await?;
    let embedder = OllamaEmbedder::new(&config.embedding, config.store.dimensions)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let threshold = threshold.or(config.retrieval.similarity_threshold);

    let hits = retrieval::retrieve(&store, &embedder, text, top_k, threshold).await?;

    println!("query {text:?}");
    if hits.is_empty() {
        println!("  no results");
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "  {}. [{:.4}] {} {}",
            rank + 1,
            hit.distance,
            hit.metadata.source,
            preview(&hit.content)
        );
    }
    println!("ok");
    Ok(())
}

async fn run_ask(
    config: &Config,
    text: &str,
    top_k: Option<usize>,
    threshold: Option<f64>,
) -> Result<()> {
    let store = open_store(config).await?;
    let embedder = OllamaEmbedder::new(&config.embedding, config.store.dimensions)?;
    let generator = OllamaGenerator::new(&config.generation)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let threshold = threshold.or(config.retrieval.similarity_threshold);

    let result = answer::ask(&store, &embedder, &generator, text, top_k, threshold).await?;

    println!("ask {text:?}");
    println!();
    println!("{}", result.answer);
    if !result.context.is_empty() {
        println!();
        println!("context:");
        for (rank, hit) in result.context.iter().enumerate() {
            println!("  {}. [{:.4}] {}", rank + 1, hit.distance, hit.metadata.source);
        }
    }
    Ok(())
}

async fn run_delete(config: &Config, source: &str) -> Result<()> {
    let store = open_store(config).await?;
    let removed = store.delete_by_source(source).await?;
    println!("delete {source}");
    println!("  removed: {removed}");
    println!("ok");
    Ok(())
}

async fn run_reindex(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    store.rebuild_index().await?;
    println!("reindex {}", config.store.table);
    println!("  index: {:?}", config.index.kind);
    println!("ok");
    Ok(())
}

fn preview(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(80).collect();
    if truncated.chars().count() < collapsed.chars().count() {
        format!("{truncated}…")
    } else {
        truncated
    }
}
