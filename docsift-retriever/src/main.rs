use clap::{Parser, Subcommand};
use docsift_embed::{EmbeddingProvider, ProviderKind, create_provider};
use docsift_retriever::{
    config::EngineConfig,
    retrieval::{
        bulk::{BulkMutationCoordinator, parse_export},
        collaborators::discover_sources,
        indexing_engine::{IndexStatus, IndexingEngine},
        search::SearchService,
    },
    storage::{ChunkStore, sqlite_store::SqliteStore},
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Index documents and query them with semantic and hybrid search.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database file
    #[arg(long, default_value = ".docsift.db")]
    db: PathBuf,

    /// TOML configuration file; `--db` still overrides its database_path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Embedding provider override (fast_embed or hash)
    #[arg(long)]
    provider: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the index database
    Init,
    /// Index files and directories
    Index {
        /// Files or directories; directories are walked honoring .gitignore
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Re-embed even when content is unchanged
        #[arg(long)]
        force: bool,
        /// Extra metadata stamped on every chunk (key=value)
        #[arg(short, long, value_parser = parse_key_value)]
        metadata: Vec<(String, Value)>,
    },
    /// Search indexed chunks
    Search {
        query: String,
        /// Combine vector distance with full-text matches
        #[arg(long)]
        hybrid: bool,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(short, long, value_parser = parse_key_value)]
        filter: Vec<(String, Value)>,
        #[arg(long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show which documents a filter selects
    Preview {
        #[arg(short, long, value_parser = parse_key_value)]
        filter: Vec<(String, Value)>,
    },
    /// Write matching chunks to a JSON file
    Export {
        #[arg(short, long, value_parser = parse_key_value)]
        filter: Vec<(String, Value)>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Delete matching chunks; at least one filter is required
    Delete {
        #[arg(short, long, value_parser = parse_key_value)]
        filter: Vec<(String, Value)>,
    },
    /// Re-insert chunks from an export file, skipping existing rows
    Restore { file: PathBuf },
    /// Show index statistics
    Stats,
    /// List indexed documents
    Documents {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

/// Parse `key=value`; the value is read as JSON when it parses as a scalar.
fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = match serde_json::from_str::<Value>(value) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::from(value),
    };
    Ok((key.trim().to_string(), value))
}

fn to_map(pairs: Vec<(String, Value)>) -> Map<String, Value> {
    pairs.into_iter().collect()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    if args.config.is_none() || config.database_path.is_none() {
        config.database_path = Some(args.db.clone());
    }
    if let Some(provider) = &args.provider {
        config.embedding.provider = match provider.as_str() {
            "fast_embed" | "fastembed" => ProviderKind::FastEmbed,
            "hash" => ProviderKind::Hash,
            other => anyhow::bail!("Unknown embedding provider: {other}"),
        };
    }
    config.validate()?;
    Ok(config)
}

async fn embedder(config: &EngineConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let provider = create_provider(&config.embedding).await?;
    info!(
        "Using embedding provider {} ({} dimensions)",
        provider.provider_name(),
        provider.embedding_dimension()
    );
    Ok(provider)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let store: Arc<dyn ChunkStore> = Arc::new(SqliteStore::from_config(&config).await?);

    match args.command {
        Commands::Init => {
            if let Some(path) = &config.database_path {
                println!("Initialized index database at {}", path.display());
            }
            Ok(())
        }
        Commands::Index {
            paths,
            force,
            metadata,
        } => {
            let sources = discover_sources(&paths)?;
            let engine = IndexingEngine::new(config.clone(), store, embedder(&config).await?);

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    flag.store(true, Ordering::SeqCst);
                }
            });

            let summary = engine
                .index_batch(sources, force, &to_map(metadata), &cancel)
                .await;
            for result in &summary.results {
                match result.status {
                    IndexStatus::Success => println!("indexed  {} ({} chunks)", result.source_uri, result.chunks),
                    IndexStatus::Skipped => println!("skipped  {} ({})", result.source_uri, result.message),
                    IndexStatus::Error => println!(
                        "error    {} [{}] {}",
                        result.source_uri,
                        result.error_type.map(|k| k.as_str()).unwrap_or("unknown_error"),
                        result.message
                    ),
                }
            }
            println!(
                "{} indexed, {} skipped, {} failed of {}{}",
                summary.succeeded,
                summary.skipped,
                summary.failed,
                summary.total,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            Ok(())
        }
        Commands::Search {
            query,
            hybrid,
            limit,
            filter,
            format,
        } => {
            let search = SearchService::new(&config, store, embedder(&config).await?);
            let filters = to_map(filter);
            let results = if hybrid {
                search.hybrid_search(&query, limit, &filters).await?
            } else {
                search.semantic_search(&query, limit, &filters).await?
            };

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                OutputFormat::Summary => {
                    println!("Found {} results:", results.len());
                    for (i, result) in results.iter().enumerate() {
                        let score = match result.combined_score {
                            Some(combined) => format!("combined {combined:.4}"),
                            None => format!("relevance {:.4}", result.relevance_score),
                        };
                        println!(
                            "{:>3}. {} #{} | {}",
                            i + 1,
                            result.source_uri,
                            result.chunk_index,
                            score
                        );
                        println!(
                            "     {}",
                            result.text_content.chars().take(120).collect::<String>().replace('\n', " ")
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Preview { filter } => {
            let bulk = BulkMutationCoordinator::new(store, config.preview_sample_size);
            let preview = bulk.preview(&to_map(filter)).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
            Ok(())
        }
        Commands::Export { filter, output } => {
            let bulk = BulkMutationCoordinator::new(store, config.preview_sample_size);
            let records = bulk.export(&to_map(filter)).await?;
            tokio::fs::write(&output, serde_json::to_string_pretty(&records)?).await?;
            println!("Exported {} chunks to {}", records.len(), output.display());
            Ok(())
        }
        Commands::Delete { filter } => {
            let bulk = BulkMutationCoordinator::new(store, config.preview_sample_size);
            let outcome = bulk.delete(&to_map(filter)).await?;
            println!(
                "Deleted {} chunks from {} documents",
                outcome.chunks_deleted, outcome.documents_deleted
            );
            Ok(())
        }
        Commands::Restore { file } => {
            let bulk = BulkMutationCoordinator::new(store, config.preview_sample_size);
            let records = parse_export(&tokio::fs::read_to_string(&file).await?)?;
            let offered = records.len();
            let restored = bulk.restore(records).await?;
            println!("Restored {restored} of {offered} chunks");
            Ok(())
        }
        Commands::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Documents {
            limit,
            offset,
            format,
        } => {
            let documents = store.list_documents(limit, offset).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&documents)?),
                OutputFormat::Summary => {
                    for doc in documents {
                        println!(
                            "{} | {} chunks | {} | updated {}",
                            doc.document_id,
                            doc.chunk_count,
                            doc.source_uri,
                            doc.last_updated.to_rfc3339()
                        );
                    }
                }
            }
            Ok(())
        }
    }
}
