use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use xpa_retriever::{
    Retriever, RetrievalResult, RetrieverError,
    config::{EmbedderKind, RetrieverConfig},
    corpus::read_documents_jsonl,
    retrieval::indexing_engine::IndexingEngine,
    storage::{IndexManifest, IndexStore, SqliteIndexStore},
};

/// Questions used to check a freshly built index, one per language.
const SMOKE_QUERIES: &[&str] = &["What is A/B testing?", "Qu'est-ce qu'un test A/B ?"];

const SNIPPET_CHARS: usize = 150;

/// Build and query the experiment assistant's passage index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Index artifact path, overriding the configuration
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Embedding backend: fastembed or hashing
    #[arg(long, global = true)]
    embedder: Option<EmbedderKind>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk, embed and index a JSON Lines corpus, then save the index
    Build {
        /// Corpus file, one document per line
        #[arg(long)]
        corpus: PathBuf,
        /// Maximum chunk size in bytes
        #[arg(long)]
        max_chunk_length: Option<usize>,
        /// Overlap between consecutive chunks in bytes
        #[arg(long)]
        chunk_overlap: Option<usize>,
        /// Skip the sample queries run after saving
        #[arg(long)]
        no_smoke_test: bool,
    },
    /// Answer one question with the most relevant passages
    Search {
        /// Question text, in French or English
        query: String,
        /// Number of passages
        #[arg(short)]
        k: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Read questions from stdin until end of input
    Interactive {
        /// Number of passages per question
        #[arg(short)]
        k: Option<usize>,
    },
    /// Show what the index artifact contains
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct StatsOutput {
    manifest: IndexManifest,
    chunks_per_language: Option<std::collections::BTreeMap<xpa_context::Language, usize>>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn load_config(args: &Args) -> anyhow::Result<RetrieverConfig> {
    let mut config = match &args.config {
        Some(path) => RetrieverConfig::load(path).await?,
        None => RetrieverConfig::default(),
    };
    if let Some(index) = &args.index {
        config.index_path = index.clone();
    }
    if let Some(embedder) = args.embedder {
        config.embedding.provider = embedder;
    }
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(&args).await?;

    match args.command {
        Commands::Build {
            corpus,
            max_chunk_length,
            chunk_overlap,
            no_smoke_test,
        } => {
            if let Some(length) = max_chunk_length {
                config.chunking.max_chunk_length = length;
            }
            if let Some(overlap) = chunk_overlap {
                config.chunking.chunk_overlap = overlap;
            }
            config.validate()?;

            let documents = read_documents_jsonl(&corpus).await?;
            let provider = config.embedding.create_provider().await?;
            let engine = IndexingEngine::new(config.indexing_engine_config(), provider.clone())?;

            let index = engine.index(&documents).await?;
            let manifest = SqliteIndexStore::new(&config.index_path)
                .save(&index)
                .await?;

            println!(
                "Indexed {} documents into {} chunks",
                manifest.document_count, manifest.chunk_count
            );
            for (language, count) in &index.stats().chunks_per_language {
                println!("  [{}] {count} chunks", language.as_str().to_uppercase());
            }
            println!("Model: {}", manifest.embedding_model.model_id());
            println!("Saved to {}", config.index_path.display());

            if !no_smoke_test {
                let retriever = Retriever::new(Arc::new(index), provider)?;
                for query in SMOKE_QUERIES {
                    println!("\nQuery: {query}");
                    let results = retriever.search(query, config.retrieval_k).await?;
                    print_passages(&results);
                }
            }
            Ok(())
        }
        Commands::Search { query, k, format } => {
            let retriever = open_retriever(&config).await?;
            let results = retriever
                .search(&query, k.unwrap_or(config.retrieval_k))
                .await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} passages:", results.len());
                    for hit in &results {
                        println!(
                            "  {}. Score: {:.3} | [{}] {} | {}#{}",
                            hit.rank,
                            hit.score,
                            hit.language.as_str().to_uppercase(),
                            hit.title,
                            hit.document_id,
                            hit.chunk_index
                        );
                    }
                }
                OutputFormat::Full => {
                    for hit in &results {
                        println!("Rank: {}", hit.rank);
                        println!("Score: {:.3}", hit.score);
                        println!("Document: {} (chunk {})", hit.document_id, hit.chunk_index);
                        println!("Title: {}", hit.title);
                        println!("Language: {}", hit.language);
                        println!("Source: {}", hit.source_url);
                        println!("Content:\n{}", hit.chunk_text);
                        println!("---");
                    }
                }
            }
            Ok(())
        }
        Commands::Interactive { k } => {
            let retriever = open_retriever(&config).await?;
            let k = k.unwrap_or(config.retrieval_k);
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut stdout = tokio::io::stdout();

            loop {
                stdout.write_all(b"\nQuestion: ").await?;
                stdout.flush().await?;

                let Some(line) = lines.next_line().await? else {
                    break;
                };
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }

                match retriever.search(question, k).await {
                    Ok(results) => print_passages(&results),
                    Err(e @ RetrieverError::InvalidQuery { .. }) => eprintln!("{e}"),
                    Err(e) => return Err(e.into()),
                }
            }
            println!();
            Ok(())
        }
        Commands::Stats { format } => {
            let store = SqliteIndexStore::new(&config.index_path);
            let manifest = store.manifest().await?;

            // Stats need the full index; the manifest's own model is the expected one.
            let chunks_per_language = if format == OutputFormat::Summary {
                None
            } else {
                let index = store.load(&manifest.embedding_model).await?;
                Some(index.stats().chunks_per_language)
            };

            match format {
                OutputFormat::Json => {
                    let output = StatsOutput {
                        manifest,
                        chunks_per_language,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    print_manifest(store.path(), &manifest);
                    if let Some(per_language) = chunks_per_language {
                        println!("  Chunks per language:");
                        for (language, count) in per_language {
                            println!("    [{}] {count}", language.as_str().to_uppercase());
                        }
                        println!("  Integrity: OK");
                    }
                }
            }
            Ok(())
        }
    }
}

async fn open_retriever(config: &RetrieverConfig) -> anyhow::Result<Retriever> {
    let provider = config.embedding.create_provider().await?;
    Ok(Retriever::open(&config.index_path, provider).await?)
}

fn print_passages(results: &[RetrievalResult]) {
    if results.is_empty() {
        println!("No passages found.");
    }
    for hit in results {
        println!(
            "{}. [{}] {}",
            hit.rank,
            hit.language.as_str().to_uppercase(),
            hit.title
        );
        if !hit.source_url.is_empty() {
            println!("   {}", hit.source_url);
        }
        println!("   {}", hit.snippet(SNIPPET_CHARS));
    }
}

fn print_manifest(path: &Path, manifest: &IndexManifest) {
    println!("Index: {}", path.display());
    println!("  Format version: {}", manifest.format_version);
    println!("  Built by: xpa-retriever {}", manifest.retriever_version);
    println!("  Created at: {}", manifest.created_at_rfc3339());
    println!("  Model: {}", manifest.embedding_model.model_id());
    println!("  Documents: {}", manifest.document_count);
    println!("  Chunks: {}", manifest.chunk_count);
    println!("  Dimension: {}", manifest.dimension);
    if let Some(chunking) = &manifest.chunking {
        println!(
            "  Chunking: {} bytes, {} overlap",
            chunking.max_chunk_length, chunking.chunk_overlap
        );
    }
    println!("  Content hash: {}", manifest.content_hash);
}
