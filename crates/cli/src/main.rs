use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::watch;
use qa_core::cleaner::TextCleaner;
use qa_core::config::{self, AppConfig};
use qa_core::llm::{fallback_message, LlmError};
use qa_core::loader::DocumentLoader;
use qa_core::pipeline::{self, Assistant};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Load { file } => run_load(file),
        Commands::Clean { file, keep_special } => run_clean(&cfg, file, keep_special),
        Commands::Chunk {
            file,
            size,
            overlap,
            json,
        } => run_chunk(cfg, file, size, overlap, json),
        Commands::Ingest { paths, json } => run_ingest(cfg, paths, json).await,
        Commands::Search { query, top_k, json } => run_search(cfg, query, top_k, json).await,
        Commands::Ask {
            question,
            top_k,
            json,
        } => run_ask(cfg, question, top_k, json).await,
        Commands::Stats { json } => run_stats(cfg, json).await,
        Commands::Watch { paths } => {
            let assistant = Assistant::open(cfg).await?;
            watch::watch_paths(&assistant, paths).await
        }
    }
}

#[derive(Parser)]
#[command(name = "qa-assistant")]
#[command(about = "Answer questions from your own documents", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the text extracted from a file (or why there is none)
    Load { file: PathBuf },
    /// Print the cleaned text of a file
    Clean {
        file: PathBuf,
        /// Keep punctuation and non-ASCII characters
        #[arg(long, default_value_t = false)]
        keep_special: bool,
    },
    /// Show how a file would be chunked
    Chunk {
        file: PathBuf,
        /// Override chunking.chunk_size
        #[arg(long)]
        size: Option<usize>,
        /// Override chunking.chunk_overlap
        #[arg(long)]
        overlap: Option<usize>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Load, chunk, embed and index files; defaults to ingest.include
    Ingest {
        paths: Vec<PathBuf>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Nearest chunks for a query
    Search {
        query: String,
        /// Number of results (defaults to vectors.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Answer a question from the indexed documents
    Ask {
        question: String,
        /// Number of context chunks (defaults to vectors.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Index statistics
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-ingest files as they change
    Watch { paths: Vec<PathBuf> },
}

fn run_load(file: PathBuf) -> Result<()> {
    let doc = DocumentLoader::new().load(&file)?;
    println!("{}", doc.display_text());
    Ok(())
}

fn run_clean(cfg: &AppConfig, file: PathBuf, keep_special: bool) -> Result<()> {
    let doc = DocumentLoader::new().load(&file)?;
    let Some(text) = doc.text() else {
        println!("{}", doc.display_text());
        return Ok(());
    };
    let cleaner = TextCleaner::new(cfg.cleaner.remove_special_chars && !keep_special);
    println!("{}", cleaner.clean_text(text));
    Ok(())
}

fn run_chunk(
    mut cfg: AppConfig,
    file: PathBuf,
    size: Option<usize>,
    overlap: Option<usize>,
    json: bool,
) -> Result<()> {
    if let Some(size) = size {
        cfg.chunking.chunk_size = size;
    }
    if let Some(overlap) = overlap {
        cfg.chunking.chunk_overlap = overlap;
    }
    let structurizer = pipeline::build_structurizer(&cfg)?;
    let doc = DocumentLoader::new().load(&file)?;
    let Some(text) = doc.text() else {
        println!("{}", doc.display_text());
        return Ok(());
    };
    let text = if cfg.cleaner.enabled {
        TextCleaner::new(cfg.cleaner.remove_special_chars).clean_text(text)
    } else {
        text.to_string()
    };
    let chunks = structurizer.structure_chunks(&text)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
    } else {
        for c in &chunks {
            println!("--- chunk {} [{}..{}]", c.index, c.start, c.end);
            println!("{}", c.text);
        }
        println!("{} chunk(s)", chunks.len());
    }
    Ok(())
}

async fn run_ingest(cfg: AppConfig, paths: Vec<PathBuf>, json: bool) -> Result<()> {
    let assistant = Assistant::open(cfg).await?;
    let summary = assistant.ingest(&paths).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "ingest: discovered {}, ingested {}, unchanged {}, skipped {}, failed {}, chunks {}",
            summary.discovered,
            summary.ingested,
            summary.unchanged,
            summary.skipped,
            summary.failed,
            summary.chunks
        );
    }
    Ok(())
}

async fn run_search(cfg: AppConfig, query: String, top_k: Option<usize>, json: bool) -> Result<()> {
    let k = top_k.unwrap_or(cfg.vectors.top_k);
    let assistant = Assistant::open(cfg).await?;
    let hits = assistant.retrieve(&query, k).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("no results");
    }
    for h in &hits {
        println!("{:.3}  {}#{}", h.score, h.path, h.chunk_index);
        println!("    {}", snippet(&h.text, 160));
    }
    Ok(())
}

async fn run_ask(cfg: AppConfig, question: String, top_k: Option<usize>, json: bool) -> Result<()> {
    let k = top_k.unwrap_or(cfg.vectors.top_k);
    let assistant = Assistant::open(cfg).await?;
    match assistant.ask(&question, k).await {
        Ok(answer) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.text);
                if !answer.sources.is_empty() {
                    println!();
                    println!("Sources:");
                    for (i, s) in answer.sources.iter().enumerate() {
                        println!("  [{}] {} (chunk {}, score {:.3})", i + 1, s.path, s.chunk_index, s.score);
                    }
                }
            }
            Ok(())
        }
        Err(err) => {
            match err.downcast_ref::<LlmError>() {
                Some(LlmError::MissingBaseUrl) | None => {}
                Some(llm_err) => {
                    let message = fallback_message(llm_err);
                    if json {
                        let out = serde_json::json!({
                            "question": question,
                            "text": message,
                            "error": llm_err.to_string(),
                        });
                        println!("{}", serde_json::to_string_pretty(&out)?);
                    } else {
                        println!("{message}");
                    }
                }
            }
            Err(err)
        }
    }
}

async fn run_stats(cfg: AppConfig, json: bool) -> Result<()> {
    let assistant = Assistant::open(cfg).await?;
    let stats = assistant.stats().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "documents {} (skipped {}), chunks {}, vectors {}",
            stats.documents, stats.skipped, stats.chunks, stats.vectors
        );
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().nth(max_chars).is_some() {
        out.push_str("...");
    }
    out
}
