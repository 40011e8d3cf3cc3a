//! Litmine - LLM-assisted mining of scientific literature
//!
//! Indexes scientific PDFs, runs the multi-stage research pipeline with
//! Ollama or OpenAI, and evaluates outputs against retrieved context.

use clap::Parser;
use litmine::config::{AppConfig, ModelProvider as ProviderType};
use litmine::embedding::create_embedder;
use litmine::experiment::{
    default_grid, execute_experiment, index_path, load_experiments, ExperimentConfig,
    ExperimentRunner, RunOutcome,
};
use litmine::generate::{create_provider, ModelProvider};
use litmine::index::{Retriever, VectorIndex};
use litmine::ingest::{load_documents, passages_from_documents, resolve_documents};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Build a persistent vector index from PDF documents
    Index {
        /// PDF files or directories to index
        docs: Vec<PathBuf>,
        /// Index name; the file lands in the configured index directory
        #[arg(long, default_value = "default")]
        name: String,
        /// Rebuild even if the index file exists
        #[arg(long)]
        force: bool,
    },
    /// Run the research pipeline once over a set of documents
    Run {
        /// PDF files or directories to mine
        docs: Vec<PathBuf>,
        /// Passages retrieved per query (default from config)
        #[arg(long)]
        k: Option<usize>,
        /// Hypotheses requested (default from config)
        #[arg(long)]
        max_hypotheses: Option<usize>,
        /// Run name, used for the index file
        #[arg(long, default_value = "default")]
        name: String,
        /// Write the full report and evaluation as JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run a grid of experiments, appending one results row per experiment
    Experiments {
        /// PDF files or directories for the built-in grid
        docs: Vec<PathBuf>,
        /// JSON file with experiment configurations (replaces the grid)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Experiments launched concurrently
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// Query a saved index
    Query {
        /// Query text
        text: String,
        /// Index name to query
        #[arg(long, default_value = "default")]
        name: String,
        /// Number of passages to retrieve
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
}

#[derive(Parser, Debug)]
#[command(name = "litmine")]
#[command(author = "MadKoding")]
#[command(version = "0.1.0")]
#[command(about = "LLM-assisted mining of scientific literature", long_about = None)]
struct Args {
    /// Configuration file path (overrides defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ollama API URL (overrides config)
    #[arg(long)]
    ollama_url: Option<String>,

    /// Generation model (overrides config)
    #[arg(long)]
    model: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = AppConfig::load(args.config.as_deref())?;

    // Apply CLI overrides
    if let Some(url) = args.ollama_url {
        if config.generator.provider == ProviderType::Ollama {
            config.generator.url = url;
        }
    }
    if let Some(model) = args.model {
        config.generator.model = model;
    }
    config.validate()?;

    match args.command {
        Command::Index { docs, name, force } => cmd_index(&config, docs, &name, force).await,
        Command::Run {
            docs,
            k,
            max_hypotheses,
            name,
            out,
        } => cmd_run(&config, docs, k, max_hypotheses, name, out).await,
        Command::Experiments {
            docs,
            file,
            parallel,
        } => cmd_experiments(config, docs, file, parallel).await,
        Command::Query { text, name, top_k } => cmd_query(&config, &text, &name, top_k).await,
    }
}

async fn cmd_index(
    config: &AppConfig,
    docs: Vec<PathBuf>,
    name: &str,
    force: bool,
) -> anyhow::Result<()> {
    let paths = resolve_documents(&docs)?;
    let documents = load_documents(&paths)?;
    let passages = passages_from_documents(
        &documents,
        config.retrieval.chunk_max_chars,
        config.retrieval.chunk_overlap,
    );

    let path = index_path(config, name);
    if force && path.exists() {
        std::fs::remove_file(&path)?;
    }
    let existed = path.exists();

    let embedder = create_embedder(&config.embedding).await?;
    let index = VectorIndex::open_or_build(&path, passages, embedder.as_ref()).await?;

    if existed {
        println!(
            "Loaded existing index {} ({} passages)",
            path.display(),
            index.len()
        );
    } else {
        println!(
            "Indexed {} passages from {} documents into {}",
            index.len(),
            documents.len(),
            path.display()
        );
    }
    Ok(())
}

async fn cmd_run(
    config: &AppConfig,
    docs: Vec<PathBuf>,
    k: Option<usize>,
    max_hypotheses: Option<usize>,
    name: String,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let documents = resolve_documents(&docs)?;
    let exp = ExperimentConfig {
        name,
        documents,
        retrieval_k: k.unwrap_or(config.retrieval.top_k),
        max_hypotheses: max_hypotheses.unwrap_or(config.retrieval.max_hypotheses),
    };

    let embedder = create_embedder(&config.embedding).await?;
    let provider: Arc<dyn ModelProvider> = Arc::from(create_provider(config.generator.clone())?);

    let outcome = execute_experiment(config, &exp, embedder, provider).await?;
    print_outcome(&outcome);

    if let Some(path) = out {
        let payload = serde_json::json!({
            "report": outcome.report,
            "evaluation": outcome.evaluation,
            "passages": outcome.passages,
        });
        std::fs::write(&path, serde_json::to_string_pretty(&payload)?)?;
        println!("\nReport written to {}", path.display());
    }
    Ok(())
}

async fn cmd_experiments(
    mut config: AppConfig,
    docs: Vec<PathBuf>,
    file: Option<PathBuf>,
    parallel: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(n) = parallel {
        config.parallel = n.max(1);
    }

    let experiments = match file {
        Some(path) => load_experiments(&path)?,
        None => default_grid(resolve_documents(&docs)?),
    };

    let results_path = config.results_path.clone();
    let runner = ExperimentRunner::new(config);
    let rows = runner.run_all(&experiments).await?;

    println!("\nDone! Results saved to {}", results_path.display());
    for row in &rows {
        println!("{}", row.to_csv_record());
    }
    Ok(())
}

async fn cmd_query(
    config: &AppConfig,
    text: &str,
    name: &str,
    top_k: usize,
) -> anyhow::Result<()> {
    let path = index_path(config, name);
    let index = Arc::new(VectorIndex::load_from(&path)?);
    let embedder = create_embedder(&config.embedding).await?;
    let retriever = Retriever::new(index, embedder)?;

    tracing::info!("Query: {}", text);
    let result = retriever.retrieve(text, top_k).await?;

    println!("Top passages:");
    for hit in &result.hits {
        println!(
            "- {} (offset {}, score: {:.3})",
            hit.passage.source_id, hit.passage.offset, hit.score
        );
        println!("  {}", preview(&hit.passage.text, 240));
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    println!("--- Summary ---");
    println!("{}", outcome.report.summary);

    println!("\n--- Hypotheses ---");
    for h in &outcome.report.hypotheses {
        println!("- {}", h);
    }

    println!("\n--- Validations ---");
    for v in &outcome.report.validations {
        println!("{}\n", v.text);
    }

    println!("\n--- Research Gaps ---");
    println!("{}", outcome.report.gap_analysis);

    println!("\n--- Hypothesis Evaluation ---");
    for h in &outcome.evaluation.hypotheses {
        let scores = h
            .similarity
            .top_scores
            .iter()
            .map(|s| format!("{:.3}", s))
            .collect::<Vec<_>>()
            .join(", ");
        println!("Hypothesis: {}", h.hypothesis);
        println!("  Avg Similarity: {:.3}", h.similarity.avg_similarity);
        println!("  Top-{} scores: [{}]", h.similarity.top_scores.len(), scores);
        println!(
            "  Supported by context? {}\n",
            if h.similarity.supported { "Yes" } else { "No" }
        );
    }

    println!(
        "Gap Analysis avg similarity to context: {:.3}",
        outcome.evaluation.gap.avg_similarity
    );
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if out.len() < text.len() {
        out.push_str("...");
    }
    out
}

/// Initialize logging
fn init_logging(verbose: bool) {
    let filter = if verbose {
        "litmine=debug,info"
    } else {
        "litmine=info,warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
