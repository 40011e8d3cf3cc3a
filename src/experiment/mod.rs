//! Experiment Runner
//!
//! Ejecuta una lista finita de configuraciones de experimento, una corrida
//! completa del pipeline por configuración, y agrega una fila por experimento
//! a la tabla de resultados (CSV append-only). Una configuración fallida
//! produce una fila con marcador de error en lugar de métricas; el resto de
//! la lista continúa.
//!
//! El orden de las filas es siempre el orden de la lista de configuraciones,
//! también cuando las corridas se lanzan en lotes concurrentes.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::AppConfig;
use crate::embedding::{create_embedder, TextEmbedder};
use crate::eval::{Evaluator, RunEvaluation, ScoreStats, SimilarityReport};
use crate::generate::{create_provider, ModelProvider, ProviderError};
use crate::index::{Retriever, VectorIndex};
use crate::ingest::{load_documents, passages_from_documents};
use crate::pipeline::{PipelineError, ResearchPipeline, RunReport};

/// Experiment runner errors
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Failed to read experiments file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse experiments JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Embedding(#[from] anyhow::Error),
}

/// One experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    pub documents: Vec<PathBuf>,

    /// Passages retrieved per query in this experiment
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Hypotheses requested and kept
    #[serde(default = "default_max_hypotheses")]
    pub max_hypotheses: usize,
}

fn default_retrieval_k() -> usize {
    3
}

fn default_max_hypotheses() -> usize {
    2
}

/// Load experiment configurations from a JSON list
pub fn load_experiments(path: &Path) -> Result<Vec<ExperimentConfig>, ExperimentError> {
    let content = std::fs::read_to_string(path)?;
    let experiments: Vec<ExperimentConfig> = serde_json::from_str(&content)?;
    Ok(experiments)
}

/// Built-in grid over the same documents: default k and a larger k
pub fn default_grid(documents: Vec<PathBuf>) -> Vec<ExperimentConfig> {
    vec![
        ExperimentConfig {
            name: "default_k3".to_string(),
            documents: documents.clone(),
            retrieval_k: 3,
            max_hypotheses: 2,
        },
        ExperimentConfig {
            name: "larger_k5".to_string(),
            documents,
            retrieval_k: 5,
            max_hypotheses: 2,
        },
    ]
}

/// Everything one successful experiment produced
pub struct RunOutcome {
    pub report: RunReport,
    pub evaluation: RunEvaluation,
    /// Passages in the experiment's index
    pub passages: usize,
}

/// One row of the results table
#[derive(Debug, Clone)]
pub struct ExperimentRow {
    pub experiment: String,
    pub retrieval_k: usize,
    pub documents: usize,
    pub runtime_s: f64,
    pub num_hypotheses: Option<usize>,
    /// Parsed ratings per hypothesis; inner None = rating not parseable
    pub feasibility_scores: Option<Vec<Option<u8>>>,
    pub stats: Option<ScoreStats>,
    pub hypothesis_metrics: Option<Vec<SimilarityReport>>,
    pub gap_metrics: Option<SimilarityReport>,
    /// Error marker; metric columns stay empty when set
    pub error: Option<String>,
}

/// Column layout of the results table
pub const CSV_HEADER: &str = "experiment,retrieval_k,documents,runtime_s,num_hypotheses,\
feasibility_scores,min_score,max_score,mean_score,std_score,\
hypothesis_avg_similarities,hypothesis_top_scores,hypothesis_supported,\
gap_avg_similarity,gap_top_scores,gap_supported,error";

impl ExperimentRow {
    pub fn from_outcome(config: &ExperimentConfig, runtime_s: f64, outcome: &RunOutcome) -> Self {
        let evaluation = &outcome.evaluation;
        Self {
            experiment: config.name.clone(),
            retrieval_k: config.retrieval_k,
            documents: config.documents.len(),
            runtime_s,
            num_hypotheses: Some(outcome.report.hypotheses.len()),
            feasibility_scores: Some(
                evaluation.hypotheses.iter().map(|h| h.feasibility).collect(),
            ),
            stats: evaluation.feasibility.clone(),
            hypothesis_metrics: Some(
                evaluation.hypotheses.iter().map(|h| h.similarity.clone()).collect(),
            ),
            gap_metrics: Some(evaluation.gap.clone()),
            error: None,
        }
    }

    pub fn error_row(config: &ExperimentConfig, runtime_s: f64, error: String) -> Self {
        Self {
            experiment: config.name.clone(),
            retrieval_k: config.retrieval_k,
            documents: config.documents.len(),
            runtime_s,
            num_hypotheses: None,
            feasibility_scores: None,
            stats: None,
            hypothesis_metrics: None,
            gap_metrics: None,
            error: Some(error),
        }
    }

    /// Render as one CSV record matching [`CSV_HEADER`].
    ///
    /// Per-hypothesis values join with ';', the top scores of one text join
    /// with '|'. Missing values render as empty fields.
    pub fn to_csv_record(&self) -> String {
        let feasibility = self
            .feasibility_scores
            .as_ref()
            .map(|scores| {
                scores
                    .iter()
                    .map(|s| s.map(|v| v.to_string()).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .unwrap_or_default();

        let (min, max, mean, std) = match &self.stats {
            Some(stats) => (
                stats.min.to_string(),
                stats.max.to_string(),
                format!("{:.2}", stats.mean),
                format!("{:.2}", stats.std),
            ),
            None => Default::default(),
        };

        let (hypo_avgs, hypo_tops, hypo_supported) = match &self.hypothesis_metrics {
            Some(metrics) => (
                metrics
                    .iter()
                    .map(|m| format!("{:.3}", m.avg_similarity))
                    .collect::<Vec<_>>()
                    .join(";"),
                metrics
                    .iter()
                    .map(|m| join_scores(&m.top_scores))
                    .collect::<Vec<_>>()
                    .join(";"),
                metrics
                    .iter()
                    .map(|m| m.supported.to_string())
                    .collect::<Vec<_>>()
                    .join(";"),
            ),
            None => Default::default(),
        };

        let (gap_avg, gap_tops, gap_supported) = match &self.gap_metrics {
            Some(m) => (
                format!("{:.3}", m.avg_similarity),
                join_scores(&m.top_scores),
                m.supported.to_string(),
            ),
            None => Default::default(),
        };

        format!(
            "{},{},{},{:.2},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            csv_field(&self.experiment),
            self.retrieval_k,
            self.documents,
            self.runtime_s,
            self.num_hypotheses.map(|n| n.to_string()).unwrap_or_default(),
            feasibility,
            min,
            max,
            mean,
            std,
            hypo_avgs,
            hypo_tops,
            hypo_supported,
            gap_avg,
            gap_tops,
            gap_supported,
            self.error.as_deref().map(csv_field).unwrap_or_default(),
        )
    }
}

fn join_scores(scores: &[f32]) -> String {
    scores
        .iter()
        .map(|s| format!("{:.3}", s))
        .collect::<Vec<_>>()
        .join("|")
}

/// Quote a field when it contains a delimiter, quote or newline
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Append rows to the results table, writing the header only when the file
/// is new or empty
pub fn append_rows(path: &Path, rows: &[ExperimentRow]) -> Result<(), ExperimentError> {
    if rows.is_empty() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_header = file.metadata()?.len() == 0;

    let mut out = String::new();
    if needs_header {
        out.push_str(CSV_HEADER);
        out.push('\n');
    }
    for row in rows {
        out.push_str(&row.to_csv_record());
        out.push('\n');
    }

    file.write_all(out.as_bytes())?;
    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Index file location for a named experiment or run
pub fn index_path(app: &AppConfig, name: &str) -> PathBuf {
    app.index_dir
        .join(format!("index_{}.bin", sanitize_name(name)))
}

/// Run one experiment end to end: load documents, open or build the
/// per-experiment index, run the pipeline, evaluate the outputs.
///
/// The document check happens before any index or model work, so an empty
/// document list fails as an input error without touching collaborators.
pub async fn execute_experiment(
    app: &AppConfig,
    exp: &ExperimentConfig,
    embedder: Arc<dyn TextEmbedder>,
    provider: Arc<dyn ModelProvider>,
) -> Result<RunOutcome, PipelineError> {
    let documents = load_documents(&exp.documents)?;
    let passages = passages_from_documents(
        &documents,
        app.retrieval.chunk_max_chars,
        app.retrieval.chunk_overlap,
    );

    let path = index_path(app, &exp.name);
    let index = VectorIndex::open_or_build(&path, passages, embedder.as_ref()).await?;
    let passage_count = index.len();

    let retriever = Retriever::new(index.clone(), embedder.clone())?;
    let pipeline = ResearchPipeline::new(
        retriever,
        provider,
        app.generation.clone(),
        exp.retrieval_k,
        exp.max_hypotheses,
    );
    let report = pipeline.run().await?;

    let evaluator = Evaluator::new(
        index,
        embedder,
        app.retrieval.support_threshold,
        app.retrieval.grounding_threshold,
    );
    let evaluation = evaluator.evaluate_run(&report).await?;

    Ok(RunOutcome {
        report,
        evaluation,
        passages: passage_count,
    })
}

async fn run_single(
    app: &AppConfig,
    exp: &ExperimentConfig,
    embedder: Arc<dyn TextEmbedder>,
    provider: Arc<dyn ModelProvider>,
) -> ExperimentRow {
    tracing::info!("Experiment: {} (k={})", exp.name, exp.retrieval_k);
    let start = Instant::now();

    match execute_experiment(app, exp, embedder, provider).await {
        Ok(outcome) => {
            let runtime_s = start.elapsed().as_secs_f64();
            tracing::info!("[{:.1}s] Experiment '{}' done", runtime_s, exp.name);
            ExperimentRow::from_outcome(exp, runtime_s, &outcome)
        }
        Err(e) => {
            let runtime_s = start.elapsed().as_secs_f64();
            tracing::error!("Experiment '{}' failed: {}", exp.name, e);
            ExperimentRow::error_row(exp, runtime_s, e.to_string())
        }
    }
}

/// Drives a list of experiment configurations against shared collaborators
pub struct ExperimentRunner {
    config: AppConfig,
    provider: Option<Arc<dyn ModelProvider>>,
    embedder: Option<Arc<dyn TextEmbedder>>,
}

impl ExperimentRunner {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            provider: None,
            embedder: None,
        }
    }

    /// Use a preconstructed provider instead of building one from config
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use a preconstructed embedder instead of building one from config
    pub fn with_embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Run every configuration, appending results as they complete.
    ///
    /// A failing configuration yields an error row; later configurations
    /// still run. With `parallel > 1` configurations launch in batches, but
    /// rows are appended in list order.
    pub async fn run_all(
        &self,
        experiments: &[ExperimentConfig],
    ) -> Result<Vec<ExperimentRow>, ExperimentError> {
        let embedder = match &self.embedder {
            Some(e) => e.clone(),
            None => create_embedder(&self.config.embedding).await?,
        };
        let provider: Arc<dyn ModelProvider> = match &self.provider {
            Some(p) => p.clone(),
            None => Arc::from(create_provider(self.config.generator.clone())?),
        };

        let mut rows = Vec::with_capacity(experiments.len());

        if self.config.parallel <= 1 {
            for exp in experiments {
                let row = run_single(&self.config, exp, embedder.clone(), provider.clone()).await;
                append_rows(&self.config.results_path, std::slice::from_ref(&row))?;
                rows.push(row);
            }
        } else {
            for batch in experiments.chunks(self.config.parallel) {
                let mut handles = Vec::new();

                for exp in batch {
                    let exp = exp.clone();
                    let app = self.config.clone();
                    let embedder = embedder.clone();
                    let provider = provider.clone();

                    handles.push(tokio::spawn(async move {
                        run_single(&app, &exp, embedder, provider).await
                    }));
                }

                let batch_results = join_all(handles).await;

                let mut batch_rows = Vec::with_capacity(batch.len());
                for (exp, result) in batch.iter().zip(batch_results) {
                    let row = match result {
                        Ok(row) => row,
                        Err(e) => {
                            // Task panicked or was cancelled
                            tracing::error!("Experiment task '{}' failed: {}", exp.name, e);
                            ExperimentRow::error_row(exp, 0.0, format!("Task failed: {}", e))
                        }
                    };
                    batch_rows.push(row);
                }

                append_rows(&self.config.results_path, &batch_rows)?;
                rows.extend(batch_rows);
            }
        }

        tracing::info!(
            "Done! Results saved to {:?} ({} rows)",
            self.config.results_path,
            rows.len()
        );
        Ok(rows)
    }
}
