//! Multi-step Research Pipeline
//!
//! Orquesta las etapas del análisis de literatura en una máquina de estados
//! estrictamente lineal: SUMMARIZE genera un resumen del contexto recuperado,
//! HYPOTHESIZE propone hipótesis, VALIDATE las evalúa contra pasajes
//! recuperados por hipótesis, y GAP_ANALYZE identifica huecos de investigación.
//!
//! Cada etapa registra su duración; el [`RunReport`] final conserva los
//! contextos de recuperación para que la evaluación posterior pueda calcular
//! similitud contra los embeddings almacenados del índice.

pub mod prompts;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::GenerationPolicy;
use crate::eval::EvalError;
use crate::generate::{generate_checked, GenerationError, ModelProvider};
use crate::index::{IndexError, RetrievalResult, Retriever};
use crate::ingest::IngestError;

/// Pipeline errors, one variant per failing subsystem
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input error: {0}")]
    Input(#[from] IngestError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),
}

/// Pipeline stages, executed strictly in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Summarize,
    Hypothesize,
    Validate,
    GapAnalyze,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Summarize => write!(f, "SUMMARIZE"),
            Stage::Hypothesize => write!(f, "HYPOTHESIZE"),
            Stage::Validate => write!(f, "VALIDATE"),
            Stage::GapAnalyze => write!(f, "GAP_ANALYZE"),
            Stage::Done => write!(f, "DONE"),
        }
    }
}

/// Wall-clock duration of one completed stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_secs: f64,
}

/// Validator output for one hypothesis, with the passages retrieved for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub hypothesis: String,
    /// Free-text validator output (feasibility rating, evidence, assumptions)
    pub text: String,
    /// Passages retrieved for this hypothesis; evaluation scores against these
    pub context: RetrievalResult,
}

/// Everything one pipeline run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: String,
    pub hypotheses: Vec<String>,
    pub validations: Vec<ValidationRecord>,
    pub gap_analysis: String,
    /// Passages behind the SUMMARIZE stage
    pub literature_context: RetrievalResult,
    /// Passages behind the GAP_ANALYZE stage
    pub gap_context: RetrievalResult,
    pub stage_timings: Vec<StageTiming>,
    pub total_secs: f64,
}

/// Linear research pipeline over one index snapshot
pub struct ResearchPipeline {
    retriever: Retriever,
    provider: Arc<dyn ModelProvider>,
    policy: GenerationPolicy,
    retrieval_k: usize,
    max_hypotheses: usize,
}

impl ResearchPipeline {
    pub fn new(
        retriever: Retriever,
        provider: Arc<dyn ModelProvider>,
        policy: GenerationPolicy,
        retrieval_k: usize,
        max_hypotheses: usize,
    ) -> Self {
        Self {
            retriever,
            provider,
            policy,
            retrieval_k,
            max_hypotheses,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Execute all stages in order and return the full report.
    ///
    /// Any stage failure aborts the run; there are no partial reports.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_start = Instant::now();

        let empty_context = RetrievalResult {
            snapshot_id: self.retriever.index().snapshot_id(),
            hits: Vec::new(),
        };

        let mut summary = String::new();
        let mut hypotheses: Vec<String> = Vec::new();
        let mut validations: Vec<ValidationRecord> = Vec::new();
        let mut gap_analysis = String::new();
        let mut literature_context = empty_context.clone();
        let mut gap_context = empty_context;
        let mut stage_timings = Vec::new();

        let mut stage = Stage::Summarize;

        while stage != Stage::Done {
            let stage_start = Instant::now();

            let next = match stage {
                Stage::Summarize => {
                    let context = self
                        .retriever
                        .retrieve(prompts::LITERATURE_QUERY, self.retrieval_k)
                        .await?;
                    let prompt = prompts::render_summarize(&context.context_text());
                    summary =
                        generate_checked(self.provider.as_ref(), &prompt, &self.policy).await?;
                    literature_context = context;
                    Stage::Hypothesize
                }
                Stage::Hypothesize => {
                    let prompt = prompts::render_proposer(&summary, self.max_hypotheses);
                    let completion =
                        generate_checked(self.provider.as_ref(), &prompt, &self.policy).await?;
                    hypotheses = parse_hypotheses(
                        &completion,
                        self.max_hypotheses,
                        self.provider.model_name(),
                    )?;
                    Stage::Validate
                }
                Stage::Validate => {
                    for hypothesis in &hypotheses {
                        let context = self
                            .retriever
                            .retrieve(hypothesis, self.retrieval_k)
                            .await?;
                        let prompt =
                            prompts::render_validator(hypothesis, &context.context_text());
                        let text =
                            generate_checked(self.provider.as_ref(), &prompt, &self.policy)
                                .await?;
                        validations.push(ValidationRecord {
                            hypothesis: hypothesis.clone(),
                            text,
                            context,
                        });
                    }
                    Stage::GapAnalyze
                }
                Stage::GapAnalyze => {
                    let context = self
                        .retriever
                        .retrieve(prompts::GAP_QUERY, self.retrieval_k)
                        .await?;
                    let prompt = prompts::render_gap(&context.context_text());
                    gap_analysis =
                        generate_checked(self.provider.as_ref(), &prompt, &self.policy).await?;
                    gap_context = context;
                    Stage::Done
                }
                Stage::Done => break,
            };

            let elapsed = stage_start.elapsed().as_secs_f64();
            tracing::info!("[{:.1}s] {} done", elapsed, stage);
            stage_timings.push(StageTiming {
                stage,
                elapsed_secs: elapsed,
            });

            stage = next;
        }

        let total_secs = run_start.elapsed().as_secs_f64();
        tracing::info!("[{:.1}s] Pipeline run complete", total_secs);

        Ok(RunReport {
            summary,
            hypotheses,
            validations,
            gap_analysis,
            literature_context,
            gap_context,
            stage_timings,
            total_secs,
        })
    }
}

lazy_static! {
    /// List markers the proposer tends to emit: "1.", "2)", "-", "*", "•"
    static ref ITEM_PREFIX: Regex = Regex::new(r"^\s*(?:\d+[\.\)]\s*|[-*•]\s*)").unwrap();
}

/// Split a proposer completion into hypothesis strings.
///
/// Non-empty lines are kept, list markers stripped. The result is truncated
/// to `max` entries; fewer than `max` is tolerated with a warning, zero is a
/// generation failure.
pub fn parse_hypotheses(
    completion: &str,
    max: usize,
    model: &str,
) -> Result<Vec<String>, GenerationError> {
    let mut hypotheses: Vec<String> = completion
        .lines()
        .map(|line| ITEM_PREFIX.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    if hypotheses.is_empty() {
        return Err(GenerationError::EmptyCompletion {
            model: model.to_string(),
        });
    }

    if hypotheses.len() > max {
        tracing::debug!(
            "Proposer returned {} lines, keeping the first {}",
            hypotheses.len(),
            max
        );
        hypotheses.truncate(max);
    } else if hypotheses.len() < max {
        tracing::warn!(
            "Proposer returned {} hypotheses, {} requested",
            hypotheses.len(),
            max
        );
    }

    Ok(hypotheses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbered_list() {
        let completion = "1. First hypothesis about sleep\n2. Second hypothesis about memory";
        let hypotheses = parse_hypotheses(completion, 2, "stub").unwrap();
        assert_eq!(
            hypotheses,
            vec![
                "First hypothesis about sleep".to_string(),
                "Second hypothesis about memory".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_bullet_list_and_blank_lines() {
        let completion = "- First one\n\n* Second one\n\n• Third one\n";
        let hypotheses = parse_hypotheses(completion, 3, "stub").unwrap();
        assert_eq!(hypotheses, vec!["First one", "Second one", "Third one"]);
    }

    #[test]
    fn test_parse_truncates_to_max() {
        let completion = "1) A\n2) B\n3) C\n4) D";
        let hypotheses = parse_hypotheses(completion, 2, "stub").unwrap();
        assert_eq!(hypotheses, vec!["A", "B"]);
    }

    #[test]
    fn test_parse_accepts_shortfall() {
        let completion = "1. Only one came back";
        let hypotheses = parse_hypotheses(completion, 2, "stub").unwrap();
        assert_eq!(hypotheses.len(), 1);
    }

    #[test]
    fn test_parse_empty_is_generation_error() {
        let err = parse_hypotheses("\n  \n", 2, "stub").unwrap_err();
        assert!(matches!(err, GenerationError::EmptyCompletion { .. }));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Summarize.to_string(), "SUMMARIZE");
        assert_eq!(Stage::GapAnalyze.to_string(), "GAP_ANALYZE");
    }
}
