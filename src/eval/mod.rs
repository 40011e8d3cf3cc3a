//! Evaluation Module
//!
//! Scores pipeline outputs by embedding similarity against the passages that
//! were retrieved for them. For each hypothesis and for the gap analysis: the
//! text is embedded, compared against the stored embeddings of its context
//! passages, and the top scores plus their average decide the
//! supported-by-context flag.
//!
//! Evaluation depends only on stored text and the embedding model, so the
//! same run report always evaluates to the same numbers.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::embedding::{cosine_similarity, TextEmbedder};
use crate::index::{RetrievalResult, VectorIndex};
use crate::pipeline::RunReport;

/// Similarity scores kept per evaluated text
pub const TOP_SCORES: usize = 3;

/// Evaluation errors
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Evaluation dimension mismatch: index stores {expected}, embedder produced {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Context snapshot {context} does not match index snapshot {index}")]
    SnapshotMismatch { context: Uuid, index: Uuid },

    #[error("Context references passage {0} outside the index")]
    UnknownPassage(usize),

    #[error(transparent)]
    Embedding(#[from] anyhow::Error),
}

/// Similarity of one text to its retrieval context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    /// Highest passage similarities, descending, at most [`TOP_SCORES`]
    pub top_scores: Vec<f32>,
    /// Average of `top_scores`; 0.0 when the context has no passages
    pub avg_similarity: f32,
    /// `avg_similarity >= threshold`; equality counts as supported
    pub supported: bool,
}

/// Evaluation of a single hypothesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisEvaluation {
    pub hypothesis: String,
    /// Feasibility rating parsed from the validator output, if any
    pub feasibility: Option<u8>,
    pub similarity: SimilarityReport,
}

/// Aggregate over parsed feasibility scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub min: u8,
    pub max: u8,
    pub mean: f64,
    /// Sample standard deviation; 0.0 for a single score
    pub std: f64,
}

/// Complete evaluation of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvaluation {
    pub hypotheses: Vec<HypothesisEvaluation>,
    /// Stats over the parsed feasibility scores; None when none parsed
    pub feasibility: Option<ScoreStats>,
    /// Gap analysis grounding against its own retrieval context
    pub gap: SimilarityReport,
}

/// Scores run outputs against the index snapshot that generated them
pub struct Evaluator {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn TextEmbedder>,
    support_threshold: f32,
    grounding_threshold: f32,
}

impl Evaluator {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn TextEmbedder>,
        support_threshold: f32,
        grounding_threshold: f32,
    ) -> Self {
        Self {
            index,
            embedder,
            support_threshold,
            grounding_threshold,
        }
    }

    /// Score `text` against the stored embeddings of its context passages.
    ///
    /// The context must come from the same index snapshot this evaluator
    /// holds; mixing snapshots would compare against the wrong vectors.
    pub async fn score_against_context(
        &self,
        text: &str,
        context: &RetrievalResult,
        threshold: f32,
    ) -> Result<SimilarityReport, EvalError> {
        if context.snapshot_id != self.index.snapshot_id() {
            return Err(EvalError::SnapshotMismatch {
                context: context.snapshot_id,
                index: self.index.snapshot_id(),
            });
        }

        let text_vec = self.embedder.embed(text).await?;
        if text_vec.len() != self.index.dimension() {
            return Err(EvalError::DimensionMismatch {
                expected: self.index.dimension(),
                got: text_vec.len(),
            });
        }

        let mut scores = Vec::with_capacity(context.hits.len());
        for hit in &context.hits {
            let stored = self
                .index
                .embedding(hit.index)
                .ok_or(EvalError::UnknownPassage(hit.index))?;
            scores.push(cosine_similarity(&text_vec, stored));
        }

        scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(TOP_SCORES);

        let avg_similarity = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        };

        Ok(SimilarityReport {
            top_scores: scores,
            avg_similarity,
            supported: avg_similarity >= threshold,
        })
    }

    /// Evaluate every hypothesis and the gap analysis of a run.
    ///
    /// Hypotheses score against the passages retrieved for them during
    /// VALIDATE with the support threshold; the gap text scores against the
    /// GAP_ANALYZE context with the grounding threshold.
    pub async fn evaluate_run(&self, report: &RunReport) -> Result<RunEvaluation, EvalError> {
        let mut hypotheses = Vec::with_capacity(report.validations.len());
        let mut scores = Vec::with_capacity(report.validations.len());

        for validation in &report.validations {
            let similarity = self
                .score_against_context(
                    &validation.hypothesis,
                    &validation.context,
                    self.support_threshold,
                )
                .await?;
            let feasibility = parse_feasibility_score(&validation.text);
            scores.push(feasibility);
            hypotheses.push(HypothesisEvaluation {
                hypothesis: validation.hypothesis.clone(),
                feasibility,
                similarity,
            });
        }

        let gap = self
            .score_against_context(
                &report.gap_analysis,
                &report.gap_context,
                self.grounding_threshold,
            )
            .await?;

        Ok(RunEvaluation {
            hypotheses,
            feasibility: score_stats(&scores),
            gap,
        })
    }
}

lazy_static! {
    /// Rating right after the "1)" answer marker the validator prompt asks for
    static ref MARKER_RE: Regex =
        Regex::new(r"(?m)^\s*1\)\s*(?:Rate feasibility[:\-\s]*)?(\b(?:[1-9]|10)\b)").unwrap();
    /// Fallback: first standalone integer between 1 and 10 anywhere
    static ref FALLBACK_RE: Regex = Regex::new(r"\b([1-9]|10)\b").unwrap();
}

/// Extract the integer feasibility rating (1-10) from a validator output
pub fn parse_feasibility_score(validation: &str) -> Option<u8> {
    let captures = MARKER_RE
        .captures(validation)
        .or_else(|| FALLBACK_RE.captures(validation))?;
    captures.get(1)?.as_str().parse().ok()
}

/// Compute min, max, mean and sample standard deviation, ignoring unparsed
/// scores. None when no score parsed at all.
pub fn score_stats(scores: &[Option<u8>]) -> Option<ScoreStats> {
    let clean: Vec<u8> = scores.iter().flatten().copied().collect();
    if clean.is_empty() {
        return None;
    }

    let min = clean.iter().copied().min()?;
    let max = clean.iter().copied().max()?;
    let mean = clean.iter().map(|&s| s as f64).sum::<f64>() / clean.len() as f64;

    let std = if clean.len() > 1 {
        let variance = clean
            .iter()
            .map(|&s| (s as f64 - mean).powi(2))
            .sum::<f64>()
            / (clean.len() - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    Some(ScoreStats {
        min,
        max,
        mean,
        std,
    })
}
