//! Vector Index Module
//!
//! Exact-scan cosine similarity index over embedded passages, persisted as a
//! single bincode blob. Passages keep their insertion order, and that order is
//! the tie-breaker for equal scores, so a rebuilt index over the same corpus
//! answers queries identically.

pub mod retriever;

pub use retriever::Retriever;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::embedding::{cosine_similarity, TextEmbedder};
use crate::ingest::Passage;

/// Passages embedded per batch during index construction
const EMBED_BATCH: usize = 32;

/// Index errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index contains no passages")]
    Empty,

    #[error("Query dimension mismatch: index stores {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index was built with model '{stored}' but embedder is '{active}'")]
    ModelMismatch { stored: String, active: String },

    #[error("Corrupt index at {path:?}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("Index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error(transparent)]
    Embedding(#[from] anyhow::Error),
}

/// One retrieval hit: the passage, its stable index position and its score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPassage {
    /// Position of the passage in the index (insertion order)
    pub index: usize,
    /// Cosine similarity against the query
    pub score: f32,
    pub passage: Passage,
}

/// An ordered set of hits from one query, tagged with the identity of the
/// index snapshot that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub snapshot_id: Uuid,
    /// Hits in descending score order; equal scores keep passage order
    pub hits: Vec<ScoredPassage>,
}

impl RetrievalResult {
    /// Concatenate hit texts into a single prompt context block
    pub fn context_text(&self) -> String {
        self.hits
            .iter()
            .map(|hit| hit.passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Exact-scan vector index over passages
#[derive(Debug, Serialize, Deserialize)]
pub struct VectorIndex {
    passages: Vec<Passage>,
    embeddings: Vec<Vec<f32>>,
    model_name: String,
    dimension: usize,
    snapshot_id: Uuid,
    created_at: DateTime<Utc>,
}

impl VectorIndex {
    /// Build an index by embedding the passages in batches.
    ///
    /// Passage order is preserved exactly; `embeddings[i]` belongs to
    /// `passages[i]`.
    pub async fn build(
        passages: Vec<Passage>,
        embedder: &dyn TextEmbedder,
    ) -> Result<Self, IndexError> {
        let mut embeddings = Vec::with_capacity(passages.len());

        for batch in passages.chunks(EMBED_BATCH) {
            let texts: Vec<&str> = batch.iter().map(|p| p.text.as_str()).collect();
            let mut vectors = embedder.embed_batch(texts).await?;
            embeddings.append(&mut vectors);
        }

        tracing::debug!(
            "Built index: {} passages, model {}",
            passages.len(),
            embedder.model_name()
        );

        Ok(Self {
            passages,
            embeddings,
            model_name: embedder.model_name().to_string(),
            dimension: embedder.dimension(),
            snapshot_id: Uuid::new_v4(),
            created_at: Utc::now(),
        })
    }

    /// Query top-k passages for a precomputed query embedding.
    ///
    /// Results are sorted by descending score; equal scores are broken by
    /// ascending passage index. Returns at most `min(k, len)` hits.
    pub fn query(&self, query_vec: &[f32], k: usize) -> Result<RetrievalResult, IndexError> {
        if self.passages.is_empty() {
            return Err(IndexError::Empty);
        }

        if query_vec.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: query_vec.len(),
            });
        }

        let mut hits: Vec<ScoredPassage> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(index, emb)| ScoredPassage {
                index,
                score: cosine_similarity(query_vec, emb),
                passage: self.passages[index].clone(),
            })
            .collect();

        hits.sort_by_key(|hit| (Reverse(OrderedFloat(hit.score)), hit.index));
        hits.truncate(k.min(self.passages.len()));

        Ok(RetrievalResult {
            snapshot_id: self.snapshot_id,
            hits,
        })
    }

    /// Check that this index was built by the given embedder
    pub fn verify_embedder(&self, embedder: &dyn TextEmbedder) -> Result<(), IndexError> {
        if self.model_name != embedder.model_name() {
            return Err(IndexError::ModelMismatch {
                stored: self.model_name.clone(),
                active: embedder.model_name().to_string(),
            });
        }
        if self.dimension != embedder.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: embedder.dimension(),
            });
        }
        Ok(())
    }

    /// Save as a single bincode blob, written atomically via a temp file
    pub fn save_to(&self, path: &Path) -> Result<(), IndexError> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let data = bincode::serialize(self)?;

        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        std::fs::write(tmp.path(), &data)?;
        tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;

        tracing::debug!("Saved index ({} passages) to {:?}", self.passages.len(), path);
        Ok(())
    }

    /// Load a previously saved index
    pub fn load_from(path: &Path) -> Result<Self, IndexError> {
        let data = std::fs::read(path)?;
        let index: Self = bincode::deserialize(&data).map_err(|e| IndexError::Corrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(index)
    }

    /// Load the index at `path` if present and compatible with `embedder`,
    /// otherwise build from `passages` and save to `path`.
    pub async fn open_or_build(
        path: &Path,
        passages: Vec<Passage>,
        embedder: &dyn TextEmbedder,
    ) -> Result<Arc<Self>, IndexError> {
        if path.exists() {
            let index = Self::load_from(path)?;
            index.verify_embedder(embedder)?;
            tracing::info!("Loaded index from {:?} ({} passages)", path, index.len());
            return Ok(Arc::new(index));
        }

        let index = Self::build(passages, embedder).await?;
        index.save_to(path)?;
        Ok(Arc::new(index))
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn passage(&self, index: usize) -> Option<&Passage> {
        self.passages.get(index)
    }

    /// Stored embedding for the passage at `index`
    pub fn embedding(&self, index: usize) -> Option<&[f32]> {
        self.embeddings.get(index).map(|v| v.as_slice())
    }

    pub fn snapshot_id(&self) -> Uuid {
        self.snapshot_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        passages: Vec<Passage>,
        embeddings: Vec<Vec<f32>>,
        model_name: &str,
        dimension: usize,
    ) -> Self {
        Self {
            passages,
            embeddings,
            model_name: model_name.to_string(),
            dimension,
            snapshot_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NgramEmbedder;

    fn passage(text: &str, source: &str) -> Passage {
        Passage {
            text: text.to_string(),
            source_id: source.to_string(),
            offset: 0,
        }
    }

    #[tokio::test]
    async fn test_build_preserves_order() {
        let embedder = NgramEmbedder::new(3, 64);
        let passages = vec![
            passage("alpha waves during sleep", "doc_a"),
            passage("beta oscillations in cortex", "doc_a"),
            passage("gamma activity and attention", "doc_b"),
        ];

        let index = VectorIndex::build(passages.clone(), &embedder).await.unwrap();

        assert_eq!(index.len(), 3);
        for (i, expected) in passages.iter().enumerate() {
            assert_eq!(index.passage(i).unwrap(), expected);
            assert_eq!(index.embedding(i).unwrap().len(), 64);
        }
    }

    #[tokio::test]
    async fn test_query_ordering_and_cap() {
        let embedder = NgramEmbedder::new(3, 128);
        let passages = vec![
            passage("completely unrelated cooking recipe", "doc_a"),
            passage("sleep spindles and memory consolidation", "doc_a"),
            passage("weather forecast for tomorrow", "doc_b"),
        ];

        let index = VectorIndex::build(passages, &embedder).await.unwrap();
        let query = embedder.embed("sleep spindles and memory consolidation").await.unwrap();

        let result = index.query(&query, 10).unwrap();

        // k is capped at the number of passages
        assert_eq!(result.hits.len(), 3);

        // Exact match ranks first, scores never increase
        assert_eq!(result.hits[0].index, 1);
        for pair in result.hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_query_tie_break_keeps_passage_order() {
        let embedder = NgramEmbedder::new(3, 64);
        // Identical texts embed identically, forcing equal scores
        let passages = vec![
            passage("duplicated passage text", "doc_a"),
            passage("duplicated passage text", "doc_b"),
            passage("duplicated passage text", "doc_c"),
        ];

        let index = VectorIndex::build(passages, &embedder).await.unwrap();
        let query = embedder.embed("duplicated passage text").await.unwrap();

        let result = index.query(&query, 3).unwrap();
        let order: Vec<usize> = result.hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_query_empty_index() {
        let embedder = NgramEmbedder::new(3, 64);
        let index = VectorIndex::build(Vec::new(), &embedder).await.unwrap();
        let query = embedder.embed("anything").await.unwrap();

        assert!(matches!(index.query(&query, 3), Err(IndexError::Empty)));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let embedder = NgramEmbedder::new(3, 64);
        let index = VectorIndex::build(vec![passage("text", "doc")], &embedder)
            .await
            .unwrap();

        let wrong = vec![0.5f32; 32];
        assert!(matches!(
            index.query(&wrong, 3),
            Err(IndexError::DimensionMismatch { expected: 64, got: 32 })
        ));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let embedder = NgramEmbedder::new(3, 64);
        let passages = vec![
            passage("first passage about neurons", "doc_a"),
            passage("second passage about synapses", "doc_a"),
        ];

        let index = VectorIndex::build(passages, &embedder).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        index.save_to(&path).unwrap();

        let loaded = VectorIndex::load_from(&path).unwrap();
        assert_eq!(loaded.snapshot_id(), index.snapshot_id());
        assert_eq!(loaded.model_name(), index.model_name());
        assert_eq!(loaded.len(), index.len());
        loaded.verify_embedder(&embedder).unwrap();

        // Queries answer identically after a reload
        let query = embedder.embed("neurons").await.unwrap();
        let before = index.query(&query, 2).unwrap();
        let after = loaded.query(&query, 2).unwrap();
        assert_eq!(before.snapshot_id, after.snapshot_id);
        for (b, a) in before.hits.iter().zip(&after.hits) {
            assert_eq!(b.index, a.index);
            assert_eq!(b.score, a.score);
            assert_eq!(b.passage, a.passage);
        }
    }

    #[tokio::test]
    async fn test_load_corrupt_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bin");
        std::fs::write(&path, b"not a bincode index").unwrap();

        assert!(matches!(
            VectorIndex::load_from(&path),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_embedder_model_mismatch() {
        let builder = NgramEmbedder::new(3, 64);
        let index = VectorIndex::build(vec![passage("text", "doc")], &builder)
            .await
            .unwrap();

        let other = NgramEmbedder::new(4, 64);
        assert!(matches!(
            index.verify_embedder(&other),
            Err(IndexError::ModelMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_or_build_reuses_snapshot() {
        let embedder = NgramEmbedder::new(3, 64);
        let passages = vec![passage("persistent passage", "doc")];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let first = VectorIndex::open_or_build(&path, passages.clone(), &embedder)
            .await
            .unwrap();
        let second = VectorIndex::open_or_build(&path, passages, &embedder)
            .await
            .unwrap();

        // Second call loads the saved snapshot instead of rebuilding
        assert_eq!(first.snapshot_id(), second.snapshot_id());
    }

    #[test]
    fn test_context_text_joins_hits() {
        let result = RetrievalResult {
            snapshot_id: Uuid::new_v4(),
            hits: vec![
                ScoredPassage {
                    index: 0,
                    score: 0.9,
                    passage: passage("first", "doc"),
                },
                ScoredPassage {
                    index: 1,
                    score: 0.5,
                    passage: passage("second", "doc"),
                },
            ],
        };

        assert_eq!(result.context_text(), "first\n\nsecond");
    }
}
