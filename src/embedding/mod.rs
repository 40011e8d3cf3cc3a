//! Embedding Module
//!
//! Provides text embedding generation behind the [`TextEmbedder`] trait. Two
//! backends are available: FastEmbed (ONNX-based, local inference) for real
//! runs, and a deterministic hashed n-gram embedder for tests and offline use.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{EmbeddingBackend, EmbeddingConfig};

/// Default embedding model
const DEFAULT_MODEL: EmbeddingModel = EmbeddingModel::AllMiniLML6V2;

/// Embedding dimension for AllMiniLML6V2
pub const EMBEDDING_DIMENSION: usize = 384;

/// Text to fixed-dimension vector conversion.
///
/// Implementations must be deterministic: the same text always maps to the
/// same vector for the lifetime of the embedder, and `embed_batch` must
/// return one vector per input in input order.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed multiple texts in batch (more efficient)
    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>>;

    /// Vector dimension produced by this embedder
    fn dimension(&self) -> usize;

    /// Identifier persisted alongside indexes for compatibility checks
    fn model_name(&self) -> &str;
}

/// Embedding engine backed by FastEmbed, with an LRU cache over computed
/// vectors. Inference runs on the blocking thread pool.
pub struct FastEmbedder {
    model: Arc<RwLock<TextEmbedding>>,
    cache: Arc<RwLock<LruCache<String, Vec<f32>>>>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Create a new embedding engine with the default model
    pub async fn new(cache_size: usize) -> Result<Self> {
        Self::with_model(DEFAULT_MODEL, cache_size).await
    }

    /// Create a new embedding engine with a specific model
    pub async fn with_model(embedding_model: EmbeddingModel, cache_size: usize) -> Result<Self> {
        let model_name = format!("{:?}", embedding_model);

        // Initialize FastEmbed model
        let init_options = InitOptions::new(embedding_model);

        let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(init_options))
            .await
            .context("Failed to spawn blocking task")?
            .context("Failed to initialize embedding model")?;

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        let cache = LruCache::new(cache_size);

        Ok(Self {
            model: Arc::new(RwLock::new(model)),
            cache: Arc::new(RwLock::new(cache)),
            model_name,
            dimension: EMBEDDING_DIMENSION,
        })
    }

    /// Clear the cache
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }

    /// Get cache statistics
    pub async fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.read().await;
        (cache.len(), cache.cap().get())
    }
}

#[async_trait]
impl TextEmbedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Check cache first
        {
            let mut cache = self.cache.write().await;
            if let Some(cached) = cache.get(text) {
                return Ok(cached.clone());
            }
        }

        // Generate embedding
        let text_owned = text.to_string();
        let model = self.model.clone();

        let embeddings = tokio::task::spawn_blocking(move || {
            let model_guard = futures::executor::block_on(model.read());
            model_guard.embed(vec![text_owned], None)
        })
        .await
        .context("Failed to spawn blocking task")?
        .context("Failed to generate embedding")?;

        if embeddings.is_empty() {
            anyhow::bail!("No embedding generated");
        }

        let embedding = embeddings[0].clone();

        // Cache the result
        {
            let mut cache = self.cache.write().await;
            cache.put(text.to_string(), embedding.clone());
        }

        Ok(embedding)
    }

    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        let mut to_embed = Vec::new();
        let mut to_embed_indices = Vec::new();

        // Check cache for each text
        {
            let mut cache = self.cache.write().await;
            for (i, text) in texts.iter().enumerate() {
                if let Some(cached) = cache.get(*text) {
                    results.push(cached.clone());
                } else {
                    to_embed.push(text.to_string());
                    to_embed_indices.push(i);
                    results.push(Vec::new()); // Placeholder
                }
            }
        }

        // Embed texts that weren't in cache
        if !to_embed.is_empty() {
            let model = self.model.clone();
            let to_embed_copy = to_embed.clone();

            let embeddings = tokio::task::spawn_blocking(move || {
                let model_guard = futures::executor::block_on(model.read());
                model_guard.embed(to_embed_copy, None)
            })
            .await
            .context("Failed to spawn blocking task")?
            .context("Failed to generate embeddings")?;

            // Update cache and results
            {
                let mut cache = self.cache.write().await;
                for (i, embedding) in embeddings.into_iter().enumerate() {
                    let text = &to_embed[i];
                    let idx = to_embed_indices[i];

                    cache.put(text.clone(), embedding.clone());
                    results[idx] = embedding;
                }
            }
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Deterministic embedder based on hashed character n-grams.
///
/// No model download, no I/O. Two instances with the same parameters produce
/// identical vectors for identical texts, across processes and runs. Useful
/// for tests and for fully reproducible offline pipelines; retrieval quality
/// is lexical rather than semantic.
pub struct NgramEmbedder {
    ngram_size: usize,
    dimension: usize,
    model_name: String,
}

impl NgramEmbedder {
    pub fn new(ngram_size: usize, dimension: usize) -> Self {
        let ngram_size = ngram_size.max(1);
        let dimension = dimension.max(1);
        Self {
            ngram_size,
            dimension,
            model_name: format!("char-ngram-{}-{}", ngram_size, dimension),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        if chars.len() < self.ngram_size {
            // Short texts hash as a single gram
            if !chars.is_empty() {
                let bucket = Self::hash_gram(&chars) % self.dimension as u64;
                vector[bucket as usize] += 1.0;
            }
        } else {
            for window in chars.windows(self.ngram_size) {
                let bucket = Self::hash_gram(window) % self.dimension as u64;
                vector[bucket as usize] += 1.0;
            }
        }

        normalize(&mut vector);
        vector
    }

    // DefaultHasher with default keys is stable for a given input,
    // which keeps vectors reproducible across processes.
    fn hash_gram(gram: &[char]) -> u64 {
        let mut hasher = DefaultHasher::new();
        gram.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl TextEmbedder for NgramEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Build the embedder selected by configuration
pub async fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn TextEmbedder>> {
    match config.backend {
        EmbeddingBackend::FastEmbed => {
            let embedder = FastEmbedder::new(config.cache_size).await?;
            Ok(Arc::new(embedder))
        }
        EmbeddingBackend::Ngram => Ok(Arc::new(NgramEmbedder::new(
            config.ngram_size,
            config.ngram_dimension,
        ))),
    }
}

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Normalize an embedding vector in place
pub fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in embedding.iter_mut() {
            *val /= norm;
        }
    }
}
