//! Retriever: embeds a query and delegates to the vector index.

use std::sync::Arc;

use crate::embedding::TextEmbedder;

use super::{IndexError, RetrievalResult, VectorIndex};

/// Couples an index snapshot with the embedder that built it
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn TextEmbedder>,
}

impl Retriever {
    /// Create a retriever, rejecting embedders the index was not built with
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Result<Self, IndexError> {
        index.verify_embedder(embedder.as_ref())?;
        Ok(Self { index, embedder })
    }

    /// Embed the query text and return the top-k passages
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult, IndexError> {
        let query_vec = self.embedder.embed(query).await?;
        self.index.query(&query_vec, k)
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn TextEmbedder> {
        &self.embedder
    }
}
