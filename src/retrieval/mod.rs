//! Hybrid retrieval
//!
//! Lexical and vector search run concurrently against an external index,
//! then get fused, filtered and truncated to `top_k`.

use crate::config::RetrievalConfig;
use crate::error::GenerationError;
use crate::models::{RetrievedChunk, Scope, SearchResult};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod fusion;
pub mod memory;
pub mod packer;

pub use fusion::{fuse, finalize, rrf_score, FusionParams};
pub use memory::{HashingEmbedder, InMemoryIndex};
pub use packer::{estimate_tokens, pack_context};

/// External search index (lexical + vector).
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn lexical_search(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<SearchResult>>;

    async fn vector_search(&self, scope: &Scope, embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>>;
}

/// Text embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct HybridRetriever {
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(index: Arc<dyn SearchIndex>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Up to `top_k` chunks ranked by fused relevance.
    ///
    /// One failing search degrades to the other list; both failing is an error.
    pub async fn retrieve(&self, scope: &Scope, query: &str) -> Result<Vec<RetrievedChunk>> {
        let query = query.trim();
        if query.is_empty() || self.config.top_k == 0 {
            return Ok(Vec::new());
        }

        let limit = self.config.candidate_limit.max(self.config.top_k);

        let lexical = self.index.lexical_search(scope, query, limit);
        let vector = async {
            let embedding = self.embedder.embed(query).await?;
            self.index.vector_search(scope, &embedding, limit).await
        };

        let (lexical, vector) = tokio::join!(lexical, vector);

        let (lexical, vector) = match (lexical, vector) {
            (Ok(l), Ok(v)) => (l, v),
            (Ok(l), Err(e)) => {
                warn!(error = %e, "Vector search failed, using lexical results only");
                (l, Vec::new())
            }
            (Err(e), Ok(v)) => {
                warn!(error = %e, "Lexical search failed, using vector results only");
                (Vec::new(), v)
            }
            (Err(lex_err), Err(vec_err)) => {
                return Err(GenerationError::Retrieval(format!(
                    "lexical: {}; vector: {}",
                    lex_err, vec_err
                )));
            }
        };

        debug!(
            lexical_hits = lexical.len(),
            vector_hits = vector.len(),
            "Fusing retrieval results"
        );

        let params = FusionParams {
            mode: self.config.fusion,
            rrf_k: self.config.rrf_k,
            lexical_weight: self.config.lexical_weight,
            vector_weight: self.config.vector_weight,
        };

        let fused = fuse(lexical, vector, &params);
        Ok(finalize(fused, self.config.min_score, self.config.top_k))
    }
}

/// Lower-cased alphanumeric tokens.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use uuid::Uuid;

    struct FailingIndex {
        fail_lexical: bool,
        fail_vector: bool,
        inner: InMemoryIndex,
    }

    #[async_trait]
    impl SearchIndex for FailingIndex {
        async fn lexical_search(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
            if self.fail_lexical {
                return Err(GenerationError::Retrieval("lexical down".to_string()));
            }
            self.inner.lexical_search(scope, query, limit).await
        }

        async fn vector_search(&self, scope: &Scope, embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
            if self.fail_vector {
                return Err(GenerationError::Retrieval("vector down".to_string()));
            }
            self.inner.vector_search(scope, embedding, limit).await
        }
    }

    fn scope(tenant_id: Uuid) -> Scope {
        Scope {
            tenant_id,
            user_id: Uuid::new_v4(),
            document_ids: vec![],
        }
    }

    async fn seeded_index(tenant_id: Uuid) -> InMemoryIndex {
        let index = InMemoryIndex::new();
        let docs = [
            ("c1", "Subscription pricing for small bakeries starts at 49 dollars per month."),
            ("c2", "Churn in the bakery segment averages five percent monthly."),
            ("c3", "The weather in Lisbon is mild during spring."),
        ];
        for (i, (id, text)) in docs.iter().enumerate() {
            index
                .insert(
                    tenant_id,
                    id,
                    text,
                    ChunkMetadata {
                        document_id: "handbook".to_string(),
                        document_name: "Bakery Handbook".to_string(),
                        chunk_index: i as u32,
                        page: Some(i as u32 + 1),
                        section: None,
                        url: None,
                    },
                )
                .await;
        }
        index
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_chunks() {
        let tenant = Uuid::new_v4();
        let index = Arc::new(seeded_index(tenant).await);
        let retriever = HybridRetriever::new(index, Arc::new(HashingEmbedder::default()), RetrievalConfig::default());

        let chunks = retriever.retrieve(&scope(tenant), "bakery churn").await.unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].id, "c2");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.rank, i + 1);
        }
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let tenant = Uuid::new_v4();
        let index = Arc::new(seeded_index(tenant).await);
        let retriever = HybridRetriever::new(index, Arc::new(HashingEmbedder::default()), RetrievalConfig::default());

        let chunks = retriever.retrieve(&scope(Uuid::new_v4()), "bakery churn").await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_search_degrades() {
        let tenant = Uuid::new_v4();
        let index = Arc::new(FailingIndex {
            fail_lexical: false,
            fail_vector: true,
            inner: seeded_index(tenant).await,
        });
        let retriever = HybridRetriever::new(index, Arc::new(HashingEmbedder::default()), RetrievalConfig::default());

        let chunks = retriever.retrieve(&scope(tenant), "subscription pricing").await.unwrap();
        assert_eq!(chunks[0].id, "c1");
    }

    #[tokio::test]
    async fn test_both_failing_is_an_error() {
        let tenant = Uuid::new_v4();
        let index = Arc::new(FailingIndex {
            fail_lexical: true,
            fail_vector: true,
            inner: seeded_index(tenant).await,
        });
        let retriever = HybridRetriever::new(index, Arc::new(HashingEmbedder::default()), RetrievalConfig::default());

        let result = retriever.retrieve(&scope(tenant), "bakery").await;
        assert!(matches!(result, Err(GenerationError::Retrieval(_))));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("SaaS, 2024-growth!"), vec!["saas", "2024", "growth"]);
    }
}
