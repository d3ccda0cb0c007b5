//! In-memory search index and deterministic embedder
//!
//! For local runs and tests. Production deployments plug an external
//! index in behind `SearchIndex`.

use super::{tokenize, Embedder, SearchIndex};
use crate::models::{ChunkMetadata, Scope, SearchResult};
use crate::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_DIMENSIONS: usize = 256;

/// Feature-hashing embedder: bag of tokens folded into a fixed-size,
/// L2-normalised vector. Same text always gives the same vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let slot = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            vector[slot] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    id: String,
    content: String,
    tokens: Vec<String>,
    embedding: Vec<f32>,
    metadata: ChunkMetadata,
}

/// Tenant-partitioned chunk store.
pub struct InMemoryIndex {
    embedder: HashingEmbedder,
    chunks: Arc<RwLock<HashMap<Uuid, Vec<IndexedChunk>>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::with_embedder(HashingEmbedder::default())
    }

    pub fn with_embedder(embedder: HashingEmbedder) -> Self {
        Self {
            embedder,
            chunks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, tenant_id: Uuid, id: &str, content: &str, metadata: ChunkMetadata) {
        let chunk = IndexedChunk {
            id: id.to_string(),
            content: content.to_string(),
            tokens: tokenize(content),
            embedding: self.embedder.vectorize(content),
            metadata,
        };

        let mut chunks = self.chunks.write().await;
        let tenant = chunks.entry(tenant_id).or_insert_with(Vec::new);
        tenant.retain(|c| c.id != chunk.id);
        tenant.push(chunk);
    }

    pub async fn len(&self, tenant_id: Uuid) -> usize {
        let chunks = self.chunks.read().await;
        chunks.get(&tenant_id).map(|c| c.len()).unwrap_or(0)
    }

    async fn scored<F>(&self, scope: &Scope, limit: usize, score: F) -> Vec<SearchResult>
    where
        F: Fn(&IndexedChunk) -> f64,
    {
        let chunks = self.chunks.read().await;
        let Some(tenant) = chunks.get(&scope.tenant_id) else {
            return Vec::new();
        };

        let mut hits: Vec<SearchResult> = tenant
            .iter()
            .filter(|c| scope.document_ids.is_empty() || scope.document_ids.contains(&c.metadata.document_id))
            .map(|c| (c, score(c)))
            .filter(|(_, s)| *s > 0.0)
            .map(|(c, s)| SearchResult {
                id: c.id.clone(),
                score: s,
                content: c.content.clone(),
                metadata: c.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(limit);
        hits
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn lexical_search(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .scored(scope, limit, |chunk| {
                // saturating term frequency, tf / (tf + 1)
                terms
                    .iter()
                    .map(|t| {
                        let tf = chunk.tokens.iter().filter(|tok| *tok == t).count() as f64;
                        tf / (tf + 1.0)
                    })
                    .sum()
            })
            .await)
    }

    async fn vector_search(&self, scope: &Scope, embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        Ok(self
            .scored(scope, limit, |chunk| cosine(&chunk.embedding, embedding) as f64)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(document_id: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: document_id.to_string(),
            document_name: document_id.to_uppercase(),
            chunk_index: 0,
            page: None,
            section: None,
            url: None,
        }
    }

    #[test]
    fn test_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::default();
        let a = embedder.vectorize("market size for coffee");
        let b = embedder.vectorize("market size for coffee");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(embedder.vectorize("").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_document_scope_filter() {
        let tenant = Uuid::new_v4();
        let index = InMemoryIndex::new();
        index.insert(tenant, "a", "coffee roasting margins", metadata("deck")).await;
        index.insert(tenant, "b", "coffee shop leases", metadata("lease")).await;

        let scope = Scope {
            tenant_id: tenant,
            user_id: Uuid::new_v4(),
            document_ids: vec!["lease".to_string()],
        };
        let hits = index.lexical_search(&scope, "coffee", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_reinsert_replaces_chunk() {
        let tenant = Uuid::new_v4();
        let index = InMemoryIndex::new();
        index.insert(tenant, "a", "first", metadata("deck")).await;
        index.insert(tenant, "a", "second", metadata("deck")).await;
        assert_eq!(index.len(tenant).await, 1);
    }
}
