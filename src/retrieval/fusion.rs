//! Rank fusion for hybrid retrieval
//!
//! Both inputs are ranked lists (index 0 is rank 1). Fused output is sorted
//! by descending score and carries sequential 1-indexed ranks.

use crate::config::FusionMode;
use crate::models::{RetrievedChunk, SearchResult};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

pub struct FusionParams {
    pub mode: FusionMode,
    pub rrf_k: f64,
    pub lexical_weight: f64,
    pub vector_weight: f64,
}

struct Candidate {
    result: SearchResult,
    fused_score: f64,
    first_seen: usize,
}

pub fn rrf_score(k: f64, rank: usize, weight: f64) -> f64 {
    weight / (k + rank as f64)
}

/// Fuse lexical and vector lists. Results present in both lists accumulate
/// both contributions.
pub fn fuse(lexical: Vec<SearchResult>, vector: Vec<SearchResult>, params: &FusionParams) -> Vec<RetrievedChunk> {
    let mut map: HashMap<String, Candidate> = HashMap::new();
    let mut seen = 0usize;

    for (list, weight) in [
        (lexical, params.lexical_weight),
        (vector, params.vector_weight),
    ] {
        let mut in_this_list = HashSet::new();

        for (idx, result) in list.into_iter().enumerate() {
            // a list repeating an id only counts its best rank
            if !in_this_list.insert(result.id.clone()) {
                continue;
            }

            let contribution = match params.mode {
                FusionMode::ReciprocalRank => rrf_score(params.rrf_k, idx + 1, weight),
                FusionMode::WeightedScore => weight * result.score,
            };

            let entry = map.entry(result.id.clone()).or_insert_with(|| {
                seen += 1;
                Candidate {
                    result,
                    fused_score: 0.0,
                    first_seen: seen,
                }
            });
            entry.fused_score += contribution;
        }
    }

    let mut candidates: Vec<Candidate> = map.into_values().collect();
    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(Ordering::Equal)
            .then(a.first_seen.cmp(&b.first_seen))
    });

    candidates
        .into_iter()
        .enumerate()
        .map(|(idx, c)| RetrievedChunk {
            id: c.result.id,
            rank: idx + 1,
            score: c.fused_score,
            content: c.result.content,
            metadata: c.result.metadata,
        })
        .collect()
}

/// Dedupe by id, drop low scores, truncate, and re-rank 1..=n.
pub fn finalize(chunks: Vec<RetrievedChunk>, min_score: f64, top_k: usize) -> Vec<RetrievedChunk> {
    let mut seen = HashSet::new();

    chunks
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .filter(|c| c.score >= min_score)
        .take(top_k)
        .enumerate()
        .map(|(idx, mut c)| {
            c.rank = idx + 1;
            c
        })
        .collect()
}
