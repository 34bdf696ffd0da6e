use std::cmp::Ordering;

use common::storage::types::document_chunk::ChunkSearchResult;

/// A candidate chunk carrying both similarity signals: its own cosine score
/// and the document-summary score of the document it belongs to.
#[derive(Debug, Clone)]
pub struct WeightedCandidate {
    pub result: ChunkSearchResult,
    pub document_score: f32,
    pub weighted: f32,
}

/// Chunk-similarity share of the weighted score; the document summary
/// similarity carries the rest.
pub const CHUNK_WEIGHT: f32 = 0.7;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn weighted_score(chunk_score: f32, document_score: f32) -> f32 {
    CHUNK_WEIGHT * chunk_score + (1.0 - CHUNK_WEIGHT) * document_score
}

/// Order candidates best-first. Ties go to the earlier chunk: lower page
/// number first (chunks without a page sort last), then the chunk id for a
/// stable total order.
pub fn sort_candidates(candidates: &mut [WeightedCandidate]) {
    candidates.sort_by(|a, b| {
        b.weighted
            .partial_cmp(&a.weighted)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let page_a = a.result.chunk.page_number.unwrap_or(u32::MAX);
                let page_b = b.result.chunk.page_number.unwrap_or(u32::MAX);
                page_a.cmp(&page_b)
            })
            .then_with(|| a.result.chunk.id.cmp(&b.result.chunk.id))
    });
}
