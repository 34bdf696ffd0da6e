//! The `univ` knowledge function: school-filtered vector retrieval over the
//! admissions corpus with document-level re-ranking and a token-budgeted
//! chunk selection.

pub mod budget;
pub mod scoring;

use std::collections::HashMap;

use common::{
    error::AppError,
    evidence::EvidenceChunk,
    llm::ModelGateway,
    storage::{
        db::SurrealDbClient,
        types::{document::DocumentMetadata, document_chunk::DocumentChunk},
    },
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use budget::{admit_within_budget, estimated_tokens};
use scoring::{cosine_similarity, sort_candidates, weighted_score, WeightedCandidate};

/// Arguments of one `univ` invocation, as planned by the router. The query is
/// self-contained: the router resolves pronouns against history before
/// emitting it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnivParams {
    pub university: String,
    pub query: String,
}

/// Tunable parameters that govern each retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTuning {
    pub chunk_vector_take: usize,
    pub token_budget: usize,
    pub avg_chars_per_token: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            chunk_vector_take: 30,
            token_budget: 6000,
            avg_chars_per_token: 2,
        }
    }
}

/// What one `univ` call hands the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnivEvidence {
    pub chunks: Vec<EvidenceChunk>,
    pub count: usize,
    pub university: String,
    pub query: String,
}

impl UnivEvidence {
    pub fn empty(params: &UnivParams) -> Self {
        Self {
            chunks: Vec::new(),
            count: 0,
            university: params.university.clone(),
            query: params.query.clone(),
        }
    }
}

/// Run the retrieval pipeline for one (university, query) pair:
/// filter → embed → vector search → document rescore → rank → budget.
#[instrument(skip_all, fields(university = %params.university))]
pub async fn retrieve_for_university(
    db: &SurrealDbClient,
    gateway: &dyn ModelGateway,
    params: &UnivParams,
    tuning: &RetrievalTuning,
) -> Result<UnivEvidence, AppError> {
    let documents = DocumentMetadata::list_by_school(&params.university, db).await?;
    if documents.is_empty() {
        info!("No documents for school, returning empty evidence");
        return Ok(UnivEvidence::empty(params));
    }

    let query_embedding = gateway.embed(&params.query).await?;

    let document_ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
    let hits = DocumentChunk::vector_search_in_documents(
        tuning.chunk_vector_take,
        query_embedding.clone(),
        document_ids,
        db,
    )
    .await?;

    let documents_by_id: HashMap<&str, &DocumentMetadata> = documents
        .iter()
        .map(|doc| (doc.id.as_str(), doc))
        .collect();

    // Blend each chunk's own similarity with its document-summary similarity;
    // chunks with no positive similarity of their own never qualify.
    let mut document_scores: HashMap<&str, f32> = HashMap::new();
    let mut candidates: Vec<WeightedCandidate> = Vec::new();
    for hit in hits {
        if hit.score <= 0.0 {
            continue;
        }
        let Some(document) = documents_by_id.get(hit.chunk.document_id.as_str()) else {
            continue;
        };

        let document_score = *document_scores
            .entry(document.id.as_str())
            .or_insert_with(|| cosine_similarity(&query_embedding, &document.summary_embedding));

        candidates.push(WeightedCandidate {
            weighted: weighted_score(hit.score, document_score),
            document_score,
            result: hit,
        });
    }

    sort_candidates(&mut candidates);

    let admitted = admit_within_budget(
        candidates,
        tuning.token_budget,
        tuning.avg_chars_per_token,
        |candidate| candidate.result.chunk.content.as_str(),
    );

    let spent: usize = admitted
        .iter()
        .map(|c| estimated_tokens(&c.result.chunk.content, tuning.avg_chars_per_token))
        .sum();
    info!(
        candidates = admitted.len(),
        token_estimate = spent,
        "Retrieval pipeline complete"
    );

    let chunks: Vec<EvidenceChunk> = admitted
        .into_iter()
        .filter_map(|candidate| {
            let document = documents_by_id.get(candidate.result.chunk.document_id.as_str())?;
            Some(EvidenceChunk {
                content: candidate.result.chunk.content,
                title: document.title.clone(),
                source: format!("{} {}", document.school_name, document.title),
                file_url: document.file_url.clone(),
                page: candidate.result.chunk.page_number,
                similarity: Some(candidate.weighted),
            })
        })
        .collect();

    Ok(UnivEvidence {
        count: chunks.len(),
        university: params.university.clone(),
        query: params.query.clone(),
        chunks,
    })
}
