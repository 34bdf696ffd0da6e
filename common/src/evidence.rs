use serde::{Deserialize, Serialize};

/// A single quotable evidence fragment handed to the synthesizer. Retrieval
/// chunks carry page and similarity; consult chunks are synthetic text blocks
/// without either.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceChunk {
    pub content: String,
    pub title: String,
    pub source: String,
    pub file_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// What the synthesizer is allowed to cite. Derived from evidence chunks;
/// anything outside this set is rejected during citation validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CitationDescriptor {
    pub title: String,
    pub source: String,
    pub file_url: String,
    pub page: Option<u32>,
}

impl EvidenceChunk {
    pub fn descriptor(&self) -> CitationDescriptor {
        CitationDescriptor {
            title: self.title.clone(),
            source: self.source.clone(),
            file_url: self.file_url.clone(),
            page: self.page,
        }
    }
}
