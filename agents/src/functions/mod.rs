pub mod consult;
pub mod univ;

use common::evidence::EvidenceChunk;
use common::llm::ModelGateway;
use common::storage::db::SurrealDbClient;
use retrieval_pipeline::RetrievalTuning;
use score_engine::BandDeltas;
use serde_json::Value;

use crate::plan::FunctionCall;

/// Result of one dispatched function call. Failed or empty calls still
/// produce an outcome (a marker entry), so the synthesizer sees the full
/// plan shape in order.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionOutcome {
    pub name: &'static str,
    pub params: Value,
    pub ok: bool,
    /// Function-specific payload handed to the synthesizer as evidence JSON.
    pub output: Value,
    pub chunks: Vec<EvidenceChunk>,
    pub note: Option<String>,
}

impl FunctionOutcome {
    pub fn marker(call: &FunctionCall, note: impl Into<String>) -> Self {
        Self {
            name: call.name(),
            params: serde_json::to_value(call).unwrap_or(Value::Null),
            ok: false,
            output: Value::Null,
            chunks: Vec::new(),
            note: Some(note.into()),
        }
    }
}

/// Execute one planned call against its backing component.
pub async fn execute_call(
    db: &SurrealDbClient,
    gateway: &dyn ModelGateway,
    call: &FunctionCall,
    tuning: &RetrievalTuning,
    band_deltas: &BandDeltas,
) -> FunctionOutcome {
    match call {
        FunctionCall::Univ(params) => univ::run_univ(db, gateway, params, tuning).await,
        FunctionCall::Consult(params) => consult::run_consult(params, band_deltas),
    }
}
