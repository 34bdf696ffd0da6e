use common::llm::ModelGateway;
use common::storage::db::SurrealDbClient;
use retrieval_pipeline::{retrieve_for_university, RetrievalTuning, UnivParams};
use serde_json::Value;
use tracing::warn;

use super::FunctionOutcome;

/// Run the retrieval function. Failures degrade to an empty marker outcome;
/// the turn continues without this call's evidence.
pub async fn run_univ(
    db: &SurrealDbClient,
    gateway: &dyn ModelGateway,
    params: &UnivParams,
    tuning: &RetrievalTuning,
) -> FunctionOutcome {
    let params_json = serde_json::to_value(params).unwrap_or(Value::Null);

    match retrieve_for_university(db, gateway, params, tuning).await {
        Ok(evidence) => FunctionOutcome {
            name: "univ",
            params: params_json,
            ok: true,
            output: serde_json::to_value(&evidence).unwrap_or(Value::Null),
            chunks: evidence.chunks,
            note: (evidence.count == 0)
                .then(|| format!("{} 관련 문서를 찾지 못했습니다", params.university)),
        },
        Err(e) => {
            warn!(error = %e, university = %params.university, "univ call failed");
            FunctionOutcome {
                name: "univ",
                params: params_json,
                ok: false,
                output: Value::Null,
                chunks: Vec::new(),
                note: Some("자료 검색에 실패했습니다".to_string()),
            }
        }
    }
}
