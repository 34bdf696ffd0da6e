use std::collections::HashSet;

use retrieval_pipeline::UnivParams;
use score_engine::{Band, ScoreSnapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hard cap on function calls per turn; the router's excess is truncated.
pub const MAX_PLAN_CALLS: usize = 6;

/// Arguments of one `consult` invocation. Everything but the scores may be
/// empty; a consult without any usable score is dropped before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsultParams {
    #[serde(default)]
    pub scores: ScoreSnapshot,
    #[serde(default)]
    pub target_univ: Vec<String>,
    #[serde(default)]
    pub target_major: Vec<String>,
    #[serde(default)]
    pub target_range: Vec<Band>,
}

/// One planned function invocation, tagged the way the router emits it:
/// `{"function": "univ", "params": {…}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", content = "params", rename_all = "lowercase")]
pub enum FunctionCall {
    Univ(UnivParams),
    Consult(ConsultParams),
}

impl FunctionCall {
    pub const fn name(&self) -> &'static str {
        match self {
            FunctionCall::Univ(_) => "univ",
            FunctionCall::Consult(_) => "consult",
        }
    }
}

/// The router's ordered invocation plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.function_calls.is_empty()
    }
}

/// Models wrap JSON in markdown fences or lead-in prose more often than not.
/// Keep everything from the first `{` to the last `}`.
fn strip_model_artifacts(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end >= start).then(|| raw.get(start..=end)).flatten()
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    function_calls: Vec<serde_json::Value>,
}

fn parse_raw_plan(text: &str) -> Option<RawPlan> {
    serde_json::from_str::<RawPlan>(text).ok()
}

/// Parse the router's output into a plan. Tolerant by contract: one repair
/// attempt (artifact stripping), unknown function names and malformed
/// parameter payloads dropped silently, duplicates removed, size capped.
/// Anything beyond repair yields the empty plan.
pub fn parse_plan(raw: &str) -> Plan {
    let parsed = parse_raw_plan(raw.trim()).or_else(|| {
        let repaired = strip_model_artifacts(raw)?;
        parse_raw_plan(repaired)
    });

    let Some(raw_plan) = parsed else {
        debug!("Router output was not valid JSON after repair, using empty plan");
        return Plan::default();
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut function_calls = Vec::new();

    for value in raw_plan.function_calls {
        let Ok(call) = serde_json::from_value::<FunctionCall>(value.clone()) else {
            debug!(%value, "Dropping unrecognized function call from plan");
            continue;
        };

        // Duplicate = same function and identical parameters
        let fingerprint = serde_json::to_string(&call).unwrap_or_default();
        if !seen.insert(fingerprint) {
            continue;
        }

        function_calls.push(call);
        if function_calls.len() == MAX_PLAN_CALLS {
            break;
        }
    }

    Plan { function_calls }
}

#[cfg(test)]
mod tests {
    use super::*;
    use score_engine::{Subject, SubjectScore};

    fn univ_call_json(university: &str) -> String {
        format!(
            r#"{{"function":"univ","params":{{"university":"{university}","query":"2026학년도 정시 모집인원"}}}}"#
        )
    }

    #[test]
    fn parses_a_univ_plan() {
        let raw = format!(r#"{{"function_calls":[{}]}}"#, univ_call_json("서울대학교"));
        let plan = parse_plan(&raw);

        assert_eq!(plan.function_calls.len(), 1);
        match &plan.function_calls[0] {
            FunctionCall::Univ(params) => {
                assert_eq!(params.university, "서울대학교");
                assert!(params.query.contains("모집인원"));
            }
            other => panic!("expected univ call, got {other:?}"),
        }
    }

    #[test]
    fn parses_a_consult_plan_with_korean_subject_keys() {
        let raw = r#"{"function_calls":[{"function":"consult","params":{
            "scores": {"국어": {"grade": 1}, "수학": {"grade": 2}},
            "target_univ": ["연세대학교"],
            "target_range": ["적정", "소신"]
        }}]}"#;

        let plan = parse_plan(raw);
        assert_eq!(plan.function_calls.len(), 1);
        match &plan.function_calls[0] {
            FunctionCall::Consult(params) => {
                assert_eq!(
                    params.scores.get(Subject::Korean),
                    Some(&SubjectScore::from_grade(1))
                );
                assert_eq!(params.target_univ, vec!["연세대학교"]);
                assert_eq!(params.target_range, vec![Band::Fit, Band::Reach]);
            }
            other => panic!("expected consult call, got {other:?}"),
        }
    }

    #[test]
    fn strips_markdown_fences_before_parsing() {
        let raw = format!(
            "```json\n{{\"function_calls\":[{}]}}\n```",
            univ_call_json("고려대학교")
        );
        let plan = parse_plan(&raw);
        assert_eq!(plan.function_calls.len(), 1);
    }

    #[test]
    fn strips_lead_in_prose_before_parsing() {
        let raw = format!(
            "다음과 같이 계획했습니다: {{\"function_calls\":[{}]}}",
            univ_call_json("서강대학교")
        );
        let plan = parse_plan(&raw);
        assert_eq!(plan.function_calls.len(), 1);
    }

    #[test]
    fn garbage_yields_the_empty_plan() {
        assert!(parse_plan("죄송하지만 함수를 호출할 수 없습니다").is_empty());
        assert!(parse_plan("").is_empty());
        assert!(parse_plan("{not json").is_empty());
    }

    #[test]
    fn unknown_functions_are_dropped_silently() {
        let raw = format!(
            r#"{{"function_calls":[
                {{"function":"web_search","params":{{"query":"서울대"}}}},
                {}
            ]}}"#,
            univ_call_json("서울대학교")
        );

        let plan = parse_plan(&raw);
        assert_eq!(plan.function_calls.len(), 1);
        assert_eq!(plan.function_calls[0].name(), "univ");
    }

    #[test]
    fn duplicates_are_removed_and_order_preserved() {
        let raw = format!(
            r#"{{"function_calls":[{}, {}, {}]}}"#,
            univ_call_json("서울대학교"),
            univ_call_json("서울대학교"),
            univ_call_json("연세대학교")
        );

        let plan = parse_plan(&raw);
        assert_eq!(plan.function_calls.len(), 2);
        match (&plan.function_calls[0], &plan.function_calls[1]) {
            (FunctionCall::Univ(first), FunctionCall::Univ(second)) => {
                assert_eq!(first.university, "서울대학교");
                assert_eq!(second.university, "연세대학교");
            }
            other => panic!("expected two univ calls, got {other:?}"),
        }
    }

    #[test]
    fn plans_are_truncated_to_the_call_cap() {
        let calls: Vec<String> = (0..10).map(|i| univ_call_json(&format!("대학{i}"))).collect();
        let raw = format!(r#"{{"function_calls":[{}]}}"#, calls.join(","));

        let plan = parse_plan(&raw);
        assert_eq!(plan.function_calls.len(), MAX_PLAN_CALLS);
    }

    #[test]
    fn plan_round_trips_through_serialization() {
        let raw = format!(
            r#"{{"function_calls":[{}, {{"function":"consult","params":{{"scores":{{"영어":{{"grade":1}}}}}}}}]}}"#,
            univ_call_json("한양대학교")
        );

        let plan = parse_plan(&raw);
        let serialized = serde_json::to_string(&plan).expect("serialize plan");
        let reparsed = parse_plan(&serialized);

        assert_eq!(plan, reparsed);
    }
}
