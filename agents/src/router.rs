use common::llm::{ModelGateway, StructuredRequest};
use common::storage::types::message::{format_history, Message};
use serde_json::{json, Value};
use tracing::{error, info, instrument};

use crate::plan::{parse_plan, Plan, MAX_PLAN_CALLS};

/// Router instructions. The model sees the callable functions, the canonical
/// university list is appended per request, and the output contract is JSON
/// only — anything else is repaired or discarded by the parser.
const ROUTER_SYSTEM_PROMPT: &str = r#"당신은 대입 상담 서비스의 라우터입니다. 사용자의 발화와 대화 이력을 읽고, 답변에 필요한 지식 함수 호출 계획을 JSON으로만 출력하세요.

사용 가능한 함수:

1. "univ" — 대학 공식 자료(모집요강, 입시결과 등) 검색.
   params: {"university": "<대학 정식 명칭>", "query": "<검색 질의>"}
   - university는 아래 제공되는 대학 목록의 정식 명칭만 사용합니다.
   - query는 그 자체로 완결된 문장이어야 합니다. "거기", "그 학과" 같은
     대명사는 대화 이력을 보고 실제 대상으로 풀어서 쓰세요.

2. "consult" — 성적 기반 지원 가능성 분석.
   params: {"scores": {"국어": {"grade": 1}, ...}, "target_univ": [...], "target_major": [...], "target_range": [...]}
   - scores의 과목 키: 국어, 수학, 영어, 탐구1, 탐구2, 한국사.
   - 각 과목은 grade(등급), standard_score(표준점수), percentile(백분위),
     elective(선택과목) 중 아는 값만 채웁니다.
   - "11232" 같은 축약 표기는 국어-수학-영어-탐구1-탐구2 등급 순서입니다.
   - target_range 값: "안정", "적정", "소신", "도전".

규칙:
- 함수 호출이 필요 없는 잡담이면 {"function_calls": []}를 출력합니다.
- 최대 6개의 호출만 계획합니다.
- JSON 외의 설명 문구는 절대 출력하지 않습니다."#;

/// Everything the router reads for one turn.
pub struct RouterInput<'a> {
    pub utterance: &'a str,
    pub history: &'a [Message],
    pub image_description: Option<&'a str>,
    pub known_universities: &'a [String],
}

/// Response schema for the plan. Deliberately non-strict: consult score maps
/// are keyed by subject name, which strict mode cannot express.
fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "function_calls": {
                "type": "array",
                "maxItems": MAX_PLAN_CALLS,
                "items": {
                    "type": "object",
                    "properties": {
                        "function": { "type": "string", "enum": ["univ", "consult"] },
                        "params": { "type": "object" }
                    },
                    "required": ["function", "params"]
                }
            }
        },
        "required": ["function_calls"]
    })
}

fn build_user_message(input: &RouterInput<'_>) -> String {
    let mut message = String::new();

    message.push_str("대학 목록:\n==================\n");
    message.push_str(&input.known_universities.join(", "));
    message.push('\n');

    message.push_str("\n대화 이력:\n==================\n");
    message.push_str(&format_history(input.history));
    message.push('\n');

    if let Some(description) = input.image_description {
        message.push_str("\n첨부 이미지 설명:\n==================\n");
        message.push_str(description);
        message.push('\n');
    }

    message.push_str("\n사용자 발화:\n==================\n");
    message.push_str(input.utterance);

    message
}

/// Plan the turn. Model failures and unparseable output both degrade to the
/// empty plan; the orchestrator then synthesizes with zero evidence.
#[instrument(skip_all)]
pub async fn plan_turn(gateway: &dyn ModelGateway, input: RouterInput<'_>) -> Plan {
    let request = StructuredRequest {
        system_prompt: ROUTER_SYSTEM_PROMPT.to_string(),
        user_message: build_user_message(&input),
        schema_name: "invocation_plan",
        schema_description: "Ordered knowledge-function invocation plan",
        schema: plan_schema(),
        strict: false,
    };

    match gateway.complete_structured(request).await {
        Ok(raw) => {
            let plan = parse_plan(&raw);
            info!(calls = plan.function_calls.len(), "Router produced a plan");
            plan
        }
        Err(e) => {
            error!(error = %e, "Router model call failed, using empty plan");
            Plan::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::error::AppError;
    use common::llm::{ImageAttachment, StreamRequest, TextStream};
    use common::storage::types::message::MessageRole;

    struct ScriptedRouter(Result<String, ()>);

    #[async_trait]
    impl ModelGateway for ScriptedRouter {
        async fn complete_structured(
            &self,
            request: StructuredRequest,
        ) -> Result<String, AppError> {
            assert_eq!(request.schema_name, "invocation_plan");
            assert!(!request.strict);
            self.0
                .clone()
                .map_err(|()| AppError::Internal("scripted failure".into()))
        }

        async fn stream_completion(
            &self,
            _request: StreamRequest,
        ) -> Result<TextStream, AppError> {
            Err(AppError::Internal("not used".into()))
        }

        async fn embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
            Err(AppError::Internal("not used".into()))
        }

        async fn describe_image(&self, _image: &ImageAttachment) -> Result<String, AppError> {
            Err(AppError::Internal("not used".into()))
        }
    }

    fn input_with<'a>(
        utterance: &'a str,
        history: &'a [Message],
        universities: &'a [String],
    ) -> RouterInput<'a> {
        RouterInput {
            utterance,
            history,
            image_description: None,
            known_universities: universities,
        }
    }

    #[tokio::test]
    async fn scripted_plan_is_parsed() {
        let gateway = ScriptedRouter(Ok(r#"{"function_calls":[{"function":"univ","params":{"university":"서울대학교","query":"2026학년도 정시 컴퓨터공학부 모집인원"}}]}"#.to_string()));
        let universities = vec!["서울대학교".to_string()];

        let plan = plan_turn(&gateway, input_with("서울대 모집인원?", &[], &universities)).await;
        assert_eq!(plan.function_calls.len(), 1);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_empty_plan() {
        let gateway = ScriptedRouter(Err(()));
        let universities = vec!["서울대학교".to_string()];

        let plan = plan_turn(&gateway, input_with("안녕", &[], &universities)).await;
        assert!(plan.is_empty());
    }

    #[test]
    fn user_message_carries_history_image_and_university_list() {
        let history = vec![
            Message::new(
                "s".to_string(),
                MessageRole::User,
                "연세대 경영 어때?".to_string(),
                Vec::new(),
                Vec::new(),
            ),
            Message::new(
                "s".to_string(),
                MessageRole::Assistant,
                "연세대학교 경영학과는…".to_string(),
                Vec::new(),
                Vec::new(),
            ),
        ];
        let universities = vec!["서울대학교".to_string(), "연세대학교".to_string()];
        let input = RouterInput {
            utterance: "거기 작년 입결은?",
            history: &history,
            image_description: Some("성적표: 국어 1등급, 수학 2등급"),
            known_universities: &universities,
        };

        let message = build_user_message(&input);

        assert!(message.contains("서울대학교, 연세대학교"));
        assert!(message.contains("연세대 경영 어때?"));
        assert!(message.contains("성적표: 국어 1등급"));
        assert!(message.contains("거기 작년 입결은?"));
    }

    #[test]
    fn plan_schema_is_an_object_schema() {
        let schema = plan_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(
            schema["properties"]["function_calls"]["maxItems"],
            MAX_PLAN_CALLS
        );
    }
}
