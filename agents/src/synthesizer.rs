use std::collections::{HashMap, HashSet};

use common::error::AppError;
use common::evidence::CitationDescriptor;
use common::llm::{ModelGateway, StreamRequest};
use common::storage::types::message::{format_history, Message};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

use futures::StreamExt;

use crate::events::TurnEvent;
use crate::functions::FunctionOutcome;
use crate::sections::{extract_cites, MarkerGuard};

/// Answer grammar and citation rules. The synthesizer may write free text
/// without citation, but every `<cite>` must point at a supplied source.
const SYNTHESIZER_SYSTEM_PROMPT: &str = r#"당신은 대입 상담사입니다. 아래 근거 자료만 사용해 수험생에게 한국어로 답변하세요.

출력 형식(반드시 지킬 것):
- 답변은 섹션의 나열입니다. 각 섹션은
  ===SECTION_START:<유형>===내용===SECTION_END===
  형태이며 <유형>은 empathy, fact_check, analysis, recommendation,
  warning, encouragement, next_step 중 하나입니다.
- 근거 자료의 내용을 인용할 때는
  <cite data-source="<출처>" data-url="<URL>">인용 문구</cite>
  형태로 감쌉니다. data-source와 data-url은 제공된 출처 목록의 값을
  그대로 사용합니다.
- 출처 목록에 없는 자료는 절대 인용하지 않습니다. 근거가 없는 일반적인
  조언은 인용 없이 자유 문장으로 씁니다.
- 근거가 전혀 없으면 empathy와 next_step 섹션으로 공감하고 필요한 정보를
  물어보세요."#;

/// Everything the synthesizer reads for one turn.
pub struct SynthesizerInput<'a> {
    pub utterance: &'a str,
    pub history: &'a [Message],
    pub outcomes: &'a [FunctionOutcome],
    pub citations: &'a [CitationDescriptor],
}

/// The completed answer plus its validated, deduplicated citation lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAnswer {
    pub content: String,
    pub sources: Vec<String>,
    pub source_urls: Vec<String>,
}

const FALLBACK_WARNING: &str = "\n===SECTION_START:warning===답변 생성 중 오류가 발생해 일부 내용이 누락되었을 수 있어요.===SECTION_END===";

fn build_user_message(input: &SynthesizerInput<'_>) -> String {
    let evidence: Vec<serde_json::Value> = input
        .outcomes
        .iter()
        .map(|outcome| {
            json!({
                "function": outcome.name,
                "params": &outcome.params,
                "ok": outcome.ok,
                "output": &outcome.output,
                "note": &outcome.note,
            })
        })
        .collect();

    let citations: Vec<serde_json::Value> = input
        .citations
        .iter()
        .map(|descriptor| {
            json!({
                "source": &descriptor.source,
                "title": &descriptor.title,
                "url": &descriptor.file_url,
                "page": descriptor.page,
            })
        })
        .collect();

    format!(
        r"
        대화 이력:
        ==================
        {}

        근거 자료:
        ==================
        {}

        인용 가능한 출처 목록:
        ==================
        {}

        수험생 질문:
        ==================
        {}
        ",
        format_history(input.history),
        serde_json::to_string(&evidence).unwrap_or_default(),
        serde_json::to_string(&citations).unwrap_or_default(),
        input.utterance
    )
}

/// Walk the finished answer and keep only citations whose source is in the
/// allowed descriptor set; first occurrence order, one entry per source. The
/// URL comes from the descriptor, never from the model.
fn collect_citations(
    content: &str,
    allowed: &[CitationDescriptor],
) -> (Vec<String>, Vec<String>) {
    let by_source: HashMap<&str, &CitationDescriptor> = allowed
        .iter()
        .map(|descriptor| (descriptor.source.as_str(), descriptor))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut sources = Vec::new();
    let mut source_urls = Vec::new();

    for cite in extract_cites(content) {
        let Some(descriptor) = by_source.get(cite.source.as_str()) else {
            error!(source = %cite.source, "Model cited a source outside the evidence set");
            continue;
        };
        if seen.insert(cite.source.clone()) {
            sources.push(descriptor.source.clone());
            source_urls.push(descriptor.file_url.clone());
        }
    }

    (sources, source_urls)
}

async fn emit_chunk(tx: &mpsc::Sender<TurnEvent>, text: String) -> Result<(), AppError> {
    tx.send(TurnEvent::chunk(text))
        .await
        .map_err(|_| AppError::Internal("turn event channel closed".to_string()))
}

/// Stream the answer. Token deltas pass through a marker guard so section
/// markers arrive intact; the full text is accumulated for citation
/// validation and persistence. A model failure mid-stream degrades to a
/// warning section with whatever citations were collected; a closed event
/// channel (client gone) aborts with an error.
#[instrument(skip_all)]
pub async fn synthesize(
    gateway: &dyn ModelGateway,
    input: &SynthesizerInput<'_>,
    tx: &mpsc::Sender<TurnEvent>,
) -> Result<SynthesizedAnswer, AppError> {
    let request = StreamRequest {
        system_prompt: SYNTHESIZER_SYSTEM_PROMPT.to_string(),
        user_message: build_user_message(input),
    };

    let mut content = String::new();
    let mut guard = MarkerGuard::new();

    match gateway.stream_completion(request).await {
        Ok(mut stream) => {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(delta) => {
                        content.push_str(&delta);
                        if let Some(chunk) = guard.push(&delta) {
                            emit_chunk(tx, chunk).await?;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Synthesizer stream failed mid-answer");
                        content.push_str(FALLBACK_WARNING);
                        if let Some(chunk) = guard.push(FALLBACK_WARNING) {
                            emit_chunk(tx, chunk).await?;
                        }
                        break;
                    }
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Synthesizer stream could not be created");
            content.push_str(FALLBACK_WARNING.trim_start_matches('\n'));
            if let Some(chunk) = guard.push(FALLBACK_WARNING.trim_start_matches('\n')) {
                emit_chunk(tx, chunk).await?;
            }
        }
    }

    if let Some(rest) = guard.finish() {
        emit_chunk(tx, rest).await?;
    }

    let (sources, source_urls) = collect_citations(&content, input.citations);
    info!(
        sources = sources.len(),
        chars = content.chars().count(),
        "Synthesizer finished"
    );

    Ok(SynthesizedAnswer {
        content,
        sources,
        source_urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::llm::{ImageAttachment, StructuredRequest, TextStream};
    use futures::stream;

    struct ScriptedStream {
        deltas: Vec<Result<String, ()>>,
        fail_creation: bool,
    }

    #[async_trait]
    impl ModelGateway for ScriptedStream {
        async fn complete_structured(
            &self,
            _request: StructuredRequest,
        ) -> Result<String, AppError> {
            Err(AppError::Internal("unused".into()))
        }

        async fn stream_completion(
            &self,
            _request: StreamRequest,
        ) -> Result<TextStream, AppError> {
            if self.fail_creation {
                return Err(AppError::Internal("no stream".into()));
            }
            let items: Vec<Result<String, AppError>> = self
                .deltas
                .clone()
                .into_iter()
                .map(|r| r.map_err(|()| AppError::Internal("stream broke".into())))
                .collect();
            Ok(Box::pin(stream::iter(items)))
        }

        async fn embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
            Err(AppError::Internal("unused".into()))
        }

        async fn describe_image(&self, _image: &ImageAttachment) -> Result<String, AppError> {
            Err(AppError::Internal("unused".into()))
        }
    }

    fn descriptor(source: &str, url: &str) -> CitationDescriptor {
        CitationDescriptor {
            title: source.to_string(),
            source: source.to_string(),
            file_url: url.to_string(),
            page: None,
        }
    }

    fn input<'a>(
        citations: &'a [CitationDescriptor],
        outcomes: &'a [FunctionOutcome],
    ) -> SynthesizerInput<'a> {
        SynthesizerInput {
            utterance: "서울대 모집인원 알려줘",
            history: &[],
            outcomes,
            citations,
        }
    }

    async fn run(
        gateway: ScriptedStream,
        citations: &[CitationDescriptor],
    ) -> (SynthesizedAnswer, Vec<TurnEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let answer = synthesize(&gateway, &input(citations, &[]), &tx)
            .await
            .expect("synthesize");
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (answer, events)
    }

    fn chunk_texts(events: &[TurnEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                TurnEvent::Chunk { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn streams_chunks_and_collects_valid_citations() {
        let allowed = vec![descriptor(
            "서울대학교 2026 모집요강",
            "https://corpus.example/snu.pdf",
        )];
        let answer_text = "===SECTION_START:fact_check===모집인원은 <cite data-source=\"서울대학교 2026 모집요강\" data-url=\"https://corpus.example/snu.pdf\">30명</cite>입니다.===SECTION_END===";

        let gateway = ScriptedStream {
            deltas: answer_text
                .split_inclusive("===")
                .map(|s| Ok(s.to_string()))
                .collect(),
            fail_creation: false,
        };

        let (answer, events) = run(gateway, &allowed).await;

        assert_eq!(answer.content, answer_text);
        assert_eq!(answer.sources, vec!["서울대학교 2026 모집요강"]);
        assert_eq!(answer.source_urls, vec!["https://corpus.example/snu.pdf"]);
        assert_eq!(chunk_texts(&events).join(""), answer_text);
    }

    #[tokio::test]
    async fn citations_outside_the_evidence_set_are_dropped() {
        let allowed = vec![descriptor("실제 출처", "https://corpus.example/real.pdf")];
        let answer_text = "===SECTION_START:analysis===<cite data-source=\"실제 출처\" data-url=\"https://corpus.example/real.pdf\">근거</cite>와 <cite data-source=\"지어낸 출처\" data-url=\"https://nowhere\">거짓 근거</cite>===SECTION_END===";

        let gateway = ScriptedStream {
            deltas: vec![Ok(answer_text.to_string())],
            fail_creation: false,
        };

        let (answer, _) = run(gateway, &allowed).await;

        assert_eq!(answer.sources, vec!["실제 출처"]);
        assert_eq!(answer.source_urls, vec!["https://corpus.example/real.pdf"]);
    }

    #[tokio::test]
    async fn duplicate_citations_collapse_in_order() {
        let allowed = vec![
            descriptor("출처 A", "https://corpus.example/a.pdf"),
            descriptor("출처 B", "https://corpus.example/b.pdf"),
        ];
        let answer_text = "<cite data-source=\"출처 B\" data-url=\"https://corpus.example/b.pdf\">b</cite> <cite data-source=\"출처 A\" data-url=\"https://corpus.example/a.pdf\">a</cite> <cite data-source=\"출처 B\" data-url=\"https://corpus.example/b.pdf\">b2</cite>";

        let gateway = ScriptedStream {
            deltas: vec![Ok(answer_text.to_string())],
            fail_creation: false,
        };

        let (answer, _) = run(gateway, &allowed).await;

        assert_eq!(answer.sources, vec!["출처 B", "출처 A"]);
        assert_eq!(
            answer.source_urls,
            vec!["https://corpus.example/b.pdf", "https://corpus.example/a.pdf"]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_appends_a_warning_section() {
        let gateway = ScriptedStream {
            deltas: vec![
                Ok("===SECTION_START:analysis===분석 중".to_string()),
                Err(()),
            ],
            fail_creation: false,
        };

        let (answer, events) = run(gateway, &[]).await;

        assert!(answer.content.contains("===SECTION_START:warning==="));
        assert!(answer.sources.is_empty());
        let streamed = chunk_texts(&events).join("");
        assert!(streamed.contains("===SECTION_START:warning==="));
    }

    #[tokio::test]
    async fn creation_failure_still_produces_a_warning_answer() {
        let gateway = ScriptedStream {
            deltas: Vec::new(),
            fail_creation: true,
        };

        let (answer, events) = run(gateway, &[]).await;

        assert!(answer.content.starts_with("===SECTION_START:warning==="));
        assert!(!chunk_texts(&events).is_empty());
    }

    #[tokio::test]
    async fn closed_channel_aborts_the_stream() {
        let gateway = ScriptedStream {
            deltas: vec![Ok("텍스트 조각".to_string())],
            fail_creation: false,
        };

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = synthesize(&gateway, &input(&[], &[]), &tx).await;
        assert!(result.is_err());
    }

    #[test]
    fn user_message_embeds_evidence_and_sources() {
        let allowed = vec![descriptor("출처 A", "https://corpus.example/a.pdf")];
        let message = build_user_message(&input(&allowed, &[]));

        assert!(message.contains("출처 A"));
        assert!(message.contains("서울대 모집인원 알려줘"));
        assert!(message.contains("인용 가능한 출처 목록"));
    }
}
