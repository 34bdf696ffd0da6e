use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-phase wall-clock timings reported in the terminal event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTiming {
    pub router_ms: u64,
    pub functions_ms: u64,
    pub synthesizer_ms: u64,
    pub total_ms: u64,
}

/// One event on a turn's stream, in the order the orchestrator emits them:
/// `status*` → `chunk+` → exactly one `done`, or a terminal `error` replacing
/// whatever would have followed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnEvent {
    Status {
        step: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },
    Chunk {
        text: String,
    },
    Done {
        sources: Vec<String>,
        source_urls: Vec<String>,
        used_chunks: Vec<String>,
        timing: TurnTiming,
    },
    Error {
        message: String,
    },
}

impl TurnEvent {
    pub fn status(step: impl Into<String>) -> Self {
        Self::Status {
            step: step.into(),
            detail: None,
        }
    }

    pub fn status_with_detail(step: impl Into<String>, detail: Value) -> Self {
        Self::Status {
            step: step.into(),
            detail: Some(detail),
        }
    }

    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = TurnEvent::status_with_detail("functions", json!({"dispatched": ["univ"]}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "status");
        assert_eq!(value["step"], "functions");
        assert_eq!(value["detail"]["dispatched"][0], "univ");
    }

    #[test]
    fn status_without_detail_omits_the_field() {
        let value = serde_json::to_value(TurnEvent::status("router")).unwrap();
        assert!(value.get("detail").is_none());
    }

    #[test]
    fn done_event_round_trips() {
        let event = TurnEvent::Done {
            sources: vec!["서울대학교 2026 정시 모집요강".to_string()],
            source_urls: vec!["https://corpus.example/snu.pdf".to_string()],
            used_chunks: vec!["2026 정시 모집요강".to_string()],
            timing: TurnTiming {
                router_ms: 12,
                functions_ms: 34,
                synthesizer_ms: 56,
                total_ms: 102,
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: TurnEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
