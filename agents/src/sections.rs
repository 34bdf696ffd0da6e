use std::sync::OnceLock;

use regex::Regex;

/// Section types of the answer grammar, in the order they typically appear.
pub const SECTION_TYPES: [&str; 7] = [
    "empathy",
    "fact_check",
    "analysis",
    "recommendation",
    "warning",
    "encouragement",
    "next_step",
];

pub const SECTION_START_PREFIX: &str = "===SECTION_START:";
pub const SECTION_END_MARKER: &str = "===SECTION_END===";

pub fn section_start_marker(section_type: &str) -> String {
    format!("{SECTION_START_PREFIX}{section_type}===")
}

/// Byte length of the complete marker `text` starts with, if any.
fn complete_marker_len(text: &str) -> Option<usize> {
    if text.starts_with(SECTION_END_MARKER) {
        return Some(SECTION_END_MARKER.len());
    }
    SECTION_TYPES.iter().find_map(|t| {
        let marker = section_start_marker(t);
        text.starts_with(&marker).then_some(marker.len())
    })
}

/// True when `text` in its entirety is a proper prefix of some marker, i.e.
/// the next deltas could still complete it.
fn is_partial_marker(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    if SECTION_END_MARKER.len() > text.len() && SECTION_END_MARKER.starts_with(text) {
        return true;
    }
    SECTION_TYPES.iter().any(|t| {
        let marker = section_start_marker(t);
        marker.len() > text.len() && marker.starts_with(text)
    })
}

/// Re-chunks a token stream so that a section marker is never split across
/// two emitted chunks: a tail that is still a viable marker prefix is held
/// back until the next delta resolves it. Complete markers are consumed
/// first, so a finished marker's trailing `===` is never mistaken for the
/// start of the next one.
#[derive(Debug, Default)]
pub struct MarkerGuard {
    buffer: String,
}

impl MarkerGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta; returns the text that is safe to emit now.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.buffer.push_str(delta);

        let emit_len = self.safe_emit_len();
        if emit_len == 0 {
            return None;
        }

        Some(self.buffer.drain(..emit_len).collect())
    }

    /// Flush whatever remains once the stream is finished.
    pub fn finish(mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        (!rest.is_empty()).then_some(rest)
    }

    /// Left-to-right scan: complete markers and plain text are safe; an
    /// incomplete marker at the buffer tail is not.
    fn safe_emit_len(&self) -> usize {
        let len = self.buffer.len();
        let mut i = 0;

        while i < len {
            let rest = match self.buffer.get(i..) {
                Some(rest) => rest,
                None => break,
            };
            if let Some(marker_len) = complete_marker_len(rest) {
                i += marker_len;
                continue;
            }
            if is_partial_marker(rest) {
                return i;
            }
            i += rest.chars().next().map_or(1, char::len_utf8);
        }

        len
    }
}

/// One citation parsed out of the answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCite {
    pub source: String,
    pub url: String,
    pub text: String,
}

#[allow(clippy::expect_used)]
fn cite_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<cite data-source="([^"]*)" data-url="([^"]*)">(.*?)</cite>"#)
            .expect("cite regex is valid")
    })
}

#[allow(clippy::expect_used)]
fn section_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)===SECTION_START:([a-z_]+)===(.*?)===SECTION_END===")
            .expect("section regex is valid")
    })
}

/// Citations in answer order.
pub fn extract_cites(answer: &str) -> Vec<ParsedCite> {
    cite_regex()
        .captures_iter(answer)
        .map(|captures| ParsedCite {
            source: captures[1].to_string(),
            url: captures[2].to_string(),
            text: captures[3].to_string(),
        })
        .collect()
}

/// `(type, body)` pairs of every complete section in the answer.
pub fn extract_sections(answer: &str) -> Vec<(String, String)> {
    section_regex()
        .captures_iter(answer)
        .map(|captures| (captures[1].to_string(), captures[2].to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_guard(deltas: &[&str]) -> Vec<String> {
        let mut guard = MarkerGuard::new();
        let mut chunks = Vec::new();
        for delta in deltas {
            if let Some(chunk) = guard.push(delta) {
                chunks.push(chunk);
            }
        }
        if let Some(rest) = guard.finish() {
            chunks.push(rest);
        }
        chunks
    }

    #[test]
    fn guard_passes_plain_text_through() {
        let chunks = run_guard(&["안녕", "하세요"]);
        assert_eq!(chunks.join(""), "안녕하세요");
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn guard_never_splits_a_marker_across_chunks() {
        let answer = "===SECTION_START:empathy===반가워요===SECTION_END===";

        // Feed the answer one byte-ish fragment at a time
        let fragments: Vec<String> = answer.chars().map(|c| c.to_string()).collect();
        let fragment_refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        let chunks = run_guard(&fragment_refs);

        assert_eq!(chunks.join(""), answer);
        for chunk in &chunks {
            let starts = chunk.matches(SECTION_START_PREFIX).count();
            let full_start = chunk.matches("===SECTION_START:empathy===").count();
            assert_eq!(starts, full_start, "partial start marker in {chunk:?}");

            let partial_end = chunk.contains("===SECTION_END")
                && !chunk.contains(SECTION_END_MARKER)
                && chunk.ends_with('=');
            assert!(!partial_end, "partial end marker in {chunk:?}");
        }
    }

    #[test]
    fn guard_releases_text_that_only_resembles_a_marker() {
        let chunks = run_guard(&["수학 == 국어라는 ", "=== 주장"]);
        assert_eq!(chunks.join(""), "수학 == 국어라는 === 주장");
    }

    #[test]
    fn completed_marker_is_released_immediately_and_whole() {
        let mut guard = MarkerGuard::new();
        let emitted = guard
            .push("===SECTION_START:analysis===")
            .expect("complete marker must be released");
        assert_eq!(emitted, "===SECTION_START:analysis===");

        // Its trailing === must not be mistaken for the next marker's start
        let emitted = guard.push("분석 내용").expect("plain text flows through");
        assert_eq!(emitted, "분석 내용");
    }

    #[test]
    fn extract_cites_finds_sources_and_urls() {
        let answer = r#"===SECTION_START:fact_check===모집인원은 <cite data-source="서울대학교 2026 모집요강" data-url="https://corpus.example/snu.pdf">30명</cite>입니다.===SECTION_END==="#;

        let cites = extract_cites(answer);
        assert_eq!(cites.len(), 1);
        assert_eq!(cites[0].source, "서울대학교 2026 모집요강");
        assert_eq!(cites[0].url, "https://corpus.example/snu.pdf");
        assert_eq!(cites[0].text, "30명");
    }

    #[test]
    fn extract_sections_returns_types_and_bodies() {
        let answer = "===SECTION_START:empathy===고민이 많으시겠어요===SECTION_END===\
                      ===SECTION_START:next_step===상담을 이어가 볼까요?===SECTION_END===";

        let sections = extract_sections(answer);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].0, "empathy");
        assert!(sections[1].1.contains("상담"));
    }

    #[test]
    fn marker_constants_agree_with_the_grammar() {
        assert_eq!(
            section_start_marker("analysis"),
            "===SECTION_START:analysis==="
        );
        assert!(SECTION_TYPES.contains(&"next_step"));
    }
}
