use std::fmt::Write as _;

use common::evidence::EvidenceChunk;
use score_engine::{
    formula::formula_registry, normalize::normalize, reverse::reverse_search, BandDeltas,
    ConversionResult, NormalizedScores, ReverseFilters, ReverseMatch,
};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::FunctionOutcome;
use crate::plan::ConsultParams;

/// Structured consult payload, serialized into the outcome for the
/// synthesizer.
#[derive(Debug, Clone, Serialize)]
struct ConsultReport {
    target_univ: Vec<String>,
    target_major: Vec<String>,
    extracted_scores: NormalizedScores,
    conversions: Vec<ConversionResult>,
    matches: Vec<ReverseMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

fn score_summary_chunk(normalized: &NormalizedScores) -> EvidenceChunk {
    let mut content = String::from("정규화된 성적:\n");
    for (subject, value) in normalized.iter() {
        let _ = writeln!(
            content,
            "- {}: {}등급 / 표준점수 {:.1} / 백분위 {:.1}{}",
            subject,
            value.grade,
            value.standard_score,
            value.percentile,
            value
                .elective
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
    }

    EvidenceChunk {
        content,
        title: "정규화된 성적".to_string(),
        source: "점수 변환 엔진".to_string(),
        file_url: String::new(),
        page: None,
        similarity: None,
    }
}

fn conversion_chunk(conversions: &[ConversionResult]) -> EvidenceChunk {
    let mut content = String::from("대학별 환산점수:\n");
    for conversion in conversions {
        let breakdown = conversion
            .breakdown
            .iter()
            .map(|(subject, contribution)| format!("{subject} {contribution:.1}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            content,
            "- {}: {:.1}점 / {:.0}점 만점 ({breakdown})",
            conversion.university, conversion.total, conversion.scale
        );
    }

    EvidenceChunk {
        content,
        title: "대학별 환산점수".to_string(),
        source: "점수 변환 엔진".to_string(),
        file_url: String::new(),
        page: None,
        similarity: None,
    }
}

fn reverse_chunk(matches: &[ReverseMatch]) -> EvidenceChunk {
    let mut content = String::from("지원 가능권 분석:\n");
    for entry in matches {
        let _ = writeln!(
            content,
            "- [{}] {} {} ({}학년도 합격선 {:.1}, 환산점수 {:.1})",
            entry.band,
            entry.record.university,
            entry.record.major,
            entry.record.admission_year,
            entry.record.cutoff,
            entry.total
        );
    }

    EvidenceChunk {
        content,
        title: "지원 가능권 분석".to_string(),
        source: "모의지원 데이터".to_string(),
        file_url: String::new(),
        page: None,
        similarity: None,
    }
}

fn empty_outcome(params: &ConsultParams, note: String) -> FunctionOutcome {
    let report = ConsultReport {
        target_univ: params.target_univ.clone(),
        target_major: params.target_major.clone(),
        extracted_scores: NormalizedScores::default(),
        conversions: Vec::new(),
        matches: Vec::new(),
        note: Some(note.clone()),
    };

    FunctionOutcome {
        name: "consult",
        params: serde_json::to_value(params).unwrap_or(Value::Null),
        ok: false,
        output: serde_json::to_value(&report).unwrap_or(Value::Null),
        chunks: Vec::new(),
        note: Some(note),
    }
}

/// Run the consult function: normalize the snapshot, convert per university,
/// rank against the admission history. Pure computation over the score
/// engine; any score problem degrades to an empty outcome whose note the
/// synthesizer can relay.
pub fn run_consult(params: &ConsultParams, deltas: &BandDeltas) -> FunctionOutcome {
    if !params.scores.has_scores() {
        return empty_outcome(params, "분석할 성적 정보가 없습니다".to_string());
    }

    let normalized = match normalize(&params.scores) {
        Ok(normalized) => normalized,
        Err(e) => {
            warn!(error = %e, "Score normalization failed");
            return empty_outcome(params, format!("성적을 해석하지 못했습니다: {e}"));
        }
    };

    let registry = match formula_registry() {
        Ok(registry) => registry,
        Err(e) => return empty_outcome(params, format!("환산 공식을 불러오지 못했습니다: {e}")),
    };

    // Convert for the requested universities, or the whole closed set when
    // none were named. Unknown names are skipped and surfaced in the note.
    let mut unknown: Vec<&str> = Vec::new();
    let conversions: Vec<ConversionResult> = if params.target_univ.is_empty() {
        registry
            .formulas()
            .map(|formula| formula.convert(&normalized))
            .collect()
    } else {
        params
            .target_univ
            .iter()
            .filter_map(|university| match registry.formula_for(university) {
                Ok(formula) => Some(formula.convert(&normalized)),
                Err(_) => {
                    unknown.push(university);
                    None
                }
            })
            .collect()
    };

    let filters = ReverseFilters {
        target_univ: params.target_univ.clone(),
        target_major: params.target_major.clone(),
        target_range: params.target_range.clone(),
    };

    let matches = match reverse_search(&normalized, &filters, deltas) {
        Ok(matches) => matches,
        Err(e) => return empty_outcome(params, format!("모의지원 분석에 실패했습니다: {e}")),
    };

    let note = (!unknown.is_empty())
        .then(|| format!("환산 공식이 없는 대학은 제외했습니다: {}", unknown.join(", ")));

    let mut chunks = vec![score_summary_chunk(&normalized)];
    if !conversions.is_empty() {
        chunks.push(conversion_chunk(&conversions));
    }
    if !matches.is_empty() {
        chunks.push(reverse_chunk(&matches));
    }

    let report = ConsultReport {
        target_univ: params.target_univ.clone(),
        target_major: params.target_major.clone(),
        extracted_scores: normalized,
        conversions,
        matches,
        note: note.clone(),
    };

    FunctionOutcome {
        name: "consult",
        params: serde_json::to_value(params).unwrap_or(Value::Null),
        ok: true,
        output: serde_json::to_value(&report).unwrap_or(Value::Null),
        chunks,
        note,
    }
}

/// Consult calls whose snapshot carries no quantitative score at all are
/// dropped before dispatch.
pub fn is_dispatchable(params: &ConsultParams) -> bool {
    params.scores.has_scores()
}
