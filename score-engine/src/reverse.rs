use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::formula::{formula_registry, ConversionResult};
use crate::normalize::NormalizedScores;
use crate::tables::SUPPORTED_SCHEMA_VERSION;
use crate::ScoreError;

const ADMISSION_HISTORY_JSON: &str = include_str!("../data/admission_history.json");

/// Placement band of a computed total relative to a historical cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "안정")]
    Stable,
    #[serde(rename = "적정")]
    Fit,
    #[serde(rename = "소신")]
    Reach,
    #[serde(rename = "도전")]
    Challenge,
}

impl Band {
    pub const ALL: [Band; 4] = [Band::Stable, Band::Fit, Band::Reach, Band::Challenge];

    pub const fn label(self) -> &'static str {
        match self {
            Band::Stable => "안정",
            Band::Fit => "적정",
            Band::Reach => "소신",
            Band::Challenge => "도전",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Band {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "안정" => Ok(Band::Stable),
            "적정" => Ok(Band::Fit),
            "소신" => Ok(Band::Reach),
            "도전" => Ok(Band::Challenge),
            other => Err(format!("unknown band '{other}'")),
        }
    }
}

/// Band boundaries, expressed as fractions of the university's formula scale.
/// Classification is top-down: stable at `cutoff + stable` and above, fit
/// down to `cutoff - fit`, reach down to `cutoff - reach`, challenge down to
/// `cutoff - challenge`, unclassified below that.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandDeltas {
    pub stable: f64,
    pub fit: f64,
    pub reach: f64,
    pub challenge: f64,
}

impl Default for BandDeltas {
    fn default() -> Self {
        Self {
            stable: 0.015,
            fit: 0.015,
            reach: 0.035,
            challenge: 0.060,
        }
    }
}

/// One empirical admission outcome: the lowest admitted converted score for a
/// university/major in a past cycle, on that university's own scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub university: String,
    pub major: String,
    pub admission_year: u32,
    pub cutoff: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct AdmissionHistory {
    schema_version: u32,
    records: Vec<AdmissionRecord>,
}

/// Reverse-search filters; empty vectors mean no filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReverseFilters {
    pub target_univ: Vec<String>,
    pub target_major: Vec<String>,
    pub target_range: Vec<Band>,
}

/// One reverse-search hit: a historical record the student's converted total
/// lands near, with its band and distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseMatch {
    pub record: AdmissionRecord,
    pub band: Band,
    pub total: f64,
    pub distance: f64,
}

fn admission_history() -> Result<&'static [AdmissionRecord], ScoreError> {
    static HISTORY: OnceLock<Result<AdmissionHistory, ScoreError>> = OnceLock::new();

    HISTORY
        .get_or_init(|| {
            let history: AdmissionHistory = serde_json::from_str(ADMISSION_HISTORY_JSON)
                .map_err(|e| ScoreError::Data(format!("admission history: {e}")))?;

            if history.schema_version != SUPPORTED_SCHEMA_VERSION {
                return Err(ScoreError::Data(format!(
                    "admission history schema version {} (supported: {})",
                    history.schema_version, SUPPORTED_SCHEMA_VERSION
                )));
            }

            Ok(history)
        })
        .as_ref()
        .map(|history| history.records.as_slice())
        .map_err(Clone::clone)
}

/// Classify a total against a cutoff on the given scale.
pub fn classify(total: f64, cutoff: f64, scale: f64, deltas: &BandDeltas) -> Option<Band> {
    let diff = total - cutoff;

    if diff >= scale * deltas.stable {
        Some(Band::Stable)
    } else if diff >= -scale * deltas.fit {
        Some(Band::Fit)
    } else if diff >= -scale * deltas.reach {
        Some(Band::Reach)
    } else if diff >= -scale * deltas.challenge {
        Some(Band::Challenge)
    } else {
        None
    }
}

fn matches_filters(record: &AdmissionRecord, band: Band, filters: &ReverseFilters) -> bool {
    if !filters.target_univ.is_empty() && !filters.target_univ.contains(&record.university) {
        return false;
    }
    if !filters.target_major.is_empty()
        && !filters
            .target_major
            .iter()
            .any(|major| record.major.contains(major.as_str()))
    {
        return false;
    }
    if !filters.target_range.is_empty() && !filters.target_range.contains(&band) {
        return false;
    }
    true
}

/// Rank the bundled admission history against the student's converted totals.
/// Results are grouped band-best-first; within a band the closest cutoff wins
/// and ties break on the university name.
pub fn reverse_search(
    normalized: &NormalizedScores,
    filters: &ReverseFilters,
    deltas: &BandDeltas,
) -> Result<Vec<ReverseMatch>, ScoreError> {
    reverse_search_in(admission_history()?, normalized, filters, deltas)
}

/// Same ranking over an explicit record set; the public entry point feeds the
/// embedded history through here.
pub fn reverse_search_in(
    records: &[AdmissionRecord],
    normalized: &NormalizedScores,
    filters: &ReverseFilters,
    deltas: &BandDeltas,
) -> Result<Vec<ReverseMatch>, ScoreError> {
    let registry = formula_registry()?;
    let mut matches = Vec::new();

    for record in records {
        // Records for universities without a registered formula are skipped:
        // there is no comparable total to rank against.
        let Ok(formula) = registry.formula_for(&record.university) else {
            continue;
        };

        let ConversionResult { total, scale, .. } = formula.convert(normalized);
        let Some(band) = classify(total, record.cutoff, scale, deltas) else {
            continue;
        };

        if !matches_filters(record, band, filters) {
            continue;
        }

        matches.push(ReverseMatch {
            record: record.clone(),
            band,
            total,
            distance: (total - record.cutoff).abs(),
        });
    }

    matches.sort_by(|a, b| {
        a.band
            .cmp(&b.band)
            .then_with(|| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal))
            .then_with(|| a.record.university.cmp(&b.record.university))
    });

    Ok(matches)
}
