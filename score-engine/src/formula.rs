use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedScores;
use crate::subject::Subject;
use crate::tables::SUPPORTED_SCHEMA_VERSION;
use crate::ScoreError;

const FORMULAS_JSON: &str = include_str!("../data/university_formulas.json");

/// Which quantitative field a university's formula consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreType {
    Standard,
    Percentile,
    /// Standard score for Korean/Math, per-university converted standard
    /// score for the inquiry subjects.
    Converted,
}

/// Linear mapping from an inquiry percentile to a university's converted
/// standard score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InquiryConversion {
    pub base: f64,
    pub per_percentile: f64,
}

/// One university's declarative conversion formula. English and Korean
/// history never appear in `subject_weights`; as absolutely-graded subjects
/// they enter as grade-indexed deductions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversityFormula {
    pub university: String,
    pub scale: f64,
    pub score_type: ScoreType,
    pub subject_weights: BTreeMap<Subject, f64>,
    pub english_penalty: Vec<f64>,
    pub history_penalty: Vec<f64>,
    pub inquiry_conversion: Option<InquiryConversion>,
}

/// Conversion output for one university.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub university: String,
    pub total: f64,
    pub scale: f64,
    /// Per-subject weighted contribution; absolute-graded subjects appear as
    /// their (negative) deduction.
    pub breakdown: BTreeMap<Subject, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormulaRegistry {
    pub schema_version: u32,
    pub exam_year: u32,
    universities: Vec<UniversityFormula>,
}

impl FormulaRegistry {
    pub fn formula_for(&self, university: &str) -> Result<&UniversityFormula, ScoreError> {
        self.universities
            .iter()
            .find(|formula| formula.university == university)
            .ok_or_else(|| ScoreError::UnknownUniversity(university.to_string()))
    }

    /// The closed set of universities the engine can convert for.
    pub fn university_names(&self) -> Vec<&str> {
        self.universities
            .iter()
            .map(|formula| formula.university.as_str())
            .collect()
    }

    pub fn formulas(&self) -> impl Iterator<Item = &UniversityFormula> {
        self.universities.iter()
    }
}

/// The embedded formula registry, parsed once per process.
pub fn formula_registry() -> Result<&'static FormulaRegistry, ScoreError> {
    static REGISTRY: OnceLock<Result<FormulaRegistry, ScoreError>> = OnceLock::new();

    REGISTRY
        .get_or_init(|| {
            let registry: FormulaRegistry = serde_json::from_str(FORMULAS_JSON)
                .map_err(|e| ScoreError::Data(format!("university formulas: {e}")))?;

            if registry.schema_version != SUPPORTED_SCHEMA_VERSION {
                return Err(ScoreError::Data(format!(
                    "formula registry schema version {} (supported: {})",
                    registry.schema_version, SUPPORTED_SCHEMA_VERSION
                )));
            }

            Ok(registry)
        })
        .as_ref()
        .map_err(Clone::clone)
}

impl UniversityFormula {
    fn subject_value(&self, subject: Subject, normalized: &NormalizedScores) -> Option<f64> {
        let scores = normalized.get(subject)?;

        let value = match self.score_type {
            ScoreType::Standard => scores.standard_score,
            ScoreType::Percentile => scores.percentile,
            ScoreType::Converted => {
                if scores.needs_conversion {
                    match self.inquiry_conversion {
                        Some(conversion) => {
                            conversion.base + conversion.per_percentile * scores.percentile
                        }
                        None => scores.standard_score,
                    }
                } else {
                    scores.standard_score
                }
            }
        };

        Some(value)
    }

    fn penalty(&self, table: &[f64], grade: u8) -> f64 {
        table
            .get(usize::from(grade.saturating_sub(1)))
            .copied()
            .unwrap_or(0.0)
    }

    /// Apply the formula to normalized scores. Pure and deterministic:
    /// identical input yields an identical result across runs and processes.
    pub fn convert(&self, normalized: &NormalizedScores) -> ConversionResult {
        let mut breakdown = BTreeMap::new();
        let mut total = 0.0;

        for (&subject, &weight) in &self.subject_weights {
            if let Some(value) = self.subject_value(subject, normalized) {
                let contribution = weight * value;
                breakdown.insert(subject, contribution);
                total += contribution;
            }
        }

        if let Some(english) = normalized.get(Subject::English) {
            let deduction = self.penalty(&self.english_penalty, english.grade);
            breakdown.insert(Subject::English, -deduction);
            total -= deduction;
        }

        if let Some(history) = normalized.get(Subject::History) {
            let deduction = self.penalty(&self.history_penalty, history.grade);
            breakdown.insert(Subject::History, -deduction);
            total -= deduction;
        }

        ConversionResult {
            university: self.university.clone(),
            total: total.max(0.0),
            scale: self.scale,
            breakdown,
        }
    }
}
