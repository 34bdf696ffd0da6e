use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::subject::Subject;
use crate::ScoreError;

/// Schema revision this build understands. Bumped together with the embedded
/// resources when their shape changes.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

const CONVERSION_TABLES_JSON: &str = include_str!("../data/conversion_tables.json");

/// Reference conversion tables (grade ↔ percentile ↔ standard score),
/// versioned by exam year and bundled with the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionTables {
    pub schema_version: u32,
    pub exam_year: u32,
    subjects: BTreeMap<String, SubjectTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectTable {
    pub graded_absolutely: bool,
    /// Rows ordered grade 1..=9; `min_*` fields are the lower bound of the
    /// grade band and `representative_*` the band midpoint used for filling
    /// missing fields.
    pub rows: Vec<GradeRow>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GradeRow {
    pub grade: u8,
    pub min_percentile: f64,
    pub representative_percentile: f64,
    pub min_standard_score: f64,
    pub representative_standard_score: f64,
}

impl ConversionTables {
    fn table_key(subject: Subject) -> &'static str {
        match subject {
            Subject::Korean => "korean",
            Subject::Math => "math",
            Subject::English => "english",
            Subject::History => "history",
            // The two inquiry slots share one reference table
            Subject::Inquiry1 | Subject::Inquiry2 => "inquiry",
        }
    }

    pub fn for_subject(&self, subject: Subject) -> Result<&SubjectTable, ScoreError> {
        self.subjects
            .get(Self::table_key(subject))
            .ok_or_else(|| ScoreError::Data(format!("missing table for {subject}")))
    }
}

impl SubjectTable {
    pub fn row_for_grade(&self, grade: u8) -> Result<&GradeRow, ScoreError> {
        if !(1..=9).contains(&grade) {
            return Err(ScoreError::InvalidGrade(grade));
        }
        self.rows
            .iter()
            .find(|row| row.grade == grade)
            .ok_or_else(|| ScoreError::Data(format!("no row for grade {grade}")))
    }

    /// Grade band for a percentile: the first band whose lower bound the
    /// percentile reaches. Rows are ordered best grade first.
    pub fn grade_for_percentile(&self, percentile: f64) -> Result<&GradeRow, ScoreError> {
        self.rows
            .iter()
            .find(|row| percentile >= row.min_percentile)
            .ok_or_else(|| ScoreError::Data("grade rows do not cover percentile 0".to_string()))
    }

    /// Grade band for a standard score, same first-match rule.
    pub fn grade_for_standard_score(&self, standard_score: f64) -> Result<&GradeRow, ScoreError> {
        self.rows
            .iter()
            .find(|row| standard_score >= row.min_standard_score)
            .ok_or_else(|| ScoreError::Data("grade rows do not cover standard score 0".to_string()))
    }
}

/// The embedded tables, parsed once per process. The data is immutable; this
/// is a read-only resource, not mutable global state.
pub fn conversion_tables() -> Result<&'static ConversionTables, ScoreError> {
    static TABLES: OnceLock<Result<ConversionTables, ScoreError>> = OnceLock::new();

    TABLES
        .get_or_init(|| {
            let tables: ConversionTables = serde_json::from_str(CONVERSION_TABLES_JSON)
                .map_err(|e| ScoreError::Data(format!("conversion tables: {e}")))?;

            if tables.schema_version != SUPPORTED_SCHEMA_VERSION {
                return Err(ScoreError::Data(format!(
                    "conversion tables schema version {} (supported: {})",
                    tables.schema_version, SUPPORTED_SCHEMA_VERSION
                )));
            }

            Ok(tables)
        })
        .as_ref()
        .map_err(Clone::clone)
}
