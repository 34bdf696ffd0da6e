use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::subject::{ScoreSnapshot, Subject};
use crate::tables::conversion_tables;
use crate::ScoreError;

/// A subject after normalization: all three quantitative fields present,
/// estimated ones filled from the reference tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSubject {
    pub grade: u8,
    pub standard_score: f64,
    pub percentile: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elective: Option<String>,
    /// Inquiry subjects get a per-university converted standard score later;
    /// this flags them for that recomputation.
    pub needs_conversion: bool,
}

/// Normalization output: a total function over the input snapshot — every
/// subject present in the input appears here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedScores(pub BTreeMap<Subject, NormalizedSubject>);

impl NormalizedScores {
    pub fn get(&self, subject: Subject) -> Option<&NormalizedSubject> {
        self.0.get(&subject)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Subject, &NormalizedSubject)> {
        self.0.iter().map(|(subject, value)| (*subject, value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fill the missing quantitative fields of every present subject from the
/// reference tables. Grade wins as the anchor when given; otherwise the
/// percentile, then the standard score, determines the grade band and the
/// band's representative values fill the rest.
pub fn normalize(snapshot: &ScoreSnapshot) -> Result<NormalizedScores, ScoreError> {
    let tables = conversion_tables()?;
    let mut normalized = BTreeMap::new();

    for (subject, raw) in snapshot.iter() {
        let table = tables.for_subject(subject)?;

        let anchor_row = match (raw.grade, raw.percentile, raw.standard_score) {
            (Some(grade), _, _) => *table.row_for_grade(grade)?,
            (None, Some(percentile), _) => *table.grade_for_percentile(percentile)?,
            (None, None, Some(standard_score)) => {
                *table.grade_for_standard_score(standard_score)?
            }
            (None, None, None) => return Err(ScoreError::MissingQuantitative(subject)),
        };

        normalized.insert(
            subject,
            NormalizedSubject {
                grade: anchor_row.grade,
                standard_score: raw
                    .standard_score
                    .unwrap_or(anchor_row.representative_standard_score),
                percentile: raw
                    .percentile
                    .unwrap_or(anchor_row.representative_percentile),
                elective: raw.elective.clone(),
                needs_conversion: subject.is_inquiry(),
            },
        );
    }

    Ok(NormalizedScores(normalized))
}
