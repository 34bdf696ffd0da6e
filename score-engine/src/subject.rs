use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// CSAT subject slots. Inquiry (탐구) is taken as two electives, which the
/// per-university conversion treats independently.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    #[serde(alias = "국어")]
    Korean,
    #[serde(alias = "수학")]
    Math,
    #[serde(alias = "영어")]
    English,
    #[serde(alias = "탐구1")]
    Inquiry1,
    #[serde(alias = "탐구2")]
    Inquiry2,
    #[serde(alias = "한국사")]
    History,
}

impl Subject {
    pub const ALL: [Subject; 6] = [
        Subject::Korean,
        Subject::Math,
        Subject::English,
        Subject::Inquiry1,
        Subject::Inquiry2,
        Subject::History,
    ];

    pub const fn is_inquiry(self) -> bool {
        matches!(self, Subject::Inquiry1 | Subject::Inquiry2)
    }

    /// English and Korean history are graded absolutely: only the grade is
    /// meaningful, and universities apply it as a bonus/penalty.
    pub const fn is_absolute(self) -> bool {
        matches!(self, Subject::English | Subject::History)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Subject::Korean => "국어",
            Subject::Math => "수학",
            Subject::English => "영어",
            Subject::Inquiry1 => "탐구1",
            Subject::Inquiry2 => "탐구2",
            Subject::History => "한국사",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw per-subject input as the router extracts it from the conversation. At
/// least one of the three quantitative fields must be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectScore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elective: Option<String>,
}

impl SubjectScore {
    pub const fn has_quantitative(&self) -> bool {
        self.grade.is_some() || self.standard_score.is_some() || self.percentile.is_some()
    }

    pub fn from_grade(grade: u8) -> Self {
        Self {
            grade: Some(grade),
            ..Self::default()
        }
    }
}

/// A student's score snapshot: subject → raw fields. BTreeMap keeps subject
/// order stable for deterministic downstream output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreSnapshot(pub BTreeMap<Subject, SubjectScore>);

impl ScoreSnapshot {
    pub fn insert(&mut self, subject: Subject, score: SubjectScore) {
        self.0.insert(subject, score);
    }

    pub fn get(&self, subject: Subject) -> Option<&SubjectScore> {
        self.0.get(&subject)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Subject, &SubjectScore)> {
        self.0.iter().map(|(subject, score)| (*subject, score))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when at least one present subject carries a usable score.
    pub fn has_scores(&self) -> bool {
        self.0.values().any(SubjectScore::has_quantitative)
    }
}
