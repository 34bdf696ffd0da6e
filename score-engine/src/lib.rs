//! Deterministic score conversion for Korean CSAT (수능) admission
//! consulting: normalization of heterogeneous raw scores against reference
//! tables, per-university conversion formulas, and reverse search over
//! empirical admission cutoffs.
//!
//! The engine is pure: no I/O, no clocks, no model calls. Reference tables,
//! formulas and admission history ship as embedded JSON resources carrying a
//! schema version, so every function here is usable from a unit test with no
//! network.

pub mod formula;
pub mod normalize;
pub mod reverse;
pub mod subject;
pub mod tables;

use thiserror::Error;

pub use formula::{ConversionResult, FormulaRegistry, ScoreType, UniversityFormula};
pub use normalize::{NormalizedScores, NormalizedSubject};
pub use reverse::{AdmissionRecord, Band, BandDeltas, ReverseFilters, ReverseMatch};
pub use subject::{ScoreSnapshot, Subject, SubjectScore};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("subject {0} carries no quantitative score")]
    MissingQuantitative(Subject),
    #[error("grade {0} is outside the 1..=9 range")]
    InvalidGrade(u8),
    #[error("no conversion formula registered for '{0}'")]
    UnknownUniversity(String),
    #[error("embedded score data is malformed: {0}")]
    Data(String),
}
