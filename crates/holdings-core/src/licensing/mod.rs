//! Licensing coverage model: KBART entries, their coverage windows and the
//! identifier index over them.

pub mod dates;
pub mod embargo;
pub mod entry;
pub mod index;
pub mod serial;

pub use entry::{CoverageEntry, KbartRow};
pub use index::CoverageIndex;

/// Why an entry does not cover a requested date, volume or issue.
///
/// Every variant except `InvalidDate` is ordinary negative coverage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoverageError {
    #[error("before first issue date")]
    BeforeFirstIssueDate,
    #[error("after last issue date")]
    AfterLastIssueDate,
    #[error("before first volume")]
    BeforeFirstVolume,
    #[error("after last volume")]
    AfterLastVolume,
    #[error("before first issue")]
    BeforeFirstIssue,
    #[error("after last issue")]
    AfterLastIssue,
    #[error("after moving wall")]
    AfterMovingWall,
    #[error("before rolling window")]
    BeforeRollingWindow,
    #[error("invalid date: {0:?}")]
    InvalidDate(String),
}

impl CoverageError {
    pub fn is_violation(&self) -> bool {
        !matches!(self, CoverageError::InvalidDate(_))
    }
}
