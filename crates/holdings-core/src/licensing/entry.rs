//! A single license/holdings row and its coverage check.

use std::collections::BTreeSet;
use std::sync::{LazyLock, OnceLock};

use chrono::{NaiveDate, Utc};
use regex::Regex;

use crate::licensing::dates::{parse_partial_date, PartialDate};
use crate::licensing::embargo::EmbargoSpec;
use crate::licensing::serial::{find_serial_numbers, is_canonical, normalize_serial_number};
use crate::licensing::CoverageError;

static INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Raw column values of one KBART row. These strings are the source of truth;
/// everything parsed from them lives in [`ResolvedWindow`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KbartRow {
    pub publication_title: String,
    pub print_identifier: String,
    pub online_identifier: String,
    pub first_issue_date: String,
    pub first_volume: String,
    pub first_issue: String,
    pub last_issue_date: String,
    pub last_volume: String,
    pub last_issue: String,
    pub title_url: String,
    pub title_id: String,
    pub embargo: String,
    pub coverage_depth: String,
    pub publisher_name: String,
    pub package_collection: String,
    pub all_serial_numbers: String,
    pub zdb_id: String,
}

/// Parsed view over the boundary fields of a [`KbartRow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub begin: PartialDate,
    pub end: PartialDate,
    pub embargo: EmbargoSpec,
}

impl ResolvedWindow {
    fn from_row(row: &KbartRow) -> Self {
        Self {
            begin: parse_partial_date(&row.first_issue_date).unwrap_or_else(PartialDate::unbounded_past),
            end: parse_partial_date(&row.last_issue_date).unwrap_or_else(PartialDate::unbounded_future),
            embargo: EmbargoSpec::parse(&row.embargo),
        }
    }
}

/// A coverage entry: the raw row plus a lazily computed, memoized window.
#[derive(Debug, Default)]
pub struct CoverageEntry {
    row: KbartRow,
    resolved: OnceLock<ResolvedWindow>,
}

impl Clone for CoverageEntry {
    fn clone(&self) -> Self {
        Self::new(self.row.clone())
    }
}

impl From<KbartRow> for CoverageEntry {
    fn from(row: KbartRow) -> Self {
        Self::new(row)
    }
}

impl CoverageEntry {
    pub fn new(row: KbartRow) -> Self {
        Self {
            row,
            resolved: OnceLock::new(),
        }
    }

    pub fn row(&self) -> &KbartRow {
        &self.row
    }

    /// Edit the raw fields. The parsed window is discarded and recomputed on
    /// next use.
    pub fn update_row(&mut self, edit: impl FnOnce(&mut KbartRow)) {
        edit(&mut self.row);
        self.resolved = OnceLock::new();
    }

    pub fn into_row(self) -> KbartRow {
        self.row
    }

    pub fn window(&self) -> &ResolvedWindow {
        self.resolved.get_or_init(|| ResolvedWindow::from_row(&self.row))
    }

    /// Normalized ISSNs from the identifier columns and from `all_issns`.
    pub fn normalized_identifiers(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for raw in [&self.row.print_identifier, &self.row.online_identifier] {
            let normalized = normalize_serial_number(raw);
            if is_canonical(&normalized) {
                ids.insert(normalized);
            }
        }
        ids.extend(find_serial_numbers(&self.row.all_serial_numbers));
        ids
    }

    /// Whether date, volume and issue fall inside this entry, as of today.
    pub fn covers(&self, date: &str, volume: &str, issue: &str) -> Result<(), CoverageError> {
        self.covers_at(date, volume, issue, Utc::now().date_naive())
    }

    /// Like [`covers`](Self::covers), with the reference date for embargo
    /// calculations supplied by the caller.
    pub fn covers_at(
        &self,
        date: &str,
        volume: &str,
        issue: &str,
        today: NaiveDate,
    ) -> Result<(), CoverageError> {
        if date.trim().is_empty() {
            return Ok(());
        }
        let requested = parse_partial_date(date)
            .ok_or_else(|| CoverageError::InvalidDate(date.to_string()))?;
        let window = self.window();

        let g = requested.granularity.coarser(window.begin.granularity);
        if requested.truncated(g) < window.begin.truncated(g) {
            return Err(CoverageError::BeforeFirstIssueDate);
        }
        let g = requested.granularity.coarser(window.end.granularity);
        if requested.truncated(g) > window.end.truncated(g) {
            return Err(CoverageError::AfterLastIssueDate);
        }

        window.embargo.check(&requested, today)?;

        // Volume and issue numbers only mean something within the boundary year.
        if window.begin.year() == requested.year() {
            if exceeds(volume, &self.row.first_volume, |v, b| v < b) {
                return Err(CoverageError::BeforeFirstVolume);
            }
            if exceeds(issue, &self.row.first_issue, |v, b| v < b) {
                return Err(CoverageError::BeforeFirstIssue);
            }
        }
        if window.end.year() == requested.year() {
            if exceeds(volume, &self.row.last_volume, |v, b| v > b) {
                return Err(CoverageError::AfterLastVolume);
            }
            if exceeds(issue, &self.row.last_issue, |v, b| v > b) {
                return Err(CoverageError::AfterLastIssue);
            }
        }
        Ok(())
    }
}

/// Compare the first integers of `value` and `bound`; a side without a number
/// disables the check.
fn exceeds(value: &str, bound: &str, violated: impl Fn(i64, i64) -> bool) -> bool {
    match (find_int(value), find_int(bound)) {
        (Some(v), Some(b)) => violated(v, b),
        _ => false,
    }
}

/// The first integer embedded in `s`, e.g. `12` for `"Vol. 12"` or `"12-13"`.
pub fn find_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    INT_RE.find(s).and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 6, 15).unwrap()
    }

    fn entry(first: &str, last: &str) -> CoverageEntry {
        CoverageEntry::new(KbartRow {
            print_identifier: "1234-5678".into(),
            first_issue_date: first.into(),
            last_issue_date: last.into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_boundaries_are_unbounded() {
        let e = entry("", "");
        for date in ["1450", "1999-01-01", "2019-Dec", "2999"] {
            assert!(e.covers_at(date, "999", "999", today()).is_ok(), "{date}");
        }
        assert!(e.covers_at("", "", "", today()).is_ok());
    }

    #[test]
    fn test_unparsable_boundaries_are_unbounded() {
        let e = entry("sometime", "later");
        assert!(e.covers_at("1800", "", "", today()).is_ok());
        assert!(e.covers_at("2100", "", "", today()).is_ok());
    }

    #[test]
    fn test_before_first_issue_date() {
        let e = entry("1996", "2005");
        assert_eq!(
            e.covers_at("1995", "", "", today()),
            Err(CoverageError::BeforeFirstIssueDate)
        );
    }

    #[test]
    fn test_after_last_issue_date() {
        let e = entry("1996", "2005");
        assert_eq!(
            e.covers_at("2006-01-01", "", "", today()),
            Err(CoverageError::AfterLastIssueDate)
        );
        assert!(e.covers_at("2005-12-31", "", "", today()).is_ok());
    }

    #[test]
    fn test_coarser_granularity_decides() {
        let e = entry("2000-06-15", "2000-09");
        // A year-only request inside the boundary year is not rejected.
        assert!(e.covers_at("2000", "", "", today()).is_ok());
        assert_eq!(
            e.covers_at("2000-06-14", "", "", today()),
            Err(CoverageError::BeforeFirstIssueDate)
        );
        assert!(e.covers_at("2000-09-30", "", "", today()).is_ok());
        assert_eq!(
            e.covers_at("2000-10-01", "", "", today()),
            Err(CoverageError::AfterLastIssueDate)
        );
    }

    #[test]
    fn test_before_first_issue_in_boundary_year() {
        let mut row = KbartRow {
            first_issue_date: "2000".into(),
            first_volume: "10".into(),
            first_issue: "3".into(),
            ..Default::default()
        };
        let e = CoverageEntry::new(row.clone());
        assert_eq!(
            e.covers_at("2000-03-01", "10", "2", today()),
            Err(CoverageError::BeforeFirstIssue)
        );
        assert_eq!(
            e.covers_at("2000-03-01", "9", "5", today()),
            Err(CoverageError::BeforeFirstVolume)
        );
        // Outside the boundary year the numbers are not compared.
        assert!(e.covers_at("2001-03-01", "1", "1", today()).is_ok());

        row.first_issue = "n/a".into();
        let e = CoverageEntry::new(row);
        assert!(e.covers_at("2000-03-01", "10", "1", today()).is_ok());
    }

    #[test]
    fn test_after_last_volume_and_issue() {
        let e = CoverageEntry::new(KbartRow {
            last_issue_date: "2010".into(),
            last_volume: "Vol. 25".into(),
            last_issue: "4".into(),
            ..Default::default()
        });
        assert_eq!(
            e.covers_at("2010-11", "26", "1", today()),
            Err(CoverageError::AfterLastVolume)
        );
        assert_eq!(
            e.covers_at("2010-11", "25", "5", today()),
            Err(CoverageError::AfterLastIssue)
        );
        assert!(e.covers_at("2010-11", "25", "4", today()).is_ok());
        assert!(e.covers_at("2010-11", "", "", today()).is_ok());
    }

    #[test]
    fn test_invalid_request_date() {
        let e = entry("2000", "2010");
        assert_eq!(
            e.covers_at("last tuesday", "", "", today()),
            Err(CoverageError::InvalidDate("last tuesday".into()))
        );
    }

    #[test]
    fn test_embargo_applies_after_window() {
        let mut e = entry("2000", "");
        e.update_row(|row| row.embargo = "P12M".into());
        assert!(e.covers_at("2019-01-01", "", "", today()).is_ok());
        assert_eq!(
            e.covers_at("2020-01-01", "", "", today()),
            Err(CoverageError::AfterMovingWall)
        );
    }

    #[test]
    fn test_update_row_invalidates_window() {
        let mut e = entry("1996", "2005");
        assert!(e.covers_at("2006", "", "", today()).is_err());
        e.update_row(|row| row.last_issue_date = "2010".into());
        assert_eq!(e.window().end.year(), 2010);
        assert!(e.covers_at("2006", "", "", today()).is_ok());
    }

    #[test]
    fn test_normalized_identifiers() {
        let e = CoverageEntry::new(KbartRow {
            print_identifier: "12345678".into(),
            online_identifier: "9783662479841".into(),
            all_serial_numbers: "1990-0104;1990-0090;1234-5678".into(),
            ..Default::default()
        });
        let ids: Vec<String> = e.normalized_identifiers().into_iter().collect();
        assert_eq!(ids, vec!["1234-5678", "1990-0090", "1990-0104"]);
    }

    #[test]
    fn test_find_int() {
        assert_eq!(find_int("12"), Some(12));
        assert_eq!(find_int("Vol. 12"), Some(12));
        assert_eq!(find_int("12-13"), Some(12));
        assert_eq!(find_int("n/a"), None);
        assert_eq!(find_int(""), None);
    }
}
