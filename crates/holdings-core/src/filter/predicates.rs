//! Leaf predicates over a [`Record`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::licensing::CoverageIndex;
use crate::models::Record;

/// Configured values of a set predicate. Compared by exact string match.
pub type ValueSet = BTreeSet<String>;

fn intersects<'a, I>(set: &ValueSet, values: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    values.into_iter().any(|v| set.contains(v))
}

/// Normalized record ISSNs against a set of normalized ISSNs.
pub fn issn_matches(set: &ValueSet, record: &Record) -> bool {
    intersects(set, &record.identifiers())
}

pub fn doi_present(record: &Record) -> bool {
    record.has_doi()
}

pub fn collection_matches(set: &ValueSet, record: &Record) -> bool {
    intersects(set, &record.collections)
}

pub fn package_matches(set: &ValueSet, record: &Record) -> bool {
    intersects(set, &record.packages)
}

pub fn source_matches(set: &ValueSet, record: &Record) -> bool {
    set.contains(&record.source_id)
}

pub fn subject_matches(set: &ValueSet, record: &Record) -> bool {
    intersects(set, &record.subjects)
}

// ---------------------------------------------------------------------------
// Holdings
// ---------------------------------------------------------------------------

/// Licensed coverage lookup. The index is shared between every tree that
/// references the same holdings files.
#[derive(Clone)]
pub struct HoldingsFilter {
    index: Arc<CoverageIndex>,
    origin: Vec<PathBuf>,
}

impl HoldingsFilter {
    pub fn new(index: Arc<CoverageIndex>, origin: Vec<PathBuf>) -> Self {
        Self { index, origin }
    }

    pub fn index(&self) -> &Arc<CoverageIndex> {
        &self.index
    }

    /// Files the index was built from, for diagnostics.
    pub fn origin(&self) -> &[PathBuf] {
        &self.origin
    }

    /// True iff some entry for one of the record's ISSNs covers its date,
    /// volume and issue. Records without identifiers are never covered.
    pub fn matches(&self, record: &Record, today: NaiveDate) -> bool {
        let ids = record.identifiers();
        if ids.is_empty() {
            return false;
        }
        self.index
            .covers_any(&ids, &record.date, &record.volume, &record.issue, today)
    }
}

impl fmt::Debug for HoldingsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HoldingsFilter")
            .field("entries", &self.index.len())
            .field("origin", &self.origin)
            .finish()
    }
}

impl PartialEq for HoldingsFilter {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.index, &other.index) {
            return self.origin == other.origin;
        }
        self.origin == other.origin
            && self.index.len() == other.index.len()
            && self
                .index
                .entries()
                .iter()
                .zip(other.index.entries())
                .all(|(a, b)| a.row() == b.row())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::licensing::KbartRow;

    fn set(values: &[&str]) -> ValueSet {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 6, 15).unwrap()
    }

    fn record() -> Record {
        Record {
            issn: vec!["12345678".into()],
            date: "2001-05-01".into(),
            source_id: "49".into(),
            collections: vec!["Crossref".into()],
            packages: vec!["sage_premier".into()],
            subjects: vec!["Physics".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_set_predicates() {
        let r = record();
        assert!(issn_matches(&set(&["1234-5678"]), &r));
        assert!(!issn_matches(&set(&["8765-4321"]), &r));
        assert!(collection_matches(&set(&["Crossref", "JSTOR"]), &r));
        assert!(!collection_matches(&set(&["crossref"]), &r));
        assert!(package_matches(&set(&["sage_premier"]), &r));
        assert!(source_matches(&set(&["48", "49"]), &r));
        assert!(!source_matches(&set(&["4"]), &r));
        assert!(subject_matches(&set(&["Physics"]), &r));
        assert!(!subject_matches(&ValueSet::new(), &r));
        assert!(!doi_present(&r));
    }

    #[test]
    fn test_holdings_matches() {
        let index = CoverageIndex::from_rows(vec![KbartRow {
            print_identifier: "1234-5678".into(),
            first_issue_date: "2000".into(),
            last_issue_date: "2002".into(),
            ..Default::default()
        }]);
        let filter = HoldingsFilter::new(Arc::new(index), vec![]);
        let mut r = record();
        assert!(filter.matches(&r, today()));
        r.date = "2003-01-01".into();
        assert!(!filter.matches(&r, today()));
        r.date = "not a date".into();
        assert!(!filter.matches(&r, today()));
    }

    #[test]
    fn test_holdings_without_identifiers_fails_closed() {
        let index = CoverageIndex::from_rows(vec![KbartRow {
            print_identifier: "1234-5678".into(),
            ..Default::default()
        }]);
        let filter = HoldingsFilter::new(Arc::new(index), vec![]);
        let mut r = record();
        r.issn.clear();
        assert!(!filter.matches(&r, today()));
    }
}
