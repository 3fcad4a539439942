//! Identifier → coverage entries lookup, built from KBART files.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::errors::{HoldingsError, HoldingsResult};
use crate::licensing::entry::{CoverageEntry, KbartRow};

// ---------------------------------------------------------------------------
// KBART reading
// ---------------------------------------------------------------------------

/// The field of `row` stored under a KBART column name, if the column is one
/// we keep.
fn column_slot<'a>(row: &'a mut KbartRow, column: &str) -> Option<&'a mut String> {
    let slot = match column {
        "publication_title" => &mut row.publication_title,
        "print_identifier" => &mut row.print_identifier,
        "online_identifier" => &mut row.online_identifier,
        "date_first_issue_online" => &mut row.first_issue_date,
        "num_first_vol_online" => &mut row.first_volume,
        "num_first_issue_online" => &mut row.first_issue,
        "date_last_issue_online" => &mut row.last_issue_date,
        "num_last_vol_online" => &mut row.last_volume,
        "num_last_issue_online" => &mut row.last_issue,
        "title_url" => &mut row.title_url,
        "title_id" => &mut row.title_id,
        "embargo_info" => &mut row.embargo,
        "coverage_depth" => &mut row.coverage_depth,
        "publisher_name" => &mut row.publisher_name,
        "package:collection" => &mut row.package_collection,
        "all_issns" => &mut row.all_serial_numbers,
        "zdb_id" => &mut row.zdb_id,
        _ => return None,
    };
    Some(slot)
}

/// Read tab-separated KBART rows. The first non-empty line is the header;
/// columns are matched by name, so their order is free.
pub fn read_kbart<R: BufRead>(reader: R) -> HoldingsResult<Vec<KbartRow>> {
    let mut lines = reader.lines();
    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Ok(Vec::new()),
        }
    };
    let columns: Vec<String> = header
        .trim_start_matches('\u{feff}')
        .trim_end_matches('\r')
        .split('\t')
        .map(|c| c.trim().to_string())
        .collect();
    if !columns
        .iter()
        .any(|c| c == "print_identifier" || c == "online_identifier" || c == "all_issns")
    {
        return Err(HoldingsError::config(format!(
            "KBART header names no identifier column: {header:?}"
        )));
    }

    let mut rows = Vec::new();
    for line in lines {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let mut row = KbartRow::default();
        // Short rows leave trailing columns empty; extra fields are dropped.
        for (column, value) in columns.iter().zip(line.split('\t')) {
            if let Some(slot) = column_slot(&mut row, column) {
                *slot = value.trim().to_string();
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Read a KBART file from disk.
pub fn load_kbart(path: &Path) -> HoldingsResult<Vec<KbartRow>> {
    let file = File::open(path).map_err(|e| {
        HoldingsError::config(format!("cannot open holdings file {}: {e}", path.display()))
    })?;
    let rows = read_kbart(BufReader::new(file))?;
    info!(path = %path.display(), rows = rows.len(), "loaded holdings file");
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Maps normalized identifiers to every entry claiming them. Built once and
/// read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct CoverageIndex {
    entries: Vec<CoverageEntry>,
    by_identifier: HashMap<String, Vec<usize>>,
}

impl CoverageIndex {
    pub fn from_entries(entries: Vec<CoverageEntry>) -> Self {
        let mut by_identifier: HashMap<String, Vec<usize>> = HashMap::new();
        let mut unindexed = 0usize;
        for (position, entry) in entries.iter().enumerate() {
            let ids = entry.normalized_identifiers();
            if ids.is_empty() {
                unindexed += 1;
            }
            for id in ids {
                by_identifier.entry(id).or_default().push(position);
            }
        }
        if unindexed > 0 {
            debug!(unindexed, "coverage entries without any usable identifier");
        }
        Self {
            entries,
            by_identifier,
        }
    }

    pub fn from_rows(rows: Vec<KbartRow>) -> Self {
        Self::from_entries(rows.into_iter().map(CoverageEntry::new).collect())
    }

    /// Index the rows of one KBART stream.
    pub fn from_reader<R: BufRead>(reader: R) -> HoldingsResult<Self> {
        Ok(Self::from_rows(read_kbart(reader)?))
    }

    /// Index one KBART file.
    pub fn load_kbart(path: &Path) -> HoldingsResult<Self> {
        Ok(Self::from_rows(load_kbart(path)?))
    }

    /// Combine indexes; entries keep their relative order.
    pub fn merge<I>(indexes: I) -> Self
    where
        I: IntoIterator<Item = CoverageIndex>,
    {
        let entries = indexes
            .into_iter()
            .flat_map(|index| index.entries)
            .collect();
        Self::from_entries(entries)
    }

    /// Merge several KBART files into one index.
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> HoldingsResult<Self> {
        let indexes = paths
            .iter()
            .map(|path| Self::load_kbart(path.as_ref()))
            .collect::<HoldingsResult<Vec<_>>>()?;
        let index = Self::merge(indexes);
        info!(
            files = paths.len(),
            entries = index.len(),
            identifiers = index.identifier_count(),
            "built coverage index"
        );
        Ok(index)
    }

    /// Every entry claiming `identifier`, in no particular order.
    pub fn lookup<'a>(&'a self, identifier: &str) -> impl Iterator<Item = &'a CoverageEntry> + 'a {
        self.by_identifier
            .get(identifier)
            .map(|positions| positions.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&position| &self.entries[position])
    }

    /// True if any entry for any of `identifiers` covers the request.
    pub fn covers_any(
        &self,
        identifiers: &BTreeSet<String>,
        date: &str,
        volume: &str,
        issue: &str,
        today: NaiveDate,
    ) -> bool {
        identifiers.iter().any(|id| {
            self.lookup(id)
                .any(|entry| entry.covers_at(date, volume, issue, today).is_ok())
        })
    }

    pub fn entries(&self) -> &[CoverageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identifier_count(&self) -> usize {
        self.by_identifier.len()
    }
}
