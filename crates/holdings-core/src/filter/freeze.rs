//! Compact binary form of a configured [`Tagger`].
//!
//! Layout (integers little-endian, strings as `u32` length + UTF-8):
//!
//! - `magic[4]` = `"HTAG"`, `version: u8`
//! - `index_count: u32`, then per coverage index: `entry_count: u32`, then
//!   per entry the 17 raw KBART fields
//! - `label_count: u32`, then per label: name, tree
//! - `crc32: u32` over every preceding byte
//!
//! A tree node is a tag byte followed by its payload. A holdings node carries
//! its position in the index table, so shared indexes stay shared, followed
//! by `origin_count: u32` and its origin paths.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::errors::{HoldingsError, HoldingsResult};
use crate::filter::predicates::{HoldingsFilter, ValueSet};
use crate::filter::tagger::Tagger;
use crate::filter::tree::FilterNode;
use crate::licensing::{CoverageIndex, KbartRow};

pub const FREEZE_MAGIC: [u8; 4] = *b"HTAG";
pub const FREEZE_VERSION: u8 = 1;

const MAX_DEPTH: usize = 256;

const TAG_AND: u8 = 0x01;
const TAG_OR: u8 = 0x02;
const TAG_NOT: u8 = 0x03;
const TAG_ANY: u8 = 0x04;
const TAG_HOLDINGS: u8 = 0x05;
const TAG_ISSN: u8 = 0x06;
const TAG_DOI: u8 = 0x07;
const TAG_COLLECTION: u8 = 0x08;
const TAG_PACKAGE: u8 = 0x09;
const TAG_SOURCE: u8 = 0x0A;
const TAG_SUBJECT: u8 = 0x0B;

// ---------------------------------------------------------------------------
// KBART row fields in wire order
// ---------------------------------------------------------------------------

const ROW_FIELDS: usize = 17;

fn row_fields(row: &KbartRow) -> [&str; ROW_FIELDS] {
    [
        &row.publication_title,
        &row.print_identifier,
        &row.online_identifier,
        &row.first_issue_date,
        &row.first_volume,
        &row.first_issue,
        &row.last_issue_date,
        &row.last_volume,
        &row.last_issue,
        &row.title_url,
        &row.title_id,
        &row.embargo,
        &row.coverage_depth,
        &row.publisher_name,
        &row.package_collection,
        &row.all_serial_numbers,
        &row.zdb_id,
    ]
}

fn row_from_fields(fields: [String; ROW_FIELDS]) -> KbartRow {
    let [publication_title, print_identifier, online_identifier, first_issue_date, first_volume, first_issue, last_issue_date, last_volume, last_issue, title_url, title_id, embargo, coverage_depth, publisher_name, package_collection, all_serial_numbers, zdb_id] =
        fields;
    KbartRow {
        publication_title,
        print_identifier,
        online_identifier,
        first_issue_date,
        first_volume,
        first_issue,
        last_issue_date,
        last_volume,
        last_issue,
        title_url,
        title_id,
        embargo,
        coverage_depth,
        publisher_name,
        package_collection,
        all_serial_numbers,
        zdb_id,
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: usize) -> HoldingsResult<()> {
        let v = u32::try_from(v)
            .map_err(|_| HoldingsError::encode(format!("length {v} does not fit in 32 bits")))?;
        self.buf.extend_from_slice(&v.to_le_bytes());
        Ok(())
    }

    fn str(&mut self, s: &str) -> HoldingsResult<()> {
        self.u32(s.len())?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn set(&mut self, set: &ValueSet) -> HoldingsResult<()> {
        self.u32(set.len())?;
        for value in set {
            self.str(value)?;
        }
        Ok(())
    }
}

/// Distinct coverage indexes referenced by the tagger, by identity.
fn index_table(tagger: &Tagger) -> Vec<&HoldingsFilter> {
    let mut table: Vec<&HoldingsFilter> = Vec::new();
    for (_, tree) in tagger.trees() {
        for holdings in tree.holdings() {
            if !table.iter().any(|h| Arc::ptr_eq(h.index(), holdings.index())) {
                table.push(holdings);
            }
        }
    }
    table
}

fn write_node(
    w: &mut Writer,
    node: &FilterNode,
    table: &[&HoldingsFilter],
) -> HoldingsResult<()> {
    match node {
        FilterNode::And(children) | FilterNode::Or(children) => {
            w.u8(if matches!(node, FilterNode::And(_)) { TAG_AND } else { TAG_OR });
            w.u32(children.len())?;
            for child in children {
                write_node(w, child, table)?;
            }
        }
        FilterNode::Not(child) => {
            w.u8(TAG_NOT);
            write_node(w, child, table)?;
        }
        FilterNode::Any => w.u8(TAG_ANY),
        FilterNode::Doi => w.u8(TAG_DOI),
        FilterNode::Holdings(holdings) => {
            let position = table
                .iter()
                .position(|h| Arc::ptr_eq(h.index(), holdings.index()))
                .ok_or_else(|| HoldingsError::encode("holdings index missing from table"))?;
            w.u8(TAG_HOLDINGS);
            w.u32(position)?;
            w.u32(holdings.origin().len())?;
            for path in holdings.origin() {
                w.str(&path.to_string_lossy())?;
            }
        }
        FilterNode::Issn(set) => {
            w.u8(TAG_ISSN);
            w.set(set)?;
        }
        FilterNode::Collection(set) => {
            w.u8(TAG_COLLECTION);
            w.set(set)?;
        }
        FilterNode::Package(set) => {
            w.u8(TAG_PACKAGE);
            w.set(set)?;
        }
        FilterNode::Source(set) => {
            w.u8(TAG_SOURCE);
            w.set(set)?;
        }
        FilterNode::Subject(set) => {
            w.u8(TAG_SUBJECT);
            w.set(set)?;
        }
    }
    Ok(())
}

/// Serialize a tagger, including the coverage data its holdings filters use.
pub fn freeze(tagger: &Tagger) -> HoldingsResult<Vec<u8>> {
    let mut w = Writer::default();
    w.buf.extend_from_slice(&FREEZE_MAGIC);
    w.u8(FREEZE_VERSION);

    let table = index_table(tagger);
    w.u32(table.len())?;
    for holdings in &table {
        let entries = holdings.index().entries();
        w.u32(entries.len())?;
        for entry in entries {
            for field in row_fields(entry.row()) {
                w.str(field)?;
            }
        }
    }

    w.u32(tagger.len())?;
    for (label, tree) in tagger.trees() {
        w.str(label)?;
        write_node(&mut w, tree, &table)?;
    }

    let checksum = crc32fast::hash(&w.buf);
    w.buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(w.buf)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &str) -> HoldingsResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                HoldingsError::decode(format!("truncated {what} at offset {}", self.pos))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> HoldingsResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u32(&mut self, what: &str) -> HoldingsResult<usize> {
        let raw: [u8; 4] = self
            .take(4, what)?
            .try_into()
            .map_err(|_| HoldingsError::decode(format!("bad {what}")))?;
        Ok(u32::from_le_bytes(raw) as usize)
    }

    fn string(&mut self, what: &str) -> HoldingsResult<String> {
        let len = self.u32(what)?;
        let raw = self.take(len, what)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| HoldingsError::decode(format!("{what} is not valid UTF-8")))
    }

    fn set(&mut self) -> HoldingsResult<ValueSet> {
        let count = self.u32("set size")?;
        let mut set = ValueSet::new();
        for _ in 0..count {
            set.insert(self.string("set value")?);
        }
        Ok(set)
    }

    fn is_done(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

fn read_node(
    r: &mut Reader<'_>,
    table: &[Arc<CoverageIndex>],
    depth: usize,
) -> HoldingsResult<FilterNode> {
    if depth > MAX_DEPTH {
        return Err(HoldingsError::decode(format!("tree deeper than {MAX_DEPTH}")));
    }
    let offset = r.pos;
    let node = match r.u8("node tag")? {
        tag @ (TAG_AND | TAG_OR) => {
            let count = r.u32("child count")?;
            let mut children = Vec::new();
            for _ in 0..count {
                children.push(read_node(r, table, depth + 1)?);
            }
            if tag == TAG_AND {
                FilterNode::And(children)
            } else {
                FilterNode::Or(children)
            }
        }
        TAG_NOT => FilterNode::not(read_node(r, table, depth + 1)?),
        TAG_ANY => FilterNode::Any,
        TAG_DOI => FilterNode::Doi,
        TAG_HOLDINGS => {
            let position = r.u32("index reference")?;
            let index = table.get(position).ok_or_else(|| {
                HoldingsError::decode(format!("holdings index {position} out of range"))
            })?;
            let origin_count = r.u32("origin count")?;
            let mut origin = Vec::new();
            for _ in 0..origin_count {
                origin.push(PathBuf::from(r.string("origin path")?));
            }
            FilterNode::Holdings(HoldingsFilter::new(Arc::clone(index), origin))
        }
        TAG_ISSN => FilterNode::Issn(r.set()?),
        TAG_COLLECTION => FilterNode::Collection(r.set()?),
        TAG_PACKAGE => FilterNode::Package(r.set()?),
        TAG_SOURCE => FilterNode::Source(r.set()?),
        TAG_SUBJECT => FilterNode::Subject(r.set()?),
        other => {
            return Err(HoldingsError::decode(format!(
                "unknown node tag {other:#04x} at offset {offset}"
            )))
        }
    };
    Ok(node)
}

/// Rebuild a tagger from [`freeze`] output.
pub fn unfreeze(bytes: &[u8]) -> HoldingsResult<Tagger> {
    if bytes.len() < FREEZE_MAGIC.len() + 1 + 4 {
        return Err(HoldingsError::decode("frozen tagger too short"));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(HoldingsError::decode(format!(
            "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
        )));
    }

    let mut r = Reader { bytes: body, pos: 0 };
    if r.take(4, "magic")? != FREEZE_MAGIC {
        return Err(HoldingsError::decode("not a frozen tagger (bad magic)"));
    }
    let version = r.u8("version")?;
    if version != FREEZE_VERSION {
        return Err(HoldingsError::decode(format!(
            "unsupported freeze version {version}, expected {FREEZE_VERSION}"
        )));
    }

    let index_count = r.u32("index count")?;
    let mut table = Vec::new();
    for _ in 0..index_count {
        let entry_count = r.u32("entry count")?;
        let mut rows = Vec::new();
        for _ in 0..entry_count {
            let mut fields: [String; ROW_FIELDS] = Default::default();
            for field in fields.iter_mut() {
                *field = r.string("entry field")?;
            }
            rows.push(row_from_fields(fields));
        }
        table.push(Arc::new(CoverageIndex::from_rows(rows)));
    }

    let label_count = r.u32("label count")?;
    let mut tagger = Tagger::new();
    for _ in 0..label_count {
        let label = r.string("label")?;
        let tree = read_node(&mut r, &table, 0)?;
        if tagger.insert(label.clone(), tree).is_some() {
            return Err(HoldingsError::decode(format!("duplicate label {label:?}")));
        }
    }
    if !r.is_done() {
        return Err(HoldingsError::decode(format!(
            "{} trailing bytes after tagger",
            body.len() - r.pos
        )));
    }
    Ok(tagger)
}

pub fn freeze_to_path(tagger: &Tagger, path: &Path) -> HoldingsResult<()> {
    let bytes = freeze(tagger)?;
    fs::write(path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), labels = tagger.len(), "froze tagger");
    Ok(())
}

pub fn unfreeze_from_path(path: &Path) -> HoldingsResult<Tagger> {
    let bytes = fs::read(path)?;
    let tagger = unfreeze(&bytes)?;
    info!(path = %path.display(), labels = tagger.len(), "unfroze tagger");
    Ok(tagger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use chrono::NaiveDate;

    fn holdings(first: &str) -> FilterNode {
        let index = CoverageIndex::from_rows(vec![KbartRow {
            publication_title: "Journal".into(),
            print_identifier: "1234-5678".into(),
            first_issue_date: first.into(),
            embargo: "P1Y".into(),
            ..Default::default()
        }]);
        FilterNode::Holdings(HoldingsFilter::new(
            Arc::new(index),
            vec![PathBuf::from("kbart.tsv")],
        ))
    }

    fn sample_tagger() -> Tagger {
        let shared = holdings("2000");
        let mut tagger = Tagger::new();
        tagger.insert(
            "A",
            FilterNode::And(vec![
                FilterNode::Issn(["1234-5678".to_string()].into()),
                shared.clone(),
            ]),
        );
        tagger.insert(
            "B",
            FilterNode::Or(vec![
                FilterNode::not(FilterNode::Doi),
                FilterNode::Collection(["JSTOR".to_string()].into()),
                FilterNode::Package(ValueSet::new()),
                FilterNode::Source(["49".to_string()].into()),
                FilterNode::Subject(["Ökonomie".to_string()].into()),
            ]),
        );
        tagger.insert("C", shared);
        tagger.insert("D", FilterNode::Any);
        tagger
    }

    #[test]
    fn test_freeze_roundtrip_is_structurally_equal() {
        let tagger = sample_tagger();
        let thawed = unfreeze(&freeze(&tagger).unwrap()).unwrap();
        assert_eq!(thawed.len(), tagger.len());
        for ((la, ta), (lb, tb)) in tagger.trees().zip(thawed.trees()) {
            assert_eq!(la, lb);
            assert_eq!(ta, tb);
        }
    }

    #[test]
    fn test_shared_index_stays_shared() {
        let thawed = unfreeze(&freeze(&sample_tagger()).unwrap()).unwrap();
        let holdings: Vec<&HoldingsFilter> =
            thawed.trees().flat_map(|(_, tree)| tree.holdings()).collect();
        assert_eq!(holdings.len(), 2);
        assert!(Arc::ptr_eq(holdings[0].index(), holdings[1].index()));
    }

    #[test]
    fn test_thawed_tagger_tags_identically() {
        let today = NaiveDate::from_ymd_opt(2020, 6, 15).unwrap();
        let tagger = sample_tagger().with_today(today);
        let thawed = unfreeze(&freeze(&tagger).unwrap()).unwrap().with_today(today);
        let records = [
            Record::default(),
            Record {
                issn: vec!["12345678".into()],
                date: "2005-01-01".into(),
                ..Default::default()
            },
            Record {
                issn: vec!["1234-5678".into()],
                date: "2020-01-01".into(),
                doi: "10.1/x".into(),
                ..Default::default()
            },
        ];
        for record in &records {
            assert_eq!(tagger.tag(record), thawed.tag(record));
        }
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut bytes = freeze(&sample_tagger()).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xFF;
        assert!(matches!(unfreeze(&bytes), Err(HoldingsError::Decode(_))));
    }

    #[test]
    fn test_truncated_and_foreign_blobs_are_rejected() {
        let bytes = freeze(&sample_tagger()).unwrap();
        assert!(matches!(unfreeze(&bytes[..3]), Err(HoldingsError::Decode(_))));
        assert!(matches!(
            unfreeze(&bytes[..bytes.len() - 1]),
            Err(HoldingsError::Decode(_))
        ));
        assert!(matches!(
            unfreeze(b"{\"DE-15\": {\"any\": {}}}"),
            Err(HoldingsError::Decode(_))
        ));
    }

    #[test]
    fn test_unknown_tag_with_valid_checksum_is_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&FREEZE_MAGIC);
        body.push(FREEZE_VERSION);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        body.push(b'X');
        body.push(0x7F);
        let checksum = crc32fast::hash(&body);
        body.extend_from_slice(&checksum.to_le_bytes());
        let err = unfreeze(&body).unwrap_err();
        assert!(matches!(err, HoldingsError::Decode(ref m) if m.contains("unknown node tag")));
    }

    #[test]
    fn test_empty_tagger_roundtrip() {
        let thawed = unfreeze(&freeze(&Tagger::new()).unwrap()).unwrap();
        assert!(thawed.is_empty());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_length_is_an_encode_error() {
        let mut w = Writer::default();
        let err = w.u32(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, HoldingsError::Encode(_)));
        assert!(w.buf.is_empty());
    }
}
