//! End to end: KBART and configuration files on disk, a tagger built from
//! them, its frozen form and the batch pipeline.

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;

use holdings_core::filter::freeze::{freeze_to_path, unfreeze_from_path};
use holdings_core::{HoldingsError, Processor, Record, Tagger};

const KBART: &str = "\u{feff}publication_title\tprint_identifier\tonline_identifier\tdate_first_issue_online\tnum_first_vol_online\tnum_first_issue_online\tdate_last_issue_online\tnum_last_vol_online\tnum_last_issue_online\tembargo_info\r\n\
Journal of Tests\t1234-5678\t\t2000\t1\t1\t2010\t11\t4\t\r\n\
Moving Wall Review\t\t8765-4321\t2005-01-01\t\t\t\t\t\tP1Y\r\n";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 6, 15).unwrap()
}

fn write_fixtures(dir: &Path) -> JsonValue {
    let kbart = dir.join("holdings.tsv");
    fs::write(&kbart, KBART).unwrap();
    let issns = dir.join("issns.txt");
    fs::write(&issns, "# extra titles\n1111-2222\n\n").unwrap();
    let kbart = kbart.to_str().unwrap();
    json!({
        "DE-15": {"holdings": {"file": kbart}},
        "DE-14": {"and": [{"source": ["49"]}, {"holdings": {"files": [kbart]}}]},
        "DE-X": {"or": [{"collection": ["JSTOR"]}, {"issn": {"file": issns.to_str().unwrap()}}]},
        "DE-DOI": {"and": [{"doi": {}}, {"not": {"source": ["48"]}}]}
    })
}

fn records() -> Vec<Record> {
    vec![
        Record {
            record_id: "1".into(),
            source_id: "49".into(),
            issn: vec!["12345678".into()],
            date: "2005-01-01".into(),
            ..Default::default()
        },
        Record {
            record_id: "2".into(),
            issn: vec!["1234-5678".into()],
            date: "2015".into(),
            ..Default::default()
        },
        Record {
            record_id: "3".into(),
            source_id: "48".into(),
            eissn: vec!["8765-4321".into()],
            date: "2019-01-01".into(),
            doi: "10.1/3".into(),
            ..Default::default()
        },
        Record {
            record_id: "4".into(),
            eissn: vec!["8765-4321".into()],
            date: "2020-03-01".into(),
            collections: vec!["JSTOR".into()],
            doi: "10.1/4".into(),
            ..Default::default()
        },
        Record {
            record_id: "5".into(),
            issn: vec!["11112222".into()],
            ..Default::default()
        },
        Record {
            record_id: "6".into(),
            issn: vec!["1234-5678".into()],
            date: "2000-06-01".into(),
            volume: "0".into(),
            ..Default::default()
        },
    ]
}

fn expected() -> Vec<Vec<&'static str>> {
    vec![
        vec!["DE-14", "DE-15"],
        vec![],
        vec!["DE-15"],
        vec!["DE-DOI", "DE-X"],
        vec!["DE-X"],
        vec![],
    ]
}

fn labels_of(line: &str) -> Vec<String> {
    let value: JsonValue = serde_json::from_str(line).unwrap();
    match value.get("x.labels") {
        Some(labels) => serde_json::from_value(labels.clone()).unwrap(),
        None => Vec::new(),
    }
}

#[test]
fn test_tagger_from_files() {
    let dir = TempDir::new().unwrap();
    let config = write_fixtures(dir.path());
    let tagger = Tagger::from_config(&config).unwrap().with_today(today());

    for (record, want) in records().iter().zip(expected()) {
        let mut got = tagger.tag(record);
        got.sort();
        assert_eq!(got, want, "record {}", record.record_id);
    }
}

#[test]
fn test_same_holdings_file_is_loaded_once() {
    let dir = TempDir::new().unwrap();
    let tagger = Tagger::from_config(&write_fixtures(dir.path())).unwrap();
    let holdings: Vec<_> = tagger
        .trees()
        .flat_map(|(_, tree)| tree.holdings())
        .collect();
    assert_eq!(holdings.len(), 2);
    assert!(Arc::ptr_eq(holdings[0].index(), holdings[1].index()));
    assert_eq!(holdings[0].index().len(), 2);
}

#[test]
fn test_frozen_tagger_matches_configured_tagger() {
    let dir = TempDir::new().unwrap();
    let tagger = Tagger::from_config(&write_fixtures(dir.path()))
        .unwrap()
        .with_today(today());

    let frozen = dir.path().join("tagger.bin");
    freeze_to_path(&tagger, &frozen).unwrap();
    // Coverage data travels inside the blob.
    fs::remove_file(dir.path().join("holdings.tsv")).unwrap();

    let thawed = unfreeze_from_path(&frozen).unwrap().with_today(today());
    assert_eq!(thawed.len(), tagger.len());
    for record in records() {
        assert_eq!(thawed.tag(&record), tagger.tag(&record));
    }
}

#[test]
fn test_pipeline_keeps_order_and_tags() {
    let dir = TempDir::new().unwrap();
    let tagger = Tagger::from_config(&write_fixtures(dir.path()))
        .unwrap()
        .with_today(today());

    let mut input = String::new();
    for _ in 0..50 {
        for record in records() {
            input.push_str(&serde_json::to_string(&record).unwrap());
            input.push('\n');
        }
    }

    let processor = Processor::new().with_workers(3).with_batch_size(4);
    let mut out = Vec::new();
    let stats = processor
        .run(Cursor::new(input.as_bytes()), &mut out, |_, line| {
            tagger.tag_json(line)
        })
        .unwrap();
    assert_eq!(stats.records, 300);
    assert_eq!(stats.skipped, 0);

    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 300);
    let want = expected();
    for (i, line) in lines.iter().enumerate() {
        let value: JsonValue = serde_json::from_str(line).unwrap();
        assert_eq!(value["finc.record_id"], format!("{}", i % 6 + 1));
        assert_eq!(labels_of(line), want[i % 6]);
    }
}

#[test]
fn test_pipeline_malformed_record_policy() {
    let tagger = Tagger::from_config(&json!({"ALL": {"any": {}}})).unwrap();
    let input = "{\"finc.record_id\":\"a\"}\n{broken\n{\"finc.record_id\":\"b\"}\n";
    let tag = |_: u64, line: &[u8]| tagger.tag_json(line);

    let mut out = Vec::new();
    let err = Processor::new()
        .with_workers(2)
        .with_batch_size(1)
        .run(Cursor::new(input.as_bytes()), &mut out, tag)
        .unwrap_err();
    assert!(matches!(err, HoldingsError::Worker { seq: 1, .. }));

    let mut out = Vec::new();
    let stats = Processor::new()
        .with_workers(2)
        .with_batch_size(1)
        .with_best_effort(true)
        .run(Cursor::new(input.as_bytes()), &mut out, tag)
        .unwrap();
    assert_eq!(stats.skipped, 1);
    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(labels_of(lines[0]), vec!["ALL"]);
    assert_eq!(lines[1], "{broken");
    assert_eq!(labels_of(lines[2]), vec!["ALL"]);
}

#[test]
fn test_bad_configuration_is_rejected() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.tsv");
    let config = json!({"DE-15": {"holdings": {"file": missing.to_str().unwrap()}}});
    let err = Tagger::from_config(&config).unwrap_err();
    assert!(matches!(err, HoldingsError::Config(ref m) if m.contains("DE-15")));
}
