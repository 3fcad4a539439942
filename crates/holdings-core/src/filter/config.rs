//! Declarative (JSON) filter configuration.
//!
//! A tagger configuration maps labels to expressions:
//!
//! ```json
//! {
//!   "DE-15": {"or": [{"holdings": {"file": "de15.tsv"}}, {"collection": ["JSTOR"]}]},
//!   "DE-14": {"and": [{"source": ["49"]}, {"not": {"doi": {}}}]}
//! }
//! ```
//!
//! Every expression is an object with exactly one key. The key selects an
//! entry in [`FILTER_KINDS`]; unknown keys are configuration errors.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::errors::{HoldingsError, HoldingsResult};
use crate::filter::predicates::{HoldingsFilter, ValueSet};
use crate::filter::tree::FilterNode;
use crate::licensing::serial::normalize_serial_number;
use crate::licensing::CoverageIndex;

type Constructor = fn(&mut FilterBuilder, &JsonValue) -> HoldingsResult<FilterNode>;

/// Filter kinds by configuration key. Fixed at compile time.
pub const FILTER_KINDS: &[(&str, Constructor)] = &[
    ("and", build_and as Constructor),
    ("or", build_or as Constructor),
    ("not", build_not as Constructor),
    ("any", build_any as Constructor),
    ("holdings", build_holdings as Constructor),
    ("issn", build_issn as Constructor),
    ("doi", build_doi as Constructor),
    ("collection", build_collection as Constructor),
    ("package", build_package as Constructor),
    ("source", build_source as Constructor),
    ("subject", build_subject as Constructor),
];

/// Builds filter trees from JSON. Holdings files are loaded once per distinct
/// file list and shared between every tree built by the same builder.
#[derive(Default)]
pub struct FilterBuilder {
    holdings: HashMap<Vec<PathBuf>, Arc<CoverageIndex>>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct coverage indexes loaded so far.
    pub fn loaded_indexes(&self) -> usize {
        self.holdings.len()
    }

    pub fn build(&mut self, expr: &JsonValue) -> HoldingsResult<FilterNode> {
        let object = expr.as_object().ok_or_else(|| {
            HoldingsError::config(format!("filter expression must be an object, got {expr}"))
        })?;
        let mut keys = object.iter();
        let (key, body) = match (keys.next(), keys.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(HoldingsError::config("empty filter expression"));
            }
            (Some(_), Some(_)) => {
                let names: Vec<&str> = object.keys().map(String::as_str).collect();
                return Err(HoldingsError::config(format!(
                    "filter expression must have exactly one key, got {names:?}"
                )));
            }
        };
        let constructor = FILTER_KINDS
            .iter()
            .find(|(name, _)| *name == key.as_str())
            .map(|(_, constructor)| *constructor)
            .ok_or_else(|| HoldingsError::config(format!("unknown filter: {key:?}")))?;
        constructor(self, body)
    }

    fn holdings_index(&mut self, files: Vec<PathBuf>) -> HoldingsResult<Arc<CoverageIndex>> {
        if let Some(index) = self.holdings.get(&files) {
            debug!(files = ?files, "reusing coverage index");
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(CoverageIndex::load_files(&files)?);
        self.holdings.insert(files, Arc::clone(&index));
        Ok(index)
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

fn build_children(
    builder: &mut FilterBuilder,
    body: &JsonValue,
    kind: &str,
) -> HoldingsResult<Vec<FilterNode>> {
    let items = body
        .as_array()
        .ok_or_else(|| HoldingsError::config(format!("{kind:?} expects an array of filters")))?;
    if items.is_empty() {
        return Err(HoldingsError::config(format!("{kind:?} needs at least one filter")));
    }
    items.iter().map(|item| builder.build(item)).collect()
}

fn build_and(builder: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    Ok(FilterNode::And(build_children(builder, body, "and")?))
}

fn build_or(builder: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    Ok(FilterNode::Or(build_children(builder, body, "or")?))
}

fn build_not(builder: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    Ok(FilterNode::not(builder.build(body)?))
}

fn expect_empty_object(body: &JsonValue, kind: &str) -> HoldingsResult<()> {
    match body.as_object() {
        Some(object) if object.is_empty() => Ok(()),
        _ => Err(HoldingsError::config(format!("{kind:?} takes no arguments, use {{}}"))),
    }
}

fn build_any(_: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    expect_empty_object(body, "any")?;
    Ok(FilterNode::Any)
}

fn build_doi(_: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    expect_empty_object(body, "doi")?;
    Ok(FilterNode::Doi)
}

fn build_holdings(builder: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    let object = body
        .as_object()
        .ok_or_else(|| HoldingsError::config("\"holdings\" expects an object"))?;
    let mut files = Vec::new();
    for (key, value) in object {
        match key.as_str() {
            "file" => files.push(PathBuf::from(expect_str(value, "holdings.file")?)),
            "files" => {
                for item in expect_array(value, "holdings.files")? {
                    files.push(PathBuf::from(expect_str(item, "holdings.files")?));
                }
            }
            other => {
                return Err(HoldingsError::config(format!(
                    "unknown holdings option: {other:?}"
                )))
            }
        }
    }
    if files.is_empty() {
        return Err(HoldingsError::config("\"holdings\" needs \"file\" or \"files\""));
    }
    let index = builder.holdings_index(files.clone())?;
    Ok(FilterNode::Holdings(HoldingsFilter::new(index, files)))
}

fn build_issn(_: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    let values = value_set(body, "issn")?;
    Ok(FilterNode::Issn(
        values.iter().map(|v| normalize_serial_number(v)).collect(),
    ))
}

fn build_collection(_: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    Ok(FilterNode::Collection(value_set(body, "collection")?))
}

fn build_package(_: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    Ok(FilterNode::Package(value_set(body, "package")?))
}

fn build_source(_: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    Ok(FilterNode::Source(value_set(body, "source")?))
}

fn build_subject(_: &mut FilterBuilder, body: &JsonValue) -> HoldingsResult<FilterNode> {
    Ok(FilterNode::Subject(value_set(body, "subject")?))
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

fn expect_str<'a>(value: &'a JsonValue, what: &str) -> HoldingsResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| HoldingsError::config(format!("{what} expects a string, got {value}")))
}

fn expect_array<'a>(value: &'a JsonValue, what: &str) -> HoldingsResult<&'a Vec<JsonValue>> {
    value
        .as_array()
        .ok_or_else(|| HoldingsError::config(format!("{what} expects an array, got {value}")))
}

fn string_list(value: &JsonValue, what: &str) -> HoldingsResult<ValueSet> {
    expect_array(value, what)?
        .iter()
        .map(|item| expect_str(item, what).map(str::to_string))
        .collect()
}

/// A set given as `[...]`, `{"list": [...]}` or `{"file": "path"}`.
fn value_set(body: &JsonValue, kind: &str) -> HoldingsResult<ValueSet> {
    if body.is_array() {
        return string_list(body, kind);
    }
    let object = body.as_object().ok_or_else(|| {
        HoldingsError::config(format!("{kind:?} expects a list, {{\"list\": [...]}} or {{\"file\": ...}}"))
    })?;
    let mut values = ValueSet::new();
    for (key, value) in object {
        match key.as_str() {
            "list" => values.extend(string_list(value, kind)?),
            "file" => values.extend(read_value_file(Path::new(expect_str(value, kind)?))?),
            other => {
                return Err(HoldingsError::config(format!(
                    "unknown {kind} option: {other:?}"
                )))
            }
        }
    }
    Ok(values)
}

/// One value per line; blank lines and `#` comments are skipped.
pub fn read_value_file(path: &Path) -> HoldingsResult<ValueSet> {
    let content = fs::read_to_string(path).map_err(|e| {
        HoldingsError::config(format!("cannot read value file {}: {e}", path.display()))
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
