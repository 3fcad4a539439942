//! The normalized bibliographic record consumed by filters and the tagger.

use std::collections::BTreeSet;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::licensing::serial::normalized_set;

type JsonObject = JsonMap<String, JsonValue>;

const RECORD_ID: &str = "finc.record_id";
const SOURCE_ID: &str = "finc.source_id";
const ISSN: &str = "rft.issn";
const EISSN: &str = "rft.eissn";
const DOI: &str = "doi";
const DATE: &str = "rft.date";
const VOLUME: &str = "rft.volume";
const ISSUE: &str = "rft.issue";
const COLLECTIONS: &str = "finc.mega_collection";
const PACKAGES: &str = "x.packages";
const SUBJECTS: &str = "x.subjects";
const LABELS: &str = "x.labels";

/// One intermediate-schema record. Fields the engine does not look at are
/// kept in `extra` and written back unchanged; numbers keep their original
/// text.
///
/// A known field set to `null` reads as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonObject", into = "JsonObject")]
pub struct Record {
    pub record_id: String,
    pub source_id: String,
    pub issn: Vec<String>,
    pub eissn: Vec<String>,
    pub doi: String,
    pub date: String,
    pub volume: String,
    pub issue: String,
    pub collections: Vec<String>,
    pub packages: Vec<String>,
    pub subjects: Vec<String>,
    pub labels: Vec<String>,
    pub extra: JsonObject,
}

/// Remove `key` from the object and decode it; absent and `null` give the
/// default.
fn take<T>(object: &mut JsonObject, key: &str) -> serde_json::Result<T>
where
    T: DeserializeOwned + Default,
{
    match object.remove(key) {
        None | Some(JsonValue::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| serde_json::Error::custom(format!("field {key:?}: {e}"))),
    }
}

fn put_str(object: &mut JsonObject, key: &str, value: String) {
    if !value.is_empty() {
        object.insert(key.to_string(), JsonValue::String(value));
    }
}

fn put_list(object: &mut JsonObject, key: &str, values: Vec<String>) {
    if !values.is_empty() {
        object.insert(
            key.to_string(),
            JsonValue::Array(values.into_iter().map(JsonValue::String).collect()),
        );
    }
}

impl TryFrom<JsonObject> for Record {
    type Error = serde_json::Error;

    fn try_from(mut object: JsonObject) -> Result<Self, Self::Error> {
        Ok(Record {
            record_id: take(&mut object, RECORD_ID)?,
            source_id: take(&mut object, SOURCE_ID)?,
            issn: take(&mut object, ISSN)?,
            eissn: take(&mut object, EISSN)?,
            doi: take(&mut object, DOI)?,
            date: take(&mut object, DATE)?,
            volume: take(&mut object, VOLUME)?,
            issue: take(&mut object, ISSUE)?,
            collections: take(&mut object, COLLECTIONS)?,
            packages: take(&mut object, PACKAGES)?,
            subjects: take(&mut object, SUBJECTS)?,
            labels: take(&mut object, LABELS)?,
            extra: object,
        })
    }
}

impl From<Record> for JsonObject {
    fn from(record: Record) -> Self {
        let mut object = record.extra;
        put_str(&mut object, RECORD_ID, record.record_id);
        put_str(&mut object, SOURCE_ID, record.source_id);
        put_list(&mut object, ISSN, record.issn);
        put_list(&mut object, EISSN, record.eissn);
        put_str(&mut object, DOI, record.doi);
        put_str(&mut object, DATE, record.date);
        put_str(&mut object, VOLUME, record.volume);
        put_str(&mut object, ISSUE, record.issue);
        put_list(&mut object, COLLECTIONS, record.collections);
        put_list(&mut object, PACKAGES, record.packages);
        put_list(&mut object, SUBJECTS, record.subjects);
        put_list(&mut object, LABELS, record.labels);
        object
    }
}

impl Record {
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Normalized print and online ISSNs.
    pub fn identifiers(&self) -> BTreeSet<String> {
        normalized_set(self.issn.iter().chain(self.eissn.iter()))
    }

    pub fn has_doi(&self) -> bool {
        !self.doi.trim().is_empty()
    }

    /// Replace the label list; labels are sorted for stable output.
    pub fn set_labels<I: IntoIterator<Item = String>>(&mut self, labels: I) {
        let mut labels: Vec<String> = labels.into_iter().collect();
        labels.sort();
        labels.dedup();
        self.labels = labels;
    }
}
