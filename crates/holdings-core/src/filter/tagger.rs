//! Label → filter tree mapping applied to every record.

use std::fs;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::errors::{HoldingsError, HoldingsResult};
use crate::filter::config::FilterBuilder;
use crate::filter::tree::FilterNode;
use crate::models::Record;

/// Institution labels and their filter trees. Read-only once built, so one
/// tagger can serve every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagger {
    trees: IndexMap<String, FilterNode>,
    today: NaiveDate,
}

impl Default for Tagger {
    fn default() -> Self {
        Self::new()
    }
}

impl Tagger {
    pub fn new() -> Self {
        Self {
            trees: IndexMap::new(),
            today: Utc::now().date_naive(),
        }
    }

    /// Fix the reference date used for embargo calculations.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Add or replace the tree for `label`.
    pub fn insert(&mut self, label: impl Into<String>, tree: FilterNode) -> Option<FilterNode> {
        self.trees.insert(label.into(), tree)
    }

    pub fn trees(&self) -> impl Iterator<Item = (&str, &FilterNode)> {
        self.trees.iter().map(|(label, tree)| (label.as_str(), tree))
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Labels whose tree accepts the record, in configuration order.
    pub fn tag(&self, record: &Record) -> Vec<String> {
        self.trees
            .iter()
            .filter(|(_, tree)| tree.evaluate(record, self.today))
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Parse one JSON record, tag it and serialize it back with `x.labels`
    /// replaced.
    pub fn tag_json(&self, line: &[u8]) -> HoldingsResult<Vec<u8>> {
        let mut record = Record::from_json(line)?;
        let labels = self.tag(&record);
        record.set_labels(labels);
        let mut out = serde_json::to_vec(&record)?;
        out.push(b'\n');
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Build from a decoded configuration document (label → expression).
    pub fn from_config(config: &JsonValue) -> HoldingsResult<Self> {
        let labels = config.as_object().ok_or_else(|| {
            HoldingsError::config("tagger configuration must map labels to filters")
        })?;
        let mut builder = FilterBuilder::new();
        let mut tagger = Tagger::new();
        for (label, expr) in labels {
            let tree = builder
                .build(expr)
                .map_err(|e| HoldingsError::config(format!("label {label:?}: {e}")))?;
            tagger.insert(label.clone(), tree);
        }
        info!(
            labels = tagger.len(),
            coverage_indexes = builder.loaded_indexes(),
            "tagger configured"
        );
        Ok(tagger)
    }

    /// Accept either an inline JSON document or a path to a file holding one.
    pub fn load(arg: &str) -> HoldingsResult<Self> {
        if let Ok(config) = serde_json::from_str::<JsonValue>(arg) {
            if config.is_object() {
                return Self::from_config(&config);
            }
        }
        Self::load_file(Path::new(arg))
    }

    pub fn load_file(path: &Path) -> HoldingsResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HoldingsError::config(format!("cannot read configuration {}: {e}", path.display()))
        })?;
        let config: JsonValue = serde_json::from_str(&content).map_err(|e| {
            HoldingsError::config(format!("invalid configuration {}: {e}", path.display()))
        })?;
        Self::from_config(&config)
    }
}
