//! Boolean filter trees.

use chrono::NaiveDate;

use crate::filter::predicates::{
    collection_matches, doi_present, issn_matches, package_matches, source_matches,
    subject_matches, HoldingsFilter, ValueSet,
};
use crate::models::Record;

/// One node of a filter tree. Children are owned; trees never share nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Any,
    Holdings(HoldingsFilter),
    Issn(ValueSet),
    Doi,
    Collection(ValueSet),
    Package(ValueSet),
    Source(ValueSet),
    Subject(ValueSet),
}

impl FilterNode {
    pub fn not(child: FilterNode) -> FilterNode {
        FilterNode::Not(Box::new(child))
    }

    /// The configuration key naming this node's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FilterNode::And(_) => "and",
            FilterNode::Or(_) => "or",
            FilterNode::Not(_) => "not",
            FilterNode::Any => "any",
            FilterNode::Holdings(_) => "holdings",
            FilterNode::Issn(_) => "issn",
            FilterNode::Doi => "doi",
            FilterNode::Collection(_) => "collection",
            FilterNode::Package(_) => "package",
            FilterNode::Source(_) => "source",
            FilterNode::Subject(_) => "subject",
        }
    }

    /// Evaluate the tree against a record. `today` anchors embargo windows.
    ///
    /// `And` stops at the first false child, `Or` at the first true one.
    pub fn evaluate(&self, record: &Record, today: NaiveDate) -> bool {
        match self {
            FilterNode::And(children) => children.iter().all(|c| c.evaluate(record, today)),
            FilterNode::Or(children) => children.iter().any(|c| c.evaluate(record, today)),
            FilterNode::Not(child) => !child.evaluate(record, today),
            FilterNode::Any => true,
            FilterNode::Holdings(holdings) => holdings.matches(record, today),
            FilterNode::Issn(set) => issn_matches(set, record),
            FilterNode::Doi => doi_present(record),
            FilterNode::Collection(set) => collection_matches(set, record),
            FilterNode::Package(set) => package_matches(set, record),
            FilterNode::Source(set) => source_matches(set, record),
            FilterNode::Subject(set) => subject_matches(set, record),
        }
    }

    /// Every holdings filter in the tree, depth first.
    pub fn holdings(&self) -> Vec<&HoldingsFilter> {
        let mut found = Vec::new();
        self.collect_holdings(&mut found);
        found
    }

    fn collect_holdings<'a>(&'a self, found: &mut Vec<&'a HoldingsFilter>) {
        match self {
            FilterNode::And(children) | FilterNode::Or(children) => {
                for child in children {
                    child.collect_holdings(found);
                }
            }
            FilterNode::Not(child) => child.collect_holdings(found),
            FilterNode::Holdings(h) => found.push(h),
            _ => {}
        }
    }
}
