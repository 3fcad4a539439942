//! Record filters: leaf predicates, boolean trees, their configuration and
//! the tagger that applies them per institution.

pub mod config;
pub mod freeze;
pub mod predicates;
pub mod tagger;
pub mod tree;

pub use config::{FilterBuilder, FILTER_KINDS};
pub use freeze::{freeze, unfreeze};
pub use predicates::{HoldingsFilter, ValueSet};
pub use tagger::Tagger;
pub use tree::FilterNode;
