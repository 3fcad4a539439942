//! Holdings core library: decides which institutions are licensed to show a
//! bibliographic record.
//!
//! Coverage files (KBART) are loaded into a [`licensing::CoverageIndex`];
//! per-institution boolean [`filter::FilterNode`] trees built from a JSON
//! configuration combine holdings lookups with simple record predicates; a
//! [`filter::Tagger`] evaluates every tree for a record and the
//! [`pipeline::Processor`] runs it over newline-delimited records on a worker
//! pool while keeping output in input order.

pub mod errors;
pub mod filter;
pub mod licensing;
pub mod models;
pub mod pipeline;

pub use errors::{HoldingsError, HoldingsResult};
pub use filter::{FilterNode, Tagger};
pub use licensing::{CoverageEntry, CoverageError, CoverageIndex, KbartRow};
pub use models::Record;
pub use pipeline::{Processor, RunStats};
