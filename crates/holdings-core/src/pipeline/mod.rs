//! Ordered batch processing of newline-delimited records.

pub mod processor;
pub mod reorder;

pub use processor::{Processor, RunStats};
pub use reorder::Reorder;
