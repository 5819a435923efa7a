//! Core types shared by every pipeline: the outcome taxonomy, request
//! validation and the on-disk source unit.

pub mod input;
pub mod source;
pub mod verdict;

pub use source::SourceUnit;
pub use verdict::{ExecutionOutcome, OutcomeKind};
