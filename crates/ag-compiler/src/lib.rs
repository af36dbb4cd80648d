//! AdGate Filter List Compiler
//!
//! This crate parses ABP/uBO filter lists into `ag-core` rule records and
//! serializes engine state into the AGX snapshot format.

pub mod parser;
pub mod optimizer;
pub mod builder;

pub use builder::build_snapshot;
pub use optimizer::{optimize_filters, OptimizeStats};
pub use parser::{parse_filter_list, parse_line, FilterParseError, ParsedFilters, ParsedLine};
