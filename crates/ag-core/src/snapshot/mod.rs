//! AGX Snapshot Format and Loader
//!
//! This module provides the binary format constants and the validating
//! loader for AGX snapshots. Snapshots are written by `ag-compiler`.

mod format;
mod loader;

pub use format::*;
pub use loader::*;
