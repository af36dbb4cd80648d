//! AdGate Core Library
//!
//! This crate provides the rule indexes and matching logic for the AdGate
//! content filtering engine.
//!
//! # Architecture
//!
//! Filter rules are parsed by `ag-compiler` into typed records and inserted
//! into two incrementally maintained indexes: [`NetworkIndex`] for request
//! blocking and [`CosmeticIndex`] for element hiding and scriptlets. Both are
//! query-ready after every insertion. The same records are persisted in the
//! AGX binary snapshot format and re-inserted on load.
//!
//! # Modules
//!
//! - `hash`: Murmur3 and CRC32 hashing for domains, tokens and snapshots
//! - `psl`: hostname suffix and entity helpers
//! - `url`: URL parsing and tokenization for the hot path
//! - `pattern`: compiled ABP patterns
//! - `filters`: network and cosmetic rule records
//! - `network`: network index and matcher
//! - `cosmetic`: cosmetic index and resolver
//! - `resources`: redirect and scriptlet resources
//! - `tags`: enabled tag registry
//! - `snapshot`: AGX snapshot format and loader
//! - `catalog`: illustrative filter list metadata (no signing keys)
//! - `types`: shared type definitions

pub mod catalog;
pub mod cosmetic;
pub mod filters;
pub mod hash;
pub mod network;
pub mod pattern;
pub mod psl;
pub mod resources;
pub mod snapshot;
pub mod tags;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use cosmetic::{CosmeticIndex, HostnameResources};
pub use filters::{CosmeticFilter, CosmeticKind, DomainConstraint, NetworkFilter};
pub use hash::{hash_domain, hash_token};
pub use network::NetworkIndex;
pub use psl::get_etld1;
pub use resources::{Resource, ResourceStore};
pub use snapshot::{SnapshotContents, SnapshotError};
pub use tags::TagRegistry;
pub use types::{MatchDecision, MatchResult, Request, RequestType};
