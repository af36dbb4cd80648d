//! AdGate Engine
//!
//! [`Engine`] ties the `ag-core` indexes to the `ag-compiler` parser and
//! snapshot builder: feed it filter text, resources and tags, then query
//! network requests and per-page cosmetics.
//!
//! ```
//! use ag_engine::Engine;
//!
//! let engine = Engine::from_rules("||ads.example.com^$script");
//! let result = engine.check_network_request(
//!     "https://ads.example.com/ad.js",
//!     "ads.example.com",
//!     "news.example.org",
//!     true,
//!     "script",
//! );
//! assert!(result.is_blocked());
//! ```

pub mod engine;
pub mod handle;

pub use ag_core::catalog::{filter_list_catalog, filter_list_catalog_size, FilterListEntry};
pub use ag_core::{HostnameResources, MatchDecision, MatchResult};
pub use engine::{Engine, EngineConfig, EngineError, EngineStats, FilterLoadStats};
pub use handle::EngineHandle;
