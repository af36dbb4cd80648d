//! The engine aggregate: one rule index per kind, plus the resources and tags
//! they consult.

use ag_compiler::{build_snapshot, optimize_filters, parse_filter_list};
use ag_core::cosmetic::CosmeticIndexStats;
use ag_core::network::NetworkIndexStats;
use ag_core::snapshot::{load_snapshot, SnapshotContents, SnapshotError};
use ag_core::{CosmeticIndex, HostnameResources, MatchResult, NetworkIndex, Request, Resource, ResourceStore, TagRegistry};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Engine has been destroyed")]
    Destroyed,
}

/// Which rule kinds to keep and whether to deduplicate each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub load_network: bool,
    pub load_cosmetic: bool,
    pub optimize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            load_network: true,
            load_cosmetic: true,
            optimize: true,
        }
    }
}

/// Outcome of one [`Engine::add_filter`] batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterLoadStats {
    pub network: usize,
    pub cosmetic: usize,
    /// Malformed or unsupported lines
    pub skipped: usize,
    /// Exact duplicates removed by the optimizer
    pub deduped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub network: NetworkIndexStats,
    pub cosmetic: CosmeticIndexStats,
    pub resources: usize,
    pub tags: usize,
}

/// A content-filtering engine.
///
/// Mutations take `&mut self` and are visible to the next query; there is no
/// separate compile step.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    network: NetworkIndex,
    cosmetic: CosmeticIndex,
    resources: ResourceStore,
    tags: TagRegistry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::empty(EngineConfig::default())
    }
}

impl Engine {
    fn empty(config: EngineConfig) -> Self {
        Self {
            config,
            network: NetworkIndex::new(),
            cosmetic: CosmeticIndex::new(),
            resources: ResourceStore::new(),
            tags: TagRegistry::new(),
        }
    }

    /// Build an engine from newline-separated filter rules.
    pub fn from_rules(rules: &str) -> Self {
        Self::with_config(rules, EngineConfig::default())
    }

    pub fn with_config(rules: &str, config: EngineConfig) -> Self {
        let mut engine = Self::empty(config);
        engine.add_filter(rules);
        engine
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Parse `text` and insert every valid rule. Malformed lines are skipped.
    pub fn add_filter(&mut self, text: &str) -> FilterLoadStats {
        let mut parsed = parse_filter_list(text);
        let deduped = if self.config.optimize {
            let stats = optimize_filters(&mut parsed);
            stats.before - stats.after
        } else {
            0
        };

        let mut stats = FilterLoadStats {
            skipped: parsed.skipped,
            deduped,
            ..FilterLoadStats::default()
        };

        if self.config.load_network {
            stats.network = parsed.network.len();
            for filter in parsed.network {
                self.network.insert(filter);
            }
        }
        if self.config.load_cosmetic {
            stats.cosmetic = parsed.cosmetic.len();
            for filter in parsed.cosmetic {
                self.cosmetic.insert(filter);
            }
        }

        log::debug!(
            "Loaded {} network and {} cosmetic rules ({} skipped, {} duplicates)",
            stats.network,
            stats.cosmetic,
            stats.skipped,
            stats.deduped
        );
        stats
    }

    /// Add or replace a named resource. `content_type` may carry `;base64`.
    pub fn add_resource(&mut self, name: &str, content_type: &str, data: &str) {
        self.resources.add(Resource::new(name, content_type, data));
    }

    /// Load a resources manifest, returning how many entries were added.
    pub fn add_resources(&mut self, manifest: &str) -> usize {
        self.resources.add_manifest(manifest)
    }

    pub fn add_tag(&mut self, tag: &str) {
        self.tags.add(tag);
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }

    pub fn tag_exists(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Match a network request.
    ///
    /// `resource_type` uses browser names (`script`, `image`, `sub_frame`,
    /// ...). An empty `tab_host` means the request host is also the page host.
    pub fn check_network_request(
        &self,
        url: &str,
        host: &str,
        tab_host: &str,
        third_party: bool,
        resource_type: &str,
    ) -> MatchResult {
        let request = Request::new(url, host, tab_host, third_party, resource_type);
        self.network.check(&request, &self.tags, &self.resources)
    }

    pub fn hostname_cosmetic_resources(&self, hostname: &str) -> HostnameResources {
        self.cosmetic.hostname_resources(&hostname.to_ascii_lowercase(), &self.resources)
    }

    /// Generic hiding rules for classes and ids seen on a page, net of
    /// `exceptions` (usually [`HostnameResources::exceptions`]).
    pub fn class_id_stylesheet<C, I, E>(&self, classes: &[C], ids: &[I], exceptions: &[E]) -> String
    where
        C: AsRef<str>,
        I: AsRef<str>,
        E: AsRef<str>,
    {
        self.cosmetic.class_id_stylesheet(classes, ids, exceptions)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            network: self.network.stats(),
            cosmetic: self.cosmetic.stats(),
            resources: self.resources.len(),
            tags: self.tags.len(),
        }
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Rules, resources and enabled tags as an AGX snapshot.
    pub fn serialize(&self) -> Vec<u8> {
        let contents = SnapshotContents {
            network: self.network.filters().to_vec(),
            cosmetic: self.cosmetic.filters().to_vec(),
            resources: self.resources.iter_sorted().into_iter().cloned().collect(),
            tags: self.tags.iter().map(str::to_string).collect(),
        };
        build_snapshot(&contents)
    }

    /// Replace the engine state with a snapshot.
    ///
    /// On error the engine is left exactly as it was. The configuration is
    /// kept; rule kinds it disables are not restored.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        let contents = load_snapshot(bytes).map_err(|err| {
            log::warn!("Rejected snapshot ({} bytes): {err}", bytes.len());
            err
        })?;

        let mut restored = Self::empty(self.config);
        if restored.config.load_network {
            for filter in contents.network {
                restored.network.insert(filter);
            }
        }
        if restored.config.load_cosmetic {
            for filter in contents.cosmetic {
                restored.cosmetic.insert(filter);
            }
        }
        for resource in contents.resources {
            restored.resources.add(resource);
        }
        for tag in &contents.tags {
            restored.tags.add(tag);
        }

        *self = restored;
        Ok(())
    }
}
