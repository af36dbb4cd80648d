//! Batch optimization
//!
//! Removes exact duplicates from a freshly parsed batch before it is inserted.
//! `$badfilter` rules are kept: they must also disable matching rules that
//! arrive in later batches.

use std::collections::HashSet;

use ag_core::filters::{CosmeticFilter, CosmeticKind, NetworkFilter};

use crate::parser::ParsedFilters;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped_network: usize,
    pub deduped_cosmetic: usize,
}

pub fn optimize_filters(filters: &mut ParsedFilters) -> OptimizeStats {
    let before = filters.network.len() + filters.cosmetic.len();

    let mut seen: HashSet<NetworkKey> = HashSet::new();
    let mut deduped_network = 0usize;
    filters.network.retain(|rule| {
        if seen.insert(NetworkKey::from(rule)) {
            true
        } else {
            deduped_network += 1;
            false
        }
    });

    let mut seen: HashSet<CosmeticKey> = HashSet::new();
    let mut deduped_cosmetic = 0usize;
    filters.cosmetic.retain(|rule| {
        if seen.insert(CosmeticKey::from(rule)) {
            true
        } else {
            deduped_cosmetic += 1;
            false
        }
    });

    let after = filters.network.len() + filters.cosmetic.len();
    if after < before {
        log::debug!("Optimizer removed {} duplicate rules ({before} -> {after})", before - after);
    }

    OptimizeStats {
        before,
        after,
        deduped_network,
        deduped_cosmetic,
    }
}

/// Fingerprints ignore `$badfilter`, so the flag is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NetworkKey {
    fingerprint: u64,
    badfilter: bool,
}

impl From<&NetworkFilter> for NetworkKey {
    fn from(rule: &NetworkFilter) -> Self {
        Self {
            fingerprint: rule.fingerprint,
            badfilter: rule.is_badfilter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CosmeticKey {
    kind: CosmeticKind,
    selector: String,
    hostnames: Vec<u64>,
    not_hostnames: Vec<u64>,
}

impl From<&CosmeticFilter> for CosmeticKey {
    fn from(rule: &CosmeticFilter) -> Self {
        let mut hostnames = rule.hostnames.clone();
        let mut not_hostnames = rule.not_hostnames.clone();
        hostnames.sort_unstable();
        not_hostnames.sort_unstable();
        Self {
            kind: rule.kind,
            selector: rule.selector.clone(),
            hostnames,
            not_hostnames,
        }
    }
}
