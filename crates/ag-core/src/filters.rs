//! Typed filter rule records
//!
//! These are produced by the compiler crate, inserted into the indexes in
//! [`crate::network`] and [`crate::cosmetic`], and persisted by the snapshot
//! layer.

use crate::hash::hash_domain;
use crate::pattern::Pattern;
use crate::psl::{entity_names, walk_host_suffixes};
use crate::types::{PartyMask, Request, RequestType, RuleFlags};

// =============================================================================
// Domain constraints
// =============================================================================

/// `$domain=a.com|~b.a.com|google.*`, stored as hostname/entity hashes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainConstraint {
    pub include: Vec<u64>,
    pub exclude: Vec<u64>,
}

impl DomainConstraint {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a page on `host` satisfies the constraint.
    ///
    /// The most specific listed entry decides, so `a.com|~b.a.com` applies on
    /// `a.com` and `x.a.com` but not on `b.a.com`.
    pub fn matches(&self, host: &str) -> bool {
        for hash in scope_hashes(host) {
            if self.exclude.contains(&hash) {
                return false;
            }
            if self.include.contains(&hash) {
                return true;
            }
        }
        self.include.is_empty()
    }
}

/// Hashes of every hostname suffix of `host` followed by its entity names,
/// most specific first.
pub fn scope_hashes(host: &str) -> Vec<u64> {
    let mut hashes: Vec<u64> = walk_host_suffixes(host).map(hash_domain).collect();
    hashes.extend(entity_names(host).iter().map(|e| hash_domain(e)));
    hashes
}

// =============================================================================
// Network filters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFilter {
    /// Original filter text
    pub raw: String,
    pub flags: RuleFlags,
    pub pattern: Pattern,
    /// Empty means every request type
    pub type_mask: RequestType,
    /// Empty means both parties
    pub party_mask: PartyMask,
    pub domains: Option<DomainConstraint>,
    /// Resource name from `$redirect=` or `$redirect-rule=`
    pub redirect: Option<String>,
    pub tag: Option<String>,
    /// Hash of the normalized rule, ignoring `$badfilter`
    pub fingerprint: u64,
}

impl NetworkFilter {
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.flags.contains(RuleFlags::EXCEPTION)
    }

    #[inline]
    pub fn is_important(&self) -> bool {
        self.flags.contains(RuleFlags::IMPORTANT)
    }

    #[inline]
    pub fn is_badfilter(&self) -> bool {
        self.flags.contains(RuleFlags::BADFILTER)
    }

    /// `$redirect-rule=` directives redirect requests blocked by other rules
    /// and never block by themselves.
    #[inline]
    pub fn is_redirect_directive(&self) -> bool {
        self.flags.contains(RuleFlags::REDIRECT_RULE)
    }

    /// Type, party and domain checks.
    pub fn matches_options(&self, request: &Request) -> bool {
        if !self.type_mask.is_empty() && !self.type_mask.intersects(request.request_type) {
            return false;
        }
        if !self.party_mask.is_empty() && !self.party_mask.intersects(request.party()) {
            return false;
        }
        match &self.domains {
            Some(constraint) => constraint.matches(&request.tab_host),
            None => true,
        }
    }

    pub fn matches(&self, request: &Request) -> bool {
        self.matches_options(request) && self.pattern.matches(&request.url)
    }
}

// =============================================================================
// Cosmetic filters
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CosmeticKind {
    /// `##selector`
    Hide = 0,
    /// `#@#selector`
    Unhide = 1,
    /// `##+js(name, args...)`
    ScriptInject = 2,
    /// `#@#+js(name, args...)`
    ScriptException = 3,
}

impl TryFrom<u8> for CosmeticKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Hide),
            1 => Ok(Self::Unhide),
            2 => Ok(Self::ScriptInject),
            3 => Ok(Self::ScriptException),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmeticFilter {
    pub raw: String,
    pub kind: CosmeticKind,
    /// CSS selector, or the argument list inside `+js(...)`
    pub selector: String,
    /// Hostname and entity hashes the rule is scoped to
    pub hostnames: Vec<u64>,
    /// Negated hostnames (`~example.com`)
    pub not_hostnames: Vec<u64>,
}

impl CosmeticFilter {
    /// Generic rules apply on every page (minus `not_hostnames`).
    pub fn is_generic(&self) -> bool {
        self.hostnames.is_empty()
    }
}
