//! Network Rule Index and Matcher
//!
//! This is the hot path - every request goes through here.
//!
//! Rules are bucketed on insertion, so the index is always query-ready:
//!
//! - `||host^` rules by the hash of `host`, found by walking the request
//!   host's parent domains
//! - everything else by one whole-token hash of the pattern, choosing the
//!   token whose bucket is currently smallest
//! - rules with no usable token in a fallback bucket scanned for every request

use std::collections::{HashMap, HashSet};

use crate::filters::NetworkFilter;
use crate::hash::hash_domain;
use crate::psl::walk_host_suffixes;
use crate::resources::ResourceStore;
use crate::tags::TagRegistry;
use crate::types::{MatchDecision, MatchResult, Request, RuleFlags};
use crate::url::tokenize_url;

/// Bucket occupancy, reported by the CLI `info` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkIndexStats {
    pub rules: usize,
    pub host_buckets: usize,
    pub token_buckets: usize,
    pub fallback_rules: usize,
    pub badfilters: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkIndex {
    /// Every inserted rule, in insertion order
    filters: Vec<NetworkFilter>,
    host_buckets: HashMap<u64, Vec<usize>>,
    token_buckets: HashMap<u32, Vec<usize>>,
    fallback: Vec<usize>,
    /// Fingerprints disabled by `$badfilter` rules
    disabled: HashSet<u64>,
}

impl NetworkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule and bucket it.
    ///
    /// `$badfilter` rules are stored but not bucketed; they disable every rule
    /// with the same fingerprint, including rules inserted afterwards.
    pub fn insert(&mut self, filter: NetworkFilter) {
        let idx = self.filters.len();

        if filter.is_badfilter() {
            self.disabled.insert(filter.fingerprint);
        } else if let Some(host) = filter.pattern.hostname() {
            self.host_buckets.entry(hash_domain(host)).or_default().push(idx);
        } else {
            let best = filter
                .pattern
                .index_tokens()
                .into_iter()
                .min_by_key(|token| self.token_buckets.get(token).map_or(0, Vec::len));
            match best {
                Some(token) => self.token_buckets.entry(token).or_default().push(idx),
                None => self.fallback.push(idx),
            }
        }

        self.filters.push(filter);
    }

    /// Stored rules in insertion order.
    pub fn filters(&self) -> &[NetworkFilter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn stats(&self) -> NetworkIndexStats {
        NetworkIndexStats {
            rules: self.filters.len(),
            host_buckets: self.host_buckets.len(),
            token_buckets: self.token_buckets.len(),
            fallback_rules: self.fallback.len(),
            badfilters: self.filters.iter().filter(|f| f.is_badfilter()).count(),
        }
    }

    /// Indices of rules that may match `request`, deduplicated, in insertion order.
    fn candidates(&self, request: &Request) -> Vec<usize> {
        let mut candidates = Vec::new();

        for suffix in walk_host_suffixes(&request.host) {
            if let Some(bucket) = self.host_buckets.get(&hash_domain(suffix)) {
                candidates.extend_from_slice(bucket);
            }
        }
        for token in tokenize_url(&request.url) {
            if let Some(bucket) = self.token_buckets.get(&token) {
                candidates.extend_from_slice(bucket);
            }
        }
        candidates.extend_from_slice(&self.fallback);

        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }

    /// Match a request and return the decision.
    pub fn check(&self, request: &Request, tags: &TagRegistry, resources: &ResourceStore) -> MatchResult {
        let mut important_exceptions: Vec<&NetworkFilter> = Vec::new();
        let mut exceptions: Vec<&NetworkFilter> = Vec::new();
        let mut important_blocks: Vec<&NetworkFilter> = Vec::new();
        let mut blocks: Vec<&NetworkFilter> = Vec::new();
        let mut redirects: Vec<&NetworkFilter> = Vec::new();
        let mut cancelled_redirects: HashSet<&str> = HashSet::new();

        for idx in self.candidates(request) {
            let filter = &self.filters[idx];

            if self.disabled.contains(&filter.fingerprint) {
                continue;
            }
            if let Some(tag) = &filter.tag {
                if !tags.contains(tag) {
                    continue;
                }
            }
            if !filter.matches(request) {
                continue;
            }

            if filter.is_exception() {
                // `@@...$redirect=name` only lifts redirects to `name`.
                if let Some(name) = &filter.redirect {
                    cancelled_redirects.insert(name.as_str());
                } else if filter.is_important() {
                    important_exceptions.push(filter);
                } else {
                    exceptions.push(filter);
                }
                continue;
            }

            if filter.redirect.is_some() {
                redirects.push(filter);
            }
            if filter.is_redirect_directive() {
                continue;
            }
            if filter.is_important() {
                important_blocks.push(filter);
            } else {
                blocks.push(filter);
            }
        }

        let first_block = important_blocks.first().or(blocks.first()).copied();

        let deciding: &[&NetworkFilter] = if let Some(&exception) = important_exceptions.first() {
            return allowed(request, first_block, Some(exception));
        } else if !important_blocks.is_empty() {
            &important_blocks
        } else if let Some(&exception) = exceptions.first() {
            return allowed(request, first_block, Some(exception));
        } else if !blocks.is_empty() {
            &blocks
        } else {
            return allowed(request, None, None);
        };

        let explicit_cancel = deciding
            .iter()
            .any(|f| f.flags.contains(RuleFlags::EXPLICIT_CANCEL));

        let mut best_redirect: Option<&NetworkFilter> = None;
        for filter in redirects {
            let Some(name) = &filter.redirect else { continue };
            if cancelled_redirects.contains(name.as_str()) {
                continue;
            }
            if best_redirect.map_or(true, |b| filter.pattern.specificity() > b.pattern.specificity()) {
                best_redirect = Some(filter);
            }
        }

        let decision = match best_redirect.and_then(|f| f.redirect.as_deref()) {
            Some(name) => match resources.redirect_data_uri(name) {
                Some(uri) => MatchDecision::Redirect(uri),
                None => {
                    log::debug!("Redirect resource {name:?} not found, falling back to block");
                    MatchDecision::Block
                }
            },
            None => MatchDecision::Block,
        };

        let filter = deciding[0];
        log::trace!("Blocked {} by {:?}", request.url, filter.raw);

        MatchResult {
            decision,
            explicit_cancel,
            saved_from_exception: false,
            filter: Some(filter.raw.clone()),
            exception: None,
        }
    }
}

fn allowed(request: &Request, block: Option<&NetworkFilter>, exception: Option<&NetworkFilter>) -> MatchResult {
    let saved_from_exception = block.is_some() && exception.is_some();
    if saved_from_exception {
        log::trace!(
            "Allowed {} by exception {:?}",
            request.url,
            exception.map(|e| e.raw.as_str()).unwrap_or_default()
        );
    }

    MatchResult {
        decision: MatchDecision::Allow,
        explicit_cancel: false,
        saved_from_exception,
        filter: block.map(|f| f.raw.clone()),
        exception: exception.map(|f| f.raw.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_text;
    use crate::pattern::Pattern;
    use crate::resources::Resource;
    use crate::types::{AnchorType, PartyMask, RequestType};

    /// Minimal rule builder: `||host^`, `|prefix` or plain substring patterns.
    fn rule(raw: &str, pattern: &str, flags: RuleFlags) -> NetworkFilter {
        let (anchor, body) = if let Some(rest) = pattern.strip_prefix("||") {
            (AnchorType::Hostname, rest)
        } else if let Some(rest) = pattern.strip_prefix('|') {
            (AnchorType::Left, rest)
        } else {
            (AnchorType::None, pattern)
        };
        NetworkFilter {
            raw: raw.to_string(),
            flags,
            pattern: Pattern::compile(body, anchor, false),
            type_mask: RequestType::empty(),
            party_mask: PartyMask::empty(),
            domains: None,
            redirect: None,
            tag: None,
            fingerprint: hash_text(raw.split('$').next().unwrap_or(raw)),
        }
    }

    fn index(filters: Vec<NetworkFilter>) -> NetworkIndex {
        let mut index = NetworkIndex::new();
        for filter in filters {
            index.insert(filter);
        }
        index
    }

    fn check(index: &NetworkIndex, url: &str) -> MatchResult {
        let request = Request::new(url, "", "example.org", true, "script");
        index.check(&request, &TagRegistry::new(), &ResourceStore::new())
    }

    #[test]
    fn host_rule_blocks_subdomains() {
        let index = index(vec![rule("||ads.example.com^", "||ads.example.com^", RuleFlags::empty())]);
        assert_eq!(check(&index, "https://ads.example.com/x.js").decision, MatchDecision::Block);
        assert_eq!(check(&index, "https://cdn.ads.example.com/x.js").decision, MatchDecision::Block);
        assert_eq!(check(&index, "https://example.com/x.js").decision, MatchDecision::Allow);
    }

    #[test]
    fn token_and_fallback_buckets() {
        let index = index(vec![
            rule("/banner/", "/banner/", RuleFlags::empty()),
            rule("ad", "ad", RuleFlags::empty()),
        ]);
        let stats = index.stats();
        assert_eq!(stats.token_buckets, 1);
        assert_eq!(stats.fallback_rules, 1);
        assert!(check(&index, "https://x.com/banner/1.png").is_blocked());
        assert!(check(&index, "https://x.com/load.js").is_blocked());
    }

    #[test]
    fn exception_saves_request() {
        let index = index(vec![
            rule("||ads.example.com^", "||ads.example.com^", RuleFlags::empty()),
            rule("@@||ads.example.com/allowed.js", "||ads.example.com/allowed.js", RuleFlags::EXCEPTION),
        ]);

        let result = check(&index, "https://ads.example.com/allowed.js");
        assert_eq!(result.decision, MatchDecision::Allow);
        assert!(result.saved_from_exception);
        assert_eq!(result.filter.as_deref(), Some("||ads.example.com^"));
        assert_eq!(result.exception.as_deref(), Some("@@||ads.example.com/allowed.js"));

        let result = check(&index, "https://ads.example.com/other.js");
        assert!(result.is_blocked());
        assert!(!result.saved_from_exception);
    }

    #[test]
    fn lone_exception_is_not_a_save() {
        let index = index(vec![rule("@@/banner/", "/banner/", RuleFlags::EXCEPTION)]);
        let result = check(&index, "https://x.com/banner/1.png");
        assert_eq!(result, MatchResult {
            exception: Some("@@/banner/".into()),
            ..MatchResult::default()
        });
    }

    #[test]
    fn important_precedence() {
        let index = index(vec![
            rule("||ads.example.com^$important", "||ads.example.com^", RuleFlags::IMPORTANT),
            rule("@@||ads.example.com^", "||ads.example.com^", RuleFlags::EXCEPTION),
        ]);
        assert!(check(&index, "https://ads.example.com/x.js").is_blocked());

        let mut index = index;
        index.insert(rule(
            "@@||ads.example.com^$important",
            "||ads.example.com^",
            RuleFlags::EXCEPTION | RuleFlags::IMPORTANT,
        ));
        let result = check(&index, "https://ads.example.com/x.js");
        assert!(!result.is_blocked());
        assert!(result.saved_from_exception);
    }

    #[test]
    fn badfilter_disables_earlier_and_later_rules() {
        let mut index = index(vec![
            rule("/banner/", "/banner/", RuleFlags::empty()),
            rule("/banner/$badfilter", "/banner/", RuleFlags::BADFILTER),
        ]);
        assert!(!check(&index, "https://x.com/banner/1.png").is_blocked());
        index.insert(rule("/banner/", "/banner/", RuleFlags::empty()));
        assert!(!check(&index, "https://x.com/banner/1.png").is_blocked());
        assert_eq!(index.stats().badfilters, 1);
    }

    #[test]
    fn tag_gating() {
        let mut tagged = rule("/share/$tag=social", "/share/", RuleFlags::empty());
        tagged.tag = Some("social".into());
        let index = index(vec![tagged]);
        let request = Request::new("https://x.com/share/btn.js", "", "", true, "script");
        let resources = ResourceStore::new();

        let mut tags = TagRegistry::new();
        assert!(!index.check(&request, &tags, &resources).is_blocked());
        tags.add("social");
        assert!(index.check(&request, &tags, &resources).is_blocked());
        tags.remove("social");
        assert!(!index.check(&request, &tags, &resources).is_blocked());
    }

    #[test]
    fn redirect_resolution() {
        let mut redirecting = rule("||ads.example.com^$redirect=noop.js", "||ads.example.com^", RuleFlags::empty());
        redirecting.redirect = Some("noop.js".into());
        let index = index(vec![redirecting]);
        let request = Request::new("https://ads.example.com/x.js", "", "", true, "script");
        let tags = TagRegistry::new();

        let result = index.check(&request, &tags, &ResourceStore::new());
        assert_eq!(result.decision, MatchDecision::Block);

        let mut resources = ResourceStore::new();
        resources.add(Resource::new("noop.js", "application/javascript", "(function() {})();"));
        let result = index.check(&request, &tags, &resources);
        assert!(result.redirect().is_some_and(|uri| uri.starts_with("data:application/javascript;base64,")));
    }

    #[test]
    fn redirect_rule_needs_a_block() {
        let mut directive = rule("||cdn.example.com^$redirect-rule=noop.js", "||cdn.example.com^", RuleFlags::REDIRECT_RULE);
        directive.redirect = Some("noop.js".into());
        let mut index = index(vec![directive]);
        let mut resources = ResourceStore::new();
        resources.add(Resource::new("noop.js", "application/javascript", "x"));
        let request = Request::new("https://cdn.example.com/ads.js", "", "", true, "script");
        let tags = TagRegistry::new();

        assert!(!index.check(&request, &tags, &resources).is_blocked());

        index.insert(rule("/ads.js", "/ads.js", RuleFlags::empty()));
        assert!(index.check(&request, &tags, &resources).redirect().is_some());

        let mut cancel = rule("@@||cdn.example.com^$redirect=noop.js", "||cdn.example.com^", RuleFlags::EXCEPTION);
        cancel.redirect = Some("noop.js".into());
        index.insert(cancel);
        let result = index.check(&request, &tags, &resources);
        assert_eq!(result.decision, MatchDecision::Block);
        assert!(!result.saved_from_exception);
    }

    #[test]
    fn most_specific_redirect_wins() {
        let mut short = rule("/ads/$redirect=a.js", "/ads/", RuleFlags::empty());
        short.redirect = Some("a.js".into());
        let mut long = rule("/ads/banner.js$redirect=b.js", "/ads/banner.js", RuleFlags::empty());
        long.redirect = Some("b.js".into());
        let index = index(vec![short, long]);

        let mut resources = ResourceStore::new();
        resources.add(Resource::new("a.js", "text/plain", "a"));
        resources.add(Resource::new("b.js", "text/plain", "b"));
        let request = Request::new("https://x.com/ads/banner.js", "", "", true, "script");
        let result = index.check(&request, &TagRegistry::new(), &resources);
        assert_eq!(result.redirect(), Some("data:text/plain;base64,Yg=="));
    }

    #[test]
    fn explicit_cancel_only_when_blocked() {
        let index = index(vec![
            rule("||ads.example.com^$explicitcancel", "||ads.example.com^", RuleFlags::EXPLICIT_CANCEL),
            rule("@@||ads.example.com/ok.js", "||ads.example.com/ok.js", RuleFlags::EXCEPTION),
        ]);
        let blocked = check(&index, "https://ads.example.com/x.js");
        assert!(blocked.is_blocked() && blocked.explicit_cancel);

        let saved = check(&index, "https://ads.example.com/ok.js");
        assert!(!saved.is_blocked() && !saved.explicit_cancel);

        let plain = index_without_cancel();
        assert!(!check(&plain, "https://ads.example.com/x.js").explicit_cancel);
    }

    fn index_without_cancel() -> NetworkIndex {
        index(vec![rule("||ads.example.com^", "||ads.example.com^", RuleFlags::empty())])
    }

    #[test]
    fn options_are_checked() {
        let mut images_only = rule("/pixel.$image", "/pixel.", RuleFlags::empty());
        images_only.type_mask = RequestType::IMAGE;
        let mut first_party = rule("/track/$1p", "/track/", RuleFlags::empty());
        first_party.party_mask = PartyMask::FIRST_PARTY;
        let index = index(vec![images_only, first_party]);
        let tags = TagRegistry::new();
        let resources = ResourceStore::new();

        let script = Request::new("https://x.com/pixel.gif", "", "", true, "script");
        let image = Request::new("https://x.com/pixel.gif", "", "", true, "image");
        assert!(!index.check(&script, &tags, &resources).is_blocked());
        assert!(index.check(&image, &tags, &resources).is_blocked());

        let third = Request::new("https://x.com/track/a", "", "", true, "xhr");
        let first = Request::new("https://x.com/track/a", "", "", false, "xhr");
        assert!(!index.check(&third, &tags, &resources).is_blocked());
        assert!(index.check(&first, &tags, &resources).is_blocked());
    }
}
