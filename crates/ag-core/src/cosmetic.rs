//! Cosmetic Rule Index and Resolver
//!
//! Hostname-scoped rules are bucketed by hostname/entity hash. Generic hide
//! rules are bucketed by the shape of their selector so that pages can ask
//! for generic styles incrementally, class by class and id by id, as new
//! elements appear:
//!
//! - `.ad` / `#ad` - simple class / id
//! - `.ad > img` / `#ad span` - complex, keyed by the leading class / id
//! - anything else - miscellaneous, always part of the hostname stylesheet

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::filters::{scope_hashes, CosmeticFilter, CosmeticKind};
use crate::resources::ResourceStore;

/// Cosmetic resources for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostnameResources {
    /// One `selector{display:none !important;}` rule per line
    pub stylesheet: String,
    /// Selectors excepted on this hostname; pass back to
    /// [`CosmeticIndex::class_id_stylesheet`]
    pub exceptions: Vec<String>,
    /// Rendered scriptlet bodies
    pub script_injections: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CosmeticIndexStats {
    pub rules: usize,
    pub hostname_buckets: usize,
    pub simple_classes: usize,
    pub simple_ids: usize,
    pub complex_classes: usize,
    pub complex_ids: usize,
    pub misc_generic: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CosmeticIndex {
    filters: Vec<CosmeticFilter>,
    /// Scoped rules by hostname/entity hash
    hostname_rules: HashMap<u64, Vec<usize>>,
    /// Rules by negated hostname hash (`~example.com##.ad`)
    negated_rules: HashMap<u64, Vec<usize>>,
    simple_class: HashSet<String>,
    simple_id: HashSet<String>,
    complex_class: HashMap<String, Vec<usize>>,
    complex_id: HashMap<String, Vec<usize>>,
    misc_generic: Vec<usize>,
    /// Generic `#@#selector` rules
    generic_unhide: Vec<usize>,
    /// Generic `##+js(...)` and `#@#+js(...)` rules
    generic_scripts: Vec<usize>,
}

enum SelectorKey<'a> {
    SimpleClass(&'a str),
    SimpleId(&'a str),
    ComplexClass(&'a str),
    ComplexId(&'a str),
    Misc,
}

fn classify_selector(selector: &str) -> SelectorKey<'_> {
    let (is_class, rest) = match selector.as_bytes().first() {
        Some(b'.') => (true, &selector[1..]),
        Some(b'#') => (false, &selector[1..]),
        _ => return SelectorKey::Misc,
    };

    let key_len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(rest.len());
    if key_len == 0 {
        return SelectorKey::Misc;
    }

    let key = &rest[..key_len];
    match (is_class, key_len == rest.len()) {
        (true, true) => SelectorKey::SimpleClass(key),
        (false, true) => SelectorKey::SimpleId(key),
        (true, false) => SelectorKey::ComplexClass(key),
        (false, false) => SelectorKey::ComplexId(key),
    }
}

/// Canonical scriptlet call text, so `a, b` and `a,b` compare equal.
fn normalize_scriptlet(call: &str) -> String {
    call.split(',').map(str::trim).collect::<Vec<_>>().join(",")
}

fn hide_rule(selector: &str) -> String {
    format!("{selector}{{display:none !important;}}")
}

/// Ordered set of borrowed strings.
#[derive(Default)]
struct OrderedSet<'a> {
    items: Vec<&'a str>,
    seen: HashSet<&'a str>,
}

impl<'a> OrderedSet<'a> {
    fn push(&mut self, item: &'a str) {
        if self.seen.insert(item) {
            self.items.push(item);
        }
    }

    fn contains(&self, item: &str) -> bool {
        self.seen.contains(item)
    }
}

impl CosmeticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filter: CosmeticFilter) {
        let idx = self.filters.len();

        for &hash in &filter.not_hostnames {
            self.negated_rules.entry(hash).or_default().push(idx);
        }

        if !filter.is_generic() {
            for &hash in &filter.hostnames {
                self.hostname_rules.entry(hash).or_default().push(idx);
            }
        } else {
            match filter.kind {
                CosmeticKind::Hide => match classify_selector(&filter.selector) {
                    SelectorKey::SimpleClass(key) => {
                        self.simple_class.insert(key.to_string());
                    }
                    SelectorKey::SimpleId(key) => {
                        self.simple_id.insert(key.to_string());
                    }
                    SelectorKey::ComplexClass(key) => {
                        self.complex_class.entry(key.to_string()).or_default().push(idx);
                    }
                    SelectorKey::ComplexId(key) => {
                        self.complex_id.entry(key.to_string()).or_default().push(idx);
                    }
                    SelectorKey::Misc => self.misc_generic.push(idx),
                },
                CosmeticKind::Unhide => self.generic_unhide.push(idx),
                CosmeticKind::ScriptInject | CosmeticKind::ScriptException => self.generic_scripts.push(idx),
            }
        }

        self.filters.push(filter);
    }

    /// Stored rules in insertion order.
    pub fn filters(&self) -> &[CosmeticFilter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn stats(&self) -> CosmeticIndexStats {
        CosmeticIndexStats {
            rules: self.filters.len(),
            hostname_buckets: self.hostname_rules.len(),
            simple_classes: self.simple_class.len(),
            simple_ids: self.simple_id.len(),
            complex_classes: self.complex_class.len(),
            complex_ids: self.complex_id.len(),
            misc_generic: self.misc_generic.len(),
        }
    }

    /// Stylesheet, exceptions and scriptlets for a page on `hostname`.
    pub fn hostname_resources(&self, hostname: &str, resources: &ResourceStore) -> HostnameResources {
        let hostname = hostname.to_ascii_lowercase();
        let scope = scope_hashes(&hostname);
        let excluded = |filter: &CosmeticFilter| filter.not_hostnames.iter().any(|h| scope.contains(h));

        let mut hides = OrderedSet::default();
        let mut unhides = OrderedSet::default();
        let mut scripts = OrderedSet::default();
        let mut script_exceptions: HashSet<String> = HashSet::new();
        let mut scripts_disabled = false;

        let scoped = scope
            .iter()
            .filter_map(|hash| self.hostname_rules.get(hash))
            .flatten()
            .chain(&self.generic_unhide)
            .chain(&self.generic_scripts)
            .map(|&idx| &self.filters[idx]);

        for filter in scoped {
            if excluded(filter) {
                continue;
            }
            let selector = filter.selector.as_str();
            match filter.kind {
                CosmeticKind::Hide => hides.push(selector),
                CosmeticKind::Unhide => unhides.push(selector),
                CosmeticKind::ScriptInject => scripts.push(selector),
                CosmeticKind::ScriptException if selector.is_empty() => scripts_disabled = true,
                CosmeticKind::ScriptException => {
                    script_exceptions.insert(normalize_scriptlet(selector));
                }
            }
        }

        // `~host` on a hiding rule acts as an exception on that host.
        for filter in scope
            .iter()
            .filter_map(|hash| self.negated_rules.get(hash))
            .flatten()
            .map(|&idx| &self.filters[idx])
        {
            match filter.kind {
                CosmeticKind::Hide => unhides.push(&filter.selector),
                CosmeticKind::ScriptInject => {
                    script_exceptions.insert(normalize_scriptlet(&filter.selector));
                }
                CosmeticKind::Unhide | CosmeticKind::ScriptException => {}
            }
        }

        for filter in self.misc_generic.iter().map(|&idx| &self.filters[idx]) {
            if !excluded(filter) {
                hides.push(&filter.selector);
            }
        }

        let stylesheet = hides
            .items
            .iter()
            .filter(|selector| !unhides.contains(selector))
            .map(|selector| hide_rule(selector))
            .collect::<Vec<_>>()
            .join("\n");

        let script_injections = if scripts_disabled {
            Vec::new()
        } else {
            scripts
                .items
                .iter()
                .filter(|call| !script_exceptions.contains(&normalize_scriptlet(call)))
                .filter_map(|call| {
                    let rendered = resources.render_scriptlet(call);
                    if rendered.is_none() {
                        log::debug!("Scriptlet resource for +js({call}) not found");
                    }
                    rendered
                })
                .collect()
        };

        HostnameResources {
            stylesheet,
            exceptions: unhides.items.iter().map(|s| s.to_string()).collect(),
            script_injections,
        }
    }

    /// Generic hiding rules for newly seen classes and ids.
    ///
    /// `exceptions` is the list returned by [`Self::hostname_resources`].
    /// The output only depends on the inputs and the index, so repeated calls
    /// return identical stylesheets.
    pub fn class_id_stylesheet<C, I, E>(&self, classes: &[C], ids: &[I], exceptions: &[E]) -> String
    where
        C: AsRef<str>,
        I: AsRef<str>,
        E: AsRef<str>,
    {
        let mut excepted: HashSet<&str> = exceptions.iter().map(|e| e.as_ref()).collect();
        excepted.extend(self.generic_unhide.iter().map(|&idx| self.filters[idx].selector.as_str()));

        let mut selectors: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut add = |selector: String| {
            if !excepted.contains(selector.as_str()) && seen.insert(selector.clone()) {
                selectors.push(selector);
            }
        };

        for class in classes {
            let class: &str = class.as_ref();
            if self.simple_class.contains(class) {
                add(format!(".{class}"));
            }
            for &idx in self.complex_class.get(class).into_iter().flatten() {
                add(self.filters[idx].selector.clone());
            }
        }
        for id in ids {
            let id: &str = id.as_ref();
            if self.simple_id.contains(id) {
                add(format!("#{id}"));
            }
            for &idx in self.complex_id.get(id).into_iter().flatten() {
                add(self.filters[idx].selector.clone());
            }
        }

        selectors.iter().map(|s| hide_rule(s)).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_domain;
    use crate::resources::Resource;

    fn filter(kind: CosmeticKind, hosts: &[&str], not_hosts: &[&str], selector: &str) -> CosmeticFilter {
        CosmeticFilter {
            raw: selector.to_string(),
            kind,
            selector: selector.to_string(),
            hostnames: hosts.iter().map(|h| hash_domain(h)).collect(),
            not_hostnames: not_hosts.iter().map(|h| hash_domain(h)).collect(),
        }
    }

    fn index(filters: Vec<CosmeticFilter>) -> CosmeticIndex {
        let mut index = CosmeticIndex::new();
        for f in filters {
            index.insert(f);
        }
        index
    }

    #[test]
    fn selector_classification() {
        assert!(matches!(classify_selector(".ad"), SelectorKey::SimpleClass("ad")));
        assert!(matches!(classify_selector("#banner-1"), SelectorKey::SimpleId("banner-1")));
        assert!(matches!(classify_selector(".ad > img"), SelectorKey::ComplexClass("ad")));
        assert!(matches!(classify_selector("#top .ad"), SelectorKey::ComplexId("top")));
        assert!(matches!(classify_selector("div.ad"), SelectorKey::Misc));
        assert!(matches!(classify_selector(".\\31 ad"), SelectorKey::Misc));
    }

    #[test]
    fn hostname_scoping() {
        let index = index(vec![
            filter(CosmeticKind::Hide, &["example.com"], &[], ".promo"),
            filter(CosmeticKind::Hide, &["google.*"], &[], "#tads"),
        ]);
        let resources = ResourceStore::new();

        let sub = index.hostname_resources("sub.example.com", &resources);
        assert_eq!(sub.stylesheet, ".promo{display:none !important;}");

        let other = index.hostname_resources("example.org", &resources);
        assert_eq!(other.stylesheet, "");

        let google = index.hostname_resources("www.google.co.uk", &resources);
        assert_eq!(google.stylesheet, "#tads{display:none !important;}");
    }

    #[test]
    fn exceptions_cancel_hides() {
        let index = index(vec![
            filter(CosmeticKind::Hide, &["example.com"], &[], ".promo"),
            filter(CosmeticKind::Hide, &["example.com"], &[], ".sidebar"),
            filter(CosmeticKind::Unhide, &["sub.example.com"], &[], ".promo"),
            filter(CosmeticKind::Hide, &[], &["example.com"], ".ad"),
            filter(CosmeticKind::Hide, &[], &[], "div[id^=\"ad-\"]"),
        ]);
        let resources = ResourceStore::new();

        let result = index.hostname_resources("sub.example.com", &resources);
        assert_eq!(
            result.stylesheet,
            ".sidebar{display:none !important;}\ndiv[id^=\"ad-\"]{display:none !important;}"
        );
        assert_eq!(result.exceptions, vec![".promo", ".ad"]);

        let elsewhere = index.hostname_resources("example.org", &resources);
        assert!(elsewhere.exceptions.is_empty());
        assert_eq!(elsewhere.stylesheet, "div[id^=\"ad-\"]{display:none !important;}");
    }

    #[test]
    fn class_id_stylesheet_is_incremental() {
        let index = index(vec![
            filter(CosmeticKind::Hide, &[], &[], ".ad"),
            filter(CosmeticKind::Hide, &[], &[], ".ad > img"),
            filter(CosmeticKind::Hide, &[], &[], "#banner"),
            filter(CosmeticKind::Hide, &[], &["example.com"], ".sponsor"),
        ]);

        let css = index.class_id_stylesheet(&["ad", "ad", "content"], &["banner"], &[] as &[&str]);
        assert_eq!(
            css,
            ".ad{display:none !important;}\n.ad > img{display:none !important;}\n#banner{display:none !important;}"
        );
        assert_eq!(css, index.class_id_stylesheet(&["ad", "ad", "content"], &["banner"], &[] as &[&str]));

        let exceptions = index.hostname_resources("example.com", &ResourceStore::new()).exceptions;
        assert_eq!(index.class_id_stylesheet(&["sponsor"], &[] as &[&str], &exceptions), "");
        assert_eq!(
            index.class_id_stylesheet(&["sponsor"], &[] as &[&str], &[] as &[&str]),
            ".sponsor{display:none !important;}"
        );
        assert_eq!(index.class_id_stylesheet(&["nothing"], &["here"], &[".ad"]), "");
    }

    #[test]
    fn scriptlets() {
        let index = index(vec![
            filter(CosmeticKind::ScriptInject, &["example.com"], &[], "set-constant, ads, false"),
            filter(CosmeticKind::ScriptInject, &["example.com"], &[], "missing-scriptlet"),
            filter(CosmeticKind::ScriptException, &["sub.example.com"], &[], "set-constant,ads,false"),
        ]);
        let mut resources = ResourceStore::new();
        resources.add(Resource::new(
            "set-constant.js",
            "application/javascript",
            "window['{{1}}'] = {{2}};",
        ));

        let top = index.hostname_resources("example.com", &resources);
        assert_eq!(top.script_injections, vec!["window['ads'] = false;"]);

        let sub = index.hostname_resources("sub.example.com", &resources);
        assert!(sub.script_injections.is_empty());
    }
}
