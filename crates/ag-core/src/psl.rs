//! Hostname suffix utilities
//!
//! Rules are scoped by hostname suffix (`example.com` also covers
//! `ads.example.com`) and by entity (`google.*` covers `google.de` and
//! `www.google.co.uk`). Both need the registrable domain, which is estimated
//! with a small table of common two-label public suffixes.
//!
//! # Examples
//!
//! ```
//! use ag_core::psl::get_etld1;
//!
//! assert_eq!(get_etld1("sub.example.com"), "example.com");
//! assert_eq!(get_etld1("sub.example.co.uk"), "example.co.uk");
//! ```

const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr", "co.il", "co.id",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk", "com.tr", "com.ar",
    "net.au", "net.nz", "net.br",
    "org.uk", "org.au", "org.br",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Length in labels of the public suffix of `host`.
fn suffix_label_count(labels: &[&str]) -> usize {
    let n = labels.len();
    if n >= 3 {
        let last_two = format!("{}.{}", labels[n - 2], labels[n - 1]);
        if COMMON_TWO_PART_TLDS.contains(&last_two.as_str()) {
            return 2;
        }
    }
    1
}

/// Registrable domain (eTLD+1) of a hostname.
pub fn get_etld1(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    let labels: Vec<&str> = host.split('.').collect();
    let keep = suffix_label_count(&labels) + 1;
    if labels.len() <= keep {
        return host;
    }

    // Byte offset of the first kept label.
    let skip: usize = labels[..labels.len() - keep].iter().map(|l| l.len() + 1).sum();
    &host[skip..]
}

/// Public suffix of a hostname (`co.uk` for `www.example.co.uk`).
pub fn get_public_suffix(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    let labels: Vec<&str> = host.split('.').collect();
    let count = suffix_label_count(&labels);
    if labels.len() <= count {
        return host;
    }
    let skip: usize = labels[..labels.len() - count].iter().map(|l| l.len() + 1).sum();
    &host[skip..]
}

/// Parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator over a hostname and each of its parent domains, most specific first.
pub struct HostSuffixIter<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.current?;
        self.current = get_parent_domain(result);
        Some(result)
    }
}

/// Walk `ads.example.com`, `example.com`, `com`.
pub fn walk_host_suffixes(host: &str) -> HostSuffixIter<'_> {
    let host = host.trim_end_matches('.');
    HostSuffixIter {
        current: if host.is_empty() { None } else { Some(host) },
    }
}

/// Entity names of a hostname, most specific first.
///
/// `www.google.co.uk` yields `www.google.*` and `google.*`.
pub fn entity_names(host: &str) -> Vec<String> {
    let host = host.trim_end_matches('.');
    let suffix = get_public_suffix(host);
    if suffix.len() >= host.len() {
        return Vec::new();
    }
    let without_suffix = &host[..host.len() - suffix.len() - 1];
    walk_host_suffixes(without_suffix)
        .map(|name| format!("{name}.*"))
        .collect()
}
