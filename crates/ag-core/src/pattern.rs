//! Compiled network patterns
//!
//! A pattern is the part of a network rule before `$`. ABP syntax is compiled
//! into a short sequence of [`PatternPart`]s (literal, `*`, `^`) plus anchors,
//! or into a [`Regex`] for `/.../` rules. The same structure is persisted as
//! bytecode in snapshots (see [`crate::snapshot::PatternOp`]).

use regex::{Regex, RegexBuilder};

use crate::hash::hash_token;
use crate::types::AnchorType;
use crate::url::{get_host_position, is_boundary_char, token_ranges};

/// Upper bound for compiled regex programs.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternPart {
    /// Lowercase literal text
    Literal(String),
    /// `*`
    Wildcard,
    /// `^`
    Separator,
}

#[derive(Debug, Clone)]
pub enum PatternBody {
    Parts(Vec<PatternPart>),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub anchor: AnchorType,
    pub right_anchor: bool,
    pub body: PatternBody,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.anchor == other.anchor
            && self.right_anchor == other.right_anchor
            && match (&self.body, &other.body) {
                (PatternBody::Parts(a), PatternBody::Parts(b)) => a == b,
                (PatternBody::Regex(a), PatternBody::Regex(b)) => a.as_str() == b.as_str(),
                _ => false,
            }
    }
}

impl Eq for Pattern {}

impl Pattern {
    /// Compile an ABP pattern body (anchors already stripped).
    pub fn compile(text: &str, anchor: AnchorType, right_anchor: bool) -> Self {
        let mut parts = Vec::new();
        let mut literal = String::new();

        for ch in text.chars() {
            match ch {
                '*' => {
                    flush_literal(&mut literal, &mut parts);
                    if parts.last() != Some(&PatternPart::Wildcard) {
                        parts.push(PatternPart::Wildcard);
                    }
                }
                '^' => {
                    flush_literal(&mut literal, &mut parts);
                    parts.push(PatternPart::Separator);
                }
                _ => literal.push(ch.to_ascii_lowercase()),
            }
        }
        flush_literal(&mut literal, &mut parts);

        Self {
            anchor,
            right_anchor,
            body: PatternBody::Parts(parts),
        }
    }

    /// Compile a `/regex/` body. Matching is case-insensitive.
    pub fn regex(source: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()?;
        Ok(Self {
            anchor: AnchorType::None,
            right_anchor: false,
            body: PatternBody::Regex(regex),
        })
    }

    pub fn parts(&self) -> &[PatternPart] {
        match &self.body {
            PatternBody::Parts(parts) => parts,
            PatternBody::Regex(_) => &[],
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.body, PatternBody::Regex(_))
    }

    /// Bare hostname of a `||host^` pattern.
    pub fn hostname(&self) -> Option<&str> {
        if self.anchor != AnchorType::Hostname || self.right_anchor {
            return None;
        }
        match self.parts() {
            [PatternPart::Literal(host), PatternPart::Separator] if is_hostname(host) => Some(host),
            _ => None,
        }
    }

    /// Total literal length, used to rank competing rules.
    pub fn specificity(&self) -> usize {
        match &self.body {
            PatternBody::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    PatternPart::Literal(lit) => lit.len(),
                    _ => 0,
                })
                .sum(),
            PatternBody::Regex(regex) => regex.as_str().len(),
        }
    }

    /// Tokens that are guaranteed to appear as whole URL tokens whenever the
    /// pattern matches.
    pub fn index_tokens(&self) -> Vec<u32> {
        let parts = self.parts();
        let mut tokens = Vec::new();

        for (i, part) in parts.iter().enumerate() {
            let PatternPart::Literal(lit) = part else {
                continue;
            };
            let prev = if i == 0 { None } else { parts.get(i - 1) };
            let next = parts.get(i + 1);

            let left_closed = match prev {
                None => self.anchor != AnchorType::None,
                Some(PatternPart::Separator) => true,
                Some(_) => false,
            };
            let right_closed = match next {
                None => self.right_anchor,
                Some(PatternPart::Separator) => true,
                Some(_) => false,
            };

            for (start, end) in token_ranges(lit) {
                if (start > 0 || left_closed) && (end < lit.len() || right_closed) {
                    tokens.push(hash_token(&lit.as_bytes()[start..end]));
                }
            }
        }

        tokens
    }

    /// Match against a lowercase URL.
    pub fn matches(&self, url: &str) -> bool {
        let parts = match &self.body {
            PatternBody::Regex(regex) => return regex.is_match(url),
            PatternBody::Parts(parts) => parts,
        };
        let bytes = url.as_bytes();
        let mut matcher = Matcher::new(bytes, parts, self.right_anchor);

        match self.anchor {
            AnchorType::None => matcher.matches_from(0, 0, false),
            AnchorType::Left => matcher.matches_from(0, 0, true),
            AnchorType::Hostname => {
                let Some((host_start, host_end)) = get_host_position(url) else {
                    return false;
                };
                (host_start..host_end)
                    .filter(|&p| p == host_start || bytes[p - 1] == b'.')
                    .any(|p| matcher.matches_from(0, p, true))
            }
        }
    }
}

fn flush_literal(literal: &mut String, parts: &mut Vec<PatternPart>) {
    if !literal.is_empty() {
        parts.push(PatternPart::Literal(std::mem::take(literal)));
    }
}

fn is_hostname(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
}

/// Wildcard matcher over a part list.
///
/// Failed anchored states are memoized per (part, pos). An unanchored search
/// that fails from `pos` also fails from every later position, so each part
/// only keeps the lowest such position.
struct Matcher<'a> {
    url: &'a [u8],
    parts: &'a [PatternPart],
    right_anchor: bool,
    failed: Vec<bool>,
    floor: Vec<usize>,
}

impl<'a> Matcher<'a> {
    fn new(url: &'a [u8], parts: &'a [PatternPart], right_anchor: bool) -> Self {
        Self {
            url,
            parts,
            right_anchor,
            failed: Vec::new(),
            floor: vec![usize::MAX; parts.len()],
        }
    }

    /// `anchored` means part `idx` must match at `pos`.
    fn matches_from(&mut self, idx: usize, pos: usize, anchored: bool) -> bool {
        let parts = self.parts;
        let Some(part) = parts.get(idx) else {
            return !self.right_anchor || !anchored || pos == self.url.len();
        };

        if !anchored {
            if pos >= self.floor[idx] {
                return false;
            }
            let found = self.search(idx, part, pos);
            if !found {
                self.floor[idx] = pos;
            }
            return found;
        }

        let slot = idx * (self.url.len() + 1) + pos;
        if self.failed.get(slot).copied().unwrap_or(false) {
            return false;
        }
        let found = self.match_at(idx, part, pos);
        if !found {
            if self.failed.is_empty() {
                self.failed = vec![false; parts.len() * (self.url.len() + 1)];
            }
            self.failed[slot] = true;
        }
        found
    }

    fn search(&mut self, idx: usize, part: &PatternPart, pos: usize) -> bool {
        if let PatternPart::Wildcard = part {
            return self.matches_from(idx + 1, pos, false);
        }
        let last = self.floor[idx].min(self.url.len() + 1);
        (pos..last).any(|p| self.matches_from(idx, p, true))
    }

    fn match_at(&mut self, idx: usize, part: &PatternPart, pos: usize) -> bool {
        let url = self.url;
        match part {
            PatternPart::Literal(lit) => {
                let lit = lit.as_bytes();
                url[pos..].starts_with(lit) && self.matches_from(idx + 1, pos + lit.len(), true)
            }
            PatternPart::Wildcard => self.matches_from(idx + 1, pos, false),
            PatternPart::Separator if pos == url.len() => self.matches_from(idx + 1, pos, true),
            PatternPart::Separator => is_boundary_char(url[pos]) && self.matches_from(idx + 1, pos + 1, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_token;

    fn abp(text: &str) -> Pattern {
        let (anchor, rest) = if let Some(rest) = text.strip_prefix("||") {
            (AnchorType::Hostname, rest)
        } else if let Some(rest) = text.strip_prefix('|') {
            (AnchorType::Left, rest)
        } else {
            (AnchorType::None, text)
        };
        let (rest, right) = match rest.strip_suffix('|') {
            Some(r) => (r, true),
            None => (rest, false),
        };
        Pattern::compile(rest, anchor, right)
    }

    #[test]
    fn plain_substring() {
        let p = abp("/banner/");
        assert!(p.matches("https://example.com/banner/1.png"));
        assert!(!p.matches("https://example.com/banners/1.png"));
    }

    #[test]
    fn hostname_anchor_respects_label_start() {
        let p = abp("||ads.example.com^");
        assert!(p.matches("https://ads.example.com/x.js"));
        assert!(p.matches("https://cdn.ads.example.com/x.js"));
        assert!(!p.matches("https://badads.example.com/x.js"));
        assert!(!p.matches("https://ads.example.com.evil.net/x.js"));
        assert_eq!(p.hostname(), Some("ads.example.com"));
    }

    #[test]
    fn hostname_anchor_with_path() {
        let p = abp("||ads.example.com/allowed.js");
        assert!(p.matches("https://ads.example.com/allowed.js"));
        assert!(!p.matches("https://ads.example.com/other.js"));
        assert_eq!(p.hostname(), None);
    }

    #[test]
    fn separator_backtracks() {
        let p = abp("track*.js^");
        assert!(p.matches("https://x.com/tracker.jsx/track.js?x=1"));
        assert!(!p.matches("https://x.com/tracker.jsx"));
    }

    #[test]
    fn left_and_right_anchors() {
        assert!(abp("|https://ads.").matches("https://ads.example.com/"));
        assert!(!abp("|ads.").matches("https://ads.example.com/"));
        assert!(abp(".gif|").matches("https://x.com/a.gif"));
        assert!(!abp(".gif|").matches("https://x.com/a.gif?x"));
    }

    #[test]
    fn wildcard_in_middle() {
        let p = abp("/ads/*/banner");
        assert!(p.matches("https://x.com/ads/2024/q1/banner.png"));
        assert!(!p.matches("https://x.com/ads/banner.png"));
    }

    #[test]
    fn many_wildcards_on_slash_heavy_url() {
        let p = abp("/ads/*/*/*.gif|");
        let url = format!("https://x.com/ads/{}x", "/".repeat(4000));

        let started = std::time::Instant::now();
        assert!(!p.matches(&url));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        assert!(p.matches("https://x.com/ads/a/b/c.gif"));
        assert!(p.matches(&format!("https://x.com/ads/{}c.gif", "/".repeat(4000))));
    }

    #[test]
    fn failed_prefix_does_not_poison_later_hostname_labels() {
        let p = abp("||ads.*^banner^");
        assert!(p.matches("https://ads.ads.example.com/x/banner/1"));
        assert!(!p.matches("https://ads.example.com/bannerx"));
    }

    #[test]
    fn regex_rules_are_case_insensitive() {
        let p = Pattern::regex(r"^https?://[a-z]+\.example\.com/ad[0-9]").expect("valid regex");
        assert!(p.matches("https://cdn.example.com/ad7.js"));
        assert!(!p.matches("https://cdn.example.com/adx.js"));
        assert!(p.index_tokens().is_empty());
    }

    #[test]
    fn index_tokens_only_whole_tokens() {
        // "banner" is closed on both sides, "track" touches a wildcard.
        let p = abp("/banner/track*");
        assert_eq!(p.index_tokens(), vec![hash_token(b"banner")]);

        // Unanchored leading token may be a suffix of a longer URL token.
        let p = abp("adserver.");
        assert!(p.index_tokens().is_empty());

        let p = abp("||adserver.net^");
        assert_eq!(p.index_tokens(), vec![hash_token(b"adserver"), hash_token(b"net")]);
    }

    #[test]
    fn specificity_counts_literals() {
        assert_eq!(abp("||a.com/x^").specificity(), "a.com/x".len());
    }
}
