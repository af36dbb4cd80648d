//! Filter list parser
//!
//! Turns Adblock Plus / uBlock Origin filter lines into [`NetworkFilter`] and
//! [`CosmeticFilter`] records. Lines that cannot be represented are reported
//! as [`FilterParseError`]s by [`parse_line`] and skipped by
//! [`parse_filter_list`].

use std::net::IpAddr;

use ag_core::filters::{CosmeticFilter, CosmeticKind, DomainConstraint, NetworkFilter};
use ag_core::hash::{hash_domain, hash_text};
use ag_core::pattern::Pattern;
use ag_core::types::{AnchorType, PartyMask, RequestType, RuleFlags};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("Unsupported option: {0}")]
    UnsupportedOption(String),
    #[error("Invalid option value: {0}")]
    InvalidOptionValue(String),
    #[error("Options exclude every request")]
    EmptyMask,
    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),
    #[error("Empty pattern")]
    EmptyPattern,
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
    #[error("Unsupported cosmetic syntax: {0}")]
    UnsupportedCosmetic(String),
}

/// A classified filter line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Network(NetworkFilter),
    Cosmetic(CosmeticFilter),
    /// Blank line or comment
    Ignored,
}

/// Result of parsing a whole filter list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFilters {
    pub network: Vec<NetworkFilter>,
    pub cosmetic: Vec<CosmeticFilter>,
    /// Lines rejected with a [`FilterParseError`]
    pub skipped: usize,
}

/// Parse newline-separated filter text. Malformed lines are skipped.
pub fn parse_filter_list(text: &str) -> ParsedFilters {
    let mut parsed = ParsedFilters::default();

    for (line_no, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(ParsedLine::Network(filter)) => parsed.network.push(filter),
            Ok(ParsedLine::Cosmetic(filter)) => parsed.cosmetic.push(filter),
            Ok(ParsedLine::Ignored) => {}
            Err(err) => {
                log::debug!("Skipping line {}: {err} ({:?})", line_no + 1, line.trim());
                parsed.skipped += 1;
            }
        }
    }

    parsed
}

/// Parse a single filter line.
pub fn parse_line(line: &str) -> Result<ParsedLine, FilterParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
        return Ok(ParsedLine::Ignored);
    }

    if let Some((start, separator)) = find_cosmetic_separator(line) {
        return parse_cosmetic(line, start, separator).map(ParsedLine::Cosmetic);
    }

    if line.starts_with('#') {
        return Ok(ParsedLine::Ignored);
    }

    if let Some(host) = parse_hosts_file_line(line)? {
        if is_local_hostname(&host) {
            return Ok(ParsedLine::Ignored);
        }
        return Ok(ParsedLine::Network(hosts_file_filter(line, &host)));
    }

    parse_network(line).map(ParsedLine::Network)
}

// =============================================================================
// Cosmetic rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Hide,
    Unhide,
    Procedural,
}

/// Separators, longest first so `#@#` is not read as `#`.
const SEPARATORS: &[(&str, Separator)] = &[
    ("#@$#", Separator::Procedural),
    ("#@?#", Separator::Procedural),
    ("#@#", Separator::Unhide),
    ("#$#", Separator::Procedural),
    ("#?#", Separator::Procedural),
    ("##", Separator::Hide),
];

/// Procedural and HTML-filtering operators that a stylesheet cannot express.
const PROCEDURAL_OPERATORS: &[&str] = &[
    ":has-text(",
    ":-abp-",
    ":matches-css",
    ":matches-attr(",
    ":matches-path(",
    ":min-text-length(",
    ":upward(",
    ":xpath(",
    ":watch-attr(",
    ":remove(",
    ":remove-attr(",
    ":remove-class(",
    ":style(",
    ":others(",
];

fn find_cosmetic_separator(line: &str) -> Option<(usize, &'static str)> {
    let mut from = 0;
    while let Some(pos) = line[from..].find('#') {
        let start = from + pos;
        let rest = &line[start..];
        if let Some(&(sep, _)) = SEPARATORS.iter().find(|(sep, _)| rest.starts_with(sep)) {
            if is_hostname_list(&line[..start]) {
                return Some((start, sep));
            }
        }
        from = start + 1;
    }
    None
}

fn is_hostname_list(text: &str) -> bool {
    text.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'*' | b'~' | b','))
}

fn parse_cosmetic(line: &str, start: usize, separator: &str) -> Result<CosmeticFilter, FilterParseError> {
    let kind = SEPARATORS
        .iter()
        .find(|(sep, _)| *sep == separator)
        .map(|&(_, kind)| kind)
        .unwrap_or(Separator::Procedural);
    if kind == Separator::Procedural {
        return Err(FilterParseError::UnsupportedCosmetic(separator.to_string()));
    }

    let (hostnames, not_hostnames) = parse_hostname_list(&line[..start])?;
    let body = line[start + separator.len()..].trim();

    let (kind, selector) = match body.strip_prefix("+js(") {
        Some(args) => {
            let args = args
                .strip_suffix(')')
                .ok_or_else(|| FilterParseError::InvalidSelector(body.to_string()))?
                .trim();
            match kind {
                Separator::Hide if args.is_empty() => {
                    return Err(FilterParseError::InvalidSelector(body.to_string()));
                }
                Separator::Hide => (CosmeticKind::ScriptInject, args.to_string()),
                _ => (CosmeticKind::ScriptException, args.to_string()),
            }
        }
        None => {
            validate_selector(body)?;
            let kind = if kind == Separator::Hide {
                CosmeticKind::Hide
            } else {
                CosmeticKind::Unhide
            };
            (kind, body.to_string())
        }
    };

    Ok(CosmeticFilter {
        raw: line.to_string(),
        kind,
        selector,
        hostnames,
        not_hostnames,
    })
}

fn parse_hostname_list(text: &str) -> Result<(Vec<u64>, Vec<u64>), FilterParseError> {
    let mut hostnames = Vec::new();
    let mut not_hostnames = Vec::new();

    for raw in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (negated, host) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let host = normalize_scope_hostname(host)?;
        if negated {
            not_hostnames.push(hash_domain(&host));
        } else {
            hostnames.push(hash_domain(&host));
        }
    }

    Ok((hostnames, not_hostnames))
}

/// Reject selectors that could break out of a stylesheet rule or that need
/// procedural evaluation.
fn validate_selector(selector: &str) -> Result<(), FilterParseError> {
    let invalid = || FilterParseError::InvalidSelector(selector.to_string());

    if selector.is_empty() || selector.starts_with('^') {
        return Err(invalid());
    }
    if selector.contains('{') || selector.contains('}') || selector.contains("/*") {
        return Err(invalid());
    }
    // `#` and `.` must be followed by an id or class name
    let mut chars = selector.chars();
    if matches!(chars.next(), Some('#' | '.')) && chars.next().map_or(true, char::is_whitespace) {
        return Err(invalid());
    }
    if PROCEDURAL_OPERATORS.iter().any(|op| selector.contains(op)) {
        return Err(FilterParseError::UnsupportedCosmetic(selector.to_string()));
    }

    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in selector.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(' | '[') => stack.push(ch),
            (None, ')') if stack.pop() != Some('(') => return Err(invalid()),
            (None, ']') if stack.pop() != Some('[') => return Err(invalid()),
            _ => {}
        }
    }
    if quote.is_some() || escaped || !stack.is_empty() {
        return Err(invalid());
    }

    Ok(())
}

// =============================================================================
// Network rules
// =============================================================================

#[derive(Clone)]
struct ParsedOptions {
    flags: RuleFlags,
    type_mask: RequestType,
    party_mask: PartyMask,
    domain_constraints: Option<DomainConstraint>,
    redirect: Option<String>,
    tag: Option<String>,
    /// Lowercased options without `badfilter`, sorted, for fingerprinting
    normalized: Vec<String>,
}

impl Default for ParsedOptions {
    fn default() -> Self {
        Self {
            flags: RuleFlags::empty(),
            type_mask: RequestType::empty(),
            party_mask: PartyMask::empty(),
            domain_constraints: None,
            redirect: None,
            tag: None,
            normalized: Vec::new(),
        }
    }
}

fn parse_network(line: &str) -> Result<NetworkFilter, FilterParseError> {
    let (is_exception, body) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    };

    let (pattern_text, options_text) = split_rule_options(body);
    let options = match options_text {
        Some(text) => parse_options(text)?,
        None => ParsedOptions::default(),
    };

    let mut flags = options.flags;
    if is_exception {
        flags |= RuleFlags::EXCEPTION;
    }

    let pattern = parse_pattern(pattern_text, options_text.is_some())?;
    if pattern.is_regex() {
        flags |= RuleFlags::IS_REGEX;
    }
    if pattern.right_anchor {
        flags |= RuleFlags::HAS_RIGHT_ANCHOR;
    }
    if is_exception {
        // Only blocking rules can be redirect directives.
        flags.remove(RuleFlags::REDIRECT_RULE);
    }

    let fingerprint = hash_text(&format!(
        "{}{}${}",
        if is_exception { "@@" } else { "" },
        pattern_text,
        options.normalized.join(",")
    ));

    Ok(NetworkFilter {
        raw: line.to_string(),
        flags,
        pattern,
        type_mask: options.type_mask,
        party_mask: options.party_mask,
        domains: options.domain_constraints,
        redirect: options.redirect,
        tag: options.tag,
        fingerprint,
    })
}

/// Split `pattern$options`. Regex patterns may contain `$` themselves.
fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    if line.len() > 2 && line.starts_with('/') && line.ends_with('/') {
        return (line, None);
    }
    match line.rfind('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

fn parse_pattern(text: &str, has_options: bool) -> Result<Pattern, FilterParseError> {
    let text = text.trim();

    if text.len() > 2 && text.starts_with('/') && text.ends_with('/') {
        let source = &text[1..text.len() - 1];
        return Pattern::regex(source).map_err(|err| FilterParseError::InvalidRegex(err.to_string()));
    }

    let (anchor, rest) = if let Some(rest) = text.strip_prefix("||") {
        (AnchorType::Hostname, rest)
    } else if let Some(rest) = text.strip_prefix('|') {
        (AnchorType::Left, rest)
    } else {
        (AnchorType::None, text)
    };
    let (rest, right_anchor) = match rest.strip_suffix('|') {
        Some(rest) => (rest, true),
        None => (rest, false),
    };

    if rest.is_empty() && (anchor != AnchorType::None || right_anchor || !has_options) {
        return Err(FilterParseError::EmptyPattern);
    }
    if anchor == AnchorType::Hostname {
        let host_end = rest.find(['/', '^', '*', '?', ':', '|']).unwrap_or(rest.len());
        let host = &rest[..host_end];
        if !host.is_empty() && !host.bytes().all(is_hostname_byte) {
            return Err(FilterParseError::InvalidHostname(host.to_string()));
        }
    }
    if rest.contains(char::is_whitespace) {
        return Err(FilterParseError::InvalidPattern(rest.to_string()));
    }

    Ok(Pattern::compile(rest, anchor, right_anchor))
}

fn parse_options(text: &str) -> Result<ParsedOptions, FilterParseError> {
    let mut flags = RuleFlags::empty();
    let mut type_include = RequestType::empty();
    let mut type_exclude = RequestType::empty();
    let mut party_include = PartyMask::empty();
    let mut party_exclude = PartyMask::empty();
    let mut domain_constraints: Option<DomainConstraint> = None;
    let mut redirect: Option<String> = None;
    let mut tag: Option<String> = None;
    let mut normalized = Vec::new();

    for raw in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, value) = match raw.split_once('=') {
            Some((name, value)) => (name.trim().to_ascii_lowercase(), Some(value.trim())),
            None => (raw.to_ascii_lowercase(), None),
        };

        if name != "badfilter" {
            normalized.push(raw.to_ascii_lowercase());
        }

        match (name.as_str(), value) {
            ("important", None) => flags |= RuleFlags::IMPORTANT,
            ("match-case" | "match_case", None) => flags |= RuleFlags::MATCH_CASE,
            ("explicitcancel", None) => flags |= RuleFlags::EXPLICIT_CANCEL,
            ("badfilter", None) => flags |= RuleFlags::BADFILTER,
            ("domain" | "from", Some(value)) => {
                let parsed = parse_domain_option(value)?;
                domain_constraints = Some(merge_constraints(domain_constraints, parsed));
            }
            ("redirect", Some(value)) => redirect = Some(parse_redirect_value(raw, value)?),
            ("redirect-rule", Some(value)) => {
                redirect = Some(parse_redirect_value(raw, value)?);
                flags |= RuleFlags::REDIRECT_RULE;
            }
            ("tag", Some(value)) if !value.is_empty() => tag = Some(value.to_string()),
            (name, None) => {
                let (negated, name) = match name.strip_prefix('~') {
                    Some(rest) => (true, rest),
                    None => (false, name),
                };
                if let Some(mask) = RequestType::from_option(name) {
                    if negated {
                        type_exclude |= mask;
                    } else {
                        type_include |= mask;
                    }
                } else if let Some(mask) = PartyMask::from_option(name) {
                    if negated {
                        party_exclude |= mask;
                    } else {
                        party_include |= mask;
                    }
                } else {
                    return Err(FilterParseError::UnsupportedOption(raw.to_string()));
                }
            }
            _ => return Err(FilterParseError::UnsupportedOption(raw.to_string())),
        }
    }

    let type_bits = finalize_mask(type_include.bits(), type_exclude.bits(), RequestType::ALL.bits())?;
    let party_bits = finalize_mask(party_include.bits() as u32, party_exclude.bits() as u32, PartyMask::ALL.bits() as u32)?;

    normalized.sort();

    Ok(ParsedOptions {
        flags,
        type_mask: RequestType::from_bits_truncate(type_bits),
        party_mask: PartyMask::from_bits_truncate(party_bits as u8),
        domain_constraints,
        redirect,
        tag,
        normalized,
    })
}

/// `noop.js` or `noop.js:5` (uBlock priority suffix, ignored).
fn parse_redirect_value(raw: &str, value: &str) -> Result<String, FilterParseError> {
    let name = value.split(':').next().unwrap_or_default().trim();
    if name.is_empty() {
        return Err(FilterParseError::InvalidOptionValue(raw.to_string()));
    }
    Ok(name.to_string())
}

fn merge_constraints(existing: Option<DomainConstraint>, incoming: DomainConstraint) -> DomainConstraint {
    match existing {
        Some(mut current) => {
            current.include.extend(incoming.include);
            current.exclude.extend(incoming.exclude);
            current
        }
        None => incoming,
    }
}

fn parse_domain_option(value: &str) -> Result<DomainConstraint, FilterParseError> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for raw in value.split('|').map(str::trim).filter(|s| !s.is_empty()) {
        let (is_exclude, domain_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let hash = hash_domain(&normalize_scope_hostname(domain_raw)?);
        if is_exclude {
            exclude.push(hash);
        } else {
            include.push(hash);
        }
    }

    if include.is_empty() && exclude.is_empty() {
        return Err(FilterParseError::InvalidOptionValue(format!("domain={value}")));
    }

    Ok(DomainConstraint { include, exclude })
}

/// Include minus exclude; a full mask is stored as empty ("any").
fn finalize_mask(include: u32, exclude: u32, all: u32) -> Result<u32, FilterParseError> {
    let include = include & all;
    let exclude = exclude & all;
    let mut mask = if include != 0 { include & !exclude } else { all & !exclude };
    if mask == 0 {
        return Err(FilterParseError::EmptyMask);
    }
    if mask == all {
        mask = 0;
    }
    Ok(mask)
}

// =============================================================================
// Hostnames
// =============================================================================

fn is_hostname_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_'
}

fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() || !trimmed.bytes().all(is_hostname_byte) {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

/// Hostname or entity (`google.*`) used to scope a rule.
fn normalize_scope_hostname(host: &str) -> Result<String, FilterParseError> {
    let invalid = || FilterParseError::InvalidHostname(host.to_string());
    match host.strip_suffix(".*") {
        Some(name) => normalize_domain(name).map(|name| format!("{name}.*")).ok_or_else(invalid),
        None => normalize_domain(host).ok_or_else(invalid),
    }
}

/// `0.0.0.0 ads.example.com` style lines.
fn parse_hosts_file_line(line: &str) -> Result<Option<String>, FilterParseError> {
    let mut parts = line.split_whitespace();
    let (Some(first), Some(second)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    if first.parse::<IpAddr>().is_err() {
        return Ok(None);
    }
    normalize_domain(second)
        .map(Some)
        .ok_or_else(|| FilterParseError::InvalidHostname(second.to_string()))
}

fn is_local_hostname(host: &str) -> bool {
    matches!(
        host,
        "localhost" | "localhost.localdomain" | "local" | "broadcasthost" | "ip6-localhost" | "ip6-loopback"
    ) || host.parse::<IpAddr>().is_ok()
}

fn hosts_file_filter(line: &str, host: &str) -> NetworkFilter {
    NetworkFilter {
        raw: line.to_string(),
        flags: RuleFlags::empty(),
        pattern: Pattern::compile(&format!("{host}^"), AnchorType::Hostname, false),
        type_mask: RequestType::empty(),
        party_mask: PartyMask::empty(),
        domains: None,
        redirect: None,
        tag: None,
        fingerprint: hash_text(&format!("||{host}^$")),
    }
}
