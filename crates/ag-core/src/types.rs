//! Core type definitions for AdGate
//!
//! Flag and mask values are persisted verbatim in the snapshot format, so the
//! bit positions below are part of the on-disk layout.

use serde::Serialize;

use crate::url::extract_host;

// =============================================================================
// Rule Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags describing network rule behavior.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RuleFlags: u16 {
        /// `@@` exception rule
        const EXCEPTION = 1 << 0;
        /// `$important` - ignores non-important exceptions
        const IMPORTANT = 1 << 1;
        /// Pattern is a `/regex/`
        const IS_REGEX = 1 << 2;
        /// `$match-case`
        const MATCH_CASE = 1 << 3;
        /// `$redirect-rule=` - redirects only, never blocks on its own
        const REDIRECT_RULE = 1 << 4;
        /// `$explicitcancel`
        const EXPLICIT_CANCEL = 1 << 5;
        /// `$badfilter` - disables rules with the same fingerprint
        const BADFILTER = 1 << 6;
        /// Pattern ends with `|`
        const HAS_RIGHT_ANCHOR = 1 << 7;
    }
}

// =============================================================================
// Anchors
// =============================================================================

/// Left anchoring of a network pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AnchorType {
    #[default]
    None = 0,
    /// `|pattern`
    Left = 1,
    /// `||pattern`
    Hostname = 2,
}

impl TryFrom<u8> for AnchorType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Left),
            2 => Ok(Self::Hostname),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Request Types
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;
        const DOCUMENT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        const CSP_REPORT = 1 << 12;
        const BEACON = 1 << 13;
        const FETCH = 1 << 14;

        const ALL = 0x7FFF;
    }
}

impl RequestType {
    /// Parse a request type as reported by the host application.
    ///
    /// Unknown strings map to `OTHER`.
    pub fn from_resource_type(s: &str) -> Self {
        match s {
            "main_frame" | "document" => Self::DOCUMENT,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" | "imageset" => Self::IMAGE,
            "font" => Self::FONT,
            "object" | "object_subrequest" => Self::OBJECT,
            "xmlhttprequest" | "xhr" => Self::XMLHTTPREQUEST,
            "fetch" => Self::FETCH,
            "ping" => Self::PING,
            "beacon" => Self::BEACON,
            "csp_report" => Self::CSP_REPORT,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            _ => Self::OTHER,
        }
    }

    /// Parse a filter option name (`$script`, `$xhr`, ...).
    pub fn from_option(name: &str) -> Option<Self> {
        Some(match name {
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "stylesheet" | "css" => Self::STYLESHEET,
            "object" => Self::OBJECT,
            "subdocument" | "frame" => Self::SUBDOCUMENT,
            "document" | "doc" => Self::DOCUMENT,
            "xmlhttprequest" | "xhr" => Self::XMLHTTPREQUEST,
            "media" => Self::MEDIA,
            "font" => Self::FONT,
            "ping" => Self::PING,
            "websocket" => Self::WEBSOCKET,
            "beacon" => Self::BEACON,
            "fetch" => Self::FETCH,
            "csp_report" => Self::CSP_REPORT,
            "other" => Self::OTHER,
            _ => return None,
        })
    }
}

// =============================================================================
// Party Masks
// =============================================================================

bitflags::bitflags! {
    /// Party (first-party / third-party) mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartyMask: u8 {
        const FIRST_PARTY = 1 << 0;
        const THIRD_PARTY = 1 << 1;
        const ALL = Self::FIRST_PARTY.bits() | Self::THIRD_PARTY.bits();
    }
}

impl PartyMask {
    pub fn from_option(name: &str) -> Option<Self> {
        match name {
            "third-party" | "thirdparty" | "3p" => Some(Self::THIRD_PARTY),
            "first-party" | "firstparty" | "1p" => Some(Self::FIRST_PARTY),
            _ => None,
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// A network request being matched.
///
/// The URL is lowercased once on construction; all literal comparisons in the
/// matcher run against this copy.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    /// Request hostname
    pub host: String,
    /// Top-level page hostname
    pub tab_host: String,
    pub is_third_party: bool,
    pub request_type: RequestType,
}

impl Request {
    /// Build a request descriptor.
    ///
    /// An empty `host` is derived from the URL. An empty `tab_host` falls back
    /// to the request host when evaluating `$domain=`.
    pub fn new(url: &str, host: &str, tab_host: &str, third_party: bool, resource_type: &str) -> Self {
        let url = url.to_ascii_lowercase();
        let host = if host.is_empty() {
            extract_host(&url).unwrap_or_default().to_string()
        } else {
            host.to_ascii_lowercase()
        };
        let tab_host = if tab_host.is_empty() {
            host.clone()
        } else {
            tab_host.to_ascii_lowercase()
        };

        Self {
            url,
            host,
            tab_host,
            is_third_party: third_party,
            request_type: RequestType::from_resource_type(resource_type),
        }
    }

    pub(crate) fn party(&self) -> PartyMask {
        if self.is_third_party {
            PartyMask::THIRD_PARTY
        } else {
            PartyMask::FIRST_PARTY
        }
    }
}

// =============================================================================
// Match Result
// =============================================================================

/// Final decision for a matched request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum MatchDecision {
    /// No blocking rule applies, or an exception cancelled it
    Allow,
    /// Request is blocked
    Block,
    /// Request is blocked and should be answered with this `data:` URI
    Redirect(String),
}

/// Result of matching a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub decision: MatchDecision,
    /// A deciding blocking rule carried `$explicitcancel`
    pub explicit_cancel: bool,
    /// A blocking rule matched but an exception rule overrode it
    pub saved_from_exception: bool,
    /// Text of the deciding blocking rule, if any
    pub filter: Option<String>,
    /// Text of the overriding exception rule, if any
    pub exception: Option<String>,
}

impl MatchResult {
    pub fn is_blocked(&self) -> bool {
        !matches!(self.decision, MatchDecision::Allow)
    }

    pub fn redirect(&self) -> Option<&str> {
        match &self.decision {
            MatchDecision::Redirect(payload) => Some(payload),
            _ => None,
        }
    }
}

impl Default for MatchResult {
    fn default() -> Self {
        Self {
            decision: MatchDecision::Allow,
            explicit_cancel: false,
            saved_from_exception: false,
            filter: None,
            exception: None,
        }
    }
}
