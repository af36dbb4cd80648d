//! Resource Store
//!
//! Named payloads used as redirect targets (`$redirect=noop.js`) and as
//! scriptlet templates (`##+js(set-constant, foo, false)`).
//!
//! Bulk loading accepts the uBlock resources format:
//!
//! ```text
//! # comment
//! noop.js application/javascript
//! (function() {})();
//!
//! 1x1.gif image/gif;base64
//! R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7
//! ```

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Resource header must be `name content-type`, got {0:?}")]
    InvalidHeader(String),
    #[error("Resource {0:?} has no content")]
    EmptyContent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    /// Mime type, possibly suffixed with `;base64` when `content` is encoded
    pub content_type: String,
    pub content: String,
}

impl Resource {
    pub fn new(name: &str, content_type: &str, content: &str) -> Self {
        let content = if is_base64_type(content_type) {
            content.split_whitespace().collect()
        } else {
            content.to_string()
        };
        Self {
            name: name.to_string(),
            content_type: content_type.trim().to_string(),
            content,
        }
    }

    /// `data:` URI suitable as a redirect target.
    pub fn data_uri(&self) -> String {
        if is_base64_type(&self.content_type) {
            format!("data:{},{}", self.content_type, self.content)
        } else {
            format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.content))
        }
    }

    /// Decoded text of the resource, used for scriptlet templates.
    fn text(&self) -> Option<String> {
        if is_base64_type(&self.content_type) {
            let bytes = STANDARD.decode(&self.content).ok()?;
            String::from_utf8(bytes).ok()
        } else {
            Some(self.content.clone())
        }
    }
}

fn is_base64_type(content_type: &str) -> bool {
    content_type.trim().to_ascii_lowercase().ends_with(";base64")
}

/// Resources keyed by unique name. Later insertions overwrite earlier ones.
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    resources: HashMap<String, Resource>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, resource: Resource) {
        self.resources.insert(resource.name.clone(), resource);
    }

    /// Parse a resources manifest and add every well-formed entry.
    ///
    /// Returns the number of resources added.
    pub fn add_manifest(&mut self, manifest: &str) -> usize {
        let mut added = 0;
        for entry in parse_manifest(manifest) {
            match entry {
                Ok(resource) => {
                    self.add(resource);
                    added += 1;
                }
                Err(err) => log::debug!("Skipping resource entry: {err}"),
            }
        }
        added
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources sorted by name.
    pub fn iter_sorted(&self) -> Vec<&Resource> {
        let mut all: Vec<&Resource> = self.resources.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Redirect payload for a resource name, if the resource exists.
    pub fn redirect_data_uri(&self, name: &str) -> Option<String> {
        self.get(name).map(Resource::data_uri)
    }

    /// Render a scriptlet from the argument list of a `+js(...)` rule.
    ///
    /// The first argument names the resource (with or without `.js`); the rest
    /// replace `{{1}}`, `{{2}}`, ... in its body.
    pub fn render_scriptlet(&self, call: &str) -> Option<String> {
        let args = split_scriptlet_args(call);
        let (name, params) = args.split_first()?;
        let resource = self
            .get(name)
            .or_else(|| self.get(&format!("{name}.js")))?;

        let body = resource.text()?;
        Some(fill_placeholders(&body, params))
    }
}

/// Parse the uBlock resources format into entries.
pub fn parse_manifest(manifest: &str) -> Vec<Result<Resource, ResourceError>> {
    let mut entries = Vec::new();
    let mut header: Option<&str> = None;
    let mut body: Vec<&str> = Vec::new();

    let mut finish = |header: &mut Option<&str>, body: &mut Vec<&str>, entries: &mut Vec<_>| {
        if let Some(line) = header.take() {
            entries.push(build_entry(line, body));
        }
        body.clear();
    };

    for line in manifest.lines() {
        if line.trim().is_empty() {
            finish(&mut header, &mut body, &mut entries);
            continue;
        }
        if header.is_none() {
            if line.starts_with('#') {
                continue;
            }
            header = Some(line);
        } else {
            body.push(line);
        }
    }
    finish(&mut header, &mut body, &mut entries);

    entries
}

fn build_entry(header: &str, body: &[&str]) -> Result<Resource, ResourceError> {
    let mut fields = header.split_whitespace();
    let (name, content_type) = match (fields.next(), fields.next(), fields.next()) {
        (Some(name), Some(content_type), None) => (name, content_type),
        _ => return Err(ResourceError::InvalidHeader(header.to_string())),
    };
    if body.is_empty() {
        return Err(ResourceError::EmptyContent(name.to_string()));
    }
    Ok(Resource::new(name, content_type, &body.join("\n")))
}

/// Split on commas not preceded by a backslash.
fn split_scriptlet_args(call: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for ch in call.chars() {
        match ch {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => {
                if escaped && ch != ',' {
                    current.push('\\');
                }
                current.push(ch);
                escaped = false;
            }
        }
    }
    if escaped {
        current.push('\\');
    }
    args.push(current.trim().to_string());

    args
}

/// Substitute `{{N}}` placeholders in one pass, so argument text is never
/// rescanned. Placeholders without a matching argument are kept as written.
fn fill_placeholders(body: &str, params: &[String]) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[digits..]
            .starts_with("}}")
            .then(|| after[..digits].parse::<usize>().ok())
            .flatten()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));

        match param {
            Some(param) => {
                out.push_str(&escape_scriptlet_arg(param));
                rest = &after[digits + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);

    out
}

fn escape_scriptlet_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    for ch in arg.chars() {
        match ch {
            '\\' | '\'' | '"' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
# uBlock resources
noop.js application/javascript
(function() {})();

1x1.gif image/gif;base64
R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7

broken-header
content

set-constant.js application/javascript
(function() {
  window['{{1}}'] = '{{2}}';
})();
";

    #[test]
    fn parses_manifest_and_skips_bad_entries() {
        let mut store = ResourceStore::new();
        assert_eq!(store.add_manifest(MANIFEST), 3);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("noop.js").map(|r| r.content.as_str()), Some("(function() {})();"));
        assert!(store.get("broken-header").is_none());
    }

    #[test]
    fn reports_entry_errors() {
        let entries = parse_manifest("a b c\nbody\n\nname text/plain\n");
        assert_eq!(entries[0], Err(ResourceError::InvalidHeader("a b c".into())));
        assert_eq!(entries[1], Err(ResourceError::EmptyContent("name".into())));
    }

    #[test]
    fn later_insert_overwrites() {
        let mut store = ResourceStore::new();
        store.add(Resource::new("noop.js", "application/javascript", "one"));
        store.add(Resource::new("noop.js", "application/javascript", "two"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("noop.js").map(|r| r.content.as_str()), Some("two"));
    }

    #[test]
    fn data_uris() {
        let mut store = ResourceStore::new();
        store.add_manifest(MANIFEST);
        assert_eq!(
            store.redirect_data_uri("noop.js").as_deref(),
            Some("data:application/javascript;base64,KGZ1bmN0aW9uKCkge30pKCk7")
        );
        assert_eq!(
            store.redirect_data_uri("1x1.gif").as_deref(),
            Some("data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7")
        );
        assert_eq!(store.redirect_data_uri("missing.js"), None);
    }

    #[test]
    fn renders_scriptlets() {
        let mut store = ResourceStore::new();
        store.add_manifest(MANIFEST);
        let rendered = store.render_scriptlet("set-constant, ads\\,enabled, it's").expect("rendered");
        assert!(rendered.contains("window['ads,enabled'] = 'it\\'s';"));
        assert_eq!(store.render_scriptlet("unknown-scriptlet, x"), None);
    }

    #[test]
    fn scriptlet_arguments_are_not_rescanned() {
        let mut store = ResourceStore::new();
        store.add(Resource::new("pair.js", "application/javascript", "a={{1}};b={{2}};c={{3}}"));
        assert_eq!(
            store.render_scriptlet("pair, x{{2}}, y").as_deref(),
            Some("a=x{{2}};b=y;c={{3}}")
        );
        assert_eq!(store.render_scriptlet("pair").as_deref(), Some("a={{1}};b={{2}};c={{3}}"));
    }
}
