//! Tag Registry
//!
//! Network rules carrying `$tag=name` only participate in matching while
//! `name` is enabled here.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRegistry {
    enabled: BTreeSet<String>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a tag. Returns `false` if it was already enabled.
    pub fn add(&mut self, tag: &str) -> bool {
        self.enabled.insert(tag.to_string())
    }

    /// Disable a tag. Returns `false` if it was not enabled.
    pub fn remove(&mut self, tag: &str) -> bool {
        self.enabled.remove(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.enabled.contains(tag)
    }

    /// Enabled tags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}
