//! Filter List Catalog
//!
//! Static metadata about distributable filter lists, embedded at build time
//! and parsed on first access.
//!
//! The bundled entries are illustrative. Titles and URLs point at well-known
//! public lists, but every `base64_public_key` is left empty: the catalog
//! carries no signing keys and must not be used to verify list downloads.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

const DEFAULT_LISTS_JSON: &str = include_str!("../data/default_lists.json");
const REGIONS_JSON: &str = include_str!("../data/regions.json");

/// Languages beyond this many are dropped when loading the catalog.
pub const MAX_LANGS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterListEntry {
    pub uuid: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub langs: Vec<String>,
    #[serde(default)]
    pub support_url: String,
    #[serde(default)]
    pub component_id: String,
    #[serde(default)]
    pub base64_public_key: String,
}

static DEFAULT_LISTS: OnceLock<Vec<FilterListEntry>> = OnceLock::new();
static REGIONS: OnceLock<Vec<FilterListEntry>> = OnceLock::new();

fn parse_catalog(category: &str, json: &str) -> Vec<FilterListEntry> {
    match serde_json::from_str::<Vec<FilterListEntry>>(json) {
        Ok(mut entries) => {
            for entry in &mut entries {
                entry.langs.truncate(MAX_LANGS);
            }
            entries
        }
        Err(err) => {
            log::warn!("Failed to parse {category} filter list catalog: {err}");
            Vec::new()
        }
    }
}

/// Catalog entries for `"default"` or `"regions"`. Any other category is empty.
pub fn filter_list_catalog(category: &str) -> &'static [FilterListEntry] {
    match category {
        "default" => DEFAULT_LISTS.get_or_init(|| parse_catalog(category, DEFAULT_LISTS_JSON)).as_slice(),
        "regions" => REGIONS.get_or_init(|| parse_catalog(category, REGIONS_JSON)).as_slice(),
        _ => &[],
    }
}

pub fn filter_list_catalog_size(category: &str) -> usize {
    filter_list_catalog(category).len()
}
