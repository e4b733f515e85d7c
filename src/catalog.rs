// src/catalog.rs
//
// Homepage and search post-processing: category exclusion, per-category
// dedup, field shedding down to the summary shape the clients render.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalog row shared by the explore and search surfaces. Whatever else the
/// upstream attaches (ranks, episode counts, type tags) is shed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeSummary {
    pub id: String,
    pub name: String,
    pub poster: String,
}

/// Ordered category-to-entries mapping served by `/explore`.
pub type CatalogPage = IndexMap<String, Vec<AnimeSummary>>;

/// Homepage sections that are not catalog rows (rank ladders, genre chips,
/// unaired titles). Matched against the upstream's literal key names.
const EXCLUDED_CATEGORIES: [&str; 3] = ["topUpcomingAnimes", "top10Animes", "genres"];

fn is_excluded_category(name: &str) -> bool {
    EXCLUDED_CATEGORIES.contains(&name)
}

/// Reduce a raw homepage payload to a `CatalogPage`.
///
/// Excluded and non-array categories are dropped; within a category the
/// first occurrence of an id wins and later repeats are discarded. Category
/// and entry order are preserved as received. The same id may still appear
/// in several categories.
pub fn dedup_catalog(raw: IndexMap<String, Value>) -> CatalogPage {
    let mut page = CatalogPage::new();
    for (category, value) in raw {
        if is_excluded_category(&category) {
            continue;
        }
        let Value::Array(entries) = value else {
            continue;
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            // Records missing id/name/poster are unrenderable; skip them.
            let Ok(summary) = serde_json::from_value::<AnimeSummary>(entry) else {
                continue;
            };
            if seen.insert(summary.id.clone()) {
                rows.push(summary);
            }
        }
        page.insert(category, rows);
    }
    page
}

/// Field-shed a list of raw anime records, skipping unrenderable ones.
/// Used for search results, which arrive as a flat list.
pub fn strip_summaries(entries: &[Value]) -> Vec<AnimeSummary> {
    entries
        .iter()
        .filter_map(|e| serde_json::from_value(e.clone()).ok())
        .collect()
}
