//! Filtering, sorting and pagination over a cache snapshot.

use super::cache::CacheSnapshot;
use super::types::LoraMetadata;
use crate::models::Paginated;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Name,
    Date,
}

/// Which fields a text search looks at, and whether folder filtering recurses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub filename: bool,
    pub modelname: bool,
    pub tags: bool,
    pub recursive: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            filename: true,
            modelname: true,
            tags: false,
            recursive: false,
        }
    }
}

/// Paginated listing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraQuery {
    pub page: usize,
    pub page_size: usize,
    pub sort_by: SortBy,
    pub folder: Option<String>,
    pub search: Option<String>,
    pub fuzzy: bool,
    pub base_models: Vec<String>,
    pub tags: Vec<String>,
    pub search_options: SearchOptions,
}

impl Default for LoraQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            sort_by: SortBy::Name,
            folder: None,
            search: None,
            fuzzy: false,
            base_models: Vec::new(),
            tags: Vec::new(),
            search_options: SearchOptions::default(),
        }
    }
}

impl LoraQuery {
    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}

/// Case-insensitive subsequence match of every whitespace-separated word of `pattern`.
pub fn fuzzy_match(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    pattern
        .split_whitespace()
        .all(|word| is_subsequence(&word.to_lowercase(), &text))
}

fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut chars = haystack.chars();
    needle.chars().all(|c| chars.any(|h| h == c))
}

fn text_matches(text: &str, search: &str, search_lower: &str, fuzzy: bool) -> bool {
    if fuzzy {
        fuzzy_match(text, search)
    } else {
        text.to_lowercase().contains(search_lower)
    }
}

fn matches_search(item: &LoraMetadata, search: &str, fuzzy: bool, options: &SearchOptions) -> bool {
    let lower = search.to_lowercase();
    if options.filename && text_matches(&item.file_name, search, &lower, fuzzy) {
        return true;
    }
    if options.modelname && text_matches(&item.model_name, search, &lower, fuzzy) {
        return true;
    }
    options.tags
        && item
            .tags
            .iter()
            .any(|tag| text_matches(tag, search, &lower, fuzzy))
}

fn in_folder(item: &LoraMetadata, folder: &str, recursive: bool) -> bool {
    if item.folder == folder {
        return true;
    }
    recursive
        && item
            .folder
            .strip_prefix(folder)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

/// Run `query` against `snapshot`.
pub fn run_query(
    snapshot: &CacheSnapshot,
    query: &LoraQuery,
    show_only_sfw: bool,
) -> Paginated<LoraMetadata> {
    let source: &[Arc<LoraMetadata>] = match query.sort_by {
        SortBy::Name => &snapshot.sorted_by_name,
        SortBy::Date => &snapshot.sorted_by_date,
    };
    let search = query.search.as_deref().filter(|s| !s.is_empty());

    let filtered: Vec<Arc<LoraMetadata>> = source
        .iter()
        .filter(|item| !show_only_sfw || item.is_sfw())
        .filter(|item| match &query.folder {
            Some(folder) => in_folder(item, folder, query.search_options.recursive),
            None => true,
        })
        .filter(|item| query.base_models.is_empty() || query.base_models.contains(&item.base_model))
        .filter(|item| query.tags.is_empty() || query.tags.iter().any(|t| item.tags.contains(t)))
        .filter(|item| match search {
            Some(search) => matches_search(item, search, query.fuzzy, &query.search_options),
            None => true,
        })
        .cloned()
        .collect();

    Paginated::from_slice(&filtered, query.page, query.page_size).map(|item| (*item).clone())
}
