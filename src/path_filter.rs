//! Exclusion predicate separating countable entities from environment/prop assets.
//!
//! Patterns are compiled once when the filter is constructed; clones share the
//! compiled program, so a worker thread can own its own copy cheaply.

use std::collections::HashSet;
use std::sync::LazyLock;

use log::warn;
use regex::Regex;

use crate::naming::{file_stem_of, separators_to_spaces};

/// Storage front-end scaffolding that never carries classification meaning.
const SCAFFOLDING_SEGMENTS: [&str; 6] = ["assets", "bazaar", "cdn", "www", "http:", "https:"];

pub const DEFAULT_EXCLUDED_FOLDERS: [&str; 12] = [
    "props",
    "scenes",
    "maps",
    "tiles",
    "environment",
    "furniture",
    "objects",
    "items",
    "icons",
    "walls",
    "terrain",
    "effects",
];

pub const DEFAULT_EXCLUDED_TERMS: [&str; 16] = [
    "barrel", "crate", "chest", "door", "table", "chair", "tree", "rock", "cliff", "wall",
    "bridge", "torch", "map", "tile", "floor", "campfire",
];

static DEFAULT_FILTER: LazyLock<PathFilter> = LazyLock::new(|| {
    PathFilter::new(
        DEFAULT_EXCLUDED_FOLDERS.iter().copied(),
        DEFAULT_EXCLUDED_TERMS.iter().copied(),
    )
});

#[derive(Debug, Clone)]
pub struct PathFilter {
    excluded_folders: HashSet<String>,
    term_pattern: Option<Regex>,
}

impl PathFilter {
    pub fn new<F, T, S1, S2>(excluded_folders: F, excluded_terms: T) -> Self
    where
        F: IntoIterator<Item = S1>,
        T: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let excluded_folders = excluded_folders
            .into_iter()
            .map(|folder| folder.as_ref().trim().to_lowercase())
            .filter(|folder| !folder.is_empty())
            .collect();

        let alternatives: Vec<String> = excluded_terms
            .into_iter()
            .map(|term| separators_to_spaces(&term.as_ref().to_lowercase()))
            .filter(|term| !term.is_empty())
            .map(|term| regex::escape(&term))
            .collect();
        let term_pattern = if alternatives.is_empty() {
            None
        } else {
            let source = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
            match Regex::new(&source) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!("PathFilter: failed to compile exclusion terms: {}", err);
                    None
                }
            }
        };

        Self {
            excluded_folders,
            term_pattern,
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.folder_is_excluded(path) || self.file_name_is_excluded(path)
    }

    fn folder_is_excluded(&self, path: &str) -> bool {
        if self.excluded_folders.is_empty() {
            return false;
        }
        let segments: Vec<&str> = folder_segments(path);
        segments
            .iter()
            .any(|segment| self.excluded_folders.contains(&segment.to_lowercase()))
    }

    fn file_name_is_excluded(&self, path: &str) -> bool {
        let Some(pattern) = &self.term_pattern else {
            return false;
        };
        let words = separators_to_spaces(file_stem_of(path));
        pattern.is_match(&words)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        DEFAULT_FILTER.clone()
    }
}

/// Folder segments of a path or URL, without host/scheme or scaffolding segments.
fn folder_segments(path: &str) -> Vec<&str> {
    let without_query = path.split(['?', '#']).next().unwrap_or(path);
    let (has_host, rest) = match without_query.find("://") {
        Some(index) => (true, &without_query[index + 3..]),
        None => (false, without_query),
    };

    let mut segments: Vec<&str> = rest
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect();
    // Last segment is the file itself.
    segments.pop();
    if has_host && !segments.is_empty() {
        segments.remove(0);
    }
    segments
        .into_iter()
        .filter(|segment| {
            !SCAFFOLDING_SEGMENTS
                .iter()
                .any(|scaffold| segment.eq_ignore_ascii_case(scaffold))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{folder_segments, PathFilter};

    fn filter() -> PathFilter {
        PathFilter::new(["props", "Scenes"], ["barrel", "cliff", "wooden door"])
    }

    #[test]
    fn test_whole_word_term_excludes() {
        let filter = filter();
        assert!(filter.is_excluded("tokens/cliff_entrance.webp"));
        assert!(filter.is_excluded("tokens/Barrel-Wooden.png"));
        assert!(filter.is_excluded("tokens/old_wooden_door.png"));
    }

    #[test]
    fn test_term_inside_longer_token_does_not_exclude() {
        let filter = filter();
        assert!(!filter.is_excluded("tokens/clifford.webp"));
        assert!(!filter.is_excluded("tokens/barrelhouse_brawler.webp"));
    }

    #[test]
    fn test_excluded_folder_matches_case_insensitively() {
        let filter = filter();
        assert!(filter.is_excluded("maps/SCENES/goblin.webp"));
        assert!(filter.is_excluded("props/goblin.webp"));
        assert!(!filter.is_excluded("tokens/goblin.webp"));
    }

    #[test]
    fn test_folder_check_ignores_file_name_and_host() {
        let filter = PathFilter::new(["props", "example.com"], Vec::<String>::new());
        assert!(!filter.is_excluded("tokens/props.webp"));
        assert!(!filter.is_excluded("https://example.com/tokens/orc.webp"));
        assert!(filter.is_excluded("https://example.com/assets/props/orc.webp"));
    }

    #[test]
    fn test_folder_segments_drop_scaffolding() {
        assert_eq!(
            folder_segments("https://assets.forge-vtt.com/bazaar/assets/tokens/orc.webp"),
            vec!["tokens"]
        );
        assert_eq!(folder_segments("a\\b/c.png"), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_lists_exclude_nothing() {
        let filter = PathFilter::new(Vec::<String>::new(), Vec::<String>::new());
        assert!(!filter.is_excluded("props/barrel.webp"));
    }

    #[test]
    fn test_default_filter_excludes_props() {
        assert!(PathFilter::default().is_excluded("props/barrel_wooden.webp"));
        assert!(!PathFilter::default().is_excluded("tokens/goblin_warrior.webp"));
    }
}
