//! Query functions over a built registry.
//!
//! Scores are fixed so results from any tier can be merged by score alone:
//!
//! | match                          | score |
//! |--------------------------------|-------|
//! | name equals term               | 0.0   |
//! | name starts with term          | 0.1   |
//! | name contains term             | 0.3   |
//! | path contains term             | 0.5   |
//! | returned without a lexical hit | 0.6   |

use std::collections::HashMap;

use crate::naming::display_name_from_path;
use crate::protocol::{CategoryEntry, PriorityFlags, ResultSource, SearchResult};
use crate::registry::{CatalogRegistry, ALL_BUCKET};
use crate::taxonomy::TermTable;

pub const SCORE_EXACT_NAME: f32 = 0.0;
pub const SCORE_NAME_PREFIX: f32 = 0.1;
pub const SCORE_NAME_SUBSTRING: f32 = 0.3;
pub const SCORE_PATH_SUBSTRING: f32 = 0.5;
/// Records a tier returned for a term without any textual overlap (tag hits, remote ranking).
pub const SCORE_LOOSE_MATCH: f32 = 0.6;

/// Scores `term` against a record. `term` must already be trimmed and lowercased.
pub fn score_match(name: &str, path: &str, term: &str) -> Option<f32> {
    if term.is_empty() {
        return None;
    }
    let name = name.to_lowercase();
    if name == term {
        Some(SCORE_EXACT_NAME)
    } else if name.starts_with(term) {
        Some(SCORE_NAME_PREFIX)
    } else if name.contains(term) {
        Some(SCORE_NAME_SUBSTRING)
    } else if path.to_lowercase().contains(term) {
        Some(SCORE_PATH_SUBSTRING)
    } else {
        None
    }
}

/// Builds a result for a record some tier returned for `term`.
pub fn scored_result(
    path: &str,
    name: Option<&str>,
    term: &str,
    source: ResultSource,
) -> SearchResult {
    let name = match name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => display_name_from_path(path),
    };
    let term = term.trim().to_lowercase();
    let score = score_match(&name, path, &term).unwrap_or(SCORE_LOOSE_MATCH);
    SearchResult {
        path: path.to_string(),
        name,
        source,
        score,
        priority_flags: PriorityFlags::default(),
    }
}

/// Ascending score, then path, so equal inputs always produce equal output.
pub fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|left, right| {
        left.score
            .total_cmp(&right.score)
            .then_with(|| left.path.cmp(&right.path))
    });
}

/// Keeps the lowest score per path.
fn merge_best(into: &mut HashMap<String, SearchResult>, results: Vec<SearchResult>) {
    for result in results {
        match into.get_mut(&result.path) {
            Some(existing) if existing.score <= result.score => {}
            Some(existing) => *existing = result,
            None => {
                into.insert(result.path.clone(), result);
            }
        }
    }
}

fn into_sorted(merged: HashMap<String, SearchResult>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = merged.into_values().collect();
    sort_by_score(&mut results);
    results
}

/// Read-only query view over one registry, tagging results with the tier it represents.
#[derive(Clone, Copy)]
pub struct SearchEngine<'a> {
    registry: &'a CatalogRegistry,
    source: ResultSource,
}

impl<'a> SearchEngine<'a> {
    pub fn new(registry: &'a CatalogRegistry, source: ResultSource) -> Self {
        Self { registry, source }
    }

    /// Case-insensitive substring match against every record's name and path.
    pub fn search_exact(&self, term: &str) -> Vec<SearchResult> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Vec::new();
        }
        let mut results: Vec<SearchResult> = self
            .registry
            .records()
            .filter_map(|record| {
                score_match(&record.name, &record.path, &term).map(|score| SearchResult {
                    path: record.path.clone(),
                    name: record.name.clone(),
                    source: self.source,
                    score,
                    priority_flags: PriorityFlags::default(),
                })
            })
            .collect();
        sort_by_score(&mut results);
        results
    }

    /// OR-union of [`Self::search_exact`] keeping each path's best score.
    pub fn search_multiple<S: AsRef<str>>(&self, terms: &[S]) -> Vec<SearchResult> {
        let mut merged = HashMap::new();
        for term in terms {
            merge_best(&mut merged, self.search_exact(term.as_ref()));
        }
        into_sorted(merged)
    }

    /// Members of the category's `_all` bucket plus every record matching one of
    /// the category's terms, scored against those terms. Unknown categories
    /// degrade to a raw term search.
    pub fn search_by_category(&self, terms: &TermTable, category: &str) -> Vec<SearchResult> {
        let category = category.trim().to_lowercase();
        let members = self.registry.bucket(&category, ALL_BUCKET);
        let category_terms = terms.terms_for(&category);
        if members.is_none() && category_terms.is_none() {
            return self.search_exact(&category);
        }

        let mut scoring_terms: Vec<&str> = vec![category.as_str()];
        if let Some(category_terms) = category_terms {
            scoring_terms.extend(category_terms.iter().map(String::as_str));
        }
        let mut merged = HashMap::new();
        if let Some(members) = members {
            merge_best(&mut merged, self.score_members(members, &scoring_terms));
        }
        // Records classified under a category with more term hits still match here.
        merge_best(&mut merged, self.search_multiple(&scoring_terms));
        into_sorted(merged)
    }

    /// Exact bucket, else the union of sibling buckets whose names contain the
    /// subcategory or are contained in it.
    pub fn search_by_subcategory(&self, category: &str, subcategory: &str) -> Vec<SearchResult> {
        let category = category.trim().to_lowercase();
        let subcategory = subcategory.trim().to_lowercase();
        if subcategory.is_empty() {
            return Vec::new();
        }
        if !self.registry.has_category(&category) {
            return self.search_exact(&subcategory);
        }
        if let Some(members) = self.registry.bucket(&category, &subcategory) {
            return self.score_members(members, &[subcategory.as_str()]);
        }

        let mut merged = HashMap::new();
        for sibling in self.registry.subcategory_names(&category) {
            if !(sibling.contains(subcategory.as_str()) || subcategory.contains(sibling)) {
                continue;
            }
            if let Some(members) = self.registry.bucket(&category, sibling) {
                merge_best(
                    &mut merged,
                    self.score_members(members, &[subcategory.as_str(), sibling]),
                );
            }
        }
        into_sorted(merged)
    }

    fn score_members(&self, members: &[CategoryEntry], scoring_terms: &[&str]) -> Vec<SearchResult> {
        let mut merged: HashMap<String, SearchResult> = HashMap::with_capacity(members.len());
        for member in members {
            let score = scoring_terms
                .iter()
                .filter_map(|term| score_match(&member.name, &member.path, term))
                .min_by(f32::total_cmp)
                .unwrap_or(SCORE_LOOSE_MATCH);
            merge_best(
                &mut merged,
                vec![SearchResult {
                    path: member.path.clone(),
                    name: member.name.clone(),
                    source: self.source,
                    score,
                    priority_flags: PriorityFlags::default(),
                }],
            );
        }
        into_sorted(merged)
    }
}
