//! Per-query retrieval across tiers, merged into one deterministic ordering.
//!
//! Each term goes to the cheapest ready tier only: the prebuilt index, then the
//! bulk external catalog, then per-term remote queries. Results are tagged by
//! what part of the entity description found them, filtered, merged by path,
//! and ordered name group first, then subtype, then category.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use uuid::Uuid;

use crate::backends::{LocalArtSource, TermSearchBackend};
use crate::config::SearchConfig;
use crate::external_catalog::ExternalCacheAdapter;
use crate::index_builder::{fetch_batch, DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_SIZE};
use crate::path_filter::PathFilter;
use crate::protocol::{EntityDescriptor, PriorityFlags, ResultSource, SearchResult};
use crate::registry::CatalogRegistry;
use crate::search_engine::{scored_result, SearchEngine};
use crate::taxonomy::TermTable;

const SUBTYPE_SEPARATORS: [char; 3] = [',', ';', '/'];
const GENERIC_SUBTYPES: [&str; 2] = ["any", "any race"];

/// Specific subtype terms of a descriptor, lowercased and trimmed, in input
/// order without duplicates. Empty when every subtype is generic.
pub fn specific_subtypes(descriptor: &EntityDescriptor) -> Vec<String> {
    let entity_type = descriptor.entity_type.trim().to_lowercase();
    let mut subtypes: Vec<String> = Vec::new();
    for part in descriptor.subtype.split(SUBTYPE_SEPARATORS) {
        let part = part.trim().to_lowercase();
        let is_generic =
            part.is_empty() || GENERIC_SUBTYPES.contains(&part.as_str()) || part == entity_type;
        if !is_generic && !subtypes.contains(&part) {
            subtypes.push(part);
        }
    }
    subtypes
}

/// Retrieval tier chosen for one call.
enum Tier {
    Registry(Arc<CatalogRegistry>, ResultSource),
    Remote(Arc<dyn TermSearchBackend>),
    Unavailable,
}

pub struct SearchOrchestrator {
    terms: TermTable,
    filter: PathFilter,
    settings: SearchConfig,
    index: Option<Arc<CatalogRegistry>>,
    external: Option<Arc<ExternalCacheAdapter>>,
    term_search: Option<Arc<dyn TermSearchBackend>>,
    local: Option<Arc<dyn LocalArtSource>>,
    batch_size: usize,
    batch_pause: Duration,
    run_id: Uuid,
    run_cache: HashMap<String, Vec<SearchResult>>,
}

impl SearchOrchestrator {
    pub fn new(terms: TermTable, filter: PathFilter, settings: SearchConfig) -> Self {
        Self {
            terms,
            filter,
            settings,
            index: None,
            external: None,
            term_search: None,
            local: None,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            run_id: Uuid::new_v4(),
            run_cache: HashMap::new(),
        }
    }

    pub fn with_external(mut self, external: Arc<ExternalCacheAdapter>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn with_term_search(mut self, term_search: Arc<dyn TermSearchBackend>) -> Self {
        self.term_search = Some(term_search);
        self
    }

    pub fn with_local_source(mut self, local: Arc<dyn LocalArtSource>) -> Self {
        self.local = Some(local);
        self
    }

    /// Sizes the parallel batches used for per-term remote queries.
    pub fn with_batching(mut self, batch_size: usize, batch_pause: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_pause = batch_pause;
        self
    }

    /// Installs a built index snapshot as the preferred tier.
    pub fn set_index(&mut self, registry: Arc<CatalogRegistry>) {
        self.index = if registry.is_empty() {
            None
        } else {
            Some(registry)
        };
    }

    /// Forgets the index tier and every cached result.
    pub fn clear_index(&mut self) {
        self.index = None;
        self.run_cache.clear();
    }

    /// Starts a new operation run and drops every result cached by the previous one.
    pub fn begin_operation(&mut self) -> Uuid {
        self.run_id = Uuid::new_v4();
        self.run_cache.clear();
        debug!("SearchOrchestrator: operation {} started", self.run_id);
        self.run_id
    }

    pub fn search(&mut self, descriptor: &EntityDescriptor) -> Vec<SearchResult> {
        let fingerprint = descriptor.fingerprint();
        if let Some(cached) = self.run_cache.get(&fingerprint) {
            return cached.clone();
        }
        let results = self.search_uncached(descriptor);
        self.run_cache.insert(fingerprint, results.clone());
        results
    }

    fn search_uncached(&self, descriptor: &EntityDescriptor) -> Vec<SearchResult> {
        let name = descriptor.name.trim();
        let entity_type = descriptor.entity_type.trim().to_lowercase();
        let subtypes = specific_subtypes(descriptor);

        let mut candidates: Vec<SearchResult> = Vec::new();
        if !subtypes.is_empty() {
            if !name.is_empty() {
                candidates.extend(self.collect_terms(&[name], None, PriorityFlags::name()));
            }
            candidates.extend(self.collect_terms(
                &subtypes,
                Some(entity_type.as_str()).filter(|category| !category.is_empty()),
                PriorityFlags::subtype(),
            ));
        } else if !entity_type.is_empty() {
            candidates.extend(self.collect_category(&entity_type, PriorityFlags::category()));
        } else if !name.is_empty() {
            candidates.extend(self.collect_terms(&[name], None, PriorityFlags::name()));
        }

        let mut results = self.merge(candidates);
        results.truncate(self.settings.max_results);
        debug!(
            "SearchOrchestrator: '{}' -> {} results",
            descriptor.fingerprint(),
            results.len()
        );
        results
    }

    fn ready_tier(&self) -> Tier {
        if !self.settings.priority.allows_remote() {
            return Tier::Unavailable;
        }
        if let Some(index) = self.index.as_ref().filter(|index| !index.is_empty()) {
            return Tier::Registry(Arc::clone(index), ResultSource::Index);
        }
        if let Some(bulk) = self
            .external
            .as_ref()
            .and_then(|external| external.current())
            .filter(|bulk| !bulk.is_empty())
        {
            return Tier::Registry(bulk, ResultSource::ExternalCatalog);
        }
        match &self.term_search {
            Some(term_search) => Tier::Remote(Arc::clone(term_search)),
            None => Tier::Unavailable,
        }
    }

    /// Queries `terms` remotely in parallel batches, pausing between batches.
    /// A failed term contributes nothing.
    fn remote_terms<S: AsRef<str>>(
        &self,
        backend: &dyn TermSearchBackend,
        terms: &[S],
    ) -> Vec<SearchResult> {
        let terms: Vec<String> = terms.iter().map(|term| term.as_ref().to_string()).collect();
        let total_batches = terms.len().div_ceil(self.batch_size);
        let mut results = Vec::new();
        for (batch_index, batch) in terms.chunks(self.batch_size).enumerate() {
            for (term, records) in batch.iter().zip(fetch_batch(backend, batch)) {
                results.extend(records.iter().map(|record| {
                    scored_result(
                        &record.path,
                        record.name.as_deref(),
                        term,
                        ResultSource::TermSearch,
                    )
                }));
            }
            if batch_index + 1 < total_batches {
                thread::sleep(self.batch_pause);
            }
        }
        results
    }

    fn local_term(&self, term: &str) -> Vec<SearchResult> {
        if !self.settings.priority.allows_local() {
            return Vec::new();
        }
        let Some(local) = &self.local else {
            return Vec::new();
        };
        match local.search_local(term) {
            Ok(records) => records
                .iter()
                .map(|record| {
                    scored_result(&record.path, record.name.as_deref(), term, ResultSource::Local)
                })
                .collect(),
            Err(err) => {
                warn!("SearchOrchestrator: local search for '{}' failed: {}", term, err);
                Vec::new()
            }
        }
    }

    /// Results for any of `terms`. On a registry tier, `category` also pulls in
    /// the matching subcategory buckets.
    fn collect_terms<S: AsRef<str>>(
        &self,
        terms: &[S],
        category: Option<&str>,
        flags: PriorityFlags,
    ) -> Vec<SearchResult> {
        let mut results = match self.ready_tier() {
            Tier::Registry(registry, source) => {
                let engine = SearchEngine::new(&registry, source);
                let mut found = engine.search_multiple(terms);
                if let Some(category) = category {
                    for term in terms {
                        found.extend(engine.search_by_subcategory(category, term.as_ref()));
                    }
                }
                found
            }
            Tier::Remote(backend) => self.remote_terms(backend.as_ref(), terms),
            Tier::Unavailable => Vec::new(),
        };
        for term in terms {
            results.extend(self.local_term(term.as_ref()));
        }
        tag(results, flags)
    }

    fn collect_category(&self, category: &str, flags: PriorityFlags) -> Vec<SearchResult> {
        let mut results = match self.ready_tier() {
            Tier::Registry(registry, source) => {
                SearchEngine::new(&registry, source).search_by_category(&self.terms, category)
            }
            Tier::Remote(backend) => {
                if !self.terms.contains_category(category) {
                    debug!(
                        "SearchOrchestrator: unknown category '{}' queried as a raw term",
                        category
                    );
                }
                let mut queried = vec![category.to_string()];
                if let Some(category_terms) = self.terms.terms_for(category) {
                    queried.extend(category_terms.iter().cloned());
                }
                self.remote_terms(backend.as_ref(), &queried)
            }
            Tier::Unavailable => Vec::new(),
        };
        results.extend(self.local_term(category));
        tag(results, flags)
    }

    fn source_rank(&self, source: ResultSource) -> u8 {
        match (self.settings.prefer_local, source.is_local()) {
            (true, true) | (false, false) => 0,
            _ => 1,
        }
    }

    /// Drops excluded and below-threshold results, merges duplicates by path
    /// (flags unioned, best score kept), then applies the total ordering.
    fn merge(&self, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        let threshold = self.settings.fuzzy_threshold;
        let mut merged: HashMap<String, SearchResult> = HashMap::new();
        for candidate in candidates {
            if candidate.score > threshold || self.filter.is_excluded(&candidate.path) {
                continue;
            }
            match merged.get_mut(&candidate.path) {
                Some(existing) => {
                    existing.priority_flags =
                        existing.priority_flags.union(candidate.priority_flags);
                    if candidate.score < existing.score {
                        existing.score = candidate.score;
                        existing.name = candidate.name;
                        existing.source = candidate.source;
                    }
                }
                None => {
                    merged.insert(candidate.path.clone(), candidate);
                }
            }
        }

        let mut results: Vec<SearchResult> = merged.into_values().collect();
        results.sort_by(|left, right| self.compare(left, right));
        results
    }

    fn compare(&self, left: &SearchResult, right: &SearchResult) -> Ordering {
        left.priority_flags
            .group_rank()
            .cmp(&right.priority_flags.group_rank())
            .then_with(|| self.source_rank(left.source).cmp(&self.source_rank(right.source)))
            .then_with(|| left.score.total_cmp(&right.score))
            .then_with(|| left.path.cmp(&right.path))
    }

    /// Result to apply without asking, if the configuration allows it.
    pub fn auto_apply_choice<'a>(&self, results: &'a [SearchResult]) -> Option<&'a SearchResult> {
        if !self.settings.auto_apply {
            return None;
        }
        results.first().filter(|top| {
            top.priority_flags.from_name && top.score <= self.settings.fuzzy_threshold
        })
    }
}

fn tag(mut results: Vec<SearchResult>, flags: PriorityFlags) -> Vec<SearchResult> {
    for result in &mut results {
        result.priority_flags = result.priority_flags.union(flags);
    }
    results
}
