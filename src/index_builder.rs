//! Incremental classification of catalog records into the category index.
//!
//! A build walks the full term universe (every category name plus every term
//! mapped to it) through the per-term backend in fixed-size batches. Terms in a
//! batch are queried in parallel; batches run one after another with a short
//! pause so the host thread is never starved for longer than one batch.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::backends::TermSearchBackend;
use crate::cache_store::{unix_now_ms, CacheEnvelope, CacheStore};
use crate::catalog_format::RawRecord;
use crate::error::{ArtError, Result};
use crate::naming::display_name_from_path;
use crate::path_filter::PathFilter;
use crate::protocol::{BuildProgress, ImageRecord};
use crate::registry::CatalogRegistry;
use crate::taxonomy::TermTable;

pub const INDEX_CACHE_KEY: &str = "index_registry";
pub const DEFAULT_BATCH_SIZE: usize = 8;
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(10);

/// Category assignment for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Categorization {
    pub category: Option<String>,
    pub subcategories: Vec<String>,
}

/// Picks the category with the most terms occurring in `path + " " + name`.
///
/// Categories are visited in lexical order and only a strictly higher count
/// replaces the current best, so ties go to the lexically smallest category.
pub fn categorize(path: &str, name: &str, terms: &TermTable) -> Categorization {
    let haystack = format!("{path} {name}").to_lowercase();
    let mut best = Categorization::default();
    for (category, category_terms) in terms.categories() {
        let matched: Vec<String> = category_terms
            .iter()
            .filter(|term| haystack.contains(term.as_str()))
            .cloned()
            .collect();
        if matched.len() > best.subcategories.len() {
            best = Categorization {
                category: Some(category.to_string()),
                subcategories: matched,
            };
        }
    }
    best
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub batch_size: usize,
    /// Cached envelopes younger than this skip the network build.
    pub freshness_window: Duration,
    pub batch_pause: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            freshness_window: Duration::from_secs(7 * 24 * 60 * 60),
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOutcome {
    pub from_cache: bool,
    pub records: usize,
}

pub struct IndexBuilder {
    registry: Arc<CatalogRegistry>,
    terms: TermTable,
    filter: PathFilter,
    cache: Arc<CacheStore>,
    options: BuildOptions,
    is_built: bool,
    last_update: Option<i64>,
}

impl IndexBuilder {
    pub fn new(
        terms: TermTable,
        filter: PathFilter,
        cache: Arc<CacheStore>,
        options: BuildOptions,
    ) -> Self {
        Self {
            registry: Arc::new(CatalogRegistry::new()),
            terms,
            filter,
            cache,
            options,
            is_built: false,
            last_update: None,
        }
    }

    pub fn is_built(&self) -> bool {
        self.is_built
    }

    pub fn last_update(&self) -> Option<i64> {
        self.last_update
    }

    /// Shared view of the current registry. Later inserts do not affect it.
    pub fn snapshot(&self) -> Arc<CatalogRegistry> {
        Arc::clone(&self.registry)
    }

    /// Inserts one pair. Returns `true` only for a genuinely new, non-excluded path.
    pub fn add_image(&mut self, path: &str, name: Option<&str>) -> bool {
        let path = path.trim();
        if path.is_empty() || self.registry.contains(path) || self.filter.is_excluded(path) {
            return false;
        }
        let name = match name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => display_name_from_path(path),
        };
        let Categorization {
            category,
            subcategories,
        } = categorize(path, &name, &self.terms);
        let record = ImageRecord {
            path: path.to_string(),
            name,
            category,
            subcategories,
            tags: None,
        };
        let inserted = Arc::make_mut(&mut self.registry).insert(record);
        if inserted {
            self.is_built = true;
        }
        inserted
    }

    /// Installs the persisted registry when it matches the schema version and,
    /// if `require_fresh`, is younger than the freshness window.
    pub fn load_cached(&mut self, require_fresh: bool) -> bool {
        let Some(envelope) = self.cache.load::<CatalogRegistry>(INDEX_CACHE_KEY) else {
            return false;
        };
        if require_fresh && !envelope.is_fresh(self.options.freshness_window, unix_now_ms()) {
            debug!(
                "IndexBuilder: cached index is {:?} old, outside the {:?} window",
                envelope.age(unix_now_ms()),
                self.options.freshness_window
            );
            return false;
        }
        if envelope.payload.is_empty() || !envelope.payload.is_consistent() {
            warn!("IndexBuilder: cached index is empty or inconsistent; discarding");
            self.cache.remove(INDEX_CACHE_KEY);
            return false;
        }
        info!(
            "IndexBuilder: restored {} records from cache",
            envelope.payload.len()
        );
        self.registry = Arc::new(envelope.payload);
        self.last_update = Some(envelope.last_update);
        self.is_built = true;
        true
    }

    /// Builds the index, reusing a fresh cached envelope unless `force` is set.
    ///
    /// `is_cancelled` is polled at every batch boundary. On cancellation or when
    /// nothing could be indexed the previous registry is kept.
    pub fn build(
        &mut self,
        term_source: &dyn TermSearchBackend,
        force: bool,
        on_progress: &mut dyn FnMut(BuildProgress),
        is_cancelled: &mut dyn FnMut() -> bool,
    ) -> Result<BuildOutcome> {
        if !force && self.load_cached(true) {
            return Ok(BuildOutcome {
                from_cache: true,
                records: self.registry.len(),
            });
        }

        let previous_registry = Arc::clone(&self.registry);
        let previous_built = self.is_built;
        self.registry = Arc::new(CatalogRegistry::new());
        self.is_built = false;

        match self.build_from_terms(term_source, on_progress, is_cancelled) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.registry = previous_registry;
                self.is_built = previous_built;
                Err(err)
            }
        }
    }

    fn build_from_terms(
        &mut self,
        term_source: &dyn TermSearchBackend,
        on_progress: &mut dyn FnMut(BuildProgress),
        is_cancelled: &mut dyn FnMut() -> bool,
    ) -> Result<BuildOutcome> {
        let started_at = Instant::now();
        let universe = self.terms.term_universe();
        let batch_size = self.options.batch_size.max(1);
        let total_batches = universe.len().div_ceil(batch_size);
        info!(
            "IndexBuilder: building from {} terms in {} batches",
            universe.len(),
            total_batches
        );

        let mut progress = BuildProgress {
            batch: 0,
            total_batches,
            processed: 0,
            indexed: 0,
        };
        for (batch_index, batch) in universe.chunks(batch_size).enumerate() {
            if is_cancelled() {
                info!("IndexBuilder: cancelled before batch {}", batch_index + 1);
                return Err(ArtError::Cancelled);
            }

            let batch_results = fetch_batch(term_source, batch);
            // Results that arrive after cancellation are discarded.
            if is_cancelled() {
                info!("IndexBuilder: cancelled during batch {}", batch_index + 1);
                return Err(ArtError::Cancelled);
            }

            for records in batch_results {
                for record in records {
                    progress.processed += 1;
                    if self.add_image(&record.path, record.name.as_deref()) {
                        progress.indexed += 1;
                    }
                }
            }
            progress.batch = batch_index + 1;
            debug!(
                "IndexBuilder: batch {}/{} processed={} indexed={}",
                progress.batch, total_batches, progress.processed, progress.indexed
            );
            on_progress(progress);

            if progress.batch < total_batches {
                thread::sleep(self.options.batch_pause);
            }
        }

        if self.registry.is_empty() {
            return Err(ArtError::EmptyPayload(format!(
                "{} records retrieved, none could be indexed",
                progress.processed
            )));
        }

        self.persist();
        info!(
            "IndexBuilder: indexed {} of {} retrieved records in {:?}",
            progress.indexed,
            progress.processed,
            started_at.elapsed()
        );
        Ok(BuildOutcome {
            from_cache: false,
            records: self.registry.len(),
        })
    }

    fn persist(&mut self) {
        let envelope = CacheEnvelope::new(self.registry.as_ref());
        self.last_update = Some(envelope.last_update);
        if let Err(err) = self.cache.save(INDEX_CACHE_KEY, &envelope) {
            warn!("IndexBuilder: index not persisted: {}", err);
        }
    }

    /// Clears the in-memory registry and the persisted copy.
    pub fn reset(&mut self) {
        self.registry = Arc::new(CatalogRegistry::new());
        self.is_built = false;
        self.last_update = None;
        self.cache.remove(INDEX_CACHE_KEY);
    }
}

/// Queries every term of one batch in parallel. A failed or panicked term
/// contributes an empty result.
pub(crate) fn fetch_batch(term_source: &dyn TermSearchBackend, batch: &[String]) -> Vec<Vec<RawRecord>> {
    thread::scope(|scope| {
        let handles: Vec<_> = batch
            .iter()
            .map(|term| (term, scope.spawn(move || term_source.search_term(term))))
            .collect();
        handles
            .into_iter()
            .map(|(term, handle)| match handle.join() {
                Ok(Ok(records)) => records,
                Ok(Err(err)) => {
                    warn!("Term search for '{}' failed: {}", term, err);
                    Vec::new()
                }
                Err(_) => {
                    warn!("Term search for '{}' panicked", term);
                    Vec::new()
                }
            })
            .collect()
    })
}
