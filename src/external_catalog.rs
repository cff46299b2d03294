//! Bulk external catalog ingestion with metadata-probe revalidation.
//!
//! A catalog file is fetched wholesale, normalized record by record, grouped by
//! the source's own category labels, and persisted with the freshness metadata
//! observed at fetch time. At session start the persisted snapshot is reused
//! when a cheap probe shows the source has not changed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::backends::{CatalogFetch, CatalogSource, SourceMetadata};
use crate::cache_store::{CacheEnvelope, CacheStore};
use crate::catalog_format::{normalize_record, CatalogDocument};
use crate::error::{ArtError, ErrorKind, Result};
use crate::naming::display_name_from_path;
use crate::path_filter::PathFilter;
use crate::protocol::ImageRecord;
use crate::registry::CatalogRegistry;
use crate::single_flight::SingleFlight;

const CACHE_KEY_PREFIX: &str = "external_catalog";
const PARSE_COOPERATE_INTERVAL: usize = 2_000;
const PARSE_COOPERATE_SLEEP: Duration = Duration::from_millis(1);

/// Bounded wait applied while the source reports it is still generating its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyWait {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for BusyWait {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(2_000),
        }
    }
}

/// Counters collected while normalizing one catalog body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub entries: usize,
    pub inserted: usize,
    pub excluded: usize,
    pub duplicates: usize,
    pub unusable: usize,
}

pub struct ExternalCacheAdapter {
    source: Arc<dyn CatalogSource>,
    cache: Arc<CacheStore>,
    filter: PathFilter,
    busy_wait: BusyWait,
    enabled: bool,
    in_flight: SingleFlight<String, Result<Arc<CatalogRegistry>>>,
    current: Mutex<Option<Arc<CatalogRegistry>>>,
}

impl ExternalCacheAdapter {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        cache: Arc<CacheStore>,
        filter: PathFilter,
        busy_wait: BusyWait,
        enabled: bool,
    ) -> Self {
        Self {
            source,
            cache,
            filter,
            busy_wait,
            enabled,
            in_flight: SingleFlight::new(),
            current: Mutex::new(None),
        }
    }

    pub fn cache_key(locator: &str) -> String {
        format!(
            "{}:{:x}",
            CACHE_KEY_PREFIX,
            md5::compute(locator.trim().as_bytes())
        )
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<CatalogRegistry>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bulk registry from the last successful load or restore.
    pub fn current(&self) -> Option<Arc<CatalogRegistry>> {
        self.lock_current().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.lock_current()
            .as_ref()
            .is_some_and(|registry| !registry.is_empty())
    }

    pub fn is_loading(&self, locator: &str) -> bool {
        self.in_flight.is_in_flight(&locator.trim().to_string())
    }

    /// Fetches, normalizes, and persists the catalog at `locator`. Concurrent
    /// calls for the same locator share one fetch.
    pub fn load_from_source(&self, locator: &str) -> Result<Arc<CatalogRegistry>> {
        if !self.enabled {
            return Err(ArtError::CapabilityDisabled(
                "bulk catalog source is disabled in config".to_string(),
            ));
        }
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ArtError::InvalidInput("catalog locator is empty".to_string()));
        }

        let result = self
            .in_flight
            .run(locator.to_string(), || self.load_uncoalesced(locator));
        if let Ok(registry) = &result {
            *self.lock_current() = Some(Arc::clone(registry));
        }
        result
    }

    fn load_uncoalesced(&self, locator: &str) -> Result<Arc<CatalogRegistry>> {
        let started_at = Instant::now();
        info!("ExternalCatalog: loading {}", locator);
        let fetch = self.fetch_with_busy_wait(locator)?;
        let (registry, summary) = self.ingest(&fetch.body)?;
        info!(
            "ExternalCatalog: {} entries -> {} records ({} excluded, {} duplicate, {} unusable) in {:?}",
            summary.entries,
            summary.inserted,
            summary.excluded,
            summary.duplicates,
            summary.unusable,
            started_at.elapsed()
        );

        let registry = Arc::new(registry);
        self.persist(locator, &registry, &fetch.metadata);
        Ok(registry)
    }

    fn fetch_with_busy_wait(&self, locator: &str) -> Result<CatalogFetch> {
        let deadline = Instant::now() + self.busy_wait.max_wait;
        loop {
            match self.source.fetch(locator) {
                Err(err) if err.kind() == ErrorKind::SourceBusy => {
                    if Instant::now() + self.busy_wait.poll_interval > deadline {
                        return Err(ArtError::SourceBusy(format!(
                            "{} still generating after {:?}",
                            locator, self.busy_wait.max_wait
                        )));
                    }
                    info!(
                        "ExternalCatalog: source busy, retrying in {:?}",
                        self.busy_wait.poll_interval
                    );
                    thread::sleep(self.busy_wait.poll_interval);
                }
                other => return other,
            }
        }
    }

    /// Normalizes a catalog body into a registry keyed by the source's own labels.
    pub fn ingest(&self, body: &str) -> Result<(CatalogRegistry, IngestSummary)> {
        let document = CatalogDocument::parse(body)?;
        debug!("ExternalCatalog: ingesting {} entries", document.entry_count());
        let mut registry = CatalogRegistry::new();
        let mut summary = IngestSummary::default();

        for (label, value) in document.entries() {
            summary.entries += 1;
            if summary.entries % PARSE_COOPERATE_INTERVAL == 0 {
                thread::sleep(PARSE_COOPERATE_SLEEP);
            }

            let Some(raw) = normalize_record(value) else {
                summary.unusable += 1;
                continue;
            };
            if self.filter.is_excluded(&raw.path) {
                summary.excluded += 1;
                continue;
            }
            let category = label
                .map(|label| label.trim().to_lowercase())
                .filter(|label| !label.is_empty());
            let name = raw
                .name
                .unwrap_or_else(|| display_name_from_path(&raw.path));
            let record = ImageRecord {
                path: raw.path,
                name,
                category,
                subcategories: Vec::new(),
                tags: raw.tags,
            };
            if registry.insert(record) {
                summary.inserted += 1;
            } else {
                summary.duplicates += 1;
            }
        }

        if registry.is_empty() {
            return Err(ArtError::EmptyPayload(format!(
                "{} entries produced no usable records",
                summary.entries
            )));
        }
        Ok((registry, summary))
    }

    fn persist(&self, locator: &str, registry: &CatalogRegistry, metadata: &SourceMetadata) {
        let mut envelope = CacheEnvelope::new(registry);
        envelope.source_url = Some(locator.to_string());
        envelope.source_last_modified = metadata.last_modified.clone();
        envelope.source_content_length = metadata.content_length;
        if let Err(err) = self.cache.save(&Self::cache_key(locator), &envelope) {
            warn!(
                "ExternalCatalog: snapshot for {} not persisted ({}); it will be refetched next session",
                locator, err
            );
        }
    }

    /// Returns the persisted snapshot for `locator` when a metadata probe shows
    /// the source is unchanged. A failed probe keeps the snapshot.
    pub fn restore_if_fresh(&self, locator: &str) -> Option<Arc<CatalogRegistry>> {
        let locator = locator.trim();
        if locator.is_empty() {
            return None;
        }
        let key = Self::cache_key(locator);
        let envelope: CacheEnvelope<CatalogRegistry> = self.cache.load(&key)?;

        if envelope.source_url.as_deref() != Some(locator) {
            debug!(
                "ExternalCatalog: cached snapshot belongs to {:?}, not {}",
                envelope.source_url, locator
            );
            return None;
        }

        let stored = SourceMetadata {
            last_modified: envelope.source_last_modified.clone(),
            content_length: envelope.source_content_length,
        };
        match self.source.probe(locator) {
            Ok(live) if stored.contradicts(&live) => {
                info!(
                    "ExternalCatalog: {} changed upstream (stored {:?}, live {:?}); discarding snapshot",
                    locator, stored, live
                );
                self.cache.remove(&key);
                return None;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    "ExternalCatalog: freshness probe for {} failed, keeping cached snapshot: {}",
                    locator, err
                );
            }
        }

        if envelope.payload.is_empty() {
            return None;
        }
        let registry = Arc::new(envelope.payload);
        info!(
            "ExternalCatalog: restored {} records for {}",
            registry.len(),
            locator
        );
        *self.lock_current() = Some(Arc::clone(&registry));
        Some(registry)
    }

    /// Drops the in-memory snapshot and the persisted copy for `locator`.
    pub fn clear(&self, locator: &str) {
        *self.lock_current() = None;
        self.cache.remove(&Self::cache_key(locator));
    }
}
