//! Wiring of the engine's components for one running instance.
//!
//! Construction restores every persisted tier before any network access;
//! teardown stops the index worker and waits for its thread.

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::backends::http_catalog::HttpCatalogSource;
use crate::backends::term_search::HttpTermSearch;
use crate::backends::{LocalArtSource, TermSearchBackend};
use crate::cache_store::CacheStore;
use crate::config::Config;
use crate::error::{ArtError, Result};
use crate::external_catalog::ExternalCacheAdapter;
use crate::index_builder::IndexBuilder;
use crate::index_worker::{spawn_index_worker, IndexWorker};
use crate::protocol::{EntityDescriptor, IndexCommand, IndexEvent, SearchResult};
use crate::search_orchestrator::SearchOrchestrator;

const INDEX_EVENT_CAPACITY: usize = 256;
const INDEX_EVENT_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub(crate) struct PersistencePaths {
    pub(crate) config_file: PathBuf,
    pub(crate) cache_root: PathBuf,
}

/// How a wait for the index worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexWaitOutcome {
    Ready { records: usize, from_cache: bool },
    Cancelled,
    TimedOut,
}

pub(crate) struct AppContext {
    config: Config,
    paths: PersistencePaths,
    external: Arc<ExternalCacheAdapter>,
    orchestrator: SearchOrchestrator,
    index_restored: bool,
    term_search_enabled: bool,
    index_commands: Sender<IndexCommand>,
    index_events: broadcast::Receiver<IndexEvent>,
    index_worker: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Builds every component and restores persisted state. `local` is the
    /// host's own art library, searched alongside the remote tiers.
    pub(crate) fn start(
        config: Config,
        paths: PersistencePaths,
        local: Option<Arc<dyn LocalArtSource>>,
    ) -> Result<Self> {
        let cache = Arc::new(CacheStore::open(&paths.cache_root, config.storage.limits()));
        if !cache.has_primary() {
            warn!(
                "AppContext: primary cache unavailable under {}; using file fallback only",
                paths.cache_root.display()
            );
        }
        let filter = config.filter.path_filter();
        let terms = config.taxonomy.term_table();

        let external = Arc::new(ExternalCacheAdapter::new(
            Arc::new(HttpCatalogSource::new()),
            Arc::clone(&cache),
            filter.clone(),
            config.catalog.busy_wait(),
            config.catalog.enabled,
        ));
        let source_url = config.catalog.source_url.as_str();
        if config.catalog.enabled && !source_url.is_empty() {
            if let Some(restored) = external.restore_if_fresh(source_url) {
                info!(
                    "AppContext: restored {} bulk catalog records",
                    restored.len()
                );
            }
        }

        let term_search_enabled = !config.catalog.term_search_endpoint.is_empty();
        let term_search: Arc<dyn TermSearchBackend> = Arc::new(HttpTermSearch::new(
            &config.catalog.term_search_endpoint,
            config.catalog.term_search_rate_per_second,
        ));

        let build_options = config.catalog.build_options();
        let mut builder = IndexBuilder::new(
            terms.clone(),
            filter.clone(),
            Arc::clone(&cache),
            build_options,
        );
        let index_restored = builder.load_cached(true);

        let mut orchestrator =
            SearchOrchestrator::new(terms, filter, config.search.clone())
                .with_external(Arc::clone(&external))
                .with_batching(build_options.batch_size, build_options.batch_pause);
        if term_search_enabled {
            orchestrator = orchestrator.with_term_search(Arc::clone(&term_search));
        }
        if let Some(local) = local {
            orchestrator = orchestrator.with_local_source(local);
        }
        if index_restored {
            orchestrator.set_index(builder.snapshot());
        }

        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = broadcast::channel(INDEX_EVENT_CAPACITY);
        let worker = IndexWorker::new(builder, term_search, command_rx, event_tx);
        let index_worker = spawn_index_worker(worker)?;

        Ok(Self {
            config,
            paths,
            external,
            orchestrator,
            index_restored,
            term_search_enabled,
            index_commands: command_tx,
            index_events: event_rx,
            index_worker: Some(index_worker),
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn paths(&self) -> &PersistencePaths {
        &self.paths
    }

    pub(crate) fn index_restored(&self) -> bool {
        self.index_restored
    }

    pub(crate) fn orchestrator(&self) -> &SearchOrchestrator {
        &self.orchestrator
    }

    /// Loads the bulk catalog when it was not restored from cache.
    pub(crate) fn ensure_external_catalog(&self) -> Result<()> {
        let source_url = self.config.catalog.source_url.as_str();
        if !self.config.catalog.enabled || source_url.is_empty() || self.external.is_ready() {
            return Ok(());
        }
        if self.external.is_loading(source_url) {
            debug!("AppContext: joining in-flight bulk catalog load");
        }
        let registry = self.external.load_from_source(source_url)?;
        info!("AppContext: bulk catalog loaded with {} records", registry.len());
        Ok(())
    }

    /// Asks the worker for a build. Returns `false` when no per-term endpoint is configured.
    pub(crate) fn request_index_build(&self, force: bool) -> Result<bool> {
        if !self.term_search_enabled {
            debug!("AppContext: no term search endpoint configured; index build skipped");
            return Ok(false);
        }
        self.send_index_command(IndexCommand::Build { force })?;
        Ok(true)
    }

    pub(crate) fn cancel_index_build(&self) -> Result<()> {
        self.send_index_command(IndexCommand::Cancel)
    }

    /// Drops the built index and the bulk catalog, in memory and on disk.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.send_index_command(IndexCommand::Reset)?;
        let source_url = self.config.catalog.source_url.as_str();
        if !source_url.is_empty() {
            self.external.clear(source_url);
        }
        self.orchestrator.clear_index();
        self.index_restored = false;
        info!("AppContext: index and bulk catalog reset");
        Ok(())
    }

    fn send_index_command(&self, command: IndexCommand) -> Result<()> {
        self.index_commands
            .send(command)
            .map_err(|_| ArtError::CapabilityDisabled("index worker is not running".to_string()))
    }

    /// Applies any index events already published. Returns the last terminal one.
    pub(crate) fn poll_index_events(&mut self) -> Result<Option<IndexWaitOutcome>> {
        let mut outcome = None;
        loop {
            match self.index_events.try_recv() {
                Ok(event) => {
                    if let Some(terminal) = self.apply_index_event(event)? {
                        outcome = Some(terminal);
                    }
                }
                Err(TryRecvError::Empty) => return Ok(outcome),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("AppContext: skipped {} index events", skipped);
                }
                Err(TryRecvError::Closed) => {
                    return match outcome {
                        Some(outcome) => Ok(Some(outcome)),
                        None => Err(ArtError::CapabilityDisabled(
                            "index worker stopped".to_string(),
                        )),
                    };
                }
            }
        }
    }

    /// Polls the worker until a build finishes or `timeout` elapses.
    pub(crate) fn wait_for_index(&mut self, timeout: Duration) -> Result<IndexWaitOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.poll_index_events()? {
                return Ok(outcome);
            }
            if Instant::now() >= deadline {
                return Ok(IndexWaitOutcome::TimedOut);
            }
            thread::sleep(INDEX_EVENT_POLL_INTERVAL);
        }
    }

    fn apply_index_event(&mut self, event: IndexEvent) -> Result<Option<IndexWaitOutcome>> {
        match event {
            IndexEvent::Progress(progress) => {
                debug!(
                    "AppContext: index batch {}/{} indexed={}",
                    progress.batch, progress.total_batches, progress.indexed
                );
                Ok(None)
            }
            IndexEvent::Complete {
                registry,
                from_cache,
            } => {
                let records = registry.len();
                self.orchestrator.set_index(registry);
                self.index_restored = true;
                Ok(Some(IndexWaitOutcome::Ready {
                    records,
                    from_cache,
                }))
            }
            IndexEvent::Cancelled => Ok(Some(IndexWaitOutcome::Cancelled)),
            IndexEvent::Error(err) => {
                warn!(
                    "AppContext: index build failed ({:?}): {}. {}",
                    err.kind(),
                    err,
                    err.remediation()
                );
                Err(err)
            }
        }
    }

    pub(crate) fn begin_operation(&mut self) {
        self.orchestrator.begin_operation();
    }

    pub(crate) fn search(&mut self, descriptor: &EntityDescriptor) -> Vec<SearchResult> {
        self.orchestrator.search(descriptor)
    }

    /// Stops the worker and waits for its thread.
    pub(crate) fn shutdown(mut self) {
        let _ = self.index_commands.send(IndexCommand::Shutdown);
        if let Some(handle) = self.index_worker.take() {
            if handle.join().is_err() {
                warn!("AppContext: index worker thread ended abnormally");
            }
        }
        info!("AppContext: shut down");
    }
}
