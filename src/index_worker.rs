//! Background thread that owns the index builder.
//!
//! Commands arrive over a std channel and are checked at every batch boundary
//! while a build runs; progress and outcomes go out on a broadcast channel so
//! any number of observers can follow a build.

use std::any::Any;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::backends::TermSearchBackend;
use crate::error::ArtError;
use crate::index_builder::IndexBuilder;
use crate::protocol::{IndexCommand, IndexEvent};

pub const INDEX_WORKER_THREAD_NAME: &str = "index-worker";

/// Commands that arrived while a build was running.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PendingCommands {
    cancelled: bool,
    reset: bool,
    shutdown: bool,
}

impl PendingCommands {
    fn absorb(&mut self, command: IndexCommand) {
        match command {
            IndexCommand::Build { force } => {
                debug!("IndexWorker: build (force={}) coalesced into running build", force);
            }
            IndexCommand::Cancel => self.cancelled = true,
            IndexCommand::Reset => {
                self.cancelled = true;
                self.reset = true;
            }
            IndexCommand::Shutdown => {
                self.cancelled = true;
                self.shutdown = true;
            }
        }
    }
}

pub struct IndexWorker {
    builder: IndexBuilder,
    term_source: Arc<dyn TermSearchBackend>,
    commands: Receiver<IndexCommand>,
    events: broadcast::Sender<IndexEvent>,
}

impl IndexWorker {
    pub fn new(
        builder: IndexBuilder,
        term_source: Arc<dyn TermSearchBackend>,
        commands: Receiver<IndexCommand>,
        events: broadcast::Sender<IndexEvent>,
    ) -> Self {
        Self {
            builder,
            term_source,
            commands,
            events,
        }
    }

    #[cfg(test)]
    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    #[cfg(test)]
    pub fn builder_mut(&mut self) -> &mut IndexBuilder {
        &mut self.builder
    }

    fn emit(&self, event: IndexEvent) {
        // No subscribers is not an error; the host may not be listening yet.
        let _ = self.events.send(event);
    }

    /// Blocks on the command channel until shutdown or disconnect.
    pub fn run(&mut self) {
        while let Ok(command) = self.commands.recv() {
            match command {
                IndexCommand::Build { force } => {
                    let pending = self.handle_build(force);
                    if pending.reset {
                        self.handle_reset();
                    }
                    if pending.shutdown {
                        break;
                    }
                }
                IndexCommand::Cancel => {
                    debug!("IndexWorker: cancel received with no build running");
                }
                IndexCommand::Reset => self.handle_reset(),
                IndexCommand::Shutdown => break,
            }
        }
        info!("IndexWorker: stopped");
    }

    fn handle_reset(&mut self) {
        info!("IndexWorker: resetting index");
        self.builder.reset();
    }

    fn handle_build(&mut self, force: bool) -> PendingCommands {
        let mut pending = PendingCommands::default();
        let commands = &self.commands;
        let events = &self.events;
        let result = self.builder.build(
            self.term_source.as_ref(),
            force,
            &mut |progress| {
                let _ = events.send(IndexEvent::Progress(progress));
            },
            &mut || {
                loop {
                    match commands.try_recv() {
                        Ok(command) => pending.absorb(command),
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                pending.cancelled
            },
        );

        match result {
            Ok(outcome) => {
                let registry = self.builder.snapshot();
                let stats = registry.stats();
                info!(
                    "IndexWorker: index ready with {} records, {} categorized (from_cache={})",
                    outcome.records, stats.categorized, outcome.from_cache
                );
                debug!(
                    "IndexWorker: index saved at {:?} (unix ms)",
                    self.builder.last_update()
                );
                self.emit(IndexEvent::Complete {
                    registry,
                    from_cache: outcome.from_cache,
                });
            }
            Err(ArtError::Cancelled) => {
                info!("IndexWorker: build cancelled");
                self.emit(IndexEvent::Cancelled);
            }
            Err(err) => {
                warn!("IndexWorker: build failed: {}", err);
                self.emit(IndexEvent::Error(err));
            }
        }
        pending
    }
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

/// Runs `worker` on a named thread. A panic is logged and ends the thread.
pub fn spawn_index_worker(mut worker: IndexWorker) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(INDEX_WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let run_result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| worker.run()));
            if let Err(payload) = run_result {
                error!(
                    "IndexWorker: worker panicked: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::{spawn_index_worker, IndexWorker};
    use crate::backends::TermSearchBackend;
    use crate::cache_store::{CacheStore, FallbackStore, StorageLimits};
    use crate::catalog_format::RawRecord;
    use crate::db_manager::DbManager;
    use crate::error::{ErrorKind, Result};
    use crate::index_builder::{BuildOptions, IndexBuilder};
    use crate::path_filter::PathFilter;
    use crate::protocol::{IndexCommand, IndexEvent};
    use crate::taxonomy::TermTable;

    struct FakeTerms {
        paths: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl TermSearchBackend for FakeTerms {
        fn search_term(&self, _term: &str) -> Result<Vec<RawRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .paths
                .iter()
                .map(|path| RawRecord::new(*path, None))
                .collect())
        }
    }

    fn fake(paths: &[&'static str]) -> Arc<FakeTerms> {
        Arc::new(FakeTerms {
            paths: paths.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    fn builder() -> IndexBuilder {
        let dir = std::env::temp_dir().join(format!("artscout-worker-{}", uuid::Uuid::new_v4()));
        let cache = Arc::new(CacheStore::with_backends(
            Some(DbManager::open_in_memory().expect("db")),
            FallbackStore::new(dir, 1024 * 1024),
            StorageLimits::default(),
        ));
        let terms = TermTable::from_map(vec![
            ("humanoid".to_string(), vec!["orc".to_string()]),
            ("beast".to_string(), vec!["wolf".to_string()]),
        ]);
        IndexBuilder::new(
            terms,
            PathFilter::default(),
            cache,
            BuildOptions {
                batch_size: 1,
                freshness_window: Duration::from_secs(3600),
                batch_pause: Duration::ZERO,
            },
        )
    }

    fn drain(receiver: &mut broadcast::Receiver<IndexEvent>) -> Vec<IndexEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_build_reports_progress_then_complete() {
        let source = fake(&["tokens/orc_brute.webp", "tokens/wolf.webp"]);
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, mut event_rx) = broadcast::channel(64);
        let mut worker = IndexWorker::new(builder(), source, command_rx, event_tx);

        command_tx
            .send(IndexCommand::Build { force: false })
            .expect("send build");
        drop(command_tx);
        worker.run();

        let events = drain(&mut event_rx);
        let progress_count = events
            .iter()
            .filter(|event| matches!(event, IndexEvent::Progress(_)))
            .count();
        assert_eq!(progress_count, 4);
        match events.last() {
            Some(IndexEvent::Complete {
                registry,
                from_cache,
            }) => {
                assert!(!from_cache);
                assert_eq!(registry.len(), 2);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(worker.builder().is_built());
    }

    #[test]
    fn test_queued_cancel_stops_build_before_first_batch() {
        let source = fake(&["tokens/orc_brute.webp"]);
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, mut event_rx) = broadcast::channel(64);
        let mut worker = IndexWorker::new(builder(), Arc::clone(&source) as Arc<dyn TermSearchBackend>, command_rx, event_tx);

        command_tx
            .send(IndexCommand::Build { force: true })
            .expect("send build");
        command_tx.send(IndexCommand::Cancel).expect("send cancel");
        command_tx.send(IndexCommand::Shutdown).expect("send shutdown");
        worker.run();

        let events = drain(&mut event_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], IndexEvent::Cancelled));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(!worker.builder().is_built());
    }

    #[test]
    fn test_duplicate_build_requests_are_coalesced() {
        let source = fake(&["tokens/orc_brute.webp"]);
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, mut event_rx) = broadcast::channel(64);
        let mut worker = IndexWorker::new(builder(), Arc::clone(&source) as Arc<dyn TermSearchBackend>, command_rx, event_tx);

        command_tx
            .send(IndexCommand::Build { force: true })
            .expect("send build");
        command_tx
            .send(IndexCommand::Build { force: true })
            .expect("send duplicate build");
        drop(command_tx);
        worker.run();

        let completions = drain(&mut event_rx)
            .into_iter()
            .filter(|event| matches!(event, IndexEvent::Complete { .. }))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_empty_build_publishes_error_with_remediation() {
        let source = fake(&[]);
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, mut event_rx) = broadcast::channel(64);
        let mut worker = IndexWorker::new(builder(), source, command_rx, event_tx);

        command_tx
            .send(IndexCommand::Build { force: true })
            .expect("send build");
        drop(command_tx);
        worker.run();

        match drain(&mut event_rx).last() {
            Some(IndexEvent::Error(err)) => {
                assert_eq!(err.kind(), ErrorKind::EmptyPayload);
                assert!(!err.remediation().is_empty());
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_clears_built_index() {
        let source = fake(&["tokens/orc_brute.webp"]);
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, _event_rx) = broadcast::channel(64);
        let mut worker = IndexWorker::new(builder(), source, command_rx, event_tx);

        command_tx
            .send(IndexCommand::Build { force: true })
            .expect("send build");
        command_tx.send(IndexCommand::Reset).expect("send reset");
        drop(command_tx);
        worker.run();

        assert!(!worker.builder().is_built());
        assert!(!worker.builder_mut().load_cached(false));
    }

    #[test]
    fn test_spawned_worker_stops_on_shutdown() {
        let source = fake(&["tokens/orc_brute.webp"]);
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, mut event_rx) = broadcast::channel(64);
        let worker = IndexWorker::new(builder(), source, command_rx, event_tx);
        let handle = spawn_index_worker(worker).expect("spawn worker");

        command_tx
            .send(IndexCommand::Build { force: false })
            .expect("send build");
        let completed = loop {
            match event_rx.blocking_recv() {
                Ok(IndexEvent::Complete { registry, .. }) => break registry,
                Ok(_) => continue,
                Err(err) => panic!("event channel closed: {err}"),
            }
        };
        assert_eq!(completed.len(), 1);

        command_tx.send(IndexCommand::Shutdown).expect("send shutdown");
        handle.join().expect("worker thread");
    }
}
