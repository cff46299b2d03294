//! Versioned key/value persistence with a durable primary and a size-capped fallback.
//!
//! The primary backend is SQLite (one connection, probed once at construction).
//! When it is missing or a write fails, envelopes land in a directory of JSON
//! files whose total size is hard-capped. Loads never fail: a miss, a corrupt
//! entry, or a schema-version mismatch all read as `None`, and corrupt or
//! outdated entries are deleted on detection.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::db_manager::DbManager;
use crate::error::{ArtError, Result};

/// Bumping this invalidates every previously persisted envelope.
pub const SCHEMA_VERSION: u32 = 7;
pub const DEFAULT_FALLBACK_CAPACITY_BYTES: usize = 4_718_592;
pub const DEFAULT_PRIMARY_MAX_ENTRY_BYTES: usize = 256 * 1024 * 1024;
const PRIMARY_DB_FILE_NAME: &str = "cache.db";
const FALLBACK_DIR_NAME: &str = "fallback";

pub fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

/// Persisted wrapper around any payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope<T> {
    pub version: u32,
    /// When the envelope was written, unix ms.
    pub timestamp: i64,
    /// When the payload content last changed, unix ms.
    pub last_update: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_content_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(flatten)]
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T) -> Self {
        let now = unix_now_ms();
        Self {
            version: SCHEMA_VERSION,
            timestamp: now,
            last_update: now,
            source_last_modified: None,
            source_content_length: None,
            source_url: None,
            payload,
        }
    }

    pub fn age(&self, now_unix_ms: i64) -> Duration {
        let elapsed = now_unix_ms.saturating_sub(self.timestamp).max(0);
        Duration::from_millis(elapsed as u64)
    }

    pub fn is_fresh(&self, window: Duration, now_unix_ms: i64) -> bool {
        self.age(now_unix_ms) < window
    }
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    version: u32,
    #[serde(default)]
    timestamp: i64,
}

/// Backend that accepted a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    Primary,
    Fallback,
}

/// Size limits applied to serialized envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLimits {
    pub fallback_capacity_bytes: usize,
    pub primary_max_entry_bytes: usize,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            fallback_capacity_bytes: DEFAULT_FALLBACK_CAPACITY_BYTES,
            primary_max_entry_bytes: DEFAULT_PRIMARY_MAX_ENTRY_BYTES,
        }
    }
}

/// Directory of JSON files with a hard total-size cap.
pub struct FallbackStore {
    root: PathBuf,
    capacity_bytes: usize,
}

impl FallbackStore {
    pub fn new(root: PathBuf, capacity_bytes: usize) -> Self {
        Self {
            root,
            capacity_bytes,
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{:x}.json", md5::compute(key.as_bytes())))
    }

    fn used_bytes_excluding(&self, excluded: &Path) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != excluded)
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|extension| extension == "json")
            })
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len() as usize)
            .sum()
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn put(&self, key: &str, body: &str) -> Result<()> {
        let path = self.entry_path(key);
        let projected = self.used_bytes_excluding(&path) + body.len();
        if body.len() > self.capacity_bytes || projected > self.capacity_bytes {
            return Err(ArtError::StorageCapacityExceeded {
                size: projected,
                limit: self.capacity_bytes,
            });
        }
        fs::create_dir_all(&self.root)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, body)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct CacheStore {
    primary: Option<DbManager>,
    fallback: FallbackStore,
    limits: StorageLimits,
}

impl CacheStore {
    /// Opens both backends under `root`. A primary that fails to open or probe
    /// is dropped for the lifetime of this store.
    pub fn open(root: &Path, limits: StorageLimits) -> Self {
        let primary = match fs::create_dir_all(root) {
            Ok(()) => Self::probe_primary(&root.join(PRIMARY_DB_FILE_NAME)),
            Err(err) => {
                warn!(
                    "CacheStore: cannot create cache root {}: {}",
                    root.display(),
                    err
                );
                None
            }
        };
        Self::with_backends(
            primary,
            FallbackStore::new(root.join(FALLBACK_DIR_NAME), limits.fallback_capacity_bytes),
            limits,
        )
    }

    pub fn with_backends(
        primary: Option<DbManager>,
        fallback: FallbackStore,
        limits: StorageLimits,
    ) -> Self {
        Self {
            primary,
            fallback,
            limits,
        }
    }

    fn probe_primary(db_path: &Path) -> Option<DbManager> {
        match DbManager::open(db_path).and_then(|db| db.probe().map(|_| db)) {
            Ok(db) => Some(db),
            Err(err) => {
                warn!(
                    "CacheStore: primary backend unavailable at {}, using fallback only: {}",
                    db_path.display(),
                    err
                );
                None
            }
        }
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn save<T: Serialize>(&self, key: &str, envelope: &CacheEnvelope<T>) -> Result<StorageTier> {
        let body = serde_json::to_string(envelope)?;

        if let Some(primary) = &self.primary {
            if body.len() > self.limits.primary_max_entry_bytes {
                return Err(ArtError::StorageCapacityExceeded {
                    size: body.len(),
                    limit: self.limits.primary_max_entry_bytes,
                });
            }
            match primary.put_entry(key, i64::from(envelope.version), envelope.timestamp, &body) {
                Ok(()) => {
                    // Drop any older fallback copy.
                    if let Err(err) = self.fallback.remove(key) {
                        debug!("CacheStore: failed to clear fallback copy of {}: {}", key, err);
                    }
                    return Ok(StorageTier::Primary);
                }
                Err(err) => {
                    warn!(
                        "CacheStore: primary write failed for {}, trying fallback: {}",
                        key, err
                    );
                    // The older primary row would otherwise shadow the fallback copy.
                    if let Err(err) = primary.delete_entry(key) {
                        warn!(
                            "CacheStore: failed to drop stale primary row for {}: {}",
                            key, err
                        );
                    }
                }
            }
        }

        self.fallback.put(key, &body)?;
        Ok(StorageTier::Fallback)
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEnvelope<T>> {
        let body = self.read_body(key)?;

        let header: EnvelopeHeader = match serde_json::from_str(&body) {
            Ok(header) => header,
            Err(err) => {
                warn!("CacheStore: corrupt entry {} (header): {}", key, err);
                self.remove(key);
                return None;
            }
        };
        if header.version != SCHEMA_VERSION {
            debug!(
                "CacheStore: discarding {} with schema version {} (current {})",
                key, header.version, SCHEMA_VERSION
            );
            self.remove(key);
            return None;
        }

        match serde_json::from_str::<CacheEnvelope<T>>(&body) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                warn!("CacheStore: corrupt entry {}: {}", key, err);
                self.remove(key);
                None
            }
        }
    }

    /// Body of the most recently written copy of `key` across both backends.
    fn read_body(&self, key: &str) -> Option<String> {
        let primary_entry = match &self.primary {
            Some(primary) => match primary.get_entry(key) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("CacheStore: primary read failed for {}: {}", key, err);
                    None
                }
            },
            None => None,
        };
        let fallback_body = match self.fallback.get(key) {
            Ok(body) => body,
            Err(err) => {
                warn!("CacheStore: fallback read failed for {}: {}", key, err);
                None
            }
        };

        match (primary_entry, fallback_body) {
            (Some(entry), Some(fallback)) => {
                let fallback_timestamp = serde_json::from_str::<EnvelopeHeader>(&fallback)
                    .map(|header| header.timestamp)
                    .unwrap_or(i64::MIN);
                if fallback_timestamp > entry.saved_unix_ms {
                    debug!("CacheStore: fallback copy of {} is newer than primary", key);
                    Some(fallback)
                } else {
                    Some(entry.body)
                }
            }
            (Some(entry), None) => Some(entry.body),
            (None, fallback) => fallback,
        }
    }

    /// Clears `key` from both backends. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut removed = false;
        if let Some(primary) = &self.primary {
            match primary.delete_entry(key) {
                Ok(deleted) => removed |= deleted,
                Err(err) => warn!("CacheStore: primary delete failed for {}: {}", key, err),
            }
        }
        match self.fallback.remove(key) {
            Ok(deleted) => removed |= deleted,
            Err(err) => warn!("CacheStore: fallback delete failed for {}: {}", key, err),
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::{
        CacheEnvelope, CacheStore, FallbackStore, StorageLimits, StorageTier, SCHEMA_VERSION,
    };
    use crate::db_manager::DbManager;
    use crate::error::ErrorKind;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        items: Vec<String>,
    }

    fn payload(count: usize) -> Payload {
        Payload {
            items: (0..count).map(|index| format!("tokens/item_{index}.webp")).collect(),
        }
    }

    fn fallback_only(dir: &std::path::Path, capacity: usize) -> CacheStore {
        let limits = StorageLimits {
            fallback_capacity_bytes: capacity,
            ..StorageLimits::default()
        };
        CacheStore::with_backends(None, FallbackStore::new(dir.join("fallback"), capacity), limits)
    }

    #[test]
    fn test_save_then_load_round_trips_through_primary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::open(dir.path(), StorageLimits::default());
        assert!(store.has_primary());

        let mut envelope = CacheEnvelope::new(payload(3));
        envelope.source_url = Some("https://example.com/catalog.json".to_string());
        let tier = store.save("index", &envelope).expect("save should succeed");
        assert_eq!(tier, StorageTier::Primary);
        let loaded: CacheEnvelope<Payload> = store.load("index").expect("entry should load");
        assert_eq!(loaded, envelope);
    }

    #[test]
    fn test_fallback_is_used_without_primary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fallback_only(dir.path(), 1024 * 1024);
        let envelope = CacheEnvelope::new(payload(2));
        let tier = store.save("index", &envelope).expect("save should succeed");
        assert_eq!(tier, StorageTier::Fallback);
        let loaded: CacheEnvelope<Payload> = store.load("index").expect("entry should load");
        assert_eq!(loaded.payload, envelope.payload);
    }

    #[test]
    fn test_oversized_fallback_save_fails_without_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fallback_only(dir.path(), 256);
        let err = store
            .save("index", &CacheEnvelope::new(payload(50)))
            .expect_err("save should exceed capacity");
        assert_eq!(err.kind(), ErrorKind::StorageCapacityExceeded);
        assert!(store.load::<Payload>("index").is_none());
    }

    #[test]
    fn test_version_mismatch_is_a_miss_and_is_deleted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::open(dir.path(), StorageLimits::default());
        let mut envelope = CacheEnvelope::new(payload(1));
        envelope.version = SCHEMA_VERSION - 1;
        store.save("index", &envelope).expect("save");

        assert!(store.load::<Payload>("index").is_none());
        assert!(!store.remove("index"), "outdated entry should already be gone");
    }

    #[test]
    fn test_corrupt_entry_self_heals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = DbManager::open_in_memory().expect("db");
        db.put_entry("index", i64::from(SCHEMA_VERSION), 0, "{\"version\":7,\"items\":")
            .expect("raw put");
        let store = CacheStore::with_backends(
            Some(db),
            FallbackStore::new(dir.path().join("fallback"), 1024),
            StorageLimits::default(),
        );
        assert!(store.load::<Payload>("index").is_none());
        assert!(!store.remove("index"), "corrupt entry should already be gone");
    }

    #[test]
    fn test_payload_shape_mismatch_is_treated_as_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fallback_only(dir.path(), 1024 * 1024);
        store
            .save("index", &CacheEnvelope::new(payload(1)))
            .expect("save");

        #[derive(Debug, Deserialize)]
        struct Other {
            #[allow(dead_code)]
            required_field: u32,
        }
        assert!(store.load::<Other>("index").is_none());
        assert!(store.load::<Payload>("index").is_none());
    }

    #[test]
    fn test_remove_clears_both_backends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fallback_only(dir.path(), 1024 * 1024);
        store
            .save("index", &CacheEnvelope::new(payload(1)))
            .expect("save");
        assert!(store.remove("index"));
        assert!(store.load::<Payload>("index").is_none());
    }

    #[test]
    fn test_failed_primary_write_does_not_leave_stale_primary_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::with_backends(
            Some(DbManager::open_in_memory().expect("db")),
            FallbackStore::new(dir.path().join("fallback"), 1024 * 1024),
            StorageLimits::default(),
        );
        let old = Payload {
            items: vec!["old".to_string()],
        };
        assert_eq!(
            store.save("index", &CacheEnvelope::new(old)).expect("save old"),
            StorageTier::Primary
        );

        store
            .primary
            .as_ref()
            .expect("primary")
            .execute_batch(
                "CREATE TRIGGER reject_updates BEFORE UPDATE ON cache_entries
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )
            .expect("install trigger");

        let new = Payload {
            items: vec!["new".to_string()],
        };
        assert_eq!(
            store.save("index", &CacheEnvelope::new(new)).expect("save new"),
            StorageTier::Fallback
        );
        let loaded: CacheEnvelope<Payload> = store.load("index").expect("entry should load");
        assert_eq!(loaded.payload.items, vec!["new".to_string()]);
    }

    #[test]
    fn test_newer_fallback_copy_wins_over_primary_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = DbManager::open_in_memory().expect("db");
        let mut stale = CacheEnvelope::new(Payload {
            items: vec!["old".to_string()],
        });
        stale.timestamp = 1_000;
        db.put_entry(
            "index",
            i64::from(SCHEMA_VERSION),
            stale.timestamp,
            &serde_json::to_string(&stale).expect("serialize"),
        )
        .expect("raw put");
        let fallback = FallbackStore::new(dir.path().join("fallback"), 1024 * 1024);
        let fresh = CacheEnvelope::new(Payload {
            items: vec!["new".to_string()],
        });
        fallback
            .put("index", &serde_json::to_string(&fresh).expect("serialize"))
            .expect("fallback put");

        let store = CacheStore::with_backends(Some(db), fallback, StorageLimits::default());
        let loaded: CacheEnvelope<Payload> = store.load("index").expect("entry should load");
        assert_eq!(loaded.payload.items, vec!["new".to_string()]);
    }

    #[test]
    fn test_freshness_window_compares_against_timestamp() {
        let mut envelope = CacheEnvelope::new(payload(0));
        envelope.timestamp = 1_000;
        assert!(envelope.is_fresh(Duration::from_secs(10), 5_000));
        assert!(!envelope.is_fresh(Duration::from_secs(1), 5_000));
        assert_eq!(envelope.age(500), Duration::ZERO);
    }
}
