//! Persistent configuration model and defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::cache_store::{
    StorageLimits, DEFAULT_FALLBACK_CAPACITY_BYTES, DEFAULT_PRIMARY_MAX_ENTRY_BYTES,
};
use crate::external_catalog::BusyWait;
use crate::index_builder::{BuildOptions, DEFAULT_BATCH_SIZE};
use crate::path_filter::{PathFilter, DEFAULT_EXCLUDED_FOLDERS, DEFAULT_EXCLUDED_TERMS};
use crate::taxonomy::TermTable;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Query behavior.
    pub search: SearchConfig,
    #[serde(default)]
    /// Bulk catalog and per-term retrieval.
    pub catalog: CatalogConfig,
    #[serde(default)]
    /// Cache backend limits.
    pub storage: StorageConfig,
    #[serde(default)]
    /// Environment/prop exclusion lists.
    pub filter: FilterConfig,
    #[serde(default)]
    /// Category → term overrides.
    pub taxonomy: TaxonomyConfig,
}

/// Which retrieval families a query may use.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchPriority {
    LocalOnly,
    RemoteOnly,
    #[default]
    Both,
}

impl SearchPriority {
    pub fn allows_local(self) -> bool {
        !matches!(self, Self::RemoteOnly)
    }

    pub fn allows_remote(self) -> bool {
        !matches!(self, Self::LocalOnly)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub priority: SearchPriority,
    /// Results scoring above this are dropped. 1.0 keeps every match.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f32,
    #[serde(default)]
    pub auto_apply: bool,
    /// Within one priority group, rank local results ahead of remote ones.
    #[serde(default = "default_true")]
    pub prefer_local: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// How long a built index stays fresh before the next session rebuilds it.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshCadence {
    Daily,
    #[default]
    Weekly,
    Monthly,
    Quarterly,
}

impl RefreshCadence {
    pub fn window(self) -> Duration {
        const DAY_SECS: u64 = 24 * 60 * 60;
        let days = match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Monthly => 30,
            Self::Quarterly => 90,
        };
        Duration::from_secs(days * DAY_SECS)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CatalogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bulk catalog URL or file path. Empty disables the bulk tier.
    #[serde(default)]
    pub source_url: String,
    /// Per-term search URL; `{term}` is substituted, otherwise `q=` is appended.
    #[serde(default)]
    pub term_search_endpoint: String,
    #[serde(default = "default_term_search_rate_per_second")]
    pub term_search_rate_per_second: u32,
    #[serde(default)]
    pub refresh_cadence: RefreshCadence,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_busy_wait_secs")]
    pub busy_wait_secs: u64,
    #[serde(default = "default_busy_poll_ms")]
    pub busy_poll_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_fallback_capacity_bytes")]
    pub fallback_capacity_bytes: usize,
    #[serde(default = "default_primary_max_entry_bytes")]
    pub primary_max_entry_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FilterConfig {
    #[serde(default = "default_excluded_folders")]
    pub excluded_folders: Vec<String>,
    #[serde(default = "default_excluded_terms")]
    pub excluded_terms: Vec<String>,
}

/// Empty `categories` means the built-in creature taxonomy.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TaxonomyConfig {
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            priority: SearchPriority::default(),
            fuzzy_threshold: default_fuzzy_threshold(),
            auto_apply: false,
            prefer_local: true,
            max_results: default_max_results(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source_url: String::new(),
            term_search_endpoint: String::new(),
            term_search_rate_per_second: default_term_search_rate_per_second(),
            refresh_cadence: RefreshCadence::default(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            busy_wait_secs: default_busy_wait_secs(),
            busy_poll_ms: default_busy_poll_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            fallback_capacity_bytes: default_fallback_capacity_bytes(),
            primary_max_entry_bytes: default_primary_max_entry_bytes(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            excluded_folders: default_excluded_folders(),
            excluded_terms: default_excluded_terms(),
        }
    }
}

impl CatalogConfig {
    pub fn busy_wait(&self) -> BusyWait {
        BusyWait {
            max_wait: Duration::from_secs(self.busy_wait_secs),
            poll_interval: Duration::from_millis(self.busy_poll_ms),
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            batch_size: self.batch_size,
            freshness_window: self.refresh_cadence.window(),
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }
}

impl StorageConfig {
    pub fn limits(&self) -> StorageLimits {
        StorageLimits {
            fallback_capacity_bytes: self.fallback_capacity_bytes,
            primary_max_entry_bytes: self.primary_max_entry_bytes,
        }
    }
}

impl FilterConfig {
    pub fn path_filter(&self) -> PathFilter {
        PathFilter::new(&self.excluded_folders, &self.excluded_terms)
    }
}

impl TaxonomyConfig {
    pub fn term_table(&self) -> TermTable {
        if self.categories.is_empty() {
            TermTable::default()
        } else {
            TermTable::from_map(self.categories.clone())
        }
    }
}

/// Clamps values that would stall or disable the engine.
pub fn sanitize_config(config: Config) -> Config {
    let fuzzy_threshold = if config.search.fuzzy_threshold.is_finite() {
        config.search.fuzzy_threshold.clamp(0.0, 1.0)
    } else {
        default_fuzzy_threshold()
    };

    Config {
        search: SearchConfig {
            fuzzy_threshold,
            max_results: config.search.max_results.clamp(1, 1_000),
            ..config.search
        },
        catalog: CatalogConfig {
            source_url: config.catalog.source_url.trim().to_string(),
            term_search_endpoint: config.catalog.term_search_endpoint.trim().to_string(),
            term_search_rate_per_second: config.catalog.term_search_rate_per_second.clamp(1, 100),
            batch_size: config.catalog.batch_size.clamp(1, 64),
            batch_pause_ms: config.catalog.batch_pause_ms.min(5_000),
            busy_wait_secs: config.catalog.busy_wait_secs.min(600),
            busy_poll_ms: config.catalog.busy_poll_ms.max(50),
            ..config.catalog
        },
        storage: StorageConfig {
            fallback_capacity_bytes: config.storage.fallback_capacity_bytes.max(64 * 1024),
            primary_max_entry_bytes: config.storage.primary_max_entry_bytes.max(1024 * 1024),
        },
        filter: config.filter,
        taxonomy: config.taxonomy,
    }
}

fn default_true() -> bool {
    true
}

fn default_fuzzy_threshold() -> f32 {
    1.0
}

fn default_max_results() -> usize {
    200
}

fn default_term_search_rate_per_second() -> u32 {
    5
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_pause_ms() -> u64 {
    10
}

fn default_busy_wait_secs() -> u64 {
    30
}

fn default_busy_poll_ms() -> u64 {
    2_000
}

fn default_fallback_capacity_bytes() -> usize {
    DEFAULT_FALLBACK_CAPACITY_BYTES
}

fn default_primary_max_entry_bytes() -> usize {
    DEFAULT_PRIMARY_MAX_ENTRY_BYTES
}

fn default_excluded_folders() -> Vec<String> {
    DEFAULT_EXCLUDED_FOLDERS.iter().map(|s| s.to_string()).collect()
}

fn default_excluded_terms() -> Vec<String> {
    DEFAULT_EXCLUDED_TERMS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{sanitize_config, CatalogConfig, Config, RefreshCadence, SearchConfig, SearchPriority};

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();

        assert_eq!(config.search.priority, SearchPriority::Both);
        assert!((config.search.fuzzy_threshold - 1.0).abs() < f32::EPSILON);
        assert!(!config.search.auto_apply);
        assert!(config.search.prefer_local);
        assert_eq!(config.search.max_results, 200);
        assert!(config.catalog.enabled);
        assert!(config.catalog.source_url.is_empty());
        assert_eq!(config.catalog.refresh_cadence, RefreshCadence::Weekly);
        assert_eq!(config.catalog.batch_size, 8);
        assert_eq!(config.storage.fallback_capacity_bytes, 4_718_592);
        assert!(config.filter.excluded_terms.contains(&"barrel".to_string()));
        assert!(config.taxonomy.categories.is_empty());
    }

    #[test]
    fn test_partial_config_fills_missing_fields() {
        let partial = r#"
[search]
priority = "remote_only"

[catalog]
source_url = "https://example.com/catalog.json"
refresh_cadence = "quarterly"
"#;

        let parsed: Config = toml::from_str(partial).expect("config should parse");
        assert_eq!(parsed.search.priority, SearchPriority::RemoteOnly);
        assert_eq!(parsed.search.max_results, 200);
        assert_eq!(parsed.catalog.refresh_cadence, RefreshCadence::Quarterly);
        assert_eq!(parsed.catalog.busy_poll_ms, 2_000);
        assert_eq!(parsed.storage, Config::default().storage);
    }

    #[test]
    fn test_taxonomy_override_replaces_builtin_table() {
        let parsed: Config = toml::from_str(
            r#"
[taxonomy.categories]
vehicle = ["cart", "wagon"]
"#,
        )
        .expect("config should parse");
        let table = parsed.taxonomy.term_table();
        assert!(table.contains_category("vehicle"));
        assert!(!table.contains_category("humanoid"));
        assert!(Config::default().taxonomy.term_table().contains_category("humanoid"));
    }

    #[test]
    fn test_cadence_windows_grow() {
        assert_eq!(RefreshCadence::Daily.window(), Duration::from_secs(86_400));
        assert!(RefreshCadence::Weekly.window() < RefreshCadence::Monthly.window());
        assert!(RefreshCadence::Monthly.window() < RefreshCadence::Quarterly.window());
    }

    #[test]
    fn test_priority_modes_gate_sources() {
        assert!(SearchPriority::Both.allows_local() && SearchPriority::Both.allows_remote());
        assert!(!SearchPriority::LocalOnly.allows_remote());
        assert!(!SearchPriority::RemoteOnly.allows_local());
    }

    #[test]
    fn test_sanitize_config_clamps_out_of_range_values() {
        let input = Config {
            search: SearchConfig {
                fuzzy_threshold: 3.5,
                max_results: 0,
                ..SearchConfig::default()
            },
            catalog: CatalogConfig {
                source_url: "  https://example.com/c.json ".to_string(),
                batch_size: 0,
                busy_poll_ms: 1,
                term_search_rate_per_second: 0,
                ..CatalogConfig::default()
            },
            ..Config::default()
        };

        let sanitized = sanitize_config(input);
        assert!((sanitized.search.fuzzy_threshold - 1.0).abs() < f32::EPSILON);
        assert_eq!(sanitized.search.max_results, 1);
        assert_eq!(sanitized.catalog.source_url, "https://example.com/c.json");
        assert_eq!(sanitized.catalog.batch_size, 1);
        assert_eq!(sanitized.catalog.busy_poll_ms, 50);
        assert_eq!(sanitized.catalog.term_search_rate_per_second, 1);
    }

    #[test]
    fn test_nan_threshold_falls_back_to_default() {
        let mut config = Config::default();
        config.search.fuzzy_threshold = f32::NAN;
        assert!((sanitize_config(config).search.fuzzy_threshold - 1.0).abs() < f32::EPSILON);
    }
}
