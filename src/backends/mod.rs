//! Retrieval backend abstractions and concrete implementations.

pub mod http_catalog;
pub mod term_search;

use crate::catalog_format::RawRecord;
use crate::error::Result;

/// Freshness metadata reported by a bulk source for its current catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetadata {
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

impl SourceMetadata {
    /// True when both sides report a value for a field and the values differ.
    /// Fields missing on either side cannot prove staleness.
    pub fn contradicts(&self, other: &SourceMetadata) -> bool {
        let length_differs = matches!(
            (self.content_length, other.content_length),
            (Some(left), Some(right)) if left != right
        );
        let modified_differs = matches!(
            (&self.last_modified, &other.last_modified),
            (Some(left), Some(right)) if left != right
        );
        length_differs || modified_differs
    }
}

/// Full catalog body with the metadata observed while fetching it.
#[derive(Debug, Clone)]
pub struct CatalogFetch {
    pub body: String,
    pub metadata: SourceMetadata,
}

/// Bulk catalog source addressed by a locator (URL or filesystem path).
pub trait CatalogSource: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<CatalogFetch>;
    /// Metadata-only request used to judge cache freshness without a download.
    fn probe(&self, locator: &str) -> Result<SourceMetadata>;
}

/// Incremental per-term remote query.
pub trait TermSearchBackend: Send + Sync {
    fn search_term(&self, term: &str) -> Result<Vec<RawRecord>>;
}

/// Host-provided local artwork lookup. Directory scanning lives outside this crate.
pub trait LocalArtSource: Send + Sync {
    fn search_local(&self, term: &str) -> Result<Vec<RawRecord>>;
}
