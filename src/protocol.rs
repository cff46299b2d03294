//! Shared payload types and the index worker's command/event protocol.
//!
//! Records and search results flow between the catalog tiers, the search
//! engine, and the orchestrator; commands and events are the only channel
//! between the host thread and the index worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ArtError;
use crate::registry::CatalogRegistry;

/// One catalog image. Immutable once inserted into a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Matched taxonomy terms, in term-table order without duplicates.
    #[serde(default)]
    pub subcategories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Bucket member stored in the category index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub path: String,
    pub name: String,
}

/// Retrieval tier (or local hook) that produced a search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Index,
    ExternalCatalog,
    TermSearch,
    Local,
}

impl ResultSource {
    pub fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }
}

/// Which part of the entity description a result was found through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityFlags {
    pub from_name: bool,
    pub from_subtype: bool,
    pub from_category: bool,
}

impl PriorityFlags {
    pub fn name() -> Self {
        Self {
            from_name: true,
            ..Self::default()
        }
    }

    pub fn subtype() -> Self {
        Self {
            from_subtype: true,
            ..Self::default()
        }
    }

    pub fn category() -> Self {
        Self {
            from_category: true,
            ..Self::default()
        }
    }

    /// Merge rank: name group first, untagged last.
    pub fn group_rank(self) -> u8 {
        if self.from_name {
            0
        } else if self.from_subtype {
            1
        } else if self.from_category {
            2
        } else {
            3
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            from_name: self.from_name || other.from_name,
            from_subtype: self.from_subtype || other.from_subtype,
            from_category: self.from_category || other.from_category,
        }
    }
}

/// Candidate artwork returned to the presentation layer. Lower score is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub path: String,
    pub name: String,
    pub source: ResultSource,
    pub score: f32,
    pub priority_flags: PriorityFlags,
}

/// Opaque description of the entity artwork is wanted for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub subtype: String,
}

impl EntityDescriptor {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        subtype: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            subtype: subtype.into(),
        }
    }

    /// Composite per-run cache key.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.name.trim().to_lowercase(),
            self.entity_type.trim().to_lowercase(),
            self.subtype.trim().to_lowercase()
        )
    }
}

/// Build progress counters reported at batch boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildProgress {
    pub batch: usize,
    pub total_batches: usize,
    /// Records returned by retrieval so far, including duplicates and excluded paths.
    pub processed: usize,
    /// Records that were genuinely new insertions.
    pub indexed: usize,
}

/// Commands accepted by the index worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCommand {
    Build { force: bool },
    Cancel,
    Reset,
    Shutdown,
}

/// Events published by the index worker.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    Progress(BuildProgress),
    Complete {
        registry: Arc<CatalogRegistry>,
        from_cache: bool,
    },
    Error(ArtError),
    Cancelled,
}
