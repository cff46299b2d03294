//! Flat path registry plus the two-level category index built on top of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{CategoryEntry, ImageRecord};

/// Synthetic subcategory aggregating every record in a category.
pub const ALL_BUCKET: &str = "_all";

type CategoryIndex = BTreeMap<String, BTreeMap<String, Vec<CategoryEntry>>>;

/// Catalog registry. `all_paths` is the sole dedup authority; every entry
/// reachable from `categories` also exists in `all_paths`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RegistryWire", into = "RegistryWire")]
pub struct CatalogRegistry {
    all_paths: BTreeMap<String, ImageRecord>,
    categories: CategoryIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    subcategories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryWire {
    #[serde(default)]
    categories: CategoryIndex,
    #[serde(default)]
    all_paths: BTreeMap<String, StoredRecord>,
}

impl From<RegistryWire> for CatalogRegistry {
    fn from(wire: RegistryWire) -> Self {
        let all_paths = wire
            .all_paths
            .into_iter()
            .map(|(path, stored)| {
                let record = ImageRecord {
                    path: path.clone(),
                    name: stored.name,
                    category: stored.category,
                    subcategories: stored.subcategories,
                    tags: stored.tags,
                };
                (path, record)
            })
            .collect();
        Self {
            all_paths,
            categories: wire.categories,
        }
    }
}

impl From<CatalogRegistry> for RegistryWire {
    fn from(registry: CatalogRegistry) -> Self {
        let all_paths = registry
            .all_paths
            .into_iter()
            .map(|(path, record)| {
                (
                    path,
                    StoredRecord {
                        name: record.name,
                        category: record.category,
                        subcategories: record.subcategories,
                        tags: record.tags,
                    },
                )
            })
            .collect();
        Self {
            categories: registry.categories,
            all_paths,
        }
    }
}

/// Aggregate counts used for progress reporting and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub records: usize,
    pub categorized: usize,
    pub per_category: BTreeMap<String, usize>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.all_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.all_paths.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&ImageRecord> {
        self.all_paths.get(path)
    }

    pub fn records(&self) -> impl Iterator<Item = &ImageRecord> {
        self.all_paths.values()
    }

    /// Inserts a record unless its path is already known. Categorized records
    /// land in each matched subcategory bucket and in the category's `_all` bucket.
    pub fn insert(&mut self, record: ImageRecord) -> bool {
        if self.all_paths.contains_key(&record.path) {
            return false;
        }

        if let Some(category) = &record.category {
            let entry = CategoryEntry {
                path: record.path.clone(),
                name: record.name.clone(),
            };
            let buckets = self.categories.entry(category.clone()).or_default();
            for subcategory in &record.subcategories {
                if subcategory == ALL_BUCKET {
                    continue;
                }
                buckets
                    .entry(subcategory.clone())
                    .or_default()
                    .push(entry.clone());
            }
            buckets.entry(ALL_BUCKET.to_string()).or_default().push(entry);
        }

        self.all_paths.insert(record.path.clone(), record);
        true
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    pub fn bucket(&self, category: &str, subcategory: &str) -> Option<&[CategoryEntry]> {
        self.categories
            .get(category)
            .and_then(|buckets| buckets.get(subcategory))
            .map(Vec::as_slice)
    }

    /// Named subcategories of a category, excluding the synthetic `_all` bucket.
    pub fn subcategory_names(&self, category: &str) -> Vec<&str> {
        self.categories
            .get(category)
            .map(|buckets| {
                buckets
                    .keys()
                    .map(String::as_str)
                    .filter(|name| *name != ALL_BUCKET)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when every indexed bucket entry is backed by a flat registry record.
    pub fn is_consistent(&self) -> bool {
        self.categories.values().all(|buckets| {
            buckets
                .values()
                .all(|entries| entries.iter().all(|entry| self.all_paths.contains_key(&entry.path)))
        })
    }

    pub fn stats(&self) -> RegistryStats {
        let mut per_category = BTreeMap::new();
        for (category, buckets) in &self.categories {
            let count = buckets.get(ALL_BUCKET).map(Vec::len).unwrap_or(0);
            per_category.insert(category.clone(), count);
        }
        RegistryStats {
            records: self.all_paths.len(),
            categorized: self
                .all_paths
                .values()
                .filter(|record| record.category.is_some())
                .count(),
            per_category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CatalogRegistry, ALL_BUCKET};
    use crate::protocol::ImageRecord;

    fn record(path: &str, category: Option<&str>, subcategories: &[&str]) -> ImageRecord {
        ImageRecord {
            path: path.to_string(),
            name: path.to_string(),
            category: category.map(str::to_string),
            subcategories: subcategories.iter().map(|s| s.to_string()).collect(),
            tags: None,
        }
    }

    #[test]
    fn test_insert_populates_subcategory_and_all_buckets() {
        let mut registry = CatalogRegistry::new();
        assert!(registry.insert(record("a.webp", Some("humanoid"), &["goblin", "orc"])));
        assert!(registry.insert(record("b.webp", Some("humanoid"), &["orc"])));

        let orc: Vec<&str> = registry
            .bucket("humanoid", "orc")
            .unwrap()
            .iter()
            .map(|entry| entry.path.as_str())
            .collect();
        assert_eq!(orc, vec!["a.webp", "b.webp"]);
        assert_eq!(registry.bucket("humanoid", ALL_BUCKET).unwrap().len(), 2);
        assert_eq!(registry.subcategory_names("humanoid"), vec!["goblin", "orc"]);
    }

    #[test]
    fn test_duplicate_path_is_rejected() {
        let mut registry = CatalogRegistry::new();
        assert!(registry.insert(record("a.webp", Some("beast"), &["wolf"])));
        assert!(!registry.insert(record("a.webp", Some("undead"), &["ghoul"])));
        assert_eq!(registry.len(), 1);
        assert!(!registry.has_category("undead"));
    }

    #[test]
    fn test_uncategorized_record_only_lands_in_flat_registry() {
        let mut registry = CatalogRegistry::new();
        assert!(registry.insert(record("misc.webp", None, &[])));
        assert!(registry.contains("misc.webp"));
        let stats = registry.stats();
        assert!(stats.per_category.is_empty());
        assert_eq!(stats.records, 1);
        assert_eq!(stats.categorized, 0);
    }

    #[test]
    fn test_serialized_layout_uses_persisted_field_names() {
        let mut registry = CatalogRegistry::new();
        registry.insert(record("a.webp", Some("beast"), &["wolf"]));
        let value = serde_json::to_value(&registry).expect("registry should serialize");
        assert!(value["allPaths"]["a.webp"]["name"].is_string());
        assert_eq!(value["categories"]["beast"]["_all"][0]["path"], "a.webp");

        let restored: CatalogRegistry =
            serde_json::from_value(value).expect("registry should deserialize");
        assert_eq!(restored, registry);
        assert!(restored.is_consistent());
    }

    #[test]
    fn test_dangling_bucket_entry_is_inconsistent() {
        let json = r#"{"categories":{"beast":{"_all":[{"path":"ghost.webp","name":"x"}]}},"allPaths":{}}"#;
        let registry: CatalogRegistry = serde_json::from_str(json).expect("should parse");
        assert!(!registry.is_consistent());
    }
}
