//! Category → term table used to classify catalog records.

use std::collections::BTreeMap;

/// Two-level taxonomy: each category owns the terms that vote for it.
///
/// Categories iterate in lexical order, which also makes classification
/// tie-breaking deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermTable {
    categories: BTreeMap<String, Vec<String>>,
}

impl TermTable {
    /// Builds a table from raw category/term pairs, lowercasing and deduplicating terms.
    pub fn from_map<I, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, T)>,
        T: IntoIterator<Item = String>,
    {
        let mut categories = BTreeMap::new();
        for (category, terms) in entries {
            let category = category.trim().to_lowercase();
            if category.is_empty() {
                continue;
            }
            let bucket: &mut Vec<String> = categories.entry(category).or_default();
            for term in terms {
                let term = term.trim().to_lowercase();
                if !term.is_empty() && !bucket.contains(&term) {
                    bucket.push(term);
                }
            }
        }
        Self { categories }
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.categories
            .iter()
            .map(|(category, terms)| (category.as_str(), terms.as_slice()))
    }

    pub fn terms_for(&self, category: &str) -> Option<&[String]> {
        self.categories
            .get(&category.trim().to_lowercase())
            .map(Vec::as_slice)
    }

    pub fn contains_category(&self, category: &str) -> bool {
        self.categories.contains_key(&category.trim().to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Every category name plus every term mapped to it, deduplicated, in table order.
    pub fn term_universe(&self) -> Vec<String> {
        let mut universe: Vec<String> = Vec::new();
        for (category, terms) in &self.categories {
            if !universe.contains(category) {
                universe.push(category.clone());
            }
            for term in terms {
                if !universe.contains(term) {
                    universe.push(term.clone());
                }
            }
        }
        universe
    }
}

impl Default for TermTable {
    fn default() -> Self {
        let entries: &[(&str, &[&str])] = &[
            (
                "aberration",
                &["beholder", "mind flayer", "aboleth", "chuul", "gibbering", "nothic", "otyugh"],
            ),
            (
                "beast",
                &["wolf", "bear", "boar", "spider", "rat", "bat", "hawk", "horse", "snake", "ape"],
            ),
            ("celestial", &["angel", "deva", "planetar", "solar", "unicorn", "pegasus", "couatl"]),
            ("construct", &["golem", "animated armor", "homunculus", "modron", "shield guardian"]),
            ("dragon", &["dragon", "wyrmling", "drake", "wyvern", "pseudodragon", "faerie dragon"]),
            ("elemental", &["elemental", "mephit", "genie", "djinni", "efreeti", "salamander"]),
            ("fey", &["dryad", "satyr", "pixie", "sprite", "hag", "blink dog"]),
            ("fiend", &["demon", "devil", "imp", "balor", "pit fiend", "succubus", "rakshasa"]),
            ("giant", &["giant", "ogre", "troll", "ettin", "cyclops", "fomorian"]),
            (
                "humanoid",
                &[
                    "goblin", "orc", "kobold", "elf", "dwarf", "human", "gnoll", "hobgoblin",
                    "bandit", "guard", "cultist", "lizardfolk",
                ],
            ),
            (
                "monstrosity",
                &["owlbear", "basilisk", "chimera", "griffon", "hydra", "manticore", "mimic"],
            ),
            ("ooze", &["ooze", "pudding", "jelly", "slime", "gelatinous cube"]),
            ("plant", &["shambling mound", "treant", "myconid", "blight", "shrieker"]),
            (
                "undead",
                &["skeleton", "zombie", "ghoul", "ghost", "vampire", "lich", "wight", "wraith"],
            ),
        ];
        Self::from_map(entries.iter().map(|(category, terms)| {
            (
                category.to_string(),
                terms.iter().map(|term| term.to_string()).collect::<Vec<_>>(),
            )
        }))
    }
}
