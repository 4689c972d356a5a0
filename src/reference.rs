// 🏫 Reference Entity - stable school identity + name matching
//
// "School name is a VALUE (many spellings), school id is IDENTITY (never changes)"
//
// Problem solved:
// - "University of Oxford", "university of oxford ", "牛津大学" → same school row
// - Name columns (cn_name, en_name) all index to the same id
// - Optional containment matching for longer/shorter spellings

use crate::store::{id_to_string, Row};
use crate::source::value_text;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// REFERENCE ENTITY
// ============================================================================

/// A shared lookup row (a school) that dependent records point to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntity {
    /// Store-assigned id - immutable once assigned
    pub id: String,

    /// First non-empty configured name column
    pub canonical_name: String,

    /// Values of the other name columns
    pub aliases: BTreeSet<String>,

    /// Everything else on the row
    pub attributes: Row,
}

impl ReferenceEntity {
    /// Build from a store row; `None` when the row has no id or no name
    pub fn from_row(row: &Row, id_column: &str, name_columns: &[String]) -> Option<Self> {
        let id = row.get(id_column).and_then(id_to_string)?;

        let mut names = name_columns
            .iter()
            .filter_map(|c| row.get(c))
            .filter_map(value_text)
            .filter(|n| !n.is_empty());

        let canonical_name = names.next()?;
        let mut entity = ReferenceEntity {
            id,
            canonical_name,
            aliases: BTreeSet::new(),
            attributes: Row::new(),
        };
        for alias in names {
            entity.add_alias(alias);
        }

        entity.attributes = row
            .iter()
            .filter(|(k, _)| k.as_str() != id_column && !name_columns.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(entity)
    }

    /// Entity from a list of names: first non-empty is canonical, rest are aliases
    pub fn with_names(id: &str, names: &[String]) -> Option<Self> {
        let mut names = names.iter().map(|n| n.trim()).filter(|n| !n.is_empty());
        let mut entity = ReferenceEntity {
            id: id.to_string(),
            canonical_name: names.next()?.to_string(),
            aliases: BTreeSet::new(),
            attributes: Row::new(),
        };
        for alias in names {
            entity.add_alias(alias.to_string());
        }
        Some(entity)
    }

    /// Add an alias (ignored when it duplicates the canonical name)
    pub fn add_alias(&mut self, alias: String) {
        if normalize_name(&alias) != normalize_name(&self.canonical_name) {
            self.aliases.insert(alias);
        }
    }

    /// Canonical name + aliases
    pub fn all_names(&self) -> Vec<String> {
        let mut names = vec![self.canonical_name.clone()];
        names.extend(self.aliases.iter().cloned());
        names
    }
}

// ============================================================================
// REFERENCE REGISTRY
// ============================================================================

/// How a name was matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    Exact(String),
    /// (id, the indexed name that contained / was contained by the candidate)
    Fuzzy(String, String),
}

impl NameMatch {
    pub fn id(&self) -> &str {
        match self {
            NameMatch::Exact(id) => id,
            NameMatch::Fuzzy(id, _) => id,
        }
    }
}

/// Name index over reference entities, keyed by normalized name
///
/// The first entity registered under a key keeps it.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    entities: Vec<ReferenceEntity>,
    /// normalized name → index into `entities`
    by_name: HashMap<String, usize>,
    /// normalized names in registration order (drives fuzzy tie-breaks)
    keys: Vec<String>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        ReferenceRegistry::default()
    }

    /// Build from store rows, skipping rows without id or name
    pub fn from_rows(rows: &[Row], id_column: &str, name_columns: &[String]) -> Self {
        let mut registry = ReferenceRegistry::new();
        for row in rows {
            if let Some(entity) = ReferenceEntity::from_row(row, id_column, name_columns) {
                registry.register(entity);
            }
        }
        registry
    }

    pub fn register(&mut self, entity: ReferenceEntity) {
        let index = self.entities.len();
        for name in entity.all_names() {
            let key = normalize_name(&name);
            if key.is_empty() || self.by_name.contains_key(&key) {
                continue;
            }
            self.by_name.insert(key.clone(), index);
            self.keys.push(key);
        }
        self.entities.push(entity);
    }

    /// Case-insensitive exact lookup
    pub fn find_exact(&self, name: &str) -> Option<&ReferenceEntity> {
        self.by_name
            .get(&normalize_name(name))
            .map(|&i| &self.entities[i])
    }

    /// Substring-containment lookup, either direction
    ///
    /// Heuristic: a short indexed name can swallow unrelated longer names.
    /// Among all containing/contained keys the longest wins; ties go to the
    /// key registered first.
    pub fn find_fuzzy(&self, name: &str) -> Option<(&ReferenceEntity, &str)> {
        let candidate = normalize_name(name);
        if candidate.is_empty() {
            return None;
        }

        let mut best: Option<&String> = None;
        for key in &self.keys {
            if !(candidate.contains(key.as_str()) || key.contains(candidate.as_str())) {
                continue;
            }
            let longer = best.map_or(true, |b| key.chars().count() > b.chars().count());
            if longer {
                best = Some(key);
            }
        }

        best.map(|key| (&self.entities[self.by_name[key]], key.as_str()))
    }

    /// Exact match first, then (optionally) fuzzy
    pub fn find(&self, name: &str, fuzzy: bool) -> Option<NameMatch> {
        if let Some(entity) = self.find_exact(name) {
            return Some(NameMatch::Exact(entity.id.clone()));
        }
        if fuzzy {
            if let Some((entity, key)) = self.find_fuzzy(name) {
                return Some(NameMatch::Fuzzy(entity.id.clone(), key.to_string()));
            }
        }
        None
    }

    pub fn get(&self, id: &str) -> Option<&ReferenceEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn count(&self) -> usize {
        self.entities.len()
    }

    pub fn all(&self) -> &[ReferenceEntity] {
        &self.entities
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Lookup key for a name: trimmed, lower-cased
pub fn normalize_name(s: &str) -> String {
    s.trim().to_lowercase()
}
