// 🔗 Entity Resolver - human-entered names → stable reference ids
//
// Resolution never aborts a run: lookups or inserts that fail leave their
// names unresolved and the dependents get skipped downstream.
//
// Flow:
//   dedupe names → fetch existing → exact / fuzzy match → create the rest

use crate::config::{ImportConfig, LookupStrategy, WriteMode};
use crate::error::{ImportError, StoreError};
use crate::loader::{BatchLoader, DependentRecord};
use crate::mapping::{MappedRow, ReferenceSpec};
use crate::reference::{normalize_name, NameMatch, ReferenceEntity, ReferenceRegistry};
use crate::report::{FuzzyMatch, ImportOutcome, RowReport, SkipReason};
use crate::source::value_text;
use crate::store::{id_to_string, Filter, Query, Row, Store};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// What `resolve` found for a set of names
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Resolution {
    /// normalized name → id
    pub ids: HashMap<String, String>,
    /// Names of reference rows created by this call
    pub created: Vec<String>,
    pub fuzzy_matches: Vec<FuzzyMatch>,
    /// Names left without an id
    pub unresolved: Vec<String>,
}

impl Resolution {
    pub fn id_for(&self, name: &str) -> Option<&str> {
        self.ids.get(&normalize_name(name)).map(|s| s.as_str())
    }
}

/// Outcome of a reference-side import
#[derive(Debug, Default)]
pub struct SyncResult {
    pub outcomes: Vec<RowReport>,
    pub fuzzy_matches: Vec<FuzzyMatch>,
    pub round_trips: usize,
}

/// Existing reference rows pulled from the store
struct Fetched {
    registry: ReferenceRegistry,
    rows: HashMap<String, Row>,
    /// normalized names whose lookup failed
    blocked: HashSet<String>,
}

pub struct EntityResolver<'a> {
    store: &'a dyn Store,
    reference: &'a ReferenceSpec,
    config: &'a ImportConfig,
}

impl<'a> EntityResolver<'a> {
    pub fn new(store: &'a dyn Store, reference: &'a ReferenceSpec, config: &'a ImportConfig) -> Self {
        EntityResolver {
            store,
            reference,
            config,
        }
    }

    // ========================================================================
    // RESOLVE
    // ========================================================================

    pub fn resolve(&self, names: &[String]) -> Resolution {
        let mut resolution = Resolution::default();

        // 1. Dedupe; first spelling wins
        let unique = dedupe(names);
        if unique.is_empty() {
            return resolution;
        }
        info!(names = unique.len(), table = %self.reference.table, "resolving reference names");

        // 2. Existing rows
        let mut columns = vec![self.reference.id_column.clone()];
        columns.extend(self.reference.name_columns.iter().cloned());
        let fetched = self.fetch(&unique, &columns);

        // 3. Match
        let mut missing = Vec::new();
        for name in &unique {
            let key = normalize_name(name);
            if fetched.blocked.contains(&key) {
                resolution.unresolved.push(name.clone());
                continue;
            }
            match fetched.registry.find(name, self.config.fuzzy) {
                Some(NameMatch::Exact(id)) => {
                    resolution.ids.insert(key, id);
                }
                Some(NameMatch::Fuzzy(id, matched)) => {
                    warn!(name = %name, matched = %matched, "fuzzy match");
                    resolution.fuzzy_matches.push(FuzzyMatch {
                        name: name.clone(),
                        matched,
                        id: id.clone(),
                    });
                    resolution.ids.insert(key, id);
                }
                None => missing.push(name.clone()),
            }
        }
        debug!(
            matched = resolution.ids.len(),
            missing = missing.len(),
            "lookup finished"
        );

        // 4. Create what is left
        if missing.is_empty() {
            return resolution;
        }
        if !self.config.create_missing {
            info!(names = missing.len(), "creation disabled, names stay unresolved");
            resolution.unresolved.extend(missing);
            return resolution;
        }

        for chunk in missing.chunks(self.config.lookup_chunk_size) {
            match self.create_chunk(chunk) {
                Ok(created) => {
                    for name in chunk {
                        match created.get(&normalize_name(name)) {
                            Some(id) => {
                                resolution.ids.insert(normalize_name(name), id.clone());
                                resolution.created.push(name.clone());
                            }
                            None => resolution.unresolved.push(name.clone()),
                        }
                    }
                }
                Err(e) => {
                    error!(names = chunk.len(), error = %e, "reference insert failed");
                    resolution.unresolved.extend(chunk.iter().cloned());
                }
            }
        }
        info!(
            created = resolution.created.len(),
            unresolved = resolution.unresolved.len(),
            "reference rows created"
        );

        resolution
    }

    /// Insert one chunk of new reference rows; normalized name → new id
    fn create_chunk(&self, names: &[String]) -> Result<HashMap<String, String>, StoreError> {
        let rows: Vec<Row> = names
            .iter()
            .map(|name| {
                let mut row = self.region_defaults();
                row.insert(
                    self.reference.insert_column.clone(),
                    Value::String(name.clone()),
                );
                row
            })
            .collect();

        let inserted = self.store.insert(&self.reference.table, &rows)?;

        Ok(inserted
            .iter()
            .filter_map(|row| {
                let id = row.get(&self.reference.id_column).and_then(id_to_string)?;
                let name = row
                    .get(&self.reference.insert_column)
                    .and_then(value_text)?;
                Some((normalize_name(&name), id))
            })
            .collect())
    }

    fn region_defaults(&self) -> Row {
        self.config
            .region
            .as_ref()
            .map(|r| r.defaults())
            .unwrap_or_default()
    }

    // ========================================================================
    // FETCH
    // ========================================================================

    fn fetch(&self, names: &[String], columns: &[String]) -> Fetched {
        let mut rows = Vec::new();
        let mut blocked = HashSet::new();

        match self.config.lookup {
            LookupStrategy::FullTable => match self.fetch_all_pages(columns) {
                Ok(found) => rows = found,
                Err(e) => {
                    error!(error = %e, "reference lookup failed");
                    blocked.extend(names.iter().map(|n| normalize_name(n)));
                }
            },
            LookupStrategy::Chunked => {
                for chunk in names.chunks(self.config.lookup_chunk_size) {
                    let query = Query::table(&self.reference.table)
                        .columns(columns)
                        .filter(Filter::NamesIgnoreCase {
                            columns: self.reference.name_columns.clone(),
                            names: chunk.to_vec(),
                        });
                    match self.store.select(&query) {
                        Ok(found) => rows.extend(found),
                        Err(e) => {
                            error!(names = chunk.len(), error = %e, "reference lookup chunk failed");
                            blocked.extend(chunk.iter().map(|n| normalize_name(n)));
                        }
                    }
                }
            }
        }

        let registry =
            ReferenceRegistry::from_rows(&rows, &self.reference.id_column, &self.reference.name_columns);
        debug!(rows = rows.len(), entities = registry.count(), "reference rows fetched");

        let rows = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get(&self.reference.id_column).and_then(id_to_string)?;
                Some((id, row))
            })
            .collect();

        Fetched {
            registry,
            rows,
            blocked,
        }
    }

    /// Whole reference table, one id-ordered page at a time.
    ///
    /// A page shorter than asked may only be the server's max-rows cap, so
    /// only an empty page ends the scan.
    fn fetch_all_pages(&self, columns: &[String]) -> Result<Vec<Row>, StoreError> {
        let page_size = self.config.lookup_page_size;
        let mut rows: Vec<Row> = Vec::new();

        loop {
            let query = Query::table(&self.reference.table)
                .columns(columns)
                .order_by(&self.reference.id_column)
                .limit(page_size)
                .offset(rows.len());
            let page = self.store.select(&query)?;
            if page.is_empty() {
                break;
            }
            debug!(offset = rows.len(), rows = page.len(), "reference page fetched");
            rows.extend(page);
        }

        Ok(rows)
    }

    // ========================================================================
    // SYNC (reference-side import)
    // ========================================================================

    /// Update matched reference rows, create the unmatched ones
    pub fn sync(&self, records: &[MappedRow]) -> Result<SyncResult, ImportError> {
        let mut result = SyncResult::default();

        let mut all_names = Vec::new();
        for record in records {
            all_names.extend(record.names.iter().cloned());
        }
        let fetched = self.fetch(&dedupe(&all_names), &[]);
        let Fetched {
            registry,
            mut rows,
            blocked,
        } = fetched;

        // names of rows queued for creation in this run
        let mut pending = ReferenceRegistry::new();
        let mut to_create: Vec<DependentRecord> = Vec::new();

        for record in records {
            let report = |outcome| RowReport {
                line: record.line,
                key: record.key.clone(),
                outcome,
            };

            if record.names.is_empty() {
                result
                    .outcomes
                    .push(report(ImportOutcome::Skipped(SkipReason::MissingOwner)));
                continue;
            }
            if record.names.iter().any(|n| blocked.contains(&normalize_name(n))) {
                result
                    .outcomes
                    .push(report(ImportOutcome::Skipped(SkipReason::UnresolvedOwner)));
                continue;
            }

            match self.match_record(&registry, &record.names) {
                Some((name, found)) => {
                    if let NameMatch::Fuzzy(id, matched) = &found {
                        warn!(line = record.line, name = %name, matched = %matched, "fuzzy match");
                        result.fuzzy_matches.push(FuzzyMatch {
                            name: name.clone(),
                            matched: matched.clone(),
                            id: id.clone(),
                        });
                    }
                    let id = found.id().to_string();
                    let keep_names = matches!(found, NameMatch::Fuzzy(..));
                    let outcome = self.update_existing(&id, record, keep_names, &mut rows);
                    result.outcomes.push(report(outcome));
                }
                None => {
                    if !self.config.create_missing {
                        result
                            .outcomes
                            .push(report(ImportOutcome::Skipped(SkipReason::UnresolvedOwner)));
                        continue;
                    }
                    // a duplicate still indexes its extra spellings
                    let duplicate = record.names.iter().any(|n| pending.find_exact(n).is_some());
                    if let Some(entity) =
                        ReferenceEntity::with_names(&format!("line-{}", record.line), &record.names)
                    {
                        pending.register(entity);
                    }
                    if duplicate {
                        result
                            .outcomes
                            .push(report(ImportOutcome::Skipped(SkipReason::DuplicateInInput)));
                        continue;
                    }
                    to_create.push(DependentRecord {
                        line: record.line,
                        key: record.key.clone(),
                        owner_id: None,
                        fields: self.creation_row(record),
                    });
                }
            }
        }

        if !to_create.is_empty() {
            info!(rows = to_create.len(), table = %self.reference.table, "creating reference rows");
            let loader = BatchLoader::new(
                self.store,
                &self.reference.table,
                self.config.batch_size,
                WriteMode::Insert,
                &[],
            )?
            .with_success_outcome(ImportOutcome::Created);
            let loaded = loader.load(&to_create);
            result.round_trips += loaded.round_trips;
            result.outcomes.extend(loaded.outcomes);
        }

        Ok(result)
    }

    /// Exact hit on any of the record's names first; fuzzy only when none hits
    fn match_record<'n>(
        &self,
        registry: &ReferenceRegistry,
        names: &'n [String],
    ) -> Option<(&'n String, NameMatch)> {
        let exact = names.iter().find_map(|n| {
            registry
                .find_exact(n)
                .map(|entity| (n, NameMatch::Exact(entity.id.clone())))
        });
        if exact.is_some() || !self.config.fuzzy {
            return exact;
        }
        names.iter().find_map(|n| {
            registry
                .find_fuzzy(n)
                .map(|(entity, key)| (n, NameMatch::Fuzzy(entity.id.clone(), key.to_string())))
        })
    }

    /// Patch a matched row. `keep_names` leaves its name columns alone.
    fn update_existing(
        &self,
        id: &str,
        record: &MappedRow,
        keep_names: bool,
        rows: &mut HashMap<String, Row>,
    ) -> ImportOutcome {
        let empty = Row::new();
        let existing = rows.get(id).unwrap_or(&empty);

        let patch: Row = record
            .fields
            .iter()
            .filter(|(_, v)| !is_empty_value(v))
            .filter(|(k, _)| !(keep_names && self.reference.name_columns.contains(*k)))
            .filter(|(k, v)| {
                let current = existing.get(k.as_str()).unwrap_or(&Value::Null);
                if self.config.fill_missing_only {
                    is_empty_value(current)
                } else {
                    !same_value(current, v)
                }
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if patch.is_empty() {
            debug!(line = record.line, id = %id, "nothing to update");
            return ImportOutcome::Skipped(SkipReason::NothingToUpdate);
        }

        let mut matching = Row::new();
        matching.insert(self.reference.id_column.clone(), Value::String(id.to_string()));

        match self.store.update(&self.reference.table, &patch, &matching) {
            Ok(()) => {
                debug!(line = record.line, id = %id, fields = patch.len(), "reference row updated");
                if let Some(row) = rows.get_mut(id) {
                    row.extend(patch);
                }
                ImportOutcome::Updated
            }
            Err(e) => {
                warn!(line = record.line, id = %id, error = %e, "reference update failed");
                ImportOutcome::Failed(e.to_string())
            }
        }
    }

    /// Non-empty mapped fields + insert column + region defaults
    fn creation_row(&self, record: &MappedRow) -> Row {
        let mut row = self.region_defaults();
        for (k, v) in &record.fields {
            if !is_empty_value(v) {
                row.insert(k.clone(), v.clone());
            }
        }
        let insert_column = &self.reference.insert_column;
        if row.get(insert_column).map_or(true, is_empty_value) {
            row.insert(insert_column.clone(), Value::String(record.names[0].clone()));
        }
        row
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn dedupe(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(normalize_name(n)))
        .collect()
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s == "[]"
        }
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Equality that tolerates the store handing back JSON text or numbers as text
fn same_value(current: &Value, new: &Value) -> bool {
    if current == new {
        return true;
    }
    match (current, new) {
        (Value::String(text), Value::Array(_) | Value::Object(_)) => {
            serde_json::from_str::<Value>(text).map_or(false, |parsed| &parsed == new)
        }
        _ => match (value_text(current), value_text(new)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ImportProfile;
    use crate::region::Region;
    use crate::source::SourceRow;
    use crate::store::testing::ProbeStore;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn seed(store: &dyn Store, cn: &str, en: &str) -> String {
        let row = json!({"cn_name": cn, "en_name": en}).as_object().cloned().unwrap();
        store.insert("schools", &[row]).unwrap()[0]["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn reference() -> ReferenceSpec {
        ImportProfile::programmes().reference
    }

    #[test]
    fn test_creates_each_distinct_name_once() {
        let store = ProbeStore::new();
        let reference = reference();
        let config = ImportConfig {
            region: Some(Region::from_code("uk").unwrap()),
            ..ImportConfig::default()
        };
        let resolver = EntityResolver::new(&store, &reference, &config);

        let resolution = resolver.resolve(&names(&["Oxford", "oxford", "Cambridge"]));

        assert_eq!(resolution.created, names(&["Oxford", "Cambridge"]));
        assert_eq!(store.inner.count("schools").unwrap(), 2);
        let a = resolution.id_for("Oxford").unwrap();
        assert_eq!(resolution.id_for("OXFORD "), Some(a));
        assert_ne!(resolution.id_for("Cambridge"), Some(a));

        let rows = store.inner.select(&Query::table("schools")).unwrap();
        assert!(rows.iter().all(|r| r["country"] == "英国" && r["region"] == "欧洲"));
    }

    #[test]
    fn test_existing_names_never_duplicated() {
        let store = ProbeStore::new();
        let id = seed(&store.inner, "牛津大学", "University of Oxford");
        let reference = reference();
        let config = ImportConfig::default();
        let resolver = EntityResolver::new(&store, &reference, &config);

        for _ in 0..2 {
            let resolution = resolver.resolve(&names(&["university of oxford", "牛津大学"]));
            assert!(resolution.created.is_empty());
            assert_eq!(resolution.id_for("牛津大学"), Some(id.as_str()));
        }
        assert_eq!(store.inner.count("schools").unwrap(), 1);
    }

    #[test]
    fn test_fuzzy_match_reported_and_optional() {
        let store = ProbeStore::new();
        let id = seed(&store.inner, "香港大学", "University of Hong Kong");
        let reference = reference();

        let config = ImportConfig::default();
        let resolution = EntityResolver::new(&store, &reference, &config)
            .resolve(&names(&["The University of Hong Kong"]));
        assert_eq!(resolution.id_for("The University of Hong Kong"), Some(id.as_str()));
        assert_eq!(resolution.fuzzy_matches.len(), 1);

        let config = ImportConfig {
            fuzzy: false,
            create_missing: false,
            ..ImportConfig::default()
        };
        let resolution = EntityResolver::new(&store, &reference, &config)
            .resolve(&names(&["The University of Hong Kong"]));
        assert!(resolution.ids.is_empty());
        assert_eq!(resolution.unresolved, names(&["The University of Hong Kong"]));
    }

    #[test]
    fn test_chunked_lookup_round_trips() {
        let store = ProbeStore::new();
        seed(&store.inner, "A", "");
        let reference = reference();
        let config = ImportConfig {
            lookup: LookupStrategy::Chunked,
            lookup_chunk_size: 2,
            create_missing: false,
            ..ImportConfig::default()
        };

        let resolution = EntityResolver::new(&store, &reference, &config)
            .resolve(&names(&["a", "B", "C", "D", "E"]));

        assert_eq!(store.selects.get(), 3);
        assert!(resolution.id_for("A").is_some());
        assert_eq!(resolution.unresolved.len(), 4);
    }

    #[test]
    fn test_failed_lookup_chunk_not_created() {
        let store = ProbeStore::new();
        store.fail_select_names.borrow_mut().push("C".to_string());
        let reference = reference();
        let config = ImportConfig {
            lookup: LookupStrategy::Chunked,
            lookup_chunk_size: 2,
            ..ImportConfig::default()
        };

        let resolution = EntityResolver::new(&store, &reference, &config)
            .resolve(&names(&["A", "B", "C", "D"]));

        assert_eq!(resolution.created, names(&["A", "B"]));
        assert_eq!(resolution.unresolved, names(&["C", "D"]));
        assert_eq!(store.inner.count("schools").unwrap(), 2);
    }

    #[test]
    fn test_failed_full_table_lookup_resolves_nothing() {
        let store = ProbeStore::new();
        store.fail_all_selects.set(true);
        let reference = reference();
        let config = ImportConfig::default();

        let resolution =
            EntityResolver::new(&store, &reference, &config).resolve(&names(&["A", "B"]));

        assert!(resolution.ids.is_empty());
        assert_eq!(resolution.unresolved.len(), 2);
        assert_eq!(store.inner.count("schools").unwrap(), 0);
    }

    #[test]
    fn test_failed_insert_leaves_names_unresolved() {
        let store = ProbeStore::new();
        *store.fail_insert_table.borrow_mut() = Some("schools".to_string());
        let reference = reference();
        let config = ImportConfig {
            lookup_chunk_size: 2,
            ..ImportConfig::default()
        };

        let resolution =
            EntityResolver::new(&store, &reference, &config).resolve(&names(&["A", "B", "C"]));

        assert!(resolution.created.is_empty());
        assert_eq!(resolution.unresolved.len(), 3);
        assert_eq!(store.write_sizes(), vec![2, 1]);
    }

    fn mapped(profile: &ImportProfile, line: usize, value: Value) -> MappedRow {
        profile.map_row(&SourceRow {
            line,
            fields: value.as_object().cloned().unwrap(),
        })
    }

    #[test]
    fn test_sync_updates_creates_and_skips() {
        let store = ProbeStore::new();
        let oxford = seed(&store.inner, "牛津大学", "University of Oxford");
        let profile = ImportProfile::schools();
        let config = ImportConfig::default();
        let resolver = EntityResolver::new(&store, &profile.reference, &config);

        let records = vec![
            mapped(&profile, 2, json!({"en_name": "University of Oxford", "qs_rank_2025": "3"})),
            mapped(&profile, 3, json!({"en_name": "University of Oxford", "qs_rank_2025": "3"})),
            mapped(&profile, 4, json!({"university": "ETH Zurich", "rank_2025": "7"})),
            mapped(&profile, 5, json!({"university": "eth zurich", "rank_2025": "7"})),
            mapped(&profile, 6, json!({"rank_2025": "9"})),
        ];

        let result = resolver.sync(&records).unwrap();
        let by_line: HashMap<usize, ImportOutcome> = result
            .outcomes
            .iter()
            .map(|r| (r.line, r.outcome.clone()))
            .collect();

        assert_eq!(by_line[&2], ImportOutcome::Updated);
        assert_eq!(by_line[&3], ImportOutcome::Skipped(SkipReason::NothingToUpdate));
        assert_eq!(by_line[&4], ImportOutcome::Created);
        assert_eq!(by_line[&5], ImportOutcome::Skipped(SkipReason::DuplicateInInput));
        assert_eq!(by_line[&6], ImportOutcome::Skipped(SkipReason::MissingOwner));

        let rows = store.inner.select(&Query::table("schools")).unwrap();
        assert_eq!(rows.len(), 2);
        let ox = rows.iter().find(|r| r["id"] == oxford.as_str()).unwrap();
        assert_eq!(ox["qs_rank_2025"], 3);
        let eth = rows.iter().find(|r| r["id"] != oxford.as_str()).unwrap();
        assert_eq!(eth["cn_name"], "ETH Zurich");
        assert_eq!(eth["en_name"], "ETH Zurich");
    }

    #[test]
    fn test_sync_fill_missing_never_overwrites() {
        let store = ProbeStore::new();
        let row = json!({"cn_name": "帝国理工学院", "en_name": "Imperial College London", "description": "keep me"})
            .as_object()
            .cloned()
            .unwrap();
        store.inner.insert("schools", &[row]).unwrap();

        let profile = ImportProfile::schools();
        let config = ImportConfig {
            fill_missing_only: true,
            ..ImportConfig::default()
        };
        let resolver = EntityResolver::new(&store, &profile.reference, &config);

        let records = vec![mapped(
            &profile,
            2,
            json!({"cn_name": "帝国理工学院", "description": "new text", "url": "https://imperial.ac.uk"}),
        )];
        let result = resolver.sync(&records).unwrap();
        assert_eq!(result.outcomes[0].outcome, ImportOutcome::Updated);

        let rows = store.inner.select(&Query::table("schools")).unwrap();
        assert_eq!(rows[0]["description"], "keep me");
        assert_eq!(rows[0]["url"], "https://imperial.ac.uk");
    }

    #[test]
    fn test_sync_exact_alias_beats_fuzzy_first_name() {
        let store = ProbeStore::new();
        let ucl = seed(&store.inner, "伦敦大学学院", "University College London");
        let london = seed(&store.inner, "", "University of London");
        let profile = ImportProfile::schools();
        let config = ImportConfig::default();
        let resolver = EntityResolver::new(&store, &profile.reference, &config);

        let records = vec![mapped(
            &profile,
            2,
            json!({"cn_name": "伦敦大学", "en_name": "University of London", "url": "https://london.ac.uk"}),
        )];
        let result = resolver.sync(&records).unwrap();

        assert_eq!(result.outcomes[0].outcome, ImportOutcome::Updated);
        assert!(result.fuzzy_matches.is_empty());

        let rows = store.inner.select(&Query::table("schools")).unwrap();
        let ucl_row = rows.iter().find(|r| r["id"] == ucl.as_str()).unwrap();
        assert_eq!(ucl_row["cn_name"], "伦敦大学学院");
        assert_eq!(ucl_row["en_name"], "University College London");
        assert!(ucl_row["url"].is_null());
        let london_row = rows.iter().find(|r| r["id"] == london.as_str()).unwrap();
        assert_eq!(london_row["cn_name"], "伦敦大学");
        assert_eq!(london_row["url"], "https://london.ac.uk");
    }

    #[test]
    fn test_sync_fuzzy_match_keeps_names() {
        let store = ProbeStore::new();
        let ucl = seed(&store.inner, "伦敦大学学院", "University College London");
        let profile = ImportProfile::schools();
        let config = ImportConfig::default();
        let resolver = EntityResolver::new(&store, &profile.reference, &config);

        let records = vec![mapped(
            &profile,
            2,
            json!({"cn_name": "伦敦大学", "url": "https://ucl.ac.uk"}),
        )];
        let result = resolver.sync(&records).unwrap();

        assert_eq!(result.outcomes[0].outcome, ImportOutcome::Updated);
        assert_eq!(result.fuzzy_matches.len(), 1);
        assert_eq!(result.fuzzy_matches[0].id, ucl);

        let rows = store.inner.select(&Query::table("schools")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["cn_name"], "伦敦大学学院");
        assert_eq!(rows[0]["url"], "https://ucl.ac.uk");
    }

    #[test]
    fn test_sync_dedupes_creations_on_any_alias() {
        let store = ProbeStore::new();
        let profile = ImportProfile::schools();
        let config = ImportConfig::default();
        let resolver = EntityResolver::new(&store, &profile.reference, &config);

        let records = vec![
            mapped(&profile, 2, json!({"en_name": "ETH Zurich"})),
            mapped(&profile, 3, json!({"cn_name": "苏黎世联邦理工学院", "en_name": "ETH Zurich"})),
            mapped(&profile, 4, json!({"cn_name": "苏黎世联邦理工学院"})),
        ];
        let result = resolver.sync(&records).unwrap();
        let by_line: HashMap<usize, ImportOutcome> = result
            .outcomes
            .iter()
            .map(|r| (r.line, r.outcome.clone()))
            .collect();

        assert_eq!(by_line[&2], ImportOutcome::Created);
        assert_eq!(by_line[&3], ImportOutcome::Skipped(SkipReason::DuplicateInInput));
        assert_eq!(by_line[&4], ImportOutcome::Skipped(SkipReason::DuplicateInInput));
        assert_eq!(store.inner.count("schools").unwrap(), 1);
    }

    #[test]
    fn test_full_table_lookup_pages_until_empty() {
        let store = ProbeStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(seed(&store.inner, &format!("学校{}", i), &format!("School {}", i)));
        }
        let reference = reference();
        let config = ImportConfig {
            lookup_page_size: 2,
            create_missing: false,
            ..ImportConfig::default()
        };

        let all: Vec<String> = (0..5).map(|i| format!("School {}", i)).collect();
        let resolution = EntityResolver::new(&store, &reference, &config).resolve(&all);

        // 2 + 2 + 1, then the empty page
        assert_eq!(store.selects.get(), 4);
        assert!(resolution.unresolved.is_empty());
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(resolution.id_for(&format!("school {}", i)), Some(id.as_str()));
        }
    }

    #[test]
    fn test_full_table_lookup_survives_server_row_cap() {
        let store = ProbeStore::new();
        for i in 0..5 {
            seed(&store.inner, "", &format!("School {}", i));
        }
        store.max_rows.set(Some(2));
        let reference = reference();
        let config = ImportConfig::default();

        let resolution = EntityResolver::new(&store, &reference, &config)
            .resolve(&names(&["School 4"]));

        assert!(resolution.created.is_empty());
        assert!(resolution.id_for("School 4").is_some());
        assert_eq!(store.inner.count("schools").unwrap(), 5);
    }

    #[test]
    fn test_same_value_tolerates_store_text() {
        assert!(same_value(&json!("[\"a\",\"b\"]"), &json!(["a", "b"])));
        assert!(same_value(&json!("12"), &json!(12)));
        assert!(!same_value(&json!(null), &json!("x")));
        assert!(is_empty_value(&json!("[]")));
        assert!(!is_empty_value(&json!(0)));
    }
}
