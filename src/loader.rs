// 📦 Batch Loader - chunked writes with per-record fallback
//
// One bad record must not sink its 49 neighbours: a rejected chunk is
// replayed record by record so every row gets its own outcome.

use crate::config::WriteMode;
use crate::error::{ImportError, StoreError};
use crate::report::{ImportOutcome, RowReport, SkipReason};
use crate::store::{Row, Store};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

/// A mapped row waiting for its write
#[derive(Debug, Clone, PartialEq)]
pub struct DependentRecord {
    pub line: usize,
    pub key: String,
    /// Resolved owner id (ignored when the loader has no owner column)
    pub owner_id: Option<String>,
    pub fields: Row,
}

/// Per-row outcomes plus the store traffic they cost
#[derive(Debug, Default)]
pub struct LoadResult {
    pub outcomes: Vec<RowReport>,
    pub round_trips: usize,
}

impl LoadResult {
    fn push(&mut self, record: &DependentRecord, outcome: ImportOutcome) {
        self.outcomes.push(RowReport {
            line: record.line,
            key: record.key.clone(),
            outcome,
        });
    }

    fn count(&self, pred: impl Fn(&ImportOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// Records whose write succeeded
    pub fn succeeded(&self) -> usize {
        self.count(|o| !o.is_retryable())
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ImportOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ImportOutcome::Failed(_)))
    }
}

pub struct BatchLoader<'a> {
    store: &'a dyn Store,
    table: String,
    owner_column: Option<String>,
    batch_size: usize,
    mode: WriteMode,
    conflict_columns: Vec<String>,
    success: ImportOutcome,
}

impl<'a> BatchLoader<'a> {
    /// Fails on batch size 0 and on upsert without conflict columns
    pub fn new(
        store: &'a dyn Store,
        table: &str,
        batch_size: usize,
        mode: WriteMode,
        conflict_columns: &[String],
    ) -> Result<Self, ImportError> {
        if batch_size == 0 {
            return Err(ImportError::config("batch size must be at least 1"));
        }
        if mode == WriteMode::Upsert && conflict_columns.is_empty() {
            return Err(ImportError::config(format!(
                "upsert into '{}' needs at least one conflict column",
                table
            )));
        }

        Ok(BatchLoader {
            store,
            table: table.to_string(),
            owner_column: None,
            batch_size,
            mode,
            conflict_columns: conflict_columns.to_vec(),
            success: ImportOutcome::Written,
        })
    }

    /// Builder pattern: foreign-key column filled from `owner_id`
    pub fn with_owner_column(mut self, column: &str) -> Self {
        self.owner_column = Some(column.to_string());
        self
    }

    /// Builder pattern: outcome recorded for a successful write
    pub fn with_success_outcome(mut self, outcome: ImportOutcome) -> Self {
        self.success = outcome;
        self
    }

    pub fn load(&self, records: &[DependentRecord]) -> LoadResult {
        let mut result = LoadResult::default();

        // 1. Drop records whose owner never resolved
        let mut ready: Vec<(&DependentRecord, Row)> = Vec::with_capacity(records.len());
        for record in records {
            match self.build_row(record) {
                Some(row) => ready.push((record, row)),
                None => result.push(record, ImportOutcome::Skipped(SkipReason::UnresolvedOwner)),
            }
        }

        if ready.is_empty() {
            return result;
        }

        // 2. Chunked writes
        let total_chunks = ready.len().div_ceil(self.batch_size);
        for (index, chunk) in ready.chunks(self.batch_size).enumerate() {
            let rows: Vec<Row> = chunk.iter().map(|(_, row)| row.clone()).collect();
            trace!(table = %self.table, rows = ?rows, "chunk payload");

            result.round_trips += 1;
            match self.write(&rows) {
                Ok(()) => {
                    info!(
                        table = %self.table,
                        chunk = index + 1,
                        chunks = total_chunks,
                        rows = rows.len(),
                        "chunk written"
                    );
                    for (record, _) in chunk {
                        result.push(record, self.success.clone());
                    }
                }
                Err(e) => {
                    warn!(
                        table = %self.table,
                        chunk = index + 1,
                        error = %e,
                        "chunk rejected, retrying record by record"
                    );
                    // 3. Per-record fallback
                    for (record, row) in chunk {
                        result.round_trips += 1;
                        match self.write(std::slice::from_ref(row)) {
                            Ok(()) => {
                                debug!(line = record.line, "record written on retry");
                                result.push(record, self.success.clone());
                            }
                            Err(e) => {
                                warn!(line = record.line, error = %e, "record failed");
                                result.push(record, ImportOutcome::Failed(e.to_string()));
                            }
                        }
                    }
                }
            }
        }

        result
    }

    fn build_row(&self, record: &DependentRecord) -> Option<Row> {
        let mut row = record.fields.clone();
        if let Some(column) = &self.owner_column {
            let owner = record.owner_id.as_ref()?;
            row.insert(column.clone(), Value::String(owner.clone()));
        }
        Some(row)
    }

    fn write(&self, rows: &[Row]) -> Result<(), StoreError> {
        match self.mode {
            WriteMode::Insert => self.store.insert(&self.table, rows).map(|_| ()),
            WriteMode::Upsert => self.store.upsert(&self.table, rows, &self.conflict_columns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::ProbeStore;
    use crate::store::SqliteStore;
    use serde_json::json;

    fn school(store: &dyn Store) -> String {
        let rows = store
            .insert("schools", &[json!({"cn_name": "伦敦大学学院"}).as_object().cloned().unwrap()])
            .unwrap();
        rows[0]["id"].as_str().unwrap().to_string()
    }

    fn programme(line: usize, owner: Option<&str>, en_name: Value) -> DependentRecord {
        DependentRecord {
            line,
            key: format!("key-{}", line),
            owner_id: owner.map(str::to_string),
            fields: json!({"en_name": en_name, "cn_name": ""})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    fn conflict() -> Vec<String> {
        vec!["school_id".to_string(), "en_name".to_string()]
    }

    #[test]
    fn test_chunk_sizes() {
        let store = ProbeStore::new();
        let id = school(&store.inner);
        let records: Vec<_> = (0..5)
            .map(|i| programme(i + 2, Some(&id), json!(format!("MSc {}", i))))
            .collect();

        let loader = BatchLoader::new(&store, "programs", 2, WriteMode::Insert, &[])
            .unwrap()
            .with_owner_column("school_id");
        let result = loader.load(&records);

        assert_eq!(store.write_sizes(), vec![2, 2, 1]);
        assert_eq!(result.round_trips, 3);
        assert_eq!(result.succeeded(), 5);
    }

    #[test]
    fn test_bad_record_isolated() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = school(&store);
        let mut records: Vec<_> = (0..50)
            .map(|i| programme(i + 2, Some(&id), json!(format!("MSc {}", i))))
            .collect();
        records[17].fields.insert("en_name".to_string(), Value::Null);

        let loader = BatchLoader::new(&store, "programs", 50, WriteMode::Insert, &[])
            .unwrap()
            .with_owner_column("school_id");
        let result = loader.load(&records);

        assert_eq!(result.succeeded(), 49);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.round_trips, 51);
        let failed = result
            .outcomes
            .iter()
            .find(|r| matches!(r.outcome, ImportOutcome::Failed(_)))
            .unwrap();
        assert_eq!(failed.line, 19);
        assert_eq!(store.count("programs").unwrap(), 49);
    }

    #[test]
    fn test_upsert_idempotent_insert_not() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = school(&store);
        let records: Vec<_> = (0..4)
            .map(|i| programme(i + 2, Some(&id), json!(format!("MA {}", i))))
            .collect();

        let upsert = BatchLoader::new(&store, "programs", 3, WriteMode::Upsert, &conflict())
            .unwrap()
            .with_owner_column("school_id");
        upsert.load(&records);
        upsert.load(&records);
        assert_eq!(store.count("programs").unwrap(), 4);

        let insert = BatchLoader::new(&store, "programs", 3, WriteMode::Insert, &[])
            .unwrap()
            .with_owner_column("school_id");
        insert.load(&records);
        insert.load(&records);
        assert_eq!(store.count("programs").unwrap(), 12);
    }

    #[test]
    fn test_unresolved_owner_skipped_and_counts_add_up() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = school(&store);
        let records = vec![
            programme(2, Some(&id), json!("MSc A")),
            programme(3, None, json!("MSc B")),
            programme(4, Some(&id), Value::Null),
        ];

        let loader = BatchLoader::new(&store, "programs", 50, WriteMode::Insert, &[])
            .unwrap()
            .with_owner_column("school_id");
        let result = loader.load(&records);

        assert_eq!(result.succeeded(), 1);
        assert_eq!(result.skipped(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(
            result.succeeded() + result.skipped() + result.failed(),
            records.len()
        );
    }

    #[test]
    fn test_no_owner_column_and_custom_outcome() {
        let store = SqliteStore::open_in_memory().unwrap();
        let records = vec![DependentRecord {
            line: 2,
            key: "k".to_string(),
            owner_id: None,
            fields: json!({"cn_name": "澳门大学"}).as_object().cloned().unwrap(),
        }];

        let loader = BatchLoader::new(&store, "schools", 10, WriteMode::Insert, &[])
            .unwrap()
            .with_success_outcome(ImportOutcome::Created);
        let result = loader.load(&records);

        assert_eq!(result.outcomes[0].outcome, ImportOutcome::Created);
        assert_eq!(store.count("schools").unwrap(), 1);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(BatchLoader::new(&store, "programs", 0, WriteMode::Insert, &[]).is_err());
        assert!(BatchLoader::new(&store, "programs", 10, WriteMode::Upsert, &[]).is_err());
    }
}
