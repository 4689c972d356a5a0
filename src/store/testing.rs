// Test doubles wrapping a real store: call counting and failure injection

use super::{Query, Row, SqliteStore, Store};
use crate::error::StoreError;
use std::cell::{Cell, RefCell};

/// Wraps an in-memory SqliteStore, counts round trips and can be told to
/// reject selected calls.
pub struct ProbeStore {
    pub inner: SqliteStore,
    pub selects: Cell<usize>,
    /// Sizes of every insert/upsert call, in order
    pub writes: RefCell<Vec<usize>>,
    /// Fail any select whose filter mentions one of these names
    pub fail_select_names: RefCell<Vec<String>>,
    /// Fail every select
    pub fail_all_selects: Cell<bool>,
    /// Fail inserts into this table
    pub fail_insert_table: RefCell<Option<String>>,
    /// Truncate every select to this many rows, like PostgREST's max-rows
    pub max_rows: Cell<Option<usize>>,
}

impl ProbeStore {
    pub fn new() -> Self {
        ProbeStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            selects: Cell::new(0),
            writes: RefCell::new(Vec::new()),
            fail_select_names: RefCell::new(Vec::new()),
            fail_all_selects: Cell::new(false),
            fail_insert_table: RefCell::new(None),
            max_rows: Cell::new(None),
        }
    }

    pub fn write_sizes(&self) -> Vec<usize> {
        self.writes.borrow().clone()
    }

    fn injected(message: &str) -> StoreError {
        StoreError::Rejected {
            status: 500,
            message: message.to_string(),
        }
    }
}

impl Store for ProbeStore {
    fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.selects.set(self.selects.get() + 1);
        if self.fail_all_selects.get() {
            return Err(Self::injected("select disabled"));
        }
        if let Some(super::Filter::NamesIgnoreCase { names, .. }) = &query.filter {
            let blocked = self.fail_select_names.borrow();
            if names.iter().any(|n| blocked.contains(n)) {
                return Err(Self::injected("select chunk rejected"));
            }
        }
        let mut rows = self.inner.select(query)?;
        if let Some(cap) = self.max_rows.get() {
            rows.truncate(cap);
        }
        Ok(rows)
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        self.writes.borrow_mut().push(rows.len());
        if self.fail_insert_table.borrow().as_deref() == Some(table) {
            return Err(Self::injected("insert rejected"));
        }
        self.inner.insert(table, rows)
    }

    fn update(&self, table: &str, patch: &Row, matching: &Row) -> Result<(), StoreError> {
        self.inner.update(table, patch, matching)
    }

    fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_columns: &[String],
    ) -> Result<(), StoreError> {
        self.writes.borrow_mut().push(rows.len());
        self.inner.upsert(table, rows, conflict_columns)
    }

    fn describe(&self) -> String {
        "probe".to_string()
    }
}
