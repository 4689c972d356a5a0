// 🗄️ Store - the opaque relational backend the importer writes into
//
// The resolver and loader only ever see `&dyn Store`. Two backends exist:
// - RestStore: PostgREST / Supabase over HTTP
// - SqliteStore: local rusqlite database (offline runs + tests)

pub mod rest;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::StoreError;
use serde_json::Value;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

/// One row as an open map of column → scalar/array value
pub type Row = serde_json::Map<String, Value>;

// ============================================================================
// QUERY
// ============================================================================

/// Row filter for `select`
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column IN (values)` with the store's own equality
    In { column: String, values: Vec<Value> },

    /// Any of `columns` equals any of `names`, compared case-insensitively
    NamesIgnoreCase { columns: Vec<String>, names: Vec<String> },
}

/// A `select` request
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    /// Empty = all columns
    pub columns: Vec<String>,
    pub filter: Option<Filter>,
    /// Ascending sort column (stable paging)
    pub order_by: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Query {
            table: table.to_string(),
            columns: Vec::new(),
            filter: None,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    /// Builder pattern: restrict selected columns
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Builder pattern: add a filter
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder pattern: cap the number of returned rows
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder pattern: sort ascending by `column`
    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    /// Builder pattern: skip the first `offset` rows
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Store - the four operations the importer needs, plus a connectivity check
///
/// Each call is one independent round trip. No method holds state between
/// calls and nothing here is transactional across calls.
pub trait Store {
    /// Fetch rows matching `query`
    fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Insert `rows`; returns the stored rows including generated ids
    fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError>;

    /// Apply `patch` to every row whose columns equal all of `matching`
    fn update(&self, table: &str, patch: &Row, matching: &Row) -> Result<(), StoreError>;

    /// Insert or update `rows`, matched on `conflict_columns`
    fn upsert(&self, table: &str, rows: &[Row], conflict_columns: &[String])
        -> Result<(), StoreError>;

    /// Short name for logs
    fn describe(&self) -> String;

    /// Cheap round trip against `table` to fail fast on bad credentials
    fn ping(&self, table: &str) -> Result<(), StoreError> {
        self.select(&Query::table(table).limit(1)).map(|_| ())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Reject anything that is not a plain SQL identifier
///
/// Table and column names end up spliced into SQL text and PostgREST query
/// strings, so they never carry quotes, spaces or operators.
pub fn check_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Render a store id (uuid string or integer) as the opaque string we carry
pub fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("schools").is_ok());
        assert!(check_identifier("qs_rank_2025").is_ok());
        assert!(check_identifier("_private").is_ok());
        assert!(check_identifier("").is_err());
        assert!(check_identifier("2fast").is_err());
        assert!(check_identifier("name; DROP TABLE x").is_err());
        assert!(check_identifier("cn-name").is_err());
    }

    #[test]
    fn test_id_to_string() {
        assert_eq!(id_to_string(&json!("abc")), Some("abc".to_string()));
        assert_eq!(id_to_string(&json!(42)), Some("42".to_string()));
        assert_eq!(id_to_string(&json!("  ")), None);
        assert_eq!(id_to_string(&Value::Null), None);
    }

    #[test]
    fn test_query_builder() {
        let q = Query::table("schools")
            .columns(&["id", "cn_name"])
            .limit(1);

        assert_eq!(q.table, "schools");
        assert_eq!(q.columns, vec!["id".to_string(), "cn_name".to_string()]);
        assert_eq!(q.limit, Some(1));
        assert!(q.filter.is_none());
        assert!(q.offset.is_none());

        let page = Query::table("schools").order_by("id").limit(1000).offset(2000);
        assert_eq!(page.order_by.as_deref(), Some("id"));
        assert_eq!(page.offset, Some(2000));
    }
}
