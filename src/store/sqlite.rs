// 💾 SqliteStore - local rusqlite backend
//
// Mirrors the two tables the importer writes (schools, programs) so a run can
// happen fully offline. Every multi-row write runs in one transaction: a
// chunk either lands whole or not at all, same as a remote bulk insert.

use super::{check_identifier, Filter, Query, Row, Store};
use crate::error::StoreError;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Statement};
use serde_json::Value;
use std::path::Path;

pub struct SqliteStore {
    conn: Connection,
    label: String,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn,
            label: format!("sqlite:{}", path.display()),
        })
    }

    /// Fresh in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn,
            label: "sqlite::memory:".to_string(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of rows in `table`
    pub fn count(&self, table: &str) -> Result<i64, StoreError> {
        let table = check_identifier(table)?;
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }
}

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Reference table: schools
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools (
            id TEXT PRIMARY KEY,
            cn_name TEXT,
            en_name TEXT,
            country TEXT,
            region TEXT,
            description TEXT,
            ranking INTEGER,
            qs_rank_2025 INTEGER,
            qs_rank_2024 INTEGER,
            tags TEXT,
            url TEXT,
            is_verified INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Dependent table: programs
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs (
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL REFERENCES schools(id),
            cn_name TEXT,
            en_name TEXT NOT NULL,
            degree TEXT,
            duration TEXT,
            faculty TEXT,
            category TEXT,
            tags TEXT,
            introduction TEXT,
            objectives TEXT,
            apply_requirements TEXT,
            language_requirements TEXT,
            curriculum TEXT,
            success_cases TEXT,
            entry_month TEXT,
            interview TEXT,
            analysis TEXT,
            tuition_fee TEXT,
            url TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schools_cn_name ON schools(cn_name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_school ON programs(school_id, en_name)",
        [],
    )?;

    Ok(())
}

impl Store for SqliteStore {
    fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let table = check_identifier(&query.table)?;

        let columns = if query.columns.is_empty() {
            "*".to_string()
        } else {
            query
                .columns
                .iter()
                .map(|c| check_identifier(c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", columns, table);
        let mut params: Vec<SqlValue> = Vec::new();

        match &query.filter {
            None => {}
            Some(Filter::In { column, values }) => {
                if values.is_empty() {
                    return Ok(Vec::new());
                }
                let column = check_identifier(column)?;
                params = values.iter().map(to_sql_value).collect::<Result<_, _>>()?;
                sql.push_str(&format!(
                    " WHERE {} IN ({})",
                    column,
                    placeholders(1, params.len())
                ));
            }
            Some(Filter::NamesIgnoreCase { columns, names }) => {
                if names.is_empty() || columns.is_empty() {
                    return Ok(Vec::new());
                }
                params = names
                    .iter()
                    .map(|n| SqlValue::Text(n.trim().to_lowercase()))
                    .collect();
                // Numbered parameters are reused for every column
                let list = placeholders(1, params.len());
                let clauses = columns
                    .iter()
                    .map(|c| check_identifier(c).map(|c| format!("lower(trim({})) IN ({})", c, list)))
                    .collect::<Result<Vec<_>, _>>()?;
                sql.push_str(&format!(" WHERE {}", clauses.join(" OR ")));
            }
        }

        if let Some(column) = &query.order_by {
            sql.push_str(&format!(" ORDER BY {}", check_identifier(column)?));
        }

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded
        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        let mut stmt = self.conn.prepare(&sql)?;
        read_rows(&mut stmt, &params)
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        let table = check_identifier(table)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            inserted.extend(insert_one(&tx, table, row)?);
        }
        tx.commit()?;

        Ok(inserted)
    }

    fn update(&self, table: &str, patch: &Row, matching: &Row) -> Result<(), StoreError> {
        let table = check_identifier(table)?;
        if patch.is_empty() {
            return Ok(());
        }
        if matching.is_empty() {
            return Err(StoreError::Rejected {
                status: 400,
                message: "update requires at least one match column".to_string(),
            });
        }

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in patch {
            params.push(to_sql_value(value)?);
            assignments.push(format!("{} = ?{}", check_identifier(column)?, params.len()));
        }

        let mut conditions = Vec::new();
        for (column, value) in matching {
            params.push(to_sql_value(value)?);
            conditions.push(format!("{} = ?{}", check_identifier(column)?, params.len()));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            conditions.join(" AND ")
        );
        self.conn.execute(&sql, params_from_iter(params.iter()))?;

        Ok(())
    }

    fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_columns: &[String],
    ) -> Result<(), StoreError> {
        let table = check_identifier(table)?;
        if conflict_columns.is_empty() {
            return Err(StoreError::Rejected {
                status: 400,
                message: "upsert requires at least one conflict column".to_string(),
            });
        }
        let conflict = conflict_columns
            .iter()
            .map(|c| check_identifier(c))
            .collect::<Result<Vec<_>, _>>()?;

        let tx = self.conn.unchecked_transaction()?;

        for row in rows {
            // Find an existing row with the same conflict key
            let key_values = conflict
                .iter()
                .map(|c| to_sql_value(row.get(*c).unwrap_or(&Value::Null)))
                .collect::<Result<Vec<_>, _>>()?;
            let condition = conflict
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} IS ?{}", c, i + 1))
                .collect::<Vec<_>>()
                .join(" AND ");

            let existing: Option<i64> = tx
                .query_row(
                    &format!("SELECT rowid FROM {} WHERE {} LIMIT 1", table, condition),
                    params_from_iter(key_values.iter()),
                    |r| r.get(0),
                )
                .optional()?;

            match existing {
                Some(rowid) => {
                    let mut assignments = Vec::new();
                    let mut params = Vec::new();
                    for (column, value) in row {
                        if column == "id" || conflict.contains(&column.as_str()) {
                            continue;
                        }
                        params.push(to_sql_value(value)?);
                        assignments.push(format!(
                            "{} = ?{}",
                            check_identifier(column)?,
                            params.len()
                        ));
                    }
                    if assignments.is_empty() {
                        continue;
                    }
                    params.push(SqlValue::Integer(rowid));
                    let sql = format!(
                        "UPDATE {} SET {} WHERE rowid = ?{}",
                        table,
                        assignments.join(", "),
                        params.len()
                    );
                    tx.execute(&sql, params_from_iter(params.iter()))?;
                }
                None => {
                    insert_one(&tx, table, row)?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn insert_one(conn: &Connection, table: &str, row: &Row) -> Result<Vec<Row>, StoreError> {
    let mut row = row.clone();
    let needs_id = row.get("id").map_or(true, |v| v.is_null());
    if needs_id {
        row.insert(
            "id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }

    let columns = row
        .keys()
        .map(|k| check_identifier(k))
        .collect::<Result<Vec<_>, _>>()?;
    let values = row
        .values()
        .map(to_sql_value)
        .collect::<Result<Vec<_>, _>>()?;

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table,
        columns.join(", "),
        placeholders(1, values.len())
    );

    let mut stmt = conn.prepare(&sql)?;
    read_rows(&mut stmt, &values)
}

fn read_rows(stmt: &mut Statement<'_>, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|n| n.to_string())
        .collect();

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::new();
        for (idx, name) in names.iter().enumerate() {
            map.insert(name.clone(), from_sql_ref(row.get_ref(idx)?));
        }
        out.push(map);
    }

    Ok(out)
}

/// "?1, ?2, ..." starting at `first`
fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_sql_value(value: &Value) -> Result<SqlValue, StoreError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Arrays (tags) and objects are kept as JSON text
        other => SqlValue::Text(serde_json::to_string(other)?),
    })
}

fn from_sql_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            Value::String(String::from_utf8_lossy(t).into_owned())
        }
    }
}
