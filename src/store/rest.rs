// 🌐 RestStore - PostgREST (Supabase) over blocking HTTP
//
// One request per call, no retries here: chunk-level fallback lives in the
// loader, so a rejected request just surfaces as StoreError::Rejected.

use super::{check_identifier, Filter, Query, Row, Store};
use crate::config::StoreConfig;
use crate::error::StoreError;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(RestStore {
            client,
            base_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, table: &str) -> Result<RequestBuilder, StoreError> {
        let table = check_identifier(table)?;
        let url = format!("{}/{}", self.base_url, table);
        trace!(%method, %url, "postgrest request");

        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key))
    }
}

/// Turn a non-2xx response into `StoreError::Rejected`
fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    // PostgREST errors look like {"code": "...", "message": "...", "details": ...}
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or(body);

    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

impl Store for RestStore {
    fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let params = match select_params(query)? {
            Some(params) => params,
            // Empty IN list: nothing can match
            None => return Ok(Vec::new()),
        };

        let response = self.request(Method::GET, &query.table)?.query(&params).send()?;
        Ok(check(response)?.json::<Vec<Row>>()?)
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .request(Method::POST, table)?
            .header("Prefer", "return=representation")
            .json(rows)
            .send()?;

        Ok(check(response)?.json::<Vec<Row>>()?)
    }

    fn update(&self, table: &str, patch: &Row, matching: &Row) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        if matching.is_empty() {
            return Err(StoreError::Rejected {
                status: 400,
                message: "update requires at least one match column".to_string(),
            });
        }

        let params = matching
            .iter()
            .map(|(column, value)| {
                check_identifier(column).map(|c| (c.to_string(), format!("eq.{}", literal(value))))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let response = self
            .request(Method::PATCH, table)?
            .query(&params)
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()?;

        check(response).map(|_| ())
    }

    fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_columns: &[String],
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let on_conflict = conflict_columns
            .iter()
            .map(|c| check_identifier(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(",");

        let response = self
            .request(Method::POST, table)?
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()?;

        check(response).map(|_| ())
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

// ============================================================================
// QUERY-STRING ENCODING
// ============================================================================

/// Query string for a select; `None` when the filter can match nothing
pub(crate) fn select_params(query: &Query) -> Result<Option<Vec<(String, String)>>, StoreError> {
    let mut params: Vec<(String, String)> = Vec::new();

    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|c| check_identifier(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(",")
    };
    params.push(("select".to_string(), columns));

    if let Some(filter) = &query.filter {
        match filter_params(filter)? {
            Some(filter) => params.push(filter),
            None => return Ok(None),
        }
    }

    if let Some(column) = &query.order_by {
        params.push(("order".to_string(), format!("{}.asc", check_identifier(column)?)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }

    Ok(Some(params))
}

/// PostgREST query parameter for a filter; `None` when it can match nothing
pub(crate) fn filter_params(filter: &Filter) -> Result<Option<(String, String)>, StoreError> {
    match filter {
        Filter::In { column, values } => {
            if values.is_empty() {
                return Ok(None);
            }
            let column = check_identifier(column)?;
            let list = values.iter().map(literal).collect::<Vec<_>>().join(",");
            Ok(Some((column.to_string(), format!("in.({})", list))))
        }
        Filter::NamesIgnoreCase { columns, names } => {
            if names.is_empty() || columns.is_empty() {
                return Ok(None);
            }
            let mut clauses = Vec::with_capacity(columns.len() * names.len());
            for column in columns {
                let column = check_identifier(column)?;
                for name in names {
                    clauses.push(format!(
                        "{}.ilike.{}",
                        column,
                        quote(&escape_like(name.trim()))
                    ));
                }
            }
            Ok(Some(("or".to_string(), format!("({})", clauses.join(",")))))
        }
    }
}

/// Render a JSON scalar as a PostgREST filter literal
fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Double-quote a value so commas, dots and parentheses survive
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `ilike` without wildcards is a case-insensitive equality
fn escape_like(s: &str) -> String {
    s.replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_filter_quotes_strings() {
        let filter = Filter::In {
            column: "cn_name".to_string(),
            values: vec![json!("香港大学"), json!("King's College, London"), json!(7)],
        };

        let (key, value) = filter_params(&filter).unwrap().unwrap();
        assert_eq!(key, "cn_name");
        assert_eq!(value, "in.(\"香港大学\",\"King's College, London\",7)");
    }

    #[test]
    fn test_names_filter_builds_or_of_ilike() {
        let filter = Filter::NamesIgnoreCase {
            columns: vec!["cn_name".to_string(), "en_name".to_string()],
            names: vec!["oxford".to_string(), "100%_uni".to_string()],
        };

        let (key, value) = filter_params(&filter).unwrap().unwrap();
        assert_eq!(key, "or");
        assert_eq!(
            value,
            "(cn_name.ilike.\"oxford\",cn_name.ilike.\"100\\\\%\\\\_uni\",\
en_name.ilike.\"oxford\",en_name.ilike.\"100\\\\%\\\\_uni\")"
        );
    }

    #[test]
    fn test_empty_filters_match_nothing() {
        let filter = Filter::In {
            column: "id".to_string(),
            values: vec![],
        };
        assert!(filter_params(&filter).unwrap().is_none());

        let filter = Filter::NamesIgnoreCase {
            columns: vec!["cn_name".to_string()],
            names: vec![],
        };
        assert!(filter_params(&filter).unwrap().is_none());
    }

    #[test]
    fn test_filter_rejects_bad_column() {
        let filter = Filter::In {
            column: "id);drop".to_string(),
            values: vec![json!(1)],
        };
        assert!(filter_params(&filter).is_err());
    }

    #[test]
    fn test_literal_escapes_quotes() {
        assert_eq!(literal(&json!("say \"hi\"")), "\"say \\\"hi\\\"\"");
        assert_eq!(literal(&json!(true)), "true");
        assert_eq!(literal(&Value::Null), "null");
    }

    #[test]
    fn test_paged_select_params() {
        let query = Query::table("schools")
            .columns(&["id", "cn_name"])
            .order_by("id")
            .limit(1000)
            .offset(2000);

        let params = select_params(&query).unwrap().unwrap();
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                ("select", "id,cn_name"),
                ("order", "id.asc"),
                ("limit", "1000"),
                ("offset", "2000"),
            ]
        );

        let empty = Query::table("schools").filter(Filter::In {
            column: "id".to_string(),
            values: vec![],
        });
        assert!(select_params(&empty).unwrap().is_none());
    }
}
