// ⚙️ Run configuration - store credentials + import settings
//
// Everything a run needs is built once in `main` and passed down by
// reference: no global flags, no re-reading argv.

use crate::error::ImportError;
use crate::region::Region;
use crate::report::RunReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Environment variables consulted for the store URL, in priority order
pub const URL_VARS: &[&str] = &["SUPABASE_URL", "VITE_SUPABASE_URL"];

/// Environment variables consulted for the access key, in priority order
pub const KEY_VARS: &[&str] = &[
    "SUPABASE_SERVICE_KEY",
    "SUPABASE_KEY",
    "VITE_SUPABASE_ANON_KEY",
];

/// Remote store connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl StoreConfig {
    /// Read from the process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self, ImportError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable lookup for tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ImportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |vars: &[&str]| {
            vars.iter()
                .filter_map(|v| lookup(*v))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let url = first(URL_VARS).ok_or_else(|| {
            ImportError::config(format!(
                "missing store URL; set one of {}",
                URL_VARS.join(", ")
            ))
        })?;
        let api_key = first(KEY_VARS).ok_or_else(|| {
            ImportError::config(format!(
                "missing store key; set one of {}",
                KEY_VARS.join(", ")
            ))
        })?;

        let timeout_secs = lookup("IMPORT_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(30);

        debug!(url = %url, key_len = api_key.len(), "store configuration loaded");

        Ok(StoreConfig {
            url,
            api_key,
            timeout_secs,
        })
    }
}

/// How dependent records are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Plain insert: re-running duplicates rows
    #[default]
    Insert,
    /// Insert-or-update on the profile's conflict columns
    Upsert,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Insert => write!(f, "insert"),
            WriteMode::Upsert => write!(f, "upsert"),
        }
    }
}

/// How the resolver fetches existing reference rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LookupStrategy {
    /// One select of the whole reference table
    #[default]
    FullTable,
    /// One name-filtered select per `lookup_chunk_size` names
    Chunked,
}

/// Settings threaded through resolver, loader and pipeline
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Records per bulk write
    pub batch_size: usize,
    /// Names per lookup select and per reference insert
    pub lookup_chunk_size: usize,
    /// Rows per page of a full-table fetch (PostgREST caps responses at max-rows)
    pub lookup_page_size: usize,
    pub mode: WriteMode,
    pub lookup: LookupStrategy,
    /// Allow substring-containment matching after exact lookup fails
    pub fuzzy: bool,
    /// Create reference rows for names that match nothing
    pub create_missing: bool,
    /// Defaults for created reference rows
    pub region: Option<Region>,
    /// Reference sync: only fill fields that are currently empty
    pub fill_missing_only: bool,
    /// Preamble lines before the CSV header
    pub skip_rows: usize,
    /// Previous run; restricts this run to its failed/skipped rows
    pub resume: Option<RunReport>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            batch_size: 50,
            lookup_chunk_size: 30,
            lookup_page_size: 1000,
            mode: WriteMode::Insert,
            lookup: LookupStrategy::FullTable,
            fuzzy: true,
            create_missing: true,
            region: None,
            fill_missing_only: false,
            skip_rows: 0,
            resume: None,
        }
    }
}

impl ImportConfig {
    /// Reject settings that would make the run meaningless
    pub fn validate(&self) -> Result<(), ImportError> {
        if self.batch_size == 0 {
            return Err(ImportError::config("batch size must be at least 1"));
        }
        if self.lookup_chunk_size == 0 {
            return Err(ImportError::config("lookup chunk size must be at least 1"));
        }
        if self.lookup_page_size == 0 {
            return Err(ImportError::config("lookup page size must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_store_config_priority() {
        let vars = env(&[
            ("VITE_SUPABASE_URL", "https://vite.example.co"),
            ("SUPABASE_URL", "https://main.example.co"),
            ("VITE_SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SERVICE_KEY", "service"),
        ]);

        let config = StoreConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.url, "https://main.example.co");
        assert_eq!(config.api_key, "service");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_store_config_missing_key_is_fatal() {
        let vars = env(&[("SUPABASE_URL", "https://main.example.co"), ("SUPABASE_KEY", "  ")]);

        let err = StoreConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ImportError::Config { .. }));
        assert!(err.to_string().contains("SUPABASE_SERVICE_KEY"));
    }

    #[test]
    fn test_import_config_validate() {
        assert!(ImportConfig::default().validate().is_ok());

        let config = ImportConfig {
            batch_size: 0,
            ..ImportConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ImportConfig {
            lookup_page_size: 0,
            ..ImportConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
