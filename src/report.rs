// 📋 Progress Reporter - per-row outcomes, counters, JSON run report
//
// Every input line ends in exactly one outcome, parse failures included,
// so the counters always add up to the number of lines read.

use crate::config::WriteMode;
use crate::error::ImportError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Row had no owner name or id
    MissingOwner,
    /// Owner name could not be resolved or created
    UnresolvedOwner,
    /// Matched an existing row whose fields already agree
    NothingToUpdate,
    /// Same name appeared earlier in the input
    DuplicateInInput,
    /// Parser rejected the line
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    /// Dependent record written (insert or upsert)
    Written,
    /// Reference row created
    Created,
    /// Reference row patched
    Updated,
    Skipped(SkipReason),
    Failed(String),
}

impl ImportOutcome {
    /// Rows a resumed run should try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImportOutcome::Skipped(_) | ImportOutcome::Failed(_))
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    /// Name as it appeared in the input
    pub name: String,
    /// Indexed name it matched
    pub matched: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub written: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Reference rows created while resolving owners
    pub references_created: usize,
    pub unresolved_names: Vec<String>,
    pub fuzzy_matches: Vec<FuzzyMatch>,
    /// Store calls made by the loader
    pub round_trips: usize,
}

impl ImportSummary {
    pub fn record(&mut self, outcome: &ImportOutcome) {
        match outcome {
            ImportOutcome::Written => self.written += 1,
            ImportOutcome::Created => self.created += 1,
            ImportOutcome::Updated => self.updated += 1,
            ImportOutcome::Skipped(_) => self.skipped += 1,
            ImportOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.written + self.created + self.updated + self.skipped + self.failed
    }

    /// Human-readable block printed at the end of a run
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        out.push_str(&format!("📊 Rows processed: {}\n", self.total()));
        out.push_str(&format!("✓ Written:  {}\n", self.written));
        if self.created > 0 || self.updated > 0 {
            out.push_str(&format!("✓ Created:  {}\n", self.created));
            out.push_str(&format!("✓ Updated:  {}\n", self.updated));
        }
        out.push_str(&format!("⏭  Skipped:  {}\n", self.skipped));
        out.push_str(&format!("❌ Failed:   {}\n", self.failed));

        if self.references_created > 0 {
            out.push_str(&format!("🏫 Schools created: {}\n", self.references_created));
        }
        if !self.fuzzy_matches.is_empty() {
            out.push_str(&format!("🔎 Fuzzy matches: {}\n", self.fuzzy_matches.len()));
            for m in &self.fuzzy_matches {
                out.push_str(&format!("   {} → {}\n", m.name, m.matched));
            }
        }
        if !self.unresolved_names.is_empty() {
            out.push_str(&format!(
                "⚠️  Unresolved names ({}): {}\n",
                self.unresolved_names.len(),
                self.unresolved_names.join(", ")
            ));
        }
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        out
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowReport {
    pub line: usize,
    /// Row key (empty for lines the parser rejected)
    pub key: String,
    pub outcome: ImportOutcome,
}

/// Machine-readable record of one run, written with `--report`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub profile: String,
    pub source_file: String,
    pub mode: WriteMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: ImportSummary,
    pub rows: Vec<RowReport>,
}

impl RunReport {
    pub fn start(profile: &str, source_file: &str, mode: WriteMode) -> Self {
        RunReport {
            profile: profile.to_string(),
            source_file: source_file.to_string(),
            mode,
            started_at: Utc::now(),
            finished_at: None,
            summary: ImportSummary::default(),
            rows: Vec::new(),
        }
    }

    /// Add one row's outcome and bump the matching counter
    pub fn push(&mut self, line: usize, key: &str, outcome: ImportOutcome) {
        self.summary.record(&outcome);
        self.rows.push(RowReport {
            line,
            key: key.to_string(),
            outcome,
        });
    }

    pub fn finish(&mut self) {
        self.rows.sort_by_key(|r| r.line);
        self.finished_at = Some(Utc::now());
    }

    /// Keys of rows that were skipped or failed
    pub fn retry_keys(&self) -> HashSet<String> {
        self.rows
            .iter()
            .filter(|r| r.outcome.is_retryable() && !r.key.is_empty())
            .map(|r| r.key.clone())
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self, ImportError> {
        if !path.is_file() {
            return Err(ImportError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ImportError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
