// 📂 Source readers - CSV / JSON input files → flat rows
//
// A reader loads the whole file into memory. A malformed row is reported as a
// ParseIssue for its line and the rest of the file still loads; only an
// unreadable file or an unusable document shape is fatal.

use crate::error::ImportError;
use crate::store::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    pub fn name(&self) -> &str {
        match self {
            SourceFormat::Csv => "CSV",
            SourceFormat::Json => "JSON",
        }
    }
}

/// One parsed input row
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// Physical line (CSV) or 1-based array index (JSON)
    pub line: usize,
    pub fields: Row,
}

impl SourceRow {
    /// First non-empty value among `aliases`, trimmed and stringified
    pub fn first_of<S: AsRef<str>>(&self, aliases: &[S]) -> Option<String> {
        aliases
            .iter()
            .filter_map(|alias| self.fields.get(alias.as_ref()))
            .filter_map(value_text)
            .find(|v| !v.is_empty())
    }
}

/// A row that could not be parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ParsedInput {
    pub source_file: String,
    pub format: SourceFormat,
    pub rows: Vec<SourceRow>,
    pub errors: Vec<ParseIssue>,
}

impl ParsedInput {
    /// Rows plus unparseable rows: everything the run must account for
    pub fn total(&self) -> usize {
        self.rows.len() + self.errors.len()
    }
}

/// Scalar JSON value as trimmed text; arrays/objects/null have none
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ============================================================================
// READER TRAIT
// ============================================================================

/// RecordReader - one implementation per input format
pub trait RecordReader {
    fn read(&self, file_path: &Path) -> Result<ParsedInput, ImportError>;

    fn format(&self) -> SourceFormat;
}

/// Detect input format from the file extension
pub fn detect_format(file_path: &Path) -> Result<SourceFormat, ImportError> {
    let extension = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "csv" => Ok(SourceFormat::Csv),
        "json" => Ok(SourceFormat::Json),
        _ => Err(ImportError::config(format!(
            "cannot detect input format of {} (expected .csv or .json)",
            file_path.display()
        ))),
    }
}

pub fn get_reader(format: SourceFormat, skip_rows: usize) -> Box<dyn RecordReader> {
    match format {
        SourceFormat::Csv => Box::new(CsvReader::new(skip_rows)),
        SourceFormat::Json => Box::new(JsonReader),
    }
}

/// Check existence, detect format, read everything
pub fn read_input(file_path: &Path, skip_rows: usize) -> Result<ParsedInput, ImportError> {
    if !file_path.is_file() {
        return Err(ImportError::InputNotFound {
            path: file_path.to_path_buf(),
        });
    }

    let format = detect_format(file_path)?;
    let input = get_reader(format, skip_rows).read(file_path)?;

    debug!(
        file = %input.source_file,
        format = format.name(),
        rows = input.rows.len(),
        errors = input.errors.len(),
        "input parsed"
    );

    Ok(input)
}

fn file_name(file_path: &Path) -> String {
    file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

// ============================================================================
// CSV
// ============================================================================

pub struct CsvReader {
    /// Lines to drop before the header row
    skip_rows: usize,
}

impl CsvReader {
    pub fn new(skip_rows: usize) -> Self {
        CsvReader { skip_rows }
    }
}

impl RecordReader for CsvReader {
    fn read(&self, file_path: &Path) -> Result<ParsedInput, ImportError> {
        let file = File::open(file_path)?;
        let mut reader = BufReader::new(file);

        // Preamble (titles, notes) before the real header
        let mut skipped = 0usize;
        let mut discard = Vec::new();
        for _ in 0..self.skip_rows {
            discard.clear();
            if reader.read_until(b'\n', &mut discard)? == 0 {
                break;
            }
            skipped += 1;
        }

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        let mut errors = Vec::new();

        for result in csv_reader.records() {
            match result {
                Ok(record) => {
                    let line = record
                        .position()
                        .map(|p| p.line() as usize)
                        .unwrap_or_default()
                        + skipped;

                    let mut fields = Row::new();
                    for (header, value) in headers.iter().zip(record.iter()) {
                        if header.is_empty() {
                            continue;
                        }
                        fields.insert(header.clone(), Value::String(value.to_string()));
                    }
                    rows.push(SourceRow { line, fields });
                }
                Err(err) => {
                    if matches!(err.kind(), csv::ErrorKind::Io(_)) {
                        return Err(err.into());
                    }
                    let line = err
                        .position()
                        .map(|p| p.line() as usize + skipped)
                        .unwrap_or_default();
                    warn!(line, error = %err, "skipping malformed CSV row");
                    errors.push(ParseIssue {
                        line,
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(ParsedInput {
            source_file: file_name(file_path),
            format: SourceFormat::Csv,
            rows,
            errors,
        })
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Csv
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Accepts a single object or an array of objects
pub struct JsonReader;

impl RecordReader for JsonReader {
    fn read(&self, file_path: &Path) -> Result<ParsedInput, ImportError> {
        let file = File::open(file_path)?;
        let json: Value = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            ImportError::Parse {
                message: format!("{}: {}", file_path.display(), e),
            }
        })?;

        let mut rows = Vec::new();
        let mut errors = Vec::new();

        match json {
            Value::Object(fields) => rows.push(SourceRow { line: 1, fields }),
            Value::Array(items) => {
                for (idx, item) in items.into_iter().enumerate() {
                    match item {
                        Value::Object(fields) => rows.push(SourceRow {
                            line: idx + 1,
                            fields,
                        }),
                        other => {
                            warn!(index = idx + 1, "skipping non-object JSON element");
                            errors.push(ParseIssue {
                                line: idx + 1,
                                message: format!("expected an object, found {}", type_name(&other)),
                            });
                        }
                    }
                }
            }
            other => {
                return Err(ImportError::Parse {
                    message: format!(
                        "{}: expected an object or an array of objects, found {}",
                        file_path.display(),
                        type_name(&other)
                    ),
                })
            }
        }

        Ok(ParsedInput {
            source_file: file_name(file_path),
            format: SourceFormat::Json,
            rows,
            errors,
        })
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Json
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
