// 🧭 Import profiles - explicit field mapping instead of ad hoc fallbacks
//
// A profile says, once, where every target column comes from:
//   { target: [source aliases in priority order] } + transform + default
// plus which reference table owns the records and where they get written.
// Profiles are built in (programmes, schools) or loaded from TOML.

use crate::error::ImportError;
use crate::source::{value_text, SourceRow};
use crate::store::{check_identifier, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// FIELD MAPPING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transform {
    /// Trimmed string
    #[default]
    Text,
    /// Split on `separator`, trim, drop empties → JSON array
    List { separator: String },
    /// Leading digits, tolerating a "=" tie marker ("=12" → 12, "1401+" → 1401)
    Integer,
    /// true/yes/1, false/no/0
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Column written to the store
    pub target: String,

    /// Source columns in priority order (empty = same name as target)
    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default)]
    pub transform: Transform,

    /// Used when no source yields a value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Warn when no source alias is present in the input header
    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    pub fn new(target: &str) -> Self {
        FieldMapping {
            target: target.to_string(),
            sources: Vec::new(),
            transform: Transform::Text,
            default: None,
            required: false,
        }
    }

    /// Builder pattern: source aliases
    pub fn from(mut self, sources: &[&str]) -> Self {
        self.sources = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Builder pattern: transform
    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Builder pattern: default value
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Builder pattern: "" when missing
    pub fn or_empty(self) -> Self {
        self.default_value(Value::String(String::new()))
    }

    /// Builder pattern: mark required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Effective source aliases
    pub fn source_columns(&self) -> Vec<&str> {
        if self.sources.is_empty() {
            vec![self.target.as_str()]
        } else {
            self.sources.iter().map(|s| s.as_str()).collect()
        }
    }

    /// Value for this field from one row (default applied, Null otherwise)
    pub fn extract(&self, row: &SourceRow) -> Value {
        let raw = self
            .source_columns()
            .into_iter()
            .filter_map(|c| row.fields.get(c))
            .find(|v| !is_blank(v));

        raw.and_then(|v| self.apply(v))
            .or_else(|| self.default.clone())
            .unwrap_or(Value::Null)
    }

    fn apply(&self, raw: &Value) -> Option<Value> {
        match &self.transform {
            Transform::Text => value_text(raw).map(Value::String),
            Transform::List { separator } => match raw {
                Value::Array(items) => Some(Value::Array(
                    items
                        .iter()
                        .filter_map(value_text)
                        .filter(|s| !s.is_empty())
                        .map(Value::String)
                        .collect(),
                )),
                other => value_text(other).map(|text| {
                    Value::Array(
                        text.split(separator.as_str())
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(|s| Value::String(s.to_string()))
                            .collect(),
                    )
                }),
            },
            Transform::Integer => match raw {
                Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::Number(n.clone())),
                other => value_text(other).and_then(|t| parse_leading_int(&t)).map(Value::from),
            },
            Transform::Boolean => match raw {
                Value::Bool(b) => Some(Value::Bool(*b)),
                other => value_text(other).and_then(|t| parse_bool(&t)).map(Value::Bool),
            },
        }
    }
}

// ============================================================================
// PROFILE
// ============================================================================

/// The reference (owner) table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Columns holding names, canonical first
    pub name_columns: Vec<String>,
    /// Column a newly created reference row gets its name in
    pub insert_column: String,
}

fn default_id_column() -> String {
    "id".to_string()
}

/// Where a row's owner (or own) name comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameSources {
    /// Input columns holding a reference name, priority order
    pub name_sources: Vec<String>,
    /// Input columns holding an already-known reference id
    #[serde(default)]
    pub id_sources: Vec<String>,
}

/// The dependent table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub table: String,
    /// Foreign-key column receiving the resolved reference id
    pub owner_column: String,
    /// Conflict key for upsert mode
    #[serde(default)]
    pub conflict_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub reference: ReferenceSpec,
    pub names: NameSources,
    /// None for profiles that sync the reference table itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSpec>,
    pub fields: Vec<FieldMapping>,
}

/// Owner of a mapped row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerRef {
    /// Input already carried the id
    Id(String),
    /// Needs resolving
    Name(String),
    /// Neither column had a value
    Missing,
}

/// One input row after mapping
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    pub line: usize,
    /// Stable identity of the row's content (resume key)
    pub key: String,
    pub owner: OwnerRef,
    /// Every non-empty name-source value, priority order
    pub names: Vec<String>,
    pub fields: Row,
}

impl ImportProfile {
    // ------------------------------------------------------------------------
    // Built-in profiles
    // ------------------------------------------------------------------------

    pub fn builtin_names() -> &'static [&'static str] {
        &["programmes", "schools"]
    }

    pub fn builtin(name: &str) -> Result<Self, ImportError> {
        match name {
            "programmes" | "programs" => Ok(Self::programmes()),
            "schools" | "rankings" => Ok(Self::schools()),
            other => Err(ImportError::profile(format!(
                "unknown built-in profile '{}'; available: {}",
                other,
                Self::builtin_names().join(", ")
            ))),
        }
    }

    fn school_reference() -> ReferenceSpec {
        ReferenceSpec {
            table: "schools".to_string(),
            id_column: "id".to_string(),
            name_columns: vec!["cn_name".to_string(), "en_name".to_string()],
            insert_column: "cn_name".to_string(),
        }
    }

    /// Programme CSVs (uk_programmes.csv, hongkong_programmes.csv, ...)
    pub fn programmes() -> Self {
        ImportProfile {
            name: "programmes".to_string(),
            description: "Programme rows owned by a school, resolved by school name".to_string(),
            reference: Self::school_reference(),
            names: NameSources {
                name_sources: vec![
                    "school_name".to_string(),
                    "school".to_string(),
                    "school_id".to_string(),
                ],
                id_sources: Vec::new(),
            },
            target: Some(TargetSpec {
                table: "programs".to_string(),
                owner_column: "school_id".to_string(),
                conflict_columns: vec!["school_id".to_string(), "en_name".to_string()],
            }),
            fields: vec![
                FieldMapping::new("cn_name").from(&["cn_name", "major_name"]).or_empty(),
                FieldMapping::new("en_name").from(&["en_name", "ename"]).required(),
                FieldMapping::new("degree").default_value(Value::String("硕士".to_string())),
                FieldMapping::new("duration").or_empty(),
                FieldMapping::new("faculty").or_empty(),
                FieldMapping::new("category").or_empty(),
                FieldMapping::new("tags")
                    .transform(Transform::List {
                        separator: ",".to_string(),
                    })
                    .default_value(Value::Array(Vec::new())),
                FieldMapping::new("introduction").or_empty(),
                FieldMapping::new("objectives").or_empty(),
                FieldMapping::new("apply_requirements")
                    .from(&["apply_requirements", "requirements"])
                    .or_empty(),
                FieldMapping::new("language_requirements").or_empty(),
                FieldMapping::new("curriculum").or_empty(),
                FieldMapping::new("success_cases").or_empty(),
                FieldMapping::new("entry_month").or_empty(),
                FieldMapping::new("interview").or_empty(),
                FieldMapping::new("analysis").or_empty(),
                FieldMapping::new("tuition_fee").or_empty(),
                FieldMapping::new("url").or_empty(),
            ],
        }
    }

    /// School rows: QS ranking exports, description/tag enrichment sheets
    pub fn schools() -> Self {
        ImportProfile {
            name: "schools".to_string(),
            description: "School rows matched by name; update when found, create otherwise"
                .to_string(),
            reference: Self::school_reference(),
            names: NameSources {
                name_sources: vec![
                    "cn_name".to_string(),
                    "en_name".to_string(),
                    "university".to_string(),
                    "institution".to_string(),
                    "name".to_string(),
                ],
                id_sources: Vec::new(),
            },
            target: None,
            fields: vec![
                FieldMapping::new("cn_name"),
                FieldMapping::new("en_name").from(&["en_name", "university", "institution", "name"]),
                FieldMapping::new("country").from(&["country", "location"]),
                FieldMapping::new("region"),
                FieldMapping::new("description"),
                FieldMapping::new("ranking").transform(Transform::Integer),
                FieldMapping::new("qs_rank_2025")
                    .from(&["qs_rank_2025", "rank_2025"])
                    .transform(Transform::Integer),
                FieldMapping::new("qs_rank_2024")
                    .from(&["qs_rank_2024", "rank_2024"])
                    .transform(Transform::Integer),
                FieldMapping::new("tags").transform(Transform::List {
                    separator: "|".to_string(),
                }),
                FieldMapping::new("url"),
            ],
        }
    }

    // ------------------------------------------------------------------------
    // TOML
    // ------------------------------------------------------------------------

    pub fn from_toml_str(text: &str) -> Result<Self, ImportError> {
        let profile: ImportProfile = toml::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ImportError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ImportError::profile(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml(&self) -> Result<String, ImportError> {
        toml::to_string_pretty(self).map_err(|e| ImportError::profile(e.to_string()))
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Structural checks: identifiers, non-empty name sources, unique targets
    pub fn validate(&self) -> Result<(), ImportError> {
        let ident = |name: &str| {
            check_identifier(name)
                .map(|_| ())
                .map_err(|e| ImportError::profile(format!("profile '{}': {}", self.name, e)))
        };

        ident(&self.reference.table)?;
        ident(&self.reference.id_column)?;
        ident(&self.reference.insert_column)?;
        if self.reference.name_columns.is_empty() {
            return Err(ImportError::profile(format!(
                "profile '{}': reference needs at least one name column",
                self.name
            )));
        }
        for column in &self.reference.name_columns {
            ident(column)?;
        }

        if self.names.name_sources.is_empty() && self.names.id_sources.is_empty() {
            return Err(ImportError::profile(format!(
                "profile '{}': needs at least one name or id source column",
                self.name
            )));
        }

        if let Some(target) = &self.target {
            ident(&target.table)?;
            ident(&target.owner_column)?;
            for column in &target.conflict_columns {
                ident(column)?;
            }
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            ident(&field.target)?;
            if !seen.insert(field.target.as_str()) {
                return Err(ImportError::profile(format!(
                    "profile '{}': field '{}' mapped twice",
                    self.name, field.target
                )));
            }
            if let Some(target) = &self.target {
                if field.target == target.owner_column {
                    return Err(ImportError::profile(format!(
                        "profile '{}': '{}' is the owner column and is filled by resolution",
                        self.name, field.target
                    )));
                }
            }
        }

        Ok(())
    }

    /// Check the first parsed row's columns once per import
    ///
    /// Fatal when no owner name/id column exists at all; otherwise returns
    /// warnings for required fields with none of their aliases present.
    pub fn validate_headers(&self, first: &SourceRow) -> Result<Vec<String>, ImportError> {
        let present = |column: &str| first.fields.contains_key(column);

        let has_owner = self
            .names
            .name_sources
            .iter()
            .chain(self.names.id_sources.iter())
            .any(|c| present(c));

        if !has_owner {
            let mut expected: Vec<&str> =
                self.names.name_sources.iter().map(|s| s.as_str()).collect();
            expected.extend(self.names.id_sources.iter().map(|s| s.as_str()));
            return Err(ImportError::config(format!(
                "input has none of the name columns [{}] required by profile '{}'",
                expected.join(", "),
                self.name
            )));
        }

        let warnings = self
            .fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| !f.source_columns().into_iter().any(present))
            .map(|f| {
                format!(
                    "input has no column for required field '{}' (looked for: {})",
                    f.target,
                    f.source_columns().join(", ")
                )
            })
            .collect();

        Ok(warnings)
    }

    // ------------------------------------------------------------------------
    // Mapping
    // ------------------------------------------------------------------------

    pub fn map_row(&self, row: &SourceRow) -> MappedRow {
        let names: Vec<String> = self
            .names
            .name_sources
            .iter()
            .filter_map(|c| row.fields.get(c))
            .filter_map(value_text)
            .filter(|v| !v.is_empty())
            .collect();

        let owner = match row.first_of(&self.names.id_sources) {
            Some(id) => OwnerRef::Id(id),
            None => match names.first() {
                Some(name) => OwnerRef::Name(name.clone()),
                None => OwnerRef::Missing,
            },
        };

        let fields: Row = self
            .fields
            .iter()
            .map(|f| (f.target.clone(), f.extract(row)))
            .collect();

        let key = row_key(&owner, &fields);

        MappedRow {
            line: row.line,
            key,
            owner,
            names,
            fields,
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// SHA-256 over owner + fields (serde_json maps serialize in key order)
pub fn row_key(owner: &OwnerRef, fields: &Row) -> String {
    let owner = match owner {
        OwnerRef::Id(id) => format!("id:{}", id),
        OwnerRef::Name(name) => format!("name:{}", name.trim().to_lowercase()),
        OwnerRef::Missing => "missing".to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update(b"|");
    hasher.update(Value::Object(fields.clone()).to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn parse_leading_int(text: &str) -> Option<i64> {
    let digits: String = text
        .trim()
        .trim_start_matches('=')
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
