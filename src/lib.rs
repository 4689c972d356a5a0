// Study-abroad import toolkit - core library
// Resolves school names to ids and batch-writes programme/school rows.
// Used by the CLI and the integration tests.

pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod mapping;
pub mod pipeline;
pub mod reference;
pub mod region;
pub mod report;
pub mod resolver;
pub mod source;
pub mod store;

// Re-export commonly used types
pub use config::{ImportConfig, LookupStrategy, StoreConfig, WriteMode};
pub use error::{ImportError, StoreError};
pub use loader::{BatchLoader, DependentRecord, LoadResult};
pub use mapping::{FieldMapping, ImportProfile, MappedRow, OwnerRef, Transform};
pub use pipeline::{import_dependents, sync_references};
pub use reference::{normalize_name, NameMatch, ReferenceEntity, ReferenceRegistry};
pub use region::Region;
pub use report::{ImportOutcome, ImportSummary, RowReport, RunReport, SkipReason};
pub use resolver::{EntityResolver, Resolution};
pub use source::{read_input, ParsedInput, SourceFormat, SourceRow};
pub use store::{Filter, Query, RestStore, Row, SqliteStore, Store};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
