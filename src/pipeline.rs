// 🚚 Import pipeline - parsed input → mapped rows → resolved owners → writes
//
// Strictly sequential. Only configuration problems return Err; everything
// row-level ends up as an outcome in the RunReport.

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::loader::{BatchLoader, DependentRecord};
use crate::mapping::{ImportProfile, MappedRow, OwnerRef};
use crate::report::{ImportOutcome, RunReport, SkipReason};
use crate::resolver::EntityResolver;
use crate::source::ParsedInput;
use crate::store::Store;
use tracing::{info, warn};

/// Dependent-table import (programmes → programs, owned by schools)
pub fn import_dependents(
    store: &dyn Store,
    profile: &ImportProfile,
    config: &ImportConfig,
    input: &ParsedInput,
) -> Result<RunReport, ImportError> {
    config.validate()?;
    profile.validate()?;
    let target = profile.target.as_ref().ok_or_else(|| {
        ImportError::profile(format!(
            "profile '{}' has no target table; it syncs '{}' directly",
            profile.name, profile.reference.table
        ))
    })?;

    // Fail on bad write options before anything touches the store
    let loader = BatchLoader::new(
        store,
        &target.table,
        config.batch_size,
        config.mode,
        &target.conflict_columns,
    )?
    .with_owner_column(&target.owner_column);

    let mut report = RunReport::start(&profile.name, &input.source_file, config.mode);
    let rows = match prepare(profile, config, input, &mut report)? {
        Some(rows) => rows,
        None => return Ok(report),
    };

    // Owners
    let mut names = Vec::new();
    for row in &rows {
        if let OwnerRef::Name(name) = &row.owner {
            names.push(name.clone());
        }
    }
    let resolution = EntityResolver::new(store, &profile.reference, config).resolve(&names);

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let owner_id = match &row.owner {
            OwnerRef::Id(id) => Some(id.clone()),
            OwnerRef::Name(name) => resolution.id_for(name).map(str::to_string),
            OwnerRef::Missing => {
                report.push(
                    row.line,
                    &row.key,
                    ImportOutcome::Skipped(SkipReason::MissingOwner),
                );
                continue;
            }
        };
        records.push(DependentRecord {
            line: row.line,
            key: row.key,
            owner_id,
            fields: row.fields,
        });
    }

    // Writes
    info!(records = records.len(), table = %target.table, mode = %config.mode, "writing records");
    let loaded = loader.load(&records);
    for row in loaded.outcomes {
        report.push(row.line, &row.key, row.outcome);
    }

    report.summary.references_created = resolution.created.len();
    report.summary.unresolved_names = resolution.unresolved;
    report.summary.fuzzy_matches = resolution.fuzzy_matches;
    report.summary.round_trips = loaded.round_trips;
    report.finish();

    info!(
        written = report.summary.written,
        skipped = report.summary.skipped,
        failed = report.summary.failed,
        "import finished"
    );
    Ok(report)
}

/// Reference-table import (school rankings, descriptions)
pub fn sync_references(
    store: &dyn Store,
    profile: &ImportProfile,
    config: &ImportConfig,
    input: &ParsedInput,
) -> Result<RunReport, ImportError> {
    config.validate()?;
    profile.validate()?;
    if let Some(target) = &profile.target {
        return Err(ImportError::profile(format!(
            "profile '{}' writes dependent rows into '{}'; use it with the programs command",
            profile.name, target.table
        )));
    }

    let mut report = RunReport::start(&profile.name, &input.source_file, config.mode);
    let rows = match prepare(profile, config, input, &mut report)? {
        Some(rows) => rows,
        None => return Ok(report),
    };

    let synced = EntityResolver::new(store, &profile.reference, config).sync(&rows)?;
    for row in synced.outcomes {
        report.push(row.line, &row.key, row.outcome);
    }
    report.summary.fuzzy_matches = synced.fuzzy_matches;
    report.summary.round_trips = synced.round_trips;
    report.finish();

    info!(
        created = report.summary.created,
        updated = report.summary.updated,
        skipped = report.summary.skipped,
        failed = report.summary.failed,
        "sync finished"
    );
    Ok(report)
}

/// Parse issues → header check → mapping → resume filter
///
/// `None` means there is nothing left to process.
fn prepare(
    profile: &ImportProfile,
    config: &ImportConfig,
    input: &ParsedInput,
    report: &mut RunReport,
) -> Result<Option<Vec<MappedRow>>, ImportError> {
    for issue in &input.errors {
        report.push(
            issue.line,
            "",
            ImportOutcome::Skipped(SkipReason::Malformed(issue.message.clone())),
        );
    }

    let first = match input.rows.first() {
        Some(first) => first,
        None => {
            warn!(file = %input.source_file, "input has no rows");
            report.finish();
            return Ok(None);
        }
    };
    for warning in profile.validate_headers(first)? {
        warn!("{}", warning);
    }

    let mut rows: Vec<MappedRow> = input.rows.iter().map(|r| profile.map_row(r)).collect();
    info!(
        rows = rows.len(),
        malformed = input.errors.len(),
        format = input.format.name(),
        "input mapped"
    );

    if let Some(previous) = &config.resume {
        let retry = previous.retry_keys();
        let before = rows.len();
        rows.retain(|r| retry.contains(&r.key));
        info!(kept = rows.len(), dropped = before - rows.len(), "resuming previous run");
    }

    Ok(Some(rows))
}
