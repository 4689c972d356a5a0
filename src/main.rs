use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use studyabroad_import::logging::{default_filter, init_tracing};
use studyabroad_import::{
    import_dependents, read_input, sync_references, ImportConfig, ImportProfile, LookupStrategy,
    Region, RestStore, RunReport, SqliteStore, Store, StoreConfig, WriteMode,
};

#[derive(Parser, Debug)]
#[command(
    name = "studyabroad-import",
    version,
    about = "Import programme and school spreadsheets into the admin database"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Write to a local SQLite file instead of the remote store
    #[arg(long, global = true, value_name = "PATH")]
    sqlite: Option<PathBuf>,

    /// Debug-level logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Trace-level logs (row payloads included)
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import programmes, resolving (and creating) their schools by name
    Programs(ProgramsArgs),
    /// Update or create schools from a ranking / description sheet
    Schools(SchoolsArgs),
    /// Print the built-in import profiles as TOML
    Profiles,
}

#[derive(Args, Debug)]
struct ProgramsArgs {
    /// CSV or JSON input file
    file: PathBuf,

    /// Write mode
    #[arg(value_enum, default_value_t = ModeArg::Insert)]
    mode: ModeArg,

    /// Names per lookup query and per school insert
    #[arg(long, default_value_t = 30)]
    lookup_chunk_size: usize,

    /// How existing schools are fetched
    #[arg(long, value_enum, default_value_t = LookupArg::FullTable)]
    lookup: LookupArg,

    /// Leave unknown schools unresolved instead of creating them
    #[arg(long)]
    no_create: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct SchoolsArgs {
    /// CSV or JSON input file
    file: PathBuf,

    /// Only fill fields that are empty on the existing school
    #[arg(long)]
    fill_missing: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Country defaults for created schools (uk, hongkong, australia, ...)
    #[arg(long)]
    country: Option<String>,

    /// Records per bulk write
    #[arg(long, default_value_t = 50)]
    batch_size: usize,

    /// Exact name matches only
    #[arg(long)]
    no_fuzzy: bool,

    /// Rows per page when the whole school table is fetched
    #[arg(long, default_value_t = 1000)]
    lookup_page_size: usize,

    /// TOML import profile instead of the built-in one
    #[arg(long, value_name = "TOML")]
    profile: Option<PathBuf>,

    /// Preamble lines before the CSV header
    #[arg(long, default_value_t = 0)]
    skip_rows: usize,

    /// Write a JSON run report here
    #[arg(long, value_name = "JSON")]
    report: Option<PathBuf>,

    /// Only retry the failed/skipped rows of this earlier report
    #[arg(long, value_name = "JSON")]
    resume: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Insert,
    Upsert,
}

impl From<ModeArg> for WriteMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Insert => WriteMode::Insert,
            ModeArg::Upsert => WriteMode::Upsert,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LookupArg {
    FullTable,
    Chunked,
}

impl From<LookupArg> for LookupStrategy {
    fn from(lookup: LookupArg) -> Self {
        match lookup {
            LookupArg::FullTable => LookupStrategy::FullTable,
            LookupArg::Chunked => LookupStrategy::Chunked,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(default_filter(cli.verbose, cli.debug))?;

    if let Err(e) = dotenvy::dotenv() {
        debug!("no .env loaded: {}", e);
    }

    match &cli.command {
        Command::Programs(args) => run_programs(&cli, args),
        Command::Schools(args) => run_schools(&cli, args),
        Command::Profiles => print_profiles(),
    }
}

fn run_programs(cli: &Cli, args: &ProgramsArgs) -> Result<()> {
    println!("🎓 Programme import - {}", args.file.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let profile = load_profile(args.common.profile.as_deref(), "programmes")?;
    let mut config = base_config(&args.common)?;
    config.mode = args.mode.into();
    config.lookup = args.lookup.into();
    config.lookup_chunk_size = args.lookup_chunk_size;
    config.create_missing = !args.no_create;
    config.validate()?;

    let input = load_input(&args.file, config.skip_rows)?;
    let store = open_store(cli.sqlite.as_deref(), &profile)?;

    println!("\n💾 Writing {} ({})...", profile.name, config.mode);
    let report = import_dependents(store.as_ref(), &profile, &config, &input)
        .context("programme import aborted")?;

    finish(&report, args.common.report.as_deref())
}

fn run_schools(cli: &Cli, args: &SchoolsArgs) -> Result<()> {
    println!("🏫 School sync - {}", args.file.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let profile = load_profile(args.common.profile.as_deref(), "schools")?;
    let mut config = base_config(&args.common)?;
    config.fill_missing_only = args.fill_missing;
    config.validate()?;

    let input = load_input(&args.file, config.skip_rows)?;
    let store = open_store(cli.sqlite.as_deref(), &profile)?;

    println!(
        "\n💾 Syncing {}{}...",
        profile.reference.table,
        if config.fill_missing_only {
            " (fill missing only)"
        } else {
            ""
        }
    );
    let report = sync_references(store.as_ref(), &profile, &config, &input)
        .context("school sync aborted")?;

    finish(&report, args.common.report.as_deref())
}

fn print_profiles() -> Result<()> {
    for name in ImportProfile::builtin_names() {
        let profile = ImportProfile::builtin(name)?;
        println!("# built-in profile: {}", name);
        println!("{}", profile.to_toml()?);
    }
    Ok(())
}

fn base_config(common: &CommonArgs) -> Result<ImportConfig> {
    let region = common
        .country
        .as_deref()
        .map(Region::from_code)
        .transpose()?;

    let resume = match &common.resume {
        Some(path) => Some(
            RunReport::load(path)
                .with_context(|| format!("cannot read resume report {}", path.display()))?,
        ),
        None => None,
    };

    Ok(ImportConfig {
        batch_size: common.batch_size,
        fuzzy: !common.no_fuzzy,
        lookup_page_size: common.lookup_page_size,
        region,
        skip_rows: common.skip_rows,
        resume,
        ..ImportConfig::default()
    })
}

fn load_profile(path: Option<&Path>, builtin: &str) -> Result<ImportProfile> {
    match path {
        Some(path) => ImportProfile::from_toml_file(path)
            .with_context(|| format!("cannot load profile {}", path.display())),
        None => Ok(ImportProfile::builtin(builtin)?),
    }
}

fn open_store(sqlite: Option<&Path>, profile: &ImportProfile) -> Result<Box<dyn Store>> {
    println!("\n🔧 Connecting to store...");
    let store: Box<dyn Store> = match sqlite {
        Some(path) => Box::new(
            SqliteStore::open(path)
                .with_context(|| format!("cannot open sqlite database {}", path.display()))?,
        ),
        None => {
            let config = StoreConfig::from_env()?;
            Box::new(RestStore::new(&config).context("cannot build store client")?)
        }
    };

    store
        .ping(&profile.reference.table)
        .with_context(|| format!("store {} is not reachable", store.describe()))?;
    println!("✓ Connected: {}", store.describe());
    Ok(store)
}

fn load_input(file: &Path, skip_rows: usize) -> Result<studyabroad_import::ParsedInput> {
    println!("\n📂 Loading {}...", file.display());
    let input = read_input(file, skip_rows)
        .with_context(|| format!("cannot read input {}", file.display()))?;
    println!(
        "✓ Loaded {} rows from {} ({} malformed)",
        input.rows.len(),
        input.format.name(),
        input.errors.len()
    );
    Ok(input)
}

fn finish(report: &RunReport, report_path: Option<&Path>) -> Result<()> {
    println!("\n{}", report.summary.render());

    if let Some(path) = report_path {
        report
            .save(path)
            .with_context(|| format!("cannot write report {}", path.display()))?;
        info!(path = %path.display(), "run report written");
        println!("📝 Report written to {}", path.display());
    }

    Ok(())
}
