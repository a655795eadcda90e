use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use index_history::{
    audit, store::read_snapshot_csv, Backfill, BackfillError, CompositionSchedule, Direction,
    IndexProfile, IndexRegistry, Ledger, ListingDirectory, NameResolver, NameSearch, RunSummary,
    Snapshot, SnapshotStore, StaticDirectory, StaticSearch, WalkPlan,
};

/// How far back to look for a seed snapshot when none is given
const SEED_LOOKBACK_DAYS: u32 = 14;

#[derive(Parser)]
#[command(name = "index-history", version, about = "Reconstruct daily index membership history")]
struct Cli {
    /// Snapshot root (`<root>/YYYY/MM/DD/constituents-<code>.{csv,json}`)
    #[arg(long, global = true, default_value = "docs")]
    root: PathBuf,

    /// `Code,Start` registry of index inception dates
    #[arg(long, global = true, default_value = "supported-indices.csv")]
    registry: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk a change ledger from a seed snapshot and write missing days
    Backfill(BackfillArgs),

    /// Carry a weights file's compositions forward day by day
    ForwardFill(ForwardFillArgs),

    /// Report missing snapshot files per registered index
    Audit {
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve ledger names only (no writes)
    Resolve(SourceArgs),
}

#[derive(Args)]
struct SourceArgs {
    /// Built-in profile code (dax, ftse100) or path to a profile JSON
    #[arg(long)]
    profile: String,

    /// Change ledger CSV
    #[arg(long)]
    ledger: PathBuf,

    /// Seed snapshot CSV (default: newest snapshot in the store)
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Day the seed describes (YYYY-MM-DD, default: today)
    ///
    /// The seed is membership at the end of this day: ledger events dated on it
    /// are taken as already applied. A forward walk only applies events after it,
    /// so seed a forward walk on the day before its first event.
    #[arg(long)]
    seed_day: Option<NaiveDate>,

    /// Recorded `symbol,name` exchange listing
    #[arg(long)]
    listing: Option<PathBuf>,

    /// Recorded name-search results (JSON object keyed by query)
    #[arg(long)]
    search_cache: Option<PathBuf>,

    /// Scrape a live exchange listing from this URL
    #[cfg(feature = "fetch")]
    #[arg(long)]
    listing_url: Option<String>,

    /// Query the live name-search service (FMP_API_KEY)
    #[cfg(feature = "fetch")]
    #[arg(long)]
    online_search: bool,
}

#[derive(Args)]
struct BackfillArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Last day to walk to (default: registry start when backward, today when forward)
    #[arg(long)]
    stop: Option<NaiveDate>,

    /// Override the profile's walk direction
    #[arg(long, value_enum)]
    direction: Option<DirectionArg>,

    /// Where to write the unresolved-name audit
    #[arg(long)]
    audit_path: Option<PathBuf>,
}

#[derive(Args)]
struct ForwardFillArgs {
    /// Built-in profile code or path to a profile JSON
    #[arg(long)]
    profile: String,

    /// Wide weights CSV (`DATE,<sym1>,<sym2>,...`)
    #[arg(long)]
    weights: PathBuf,

    /// Last day to fill (default: today)
    #[arg(long)]
    until: Option<NaiveDate>,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Backward,
    Forward,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Backward => Direction::Backward,
            DirectionArg::Forward => Direction::Forward,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            // 2 = unresolved names, nothing written
            match err.downcast_ref::<BackfillError>() {
                Some(e) if e.is_unresolved() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let store = SnapshotStore::new(&cli.root);
    match cli.command {
        Command::Backfill(args) => run_backfill(store, &cli.registry, args),
        Command::ForwardFill(args) => run_forward_fill(store, &cli.registry, args),
        Command::Audit { json } => run_audit(&store, &cli.registry, json),
        Command::Resolve(args) => run_resolve(store, args),
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

// ============================================================================
// INPUTS
// ============================================================================

/// External lookup providers chosen on the command line
#[derive(Default)]
struct Providers {
    directory: Option<Box<dyn ListingDirectory>>,
    search: Option<Box<dyn NameSearch>>,
}

impl Providers {
    fn from_args(args: &SourceArgs) -> Result<Self> {
        let mut providers = Providers::default();

        if let Some(path) = &args.listing {
            providers.directory = Some(Box::new(StaticDirectory::from_csv(path)?));
        }
        if let Some(path) = &args.search_cache {
            providers.search = Some(Box::new(StaticSearch::from_json(path)?));
        }

        #[cfg(feature = "fetch")]
        {
            use index_history::{HttpListingDirectory, HttpNameSearch};
            if let Some(url) = &args.listing_url {
                providers.directory = Some(Box::new(HttpListingDirectory::new(url)));
            }
            if args.online_search {
                providers.search = Some(Box::new(HttpNameSearch::fmp_from_env()));
            }
        }

        Ok(providers)
    }

    fn resolver<'a>(&'a self, profile: &IndexProfile) -> Result<NameResolver<'a>> {
        let mut resolver = NameResolver::new(profile)?;
        if let Some(directory) = &self.directory {
            resolver = resolver.with_directory(directory.as_ref())?;
        }
        if let Some(search) = &self.search {
            resolver = resolver.with_search(search.as_ref());
        }
        Ok(resolver)
    }
}

/// Seed snapshot and the day it describes
fn load_seed(store: &SnapshotStore, profile: &IndexProfile, args: &SourceArgs) -> Result<(NaiveDate, Snapshot)> {
    let requested = args.seed_day.unwrap_or_else(today);
    let (day, path) = match &args.seed {
        Some(path) => (requested, path.clone()),
        None => store
            .latest_on_or_before(&profile.code, requested, SEED_LOOKBACK_DAYS)
            .with_context(|| {
                format!(
                    "No {} snapshot within {} days of {}; pass --seed",
                    profile.code, SEED_LOOKBACK_DAYS, requested
                )
            })?,
    };
    let seed = read_snapshot_csv(&path)?;
    println!("✓ Seed {} ({} rows) from {}", day, seed.len(), path.display());
    Ok((day, seed))
}

fn load_registry_start(registry: &Path, code: &str) -> Result<Option<NaiveDate>> {
    if !registry.exists() {
        tracing::warn!(path = %registry.display(), "registry not found, no inception bound");
        return Ok(None);
    }
    Ok(IndexRegistry::load(registry)?.start_of(code))
}

fn print_summary(summary: &RunSummary) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {} days walked", summary.days);
    println!("   written:  {}", summary.written);
    println!("   skipped:  {}", summary.skipped);
    println!("   repaired: {}", summary.repaired);
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_backfill(store: SnapshotStore, registry: &Path, args: BackfillArgs) -> Result<()> {
    let profile = IndexProfile::locate(&args.source.profile)?;
    println!("🔁 Backfill {} ({})", profile.code, profile.suffix);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading ledger...");
    let ledger = Ledger::load(&args.source.ledger, &profile.ledger)?;
    println!("✓ {} events ({} rows dropped)", ledger.len(), ledger.dropped_rows());
    if let Some((first, last)) = ledger.span() {
        println!("  events span {} → {}", first, last);
    }

    let (seed_day, seed) = load_seed(&store, &profile, &args.source)?;
    let start = load_registry_start(registry, &profile.code)?;

    let direction = args.direction.map(Direction::from).unwrap_or(profile.direction);
    let stop_day = match (args.stop, direction) {
        (Some(stop), _) => stop,
        (None, Direction::Forward) => today(),
        (None, Direction::Backward) => match start {
            Some(start) => start,
            None => bail!("No registry start for {}; pass --stop", profile.code),
        },
    };

    let providers = Providers::from_args(&args.source)?;
    let mut backfill = Backfill::new(&profile, store, providers.resolver(&profile)?).with_start_bound(start);
    if let Some(path) = args.audit_path {
        backfill = backfill.with_audit_path(path);
    }

    println!("\n🚶 Walking {} → {}...", seed_day, stop_day);
    let summary = backfill
        .run(&ledger, &seed, &WalkPlan::new(seed_day, stop_day, direction))
        .map_err(|err| {
            if err.is_unresolved() {
                println!("📝 Unresolved-name audit at {}", backfill.audit_path().display());
            }
            err
        })?;
    print_summary(&summary);
    Ok(())
}

fn run_forward_fill(store: SnapshotStore, registry: &Path, args: ForwardFillArgs) -> Result<()> {
    let profile = IndexProfile::locate(&args.profile)?;
    println!("📅 Forward fill {} from {}", profile.code, args.weights.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let schedule = CompositionSchedule::load_weights(&args.weights, &profile.suffix)?;
    match (schedule.first(), schedule.last_day()) {
        (Some((first, _)), Some(last)) => {
            println!("✓ {} compositions ({} → {})", schedule.len(), first, last)
        }
        _ => println!("✓ {} compositions", schedule.len()),
    }

    let start = load_registry_start(registry, &profile.code)?;
    let backfill = Backfill::new(&profile, store, NameResolver::new(&profile)?).with_start_bound(start);

    let summary = backfill.forward_fill(&schedule, args.until.unwrap_or_else(today))?;
    print_summary(&summary);
    Ok(())
}

fn run_audit(store: &SnapshotStore, registry: &Path, json: bool) -> Result<()> {
    let registry = IndexRegistry::load(registry)?;
    let report = audit(&registry, store)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
        println!("Total missing files: {}", report.total_missing());
    }
    Ok(())
}

fn run_resolve(store: SnapshotStore, args: SourceArgs) -> Result<()> {
    let profile = IndexProfile::locate(&args.profile)?;
    let ledger = Ledger::load(&args.ledger, &profile.ledger)?;
    let (_, seed) = load_seed(&store, &profile, &args)?;

    let providers = Providers::from_args(&args)?;
    let backfill = Backfill::new(&profile, store, providers.resolver(&profile)?);
    let resolution = backfill.resolve(&ledger, &seed);

    println!("\n🔍 Resolution for {}", profile.code);
    for (tier, count) in resolution.tier_counts() {
        println!("   {:<16} {}", tier.as_str(), count);
    }

    if resolution.is_complete() {
        println!("✅ All {} names resolved", resolution.resolved.len());
        return Ok(());
    }

    println!("\n❌ {} unresolved:", resolution.unresolved.len());
    for name in &resolution.unresolved {
        println!("   - {}", name);
        for line in resolution.debug.get(name).into_iter().flatten() {
            println!("       {}", line);
        }
    }
    Ok(())
}
