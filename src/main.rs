use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

// Use library instead of local modules
use bee_profile::{
    init_logging, load_raw_records, AppConfig, Aggregator, ProfileStore, SpeciesKey,
    SqliteProfileStore,
};

#[derive(Parser)]
#[command(name = "bee-profile", version, about = "Aggregate bee species profiles from GBIF, IUCN, iNaturalist and NatureServe")]
struct Cli {
    /// SQLite database (overrides config and BEE_PROFILE_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize, resolve and merge provider dumps, then replace the stored profiles
    Aggregate {
        /// Provider dumps or RawRecord envelope files (JSON)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Synonym table (.json or .csv)
        #[arg(long)]
        synonyms: Option<PathBuf>,
    },

    /// One line per stored profile
    List,

    /// Full profile as pretty JSON
    Show {
        /// Scientific name, e.g. "Bombus affinis"
        #[arg(num_args = 1.., required = true)]
        name: Vec<String>,
    },

    /// Names the resolver refused to merge
    Review,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load()?.with_database_path(cli.db);
    init_logging(&config.log_filter);

    match cli.command {
        Command::Aggregate { inputs, synonyms } => {
            run_aggregate(&config.with_synonyms_path(synonyms), &inputs)
        }
        Command::List => run_list(&config),
        Command::Show { name } => run_show(&config, &name.join(" ")),
        Command::Review => run_review(&config),
    }
}

fn open_store(config: &AppConfig) -> Result<SqliteProfileStore> {
    SqliteProfileStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database: {:?}", config.database_path))
}

fn open_existing_store(config: &AppConfig) -> Result<SqliteProfileStore> {
    if !config.database_path.exists() {
        bail!(
            "Database not found at {:?}. Run `bee-profile aggregate <input.json>` first.",
            config.database_path
        );
    }
    open_store(config)
}

fn run_aggregate(config: &AppConfig, inputs: &[PathBuf]) -> Result<()> {
    println!("🐝 Bee Profile Aggregation");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load raw records
    println!("\n📂 Loading provider data...");
    let mut raws = Vec::new();
    for input in inputs {
        let records = load_raw_records(input)?;
        println!("✓ {} records from {}", records.len(), input.display());
        raws.extend(records);
    }

    // 2. Synonym table
    let synonyms = config.load_synonyms()?;
    if !synonyms.is_empty() {
        println!("✓ {} synonym links loaded", synonyms.len());
    }

    // 3. Normalize → resolve → merge
    println!("\n🔄 Aggregating...");
    let run = Aggregator::new(Arc::new(synonyms)).run(&raws)?;

    for rejected in &run.rejected {
        println!("   ⚠️  record #{} rejected: {}", rejected.index, rejected.error);
    }

    // 4. Persist
    println!("\n💾 Writing profiles...");
    let store = open_store(config)?;
    store.replace_all(&run)?;
    println!("✓ Database: {}", config.database_path.display());

    // 5. Report
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {}", run.summary());
    for (status, count) in &run.summary.by_status {
        println!("   {:<8} {}", status, count);
    }
    if !run.needs_review.is_empty() {
        println!("\n🔍 {} names need review (run `bee-profile review`)", run.needs_review.len());
    }

    Ok(())
}

fn run_list(config: &AppConfig) -> Result<()> {
    let store = open_existing_store(config)?;

    let mut count = 0;
    for profile in store.list_profiles()? {
        println!("{}", profile?.summary());
        count += 1;
    }

    println!("\n{} profiles", count);
    Ok(())
}

fn run_show(config: &AppConfig, name: &str) -> Result<()> {
    let store = open_existing_store(config)?;
    let profile = store
        .get_profile(&SpeciesKey::from_scientific_name(name))
        .with_context(|| format!("No profile for {:?}", name))?;

    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

fn run_review(config: &AppConfig) -> Result<()> {
    let store = open_existing_store(config)?;
    let entries = store.needs_review()?;

    if entries.is_empty() {
        println!("✓ Nothing needs review");
        return Ok(());
    }

    for entry in &entries {
        let candidates: Vec<&str> = entry.candidates.iter().map(|c| c.as_str()).collect();
        println!(
            "🔍 {} ({} records): {} → [{}]",
            entry.species_key,
            entry.record_count,
            entry.reason,
            candidates.join(", ")
        );
    }

    Ok(())
}
