use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use ecfr_ingest::{
    agency_checksums, complexity_scores, export_agencies_csv, list_agencies, recent_changes,
    word_count_stats, Config, ConnectionPool, FileSource, HttpSource, Ingestor, MalformedPolicy,
    SnapshotSource,
};

#[derive(Parser)]
#[command(name = "ecfr-ingest", version, about = "Ingest and analyze eCFR agency snapshots")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "ECFR_DATABASE_PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download (or read) a snapshot and reconcile it into the store
    Ingest {
        /// Read the snapshot from a saved JSON file (takes precedence over --url)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Source URL
        #[arg(long, env = "ECFR_SOURCE_URL")]
        url: Option<String>,

        /// What to do with malformed records: skip | abort
        #[arg(long, env = "ECFR_MALFORMED_POLICY")]
        policy: Option<MalformedPolicy>,
    },
    /// List top-level agencies, largest first
    Agencies,
    /// Word count summary
    Stats,
    /// Most recent changes
    History {
        #[arg(long, default_value_t = ecfr_ingest::ledger::DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Regulatory complexity ranking
    Complexity,
    /// Current checksum per agency
    Checksums,
    /// Export the agency listing as CSV
    Export {
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // .env first so clap's env fallbacks see it too
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    let pool = ConnectionPool::open(&config.database_path, config.pool_options())
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    match cli.command {
        Command::Ingest { file, url, policy } => run_ingest(&config, pool, file, url, policy),
        Command::Agencies => run_agencies(&pool),
        Command::Stats => run_stats(&pool),
        Command::History { limit } => run_history(&pool, limit),
        Command::Complexity => run_complexity(&pool),
        Command::Checksums => run_checksums(&pool),
        Command::Export { out } => run_export(&pool, out),
    }
}

fn run_ingest(
    config: &Config,
    pool: ConnectionPool,
    file: Option<PathBuf>,
    url: Option<String>,
    policy: Option<MalformedPolicy>,
) -> Result<()> {
    println!("📥 eCFR Ingest - Snapshot → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let source: Box<dyn SnapshotSource> = match file {
        Some(path) => Box::new(FileSource::new(path)),
        None => Box::new(HttpSource::new(url.unwrap_or_else(|| config.source_url.clone()))?),
    };
    let policy = policy.unwrap_or(config.malformed_policy);

    println!("\n📂 Source: {}", source.describe());
    println!("   Malformed records: {}", policy);

    let ingestor = Ingestor::new(pool.clone(), policy);
    let report = ingestor.ingest_from(source.as_ref())?;

    println!("\n💾 Reconciled {} agencies ({} children)", report.top_level_processed, report.children_processed);
    println!("✓ Created:    {}", report.created);
    println!("✓ Updated:    {}", report.updated);
    println!("✓ Unchanged:  {}", report.unchanged);
    println!("✓ References: {}", report.references_upserted);

    if !report.skipped.is_empty() {
        println!("\n⚠️  Skipped {} malformed records:", report.skipped.len());
        for record in &report.skipped {
            println!("   {}: {}", record.location, record.reason);
        }
    }
    if !report.audit_complete() {
        println!("\n⚠️  {} change events could not be recorded", report.audit_failures);
    }

    let conn = pool.get()?;
    let count = ecfr_ingest::verify_count(&conn)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Store contains {} agencies", count);

    Ok(())
}

fn run_agencies(pool: &ConnectionPool) -> Result<()> {
    let conn = pool.get()?;
    let agencies = list_agencies(&conn)?;

    println!("🏛️  {} agencies", agencies.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for agency in &agencies {
        println!(
            "{:<60} {:>10} words  {:>3} refs  titles [{}]",
            agency.name,
            agency.word_count,
            agency.cfr_reference_count,
            agency.cfr_titles_joined()
        );
    }

    Ok(())
}

fn run_stats(pool: &ConnectionPool) -> Result<()> {
    let conn = pool.get()?;
    let stats = word_count_stats(&conn)?;

    println!("📊 Word Count Summary");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Agencies:        {}", stats.total_agencies);
    println!("Total words:     {}", stats.total_words);
    match stats.avg_words_per_agency {
        Some(avg) => println!("Average words:   {:.2}", avg),
        None => println!("Average words:   -"),
    }
    println!("Max words:       {}", stats.max_words.map_or("-".to_string(), |v| v.to_string()));
    println!("Min words:       {}", stats.min_words.map_or("-".to_string(), |v| v.to_string()));

    Ok(())
}

fn run_history(pool: &ConnectionPool, limit: usize) -> Result<()> {
    let conn = pool.get()?;
    let changes = recent_changes(&conn, limit)?;

    println!("🕒 {} recent changes", changes.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for change in &changes {
        let old_words = change
            .event
            .old_word_count
            .map_or("-".to_string(), |v| v.to_string());
        println!(
            "{}  {:<8} {:<50} words {} → {}",
            change.event.changed_at.format("%Y-%m-%d %H:%M:%S"),
            change.event.kind.as_str(),
            change.entity_name,
            old_words,
            change.event.new_word_count
        );
    }

    Ok(())
}

fn run_complexity(pool: &ConnectionPool) -> Result<()> {
    let conn = pool.get()?;
    let scores = complexity_scores(&conn)?;

    println!("🧮 Regulatory Complexity (70% words, 30% CFR references)");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for score in &scores {
        println!(
            "{:>10}  {:<60} ({} words, {} refs)",
            score.complexity_score, score.name, score.word_count, score.cfr_reference_count
        );
    }

    Ok(())
}

fn run_checksums(pool: &ConnectionPool) -> Result<()> {
    let conn = pool.get()?;
    let checksums = agency_checksums(&conn)?;

    println!("🔐 {} agency checksums", checksums.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for entry in &checksums {
        println!("{}  {:<60} {}", entry.checksum, entry.name, entry.last_updated.to_rfc3339());
    }

    Ok(())
}

fn run_export(pool: &ConnectionPool, out: Option<PathBuf>) -> Result<()> {
    let conn = pool.get()?;

    match out {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let rows = export_agencies_csv(&conn, BufWriter::new(file))?;
            println!("✅ Exported {} agencies to {}", rows, path.display());
        }
        None => {
            export_agencies_csv(&conn, std::io::stdout().lock())?;
        }
    }

    Ok(())
}
