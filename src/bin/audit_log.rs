//! audit_log - inspect and verify the LensBlock incident log
//!
//! Prints the most recent incidents, newest first, and optionally walks the
//! whole hash chain. Editing or deleting a stored row makes `--verify` fail.

use anyhow::Result;
use clap::Parser;

use lensblock::audit::StoredIncident;
use lensblock::{AuditLog, SqliteAuditLog};

#[derive(Parser, Debug)]
#[command(name = "audit_log", about = "Show and verify LensBlock incident records")]
struct Args {
    /// Path to the audit SQLite DB
    #[arg(long, env = "LENSBLOCK_AUDIT_DB", default_value = "lensblock_audit.db")]
    db: String,

    /// Number of records to show
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Verify the hash chain after listing
    #[arg(long)]
    verify: bool,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let log = SqliteAuditLog::open(&args.db)?;

    let records = log.recent(args.limit)?;
    if records.is_empty() {
        println!("audit_log: no incidents in {}", args.db);
    }
    for stored in &records {
        if args.json {
            println!("{}", serde_json::to_string(&stored.record)?);
        } else {
            print_row(stored);
        }
    }

    if args.verify {
        let count = log.verify_chain()?;
        println!();
        println!("audit_log: chain OK ({} entries)", count);
    }
    Ok(())
}

fn print_row(stored: &StoredIncident) {
    let hash = hex::encode(stored.entry_hash);
    println!(
        "#{:<5} t={} {:<42} conf={:.2} dur={:.1}s hash={}",
        stored.id,
        stored.record.timestamp,
        stored.record.threat_type,
        stored.record.confidence,
        stored.record.duration_s,
        &hash[..16]
    );
}
