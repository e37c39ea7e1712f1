//! lodestore Inspection Tool
//!
//! Looks inside a store on disk: counts, raw scans, single lookups, repair.

use clap::{Parser, Subcommand};
use lodestore::compression::decompress;
use lodestore::{Config, Database, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// lodestore inspection tool
#[derive(Parser, Debug)]
#[command(name = "lodestore-inspect")]
#[command(about = "Inspect and repair a lodestore data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./lodestore_data")]
    data_dir: String,

    /// Maximum number of table files kept open
    #[arg(long, default_value_t = lodestore::config::DEFAULT_OPEN_FILE_LIMIT)]
    open_files: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print table and memtable counts
    Stat,

    /// Dump keys in order with stored and decoded value sizes
    Scan {
        /// Only show keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Stop after this many keys
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print the value stored under a key
    Get {
        /// The key to look up
        key: String,
    },

    /// Quarantine damaged tables, salvage what is readable, replay the WAL
    Repair,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lodestore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .open_file_limit(args.open_files)
        .build();

    if let Err(e) = run(config, args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(config: Config, command: Commands) -> lodestore::Result<()> {
    match command {
        Commands::Stat => {
            let engine = Engine::open(config)?;
            println!("data dir:        {}", engine.data_dir().display());
            println!("sstables:        {}", engine.sstable_count());
            println!("sstable entries: {}", engine.sstable_entry_count());
            println!("memtable:        {} entries", engine.memtable_entry_count());
            println!("wal replayed:    {}", engine.wal_recovery().entries_recovered);
            engine.close()?;
        }

        Commands::Scan { prefix, limit } => {
            let db = Database::open_with_config(config)?;
            let prefix = prefix.unwrap_or_default();
            let mut shown = 0usize;

            for item in db.new_iterator()? {
                let (key, stored) = item?;
                if !key.starts_with(prefix.as_bytes()) {
                    continue;
                }
                if limit.is_some_and(|l| shown >= l) {
                    break;
                }

                let decoded = match decompress(&stored) {
                    Ok(value) => value.len().to_string(),
                    Err(e) => format!("undecodable ({})", e),
                };
                println!(
                    "{}\tstored={}\tdecoded={}",
                    String::from_utf8_lossy(&key),
                    stored.len(),
                    decoded
                );
                shown += 1;
            }
        }

        Commands::Get { key } => {
            let db = Database::open_with_config(config)?;
            let value = db.get(key.as_bytes())?;
            match std::str::from_utf8(&value) {
                Ok(text) => println!("{}", text),
                Err(_) => println!("{}", hex(&value)),
            }
        }

        Commands::Repair => {
            let report = Engine::repair(config)?;
            println!("tables checked:   {}", report.tables.tables_checked);
            println!("tables rebuilt:   {}", report.tables.tables_rebuilt);
            println!("entries salvaged: {}", report.tables.entries_salvaged);
            for path in &report.tables.quarantined {
                println!("quarantined:      {}", path.display());
            }
            println!("wal recovered:    {}", report.wal.entries_recovered);
            println!("wal corrupted:    {}", report.wal.entries_corrupted);
            println!("wal truncated:    {}", report.wal.was_truncated);
        }
    }

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
