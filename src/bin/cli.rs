use clap::{Parser, Subcommand};
use comfy_table::{
    Cell, CellAlignment, ContentArrangement, Table,
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use term_bloom_rs::common::{bits2hr, bytes2hr};
use term_bloom_rs::snapshot::{self, WindowSnapshot};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header and per-term fill of a window snapshot
    Inspect {
        /// Path to the snapshot file
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Check whether a key is present in a window snapshot
    Check {
        /// Path to the snapshot file
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Key to look up
        #[arg(short, long)]
        key: String,
    },

    /// Browse terms archived in a redb database
    #[cfg(feature = "redb")]
    Archive {
        /// Path to the database file
        #[arg(short, long)]
        db: PathBuf,

        #[command(subcommand)]
        operation: ArchiveCommands,
    },
}

#[cfg(feature = "redb")]
#[derive(Subcommand)]
enum ArchiveCommands {
    /// List archived term numbers
    List,

    /// Show one archived term
    Show {
        #[arg(short, long)]
        term: u64,

        /// Also check this key against the term
        #[arg(short, long)]
        key: Option<String>,

        /// Hash functions used by the filter that wrote the archive
        #[arg(long, requires = "key")]
        num_hashes: Option<u64>,
    },
}

fn load_window(
    path: &Path,
) -> Result<WindowSnapshot, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)?;
    Ok(snapshot::read_window(&mut BufReader::new(file))?)
}

fn fill_percent(bits_set: u32, m: u64) -> f64 {
    if m == 0 {
        return 0.0;
    }
    bits_set as f64 * 100.0 / m as f64
}

/// One row per term in the snapshot, the active one marked.
fn term_table(window: &WindowSnapshot) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Term").set_alignment(CellAlignment::Center),
            Cell::new("Remaining").set_alignment(CellAlignment::Center),
            Cell::new("Bits Set").set_alignment(CellAlignment::Center),
            Cell::new("Fill").set_alignment(CellAlignment::Center),
            Cell::new("State").set_alignment(CellAlignment::Center),
        ]);

    for record in &window.terms {
        let bits_set = record.bits_set();
        let state = if record.term == window.header.latest {
            "active"
        } else {
            "closed"
        };
        table.add_row(vec![
            Cell::new(record.term).set_alignment(CellAlignment::Right),
            Cell::new(record.remaining).set_alignment(CellAlignment::Right),
            Cell::new(bits_set).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}%", fill_percent(bits_set, record.m)))
                .set_alignment(CellAlignment::Right),
            Cell::new(state),
        ]);
    }
    table
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Inspect { snapshot } => {
            let window = load_window(snapshot)?;
            let header = &window.header;
            let size = std::fs::metadata(snapshot)?.len() as usize;

            println!("Snapshot: {} ({})", snapshot.display(), bytes2hr(size));
            println!("  Format version: {}", header.version);
            println!("  Terms: {}..={}", header.earliest, header.latest);
            println!("  Retention: {}", header.retention);
            println!(
                "  Bits per term: {} ({})",
                header.m,
                bits2hr(header.m as usize)
            );
            println!("  Hash functions: {}", header.k);
            println!("\n{}", term_table(&window));
        }
        Commands::Check { snapshot, key } => {
            let window = load_window(snapshot)?;
            let terms = window.terms_containing(key.as_bytes());
            if terms.is_empty() {
                println!("Key '{key}' is not in the snapshot");
            } else {
                println!("Key '{key}' is present in terms {terms:?}");
            }
        }
        #[cfg(feature = "redb")]
        Commands::Archive { db, operation } => {
            handle_archive_command(db, operation)?;
        }
    }

    Ok(())
}

#[cfg(feature = "redb")]
fn handle_archive_command(
    db: &Path,
    operation: &ArchiveCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    use term_bloom_rs::{MembershipHasher, RedbArchive, TermArchive};

    if !db.exists() {
        println!("Error: no archive at {}", db.display());
        return Ok(());
    }
    let archive = RedbArchive::open(db)?;

    match operation {
        ArchiveCommands::List => {
            let terms = archive.terms()?;
            println!("{} archived terms in {}", terms.len(), db.display());
            for term in terms {
                println!("  {term}");
            }
        }
        ArchiveCommands::Show {
            term,
            key,
            num_hashes,
        } => {
            let Some(bytes) = archive.load_term(*term)? else {
                println!("Term {term} is not archived");
                return Ok(());
            };
            let record = snapshot::read_term(&mut bytes.as_slice())?;
            let bits_set = record.bits_set();
            println!("Term {}:", record.term);
            println!("  Bits: {} ({})", record.m, bits2hr(record.m as usize));
            println!("  Remaining capacity: {}", record.remaining);
            println!(
                "  Bits set: {} ({:.2}%)",
                bits_set,
                fill_percent(bits_set, record.m)
            );

            if let (Some(key), Some(k)) = (key, num_hashes) {
                let hasher = MembershipHasher::new(*k, record.m);
                let present = record.contains(&hasher, key.as_bytes());
                println!("  Key '{key}' present: {present}");
            } else if key.is_some() {
                println!("  Pass --num-hashes to check a key");
            }
        }
    }

    Ok(())
}
