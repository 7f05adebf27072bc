//! seqindex command line query tool
//!
//! Opens a closed index set read-only and answers lookups against it.
//! Index building is done by the format-specific drivers.

use clap::{Parser, Subcommand};
use seqindex::{FieldKind, IndexSetReader, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "seqindex-cli", version = VERSION, about = "Query sequence database indexes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the locations stored under a key (a trailing '*' matches a prefix)
    Lookup {
        /// Index directory
        dir: PathBuf,
        /// Database name
        db: String,
        /// Field: id, acc, sv, key, des or tax
        field: FieldKind,
        key: String,
    },
    /// Print page counts and tree depth per field
    Stats { dir: PathBuf, db: String },
    /// Print the build parameters file
    Params { dir: PathBuf, db: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Lookup { dir, db, field, key } => {
            let reader = IndexSetReader::open_db(&dir, &db)?;
            let locations = reader.search(field, &key)?;
            if locations.is_empty() {
                println!("No entries for {} '{}'", field, key);
            }
            for location in locations {
                let file = reader.file_name(location.file_number).unwrap_or("?");
                println!("{}\t{}\t{}", file, location.file_number, location.offset);
            }
        }
        Command::Stats { dir, db } => {
            let reader = IndexSetReader::open_db(&dir, &db)?;
            let params = reader.parameters();
            println!("Index set '{}' (engine v{})", params.db_name, params.engine_version);
            if let Some(release) = &params.release {
                println!("  release: {} {}", release, params.date.as_deref().unwrap_or(""));
            }
            println!("  files:   {}", params.files.len());
            println!(
                "  {:<5} {:<16} {:>10} {:>6} {:>8} {:>9} {:>9}",
                "field", "file", "entries", "depth", "leaves", "internal", "truncated"
            );
            for s in &params.indexes {
                println!(
                    "  {:<5} {:<16} {:>10} {:>6} {:>8} {:>9} {:>9}",
                    s.field.name(),
                    s.file,
                    s.records,
                    s.depth,
                    s.leaf_pages,
                    s.internal_pages,
                    s.truncated_keys
                );
            }
        }
        Command::Params { dir, db } => {
            let params = seqindex::BuildParameters::read(&dir, &db)?;
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
    }
    Ok(())
}
