use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use rusqlite::{Connection, OpenFlags};

use cfb_polls::export::{DEFAULT_EXPORTS, default_out_dir, export_views};
use cfb_polls::logging;
use cfb_polls::store::default_db_path;

/// Export the presentation views to JSON files for the frontend.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// SQLite database path.
    #[arg(long, env = "CFB_DB")]
    db: Option<PathBuf>,

    /// Output directory.
    #[arg(long, env = "CFB_EXPORT_DIR")]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(default_db_path);
    let out_dir = cli.out.unwrap_or_else(default_out_dir);
    if !db_path.exists() {
        return Err(anyhow!("database {} does not exist", db_path.display()));
    }

    let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("open sqlite db {}", db_path.display()))?;
    let exported = export_views(&conn, &out_dir, DEFAULT_EXPORTS).context("export views")?;

    for item in &exported {
        println!("{} -> {} ({} rows)", item.view, item.path.display(), item.rows);
    }
    println!("All exports complete.");
    Ok(())
}
