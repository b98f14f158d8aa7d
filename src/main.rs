//! leafdb shell - single-file record store

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use leafdb::config::{DbConfig, DEFAULT_CACHE_CAPACITY};
use leafdb::database::Database;
use leafdb::shell;
use leafdb::storage::page::DEFAULT_PAGE_SIZE;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

/// leafdb - an embedded single-file record store
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file, created if missing
    #[arg(default_value = "leafdb.db")]
    path: PathBuf,

    /// Page size for a new file (an existing file keeps its own)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Number of pages kept in memory
    #[arg(short = 'c', long, default_value_t = DEFAULT_CACHE_CAPACITY)]
    cache_capacity: usize,

    /// Maximum number of pages in the file
    #[arg(long)]
    max_pages: Option<u32>,

    /// Skip fsync after each page write
    #[arg(long)]
    no_sync: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = DbConfig::default()
        .with_page_size(args.page_size)
        .with_cache_capacity(args.cache_capacity)
        .with_max_pages(args.max_pages)
        .with_sync_writes(!args.no_sync);

    let mut db = Database::open_with_config(&args.path, config)
        .with_context(|| format!("Failed to open database at {}", args.path.display()))?;

    let stdin = io::stdin();
    let show_prompt = stdin.is_terminal();
    let mut stdout = io::stdout();
    shell::run(&mut db, stdin.lock(), &mut stdout, show_prompt)?;

    db.close().context("Failed to flush database")?;
    Ok(())
}
