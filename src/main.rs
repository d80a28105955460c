use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use cfb_polls::backfill::Backfiller;
use cfb_polls::config::{BackfillConfig, FetchMode, parse_poll_ids, parse_years};
use cfb_polls::espn::{EspnClient, HttpSource};
use cfb_polls::logging;
use cfb_polls::store::{RankingPolicy, Store};

/// Backfill college-football poll rankings from ESPN into SQLite.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// SQLite database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Seasons, e.g. `2024`, `2021,2023` or `2019-2024`.
    #[arg(long)]
    years: Option<String>,

    /// Poll ids, e.g. `1,2`.
    #[arg(long)]
    polls: Option<String>,

    /// `sequential` or `parallel`.
    #[arg(long)]
    mode: Option<FetchMode>,

    /// Team fetch workers per week in parallel mode.
    #[arg(long)]
    workers: Option<usize>,

    /// Attempts per request before giving up.
    #[arg(long)]
    retry_attempts: Option<u32>,

    /// First backoff delay in milliseconds; doubles on each retry.
    #[arg(long)]
    retry_base_ms: Option<u64>,

    /// `skip` (default) or `append`.
    #[arg(long)]
    ranking_policy: Option<RankingPolicy>,

    /// JSON correction table replacing the built-in one.
    #[arg(long)]
    corrections: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut BackfillConfig) -> Result<()> {
        if let Some(db) = self.db {
            config.db_path = db;
        }
        if let Some(raw) = self.years {
            config.years = parse_years(&raw)?;
        }
        if let Some(raw) = self.polls {
            config.poll_ids = parse_poll_ids(&raw)?;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = self.retry_base_ms {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(policy) = self.ranking_policy {
            config.ranking_policy = policy;
        }
        if let Some(path) = self.corrections {
            config.corrections_path = Some(path);
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    logging::init();

    let mut config = BackfillConfig::from_env().context("read CFB_* environment")?;
    Cli::parse().apply(&mut config)?;
    config.validate()?;

    let store = Store::open(&config.db_path)
        .with_context(|| format!("open sqlite db {}", config.db_path.display()))?
        .with_ranking_policy(config.ranking_policy);
    let source = HttpSource::new(config.request_timeout)?;
    let client = EspnClient::new(source, config.base_url.clone(), config.retry);

    let mut backfiller =
        Backfiller::new(client, store, &config).context("set up backfill")?;
    let summary = backfiller
        .run(&config.years, &config.poll_ids)
        .context("backfill aborted")?;

    let totals = summary.totals();
    println!("Backfill complete");
    println!("DB: {}", config.db_path.display());
    println!("Seasons: {:?}", config.years);
    println!("Polls: {:?}", config.poll_ids);
    println!("Weeks: {}", totals.weeks);
    println!(
        "Rankings inserted: {} (skipped {})",
        totals.rankings_inserted, totals.rankings_skipped
    );
    for poll in &summary.polls {
        println!(
            "{} poll {}: weeks={} inserted={} skipped={} dropped={} malformed={}",
            poll.year,
            poll.poll_id,
            poll.counts.weeks,
            poll.counts.rankings_inserted,
            poll.counts.rankings_skipped,
            poll.counts.entries_dropped,
            poll.counts.entries_malformed
        );
    }

    Ok(())
}
