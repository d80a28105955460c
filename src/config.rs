//! Run configuration.
//!
//! Defaults are overridden by `CFB_*` environment variables (a `.env` file is
//! honoured by the binaries), which are in turn overridden by command-line
//! flags. [`BackfillConfig::validate`] runs last.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::espn::{ESPN_BASE_URL, RetryPolicy};
use crate::http_client::DEFAULT_TIMEOUT_SECS;
use crate::store::{RankingPolicy, default_db_path};

pub const DEFAULT_YEARS: &[i32] = &[2024];
pub const DEFAULT_POLL_IDS: &[i64] = &[1, 2];
pub const DEFAULT_WORKERS: usize = 10;
pub const MAX_WORKERS: usize = 64;
pub const MAX_RETRY_ATTEMPTS: u32 = 20;
const FIRST_SEASON: i32 = 1869;
const LAST_SEASON: i32 = 2100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    Sequential,
    #[default]
    ParallelFetch,
}

impl FromStr for FetchMode {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(FetchMode::Sequential),
            "parallel" | "parallel-fetch" | "parallel_fetch" => Ok(FetchMode::ParallelFetch),
            other => Err(Error::Config(format!("unknown fetch mode {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub base_url: String,
    pub db_path: PathBuf,
    pub years: Vec<i32>,
    pub poll_ids: Vec<i64>,
    pub mode: FetchMode,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub ranking_policy: RankingPolicy,
    /// Replaces the built-in correction table when set.
    pub corrections_path: Option<PathBuf>,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            base_url: ESPN_BASE_URL.to_string(),
            db_path: default_db_path(),
            years: DEFAULT_YEARS.to_vec(),
            poll_ids: DEFAULT_POLL_IDS.to_vec(),
            mode: FetchMode::default(),
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ranking_policy: RankingPolicy::default(),
            corrections_path: None,
        }
    }
}

impl BackfillConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; empty values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get("CFB_BASE_URL") {
            config.base_url = raw.trim().to_string();
        }
        if let Some(raw) = get("CFB_DB") {
            config.db_path = PathBuf::from(raw.trim());
        }
        if let Some(raw) = get("CFB_YEARS") {
            config.years = parse_years(&raw)?;
        }
        if let Some(raw) = get("CFB_POLL_IDS") {
            config.poll_ids = parse_poll_ids(&raw)?;
        }
        if let Some(raw) = get("CFB_MODE") {
            config.mode = raw.parse()?;
        }
        if let Some(raw) = get("CFB_WORKERS") {
            config.workers = parse_number("CFB_WORKERS", &raw)?;
        }
        if let Some(raw) = get("CFB_RETRY_ATTEMPTS") {
            config.retry.max_attempts = parse_number("CFB_RETRY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("CFB_RETRY_BASE_MS") {
            config.retry.base_delay =
                Duration::from_millis(parse_number("CFB_RETRY_BASE_MS", &raw)?);
        }
        if let Some(raw) = get("CFB_REQUEST_TIMEOUT_SECS") {
            config.request_timeout =
                Duration::from_secs(parse_number("CFB_REQUEST_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("CFB_RANKING_POLICY") {
            config.ranking_policy = raw.parse()?;
        }
        if let Some(raw) = get("CFB_CORRECTIONS") {
            config.corrections_path = Some(PathBuf::from(raw.trim()));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.years.is_empty() {
            return Err(Error::Config("no seasons to backfill".to_string()));
        }
        if let Some(year) = self
            .years
            .iter()
            .find(|y| !(FIRST_SEASON..=LAST_SEASON).contains(*y))
        {
            return Err(Error::Config(format!(
                "season {year} outside {FIRST_SEASON}..={LAST_SEASON}"
            )));
        }
        if self.poll_ids.is_empty() {
            return Err(Error::Config("no poll ids to backfill".to_string()));
        }
        if let Some(id) = self.poll_ids.iter().find(|id| **id <= 0) {
            return Err(Error::Config(format!("poll id {id} must be positive")));
        }
        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(Error::Config(format!(
                "workers must be within 1..={MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.retry.max_attempts) {
            return Err(Error::Config(format!(
                "retry attempts must be within 1..={MAX_RETRY_ATTEMPTS}, got {}",
                self.retry.max_attempts
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be non-zero".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "base url {:?} is not http(s)",
                self.base_url
            )));
        }
        Ok(())
    }
}

/// Accepts `2024`, `2021,2023` and ranges such as `2019-2024`.
pub fn parse_years(raw: &str) -> Result<Vec<i32>> {
    let mut out = Vec::new();
    for part in raw.split([',', ';', ' ']).map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_number::<i32>("year range", start)?;
                let end = parse_number::<i32>("year range", end)?;
                if start > end {
                    return Err(Error::Config(format!("empty year range {part:?}")));
                }
                out.extend(start..=end);
            }
            None => out.push(parse_number("year", part)?),
        }
    }
    Ok(dedup(out))
}

pub fn parse_poll_ids(raw: &str) -> Result<Vec<i64>> {
    let ids = raw
        .split([',', ';', ' '])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| parse_number("poll id", p))
        .collect::<Result<Vec<i64>>>()?;
    Ok(dedup(ids))
}

fn parse_number<T: FromStr>(what: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("invalid {what}: {raw:?}")))
}

fn dedup<T: PartialEq + Copy>(values: Vec<T>) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}
