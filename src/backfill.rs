//! Backfill driver: season/poll listing -> weeks -> ranked entries -> teams.
//!
//! Reads may fan out to a worker pool, writes never do. The [`Backfiller`]
//! owns the [`Store`] and only touches it from the calling thread; workers
//! hand their results back over a channel.

use std::sync::mpsc;

use rayon::ThreadPool;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{BackfillConfig, FetchMode};
use crate::error::{Error, FetchError, Result};
use crate::espn::{EspnClient, JsonSource, WeekRef};
use crate::ranking::{RankEntry, RankObservation};
use crate::store::{RankingWrite, RunCounts, Store};
use crate::team_identity::{CorrectionTable, RawTeam, TeamIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub year: i32,
    pub poll_id: i64,
    pub counts: RunCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub polls: Vec<PollSummary>,
}

impl BackfillSummary {
    pub fn totals(&self) -> RunCounts {
        self.polls.iter().fold(RunCounts::default(), |mut acc, p| {
            acc.weeks += p.counts.weeks;
            acc.rankings_inserted += p.counts.rankings_inserted;
            acc.rankings_skipped += p.counts.rankings_skipped;
            acc.entries_dropped += p.counts.entries_dropped;
            acc.entries_malformed += p.counts.entries_malformed;
            acc
        })
    }
}

/// A ranked entry with its team resolved, ready to write.
#[derive(Debug, Clone)]
struct ResolvedEntry {
    observation: RankObservation,
    school_name: String,
    identity: TeamIdentity,
}

enum Dispatch {
    Sequential,
    Pool(ThreadPool),
}

pub struct Backfiller<S> {
    client: EspnClient<S>,
    store: Store,
    corrections: CorrectionTable,
    dispatch: Dispatch,
}

impl<S: JsonSource> Backfiller<S> {
    /// Takes mode, pool size and correction table from `config`. The fetch
    /// pool is built here, once, in parallel mode.
    pub fn new(client: EspnClient<S>, store: Store, config: &BackfillConfig) -> Result<Self> {
        let corrections = match config.corrections_path.as_deref() {
            Some(path) => CorrectionTable::from_json_file(path).map_err(|err| {
                Error::Config(format!("correction table {}: {err}", path.display()))
            })?,
            None => CorrectionTable::builtin().clone(),
        };
        let dispatch = match config.mode {
            FetchMode::Sequential => Dispatch::Sequential,
            FetchMode::ParallelFetch => Dispatch::Pool(build_fetch_pool(config.workers)?),
        };
        Ok(Self {
            client,
            store,
            corrections,
            dispatch,
        })
    }

    pub fn mode(&self) -> FetchMode {
        match self.dispatch {
            Dispatch::Sequential => FetchMode::Sequential,
            Dispatch::Pool(_) => FetchMode::ParallelFetch,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn into_store(self) -> Store {
        self.store
    }

    /// Every (year, poll) pair in order. Stops at the first failing pair.
    pub fn run(&mut self, years: &[i32], poll_ids: &[i64]) -> Result<BackfillSummary> {
        let mut summary = BackfillSummary::default();
        for &year in years {
            for &poll_id in poll_ids {
                summary.polls.push(self.backfill_poll(year, poll_id)?);
            }
        }
        Ok(summary)
    }

    pub fn backfill_poll(&mut self, year: i32, poll_id: i64) -> Result<PollSummary> {
        info!(year, poll_id, "backfilling poll");
        let run_id = self.store.begin_run(year, poll_id)?;
        let mut counts = RunCounts::default();

        let result = self.backfill_weeks(year, poll_id, &mut counts);
        let error = result.as_ref().err().map(|err| err.to_string());
        self.store.finish_run(run_id, &counts, error.as_deref())?;
        result?;

        info!(
            year,
            poll_id,
            weeks = counts.weeks,
            inserted = counts.rankings_inserted,
            skipped = counts.rankings_skipped,
            dropped = counts.entries_dropped,
            malformed = counts.entries_malformed,
            "poll complete"
        );
        Ok(PollSummary {
            year,
            poll_id,
            counts,
        })
    }

    fn backfill_weeks(&self, year: i32, poll_id: i64, counts: &mut RunCounts) -> Result<()> {
        let weeks = self.client.list_weeks(year, poll_id)?;
        if weeks.is_empty() {
            warn!(year, poll_id, "no weeks found");
            return Ok(());
        }
        for week in &weeks {
            self.backfill_week(year, poll_id, week, counts)?;
            counts.weeks += 1;
        }
        Ok(())
    }

    fn backfill_week(
        &self,
        year: i32,
        poll_id: i64,
        week: &WeekRef,
        counts: &mut RunCounts,
    ) -> Result<()> {
        let poll_data = self.client.get_poll_week(&week.url)?;
        let headline = poll_data
            .get("headline")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Week {}", week.week_number));
        info!(
            year,
            poll_id,
            season_type = week.season_type,
            week = week.week_number,
            "processing {headline}"
        );

        let entries = rank_entries(&poll_data, counts)?;
        match &self.dispatch {
            Dispatch::Sequential => {
                for entry in entries {
                    let team = self.client.get_team(&entry.team_ref)?;
                    let resolved = self.resolve(entry.observation, &team)?;
                    self.persist(year, poll_id, week, &resolved, counts)?;
                }
            }
            Dispatch::Pool(pool) => {
                let mut resolved = Vec::with_capacity(entries.len());
                for (entry, result) in self.fetch_teams_parallel(pool, entries) {
                    match result {
                        Ok(team) => resolved.push(self.resolve(entry.observation, &team)?),
                        Err(err) => {
                            warn!(
                                year,
                                poll_id,
                                week = week.week_number,
                                rank = entry.observation.current_rank,
                                team_ref = %entry.team_ref,
                                error = %err,
                                "team fetch failed, dropping entry"
                            );
                            counts.entries_dropped += 1;
                        }
                    }
                }
                // An unmapped or malformed team aborts before this week writes anything.
                for entry in &resolved {
                    self.persist(year, poll_id, week, entry, counts)?;
                }
            }
        }
        Ok(())
    }

    /// Fetches every entry's team on a bounded pool. Results arrive in
    /// completion order.
    fn fetch_teams_parallel(
        &self,
        pool: &ThreadPool,
        entries: Vec<RankEntry>,
    ) -> Vec<(RankEntry, Result<Value, FetchError>)> {
        let (tx, rx) = mpsc::channel();
        let client = &self.client;
        pool.install(move || {
            rayon::scope(|scope| {
                for entry in entries {
                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        let result = client.get_team(&entry.team_ref);
                        let _ = tx.send((entry, result));
                    });
                }
            });
        });
        rx.into_iter().collect()
    }

    fn resolve(&self, observation: RankObservation, team: &Value) -> Result<ResolvedEntry> {
        let raw = RawTeam::from_document(team)?;
        let identity = self.corrections.resolve_raw(&raw)?;
        Ok(ResolvedEntry {
            observation,
            school_name: raw.school_name,
            identity,
        })
    }

    fn persist(
        &self,
        year: i32,
        poll_id: i64,
        week: &WeekRef,
        entry: &ResolvedEntry,
        counts: &mut RunCounts,
    ) -> Result<()> {
        let season_id = self.store.season_id(year)?;
        let week_id = self
            .store
            .week_id(week.week_number, season_id, week.season_type)?;
        let school_id = self.store.school_id(&entry.school_name)?;
        let team_id =
            self.store
                .team_id(&entry.identity.name, school_id, &entry.identity.abbreviation)?;

        match self
            .store
            .insert_ranking(poll_id, week_id, team_id, &entry.observation)?
        {
            RankingWrite::Inserted => {
                counts.rankings_inserted += 1;
                info!(
                    rank = entry.observation.current_rank,
                    team = %entry.identity.name,
                    "added rank"
                );
            }
            RankingWrite::Skipped => {
                counts.rankings_skipped += 1;
                info!(
                    rank = entry.observation.current_rank,
                    team = %entry.identity.name,
                    "rank already stored, skipped"
                );
            }
        }
        Ok(())
    }
}

/// Parses `ranks[]`. Entries without a rank or team reference are skipped;
/// any other parse error (a bad trend) fails the week.
fn rank_entries(poll_data: &Value, counts: &mut RunCounts) -> Result<Vec<RankEntry>> {
    let Some(ranks) = poll_data.get("ranks").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(ranks.len());
    for raw in ranks {
        match RankEntry::from_json(raw) {
            Ok(entry) => out.push(entry),
            Err(Error::MalformedRank(reason)) => {
                warn!(%reason, "skipping rank entry");
                counts.entries_malformed += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

fn build_fetch_pool(workers: usize) -> Result<ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|idx| format!("cfb-fetch-{idx}"))
        .build()?)
}
