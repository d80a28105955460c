//! SQLite gateway for the poll schema.
//!
//! A [`Store`] owns its connection and is not `Sync`, so it can only ever be
//! driven from one thread. Everything that writes goes through it.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::debug;

use crate::error::{Error, Result};
use crate::ranking::RankObservation;

/// Entities created through get-or-create. Rankings are insert-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Season,
    Week,
    School,
    Team,
}

impl Entity {
    pub fn table(self) -> &'static str {
        match self {
            Entity::Season => "season",
            Entity::Week => "week",
            Entity::School => "school",
            Entity::Team => "team",
        }
    }

    pub fn key_column(self) -> &'static str {
        match self {
            Entity::Season => "season_pk",
            Entity::Week => "week_pk",
            Entity::School => "school_pk",
            Entity::Team => "team_pk",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Entity::Season => &["season_year", "season_description"],
            Entity::Week => &["week_number", "week_season_fk", "week_season_type_fk"],
            Entity::School => &["school_name"],
            Entity::Team => &["team_name", "team_school_fk", "team_abbreviation"],
        }
    }
}

pub const TABLES: &[&str] = &["season", "week", "school", "team", "ranking", "backfill_run"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankingPolicy {
    /// Insert only when no row exists for the same (poll, week, team).
    #[default]
    SkipExisting,
    /// Insert unconditionally. Re-running a period duplicates its rankings.
    Append,
}

impl FromStr for RankingPolicy {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "skip" | "skip-existing" | "skip_existing" => Ok(RankingPolicy::SkipExisting),
            "append" => Ok(RankingPolicy::Append),
            other => Err(Error::Config(format!("unknown ranking policy {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingWrite {
    Inserted,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub weeks: usize,
    pub rankings_inserted: usize,
    pub rankings_skipped: usize,
    /// Entries whose team fetch failed in parallel mode.
    pub entries_dropped: usize,
    /// Rank entries without a rank or team reference.
    pub entries_malformed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub season_year: i32,
    pub poll_id: i64,
    pub counts: RunCounts,
    pub error: Option<String>,
}

pub fn default_db_path() -> PathBuf {
    PathBuf::from("database").join("data").join("college.db")
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS season (
            season_pk INTEGER PRIMARY KEY AUTOINCREMENT,
            season_year INTEGER NOT NULL,
            season_description TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS week (
            week_pk INTEGER PRIMARY KEY AUTOINCREMENT,
            week_number INTEGER NOT NULL,
            week_season_fk INTEGER NOT NULL REFERENCES season(season_pk),
            week_season_type_fk INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_week_lookup
            ON week(week_season_fk, week_season_type_fk, week_number);

        CREATE TABLE IF NOT EXISTS school (
            school_pk INTEGER PRIMARY KEY AUTOINCREMENT,
            school_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS team (
            team_pk INTEGER PRIMARY KEY AUTOINCREMENT,
            team_name TEXT NOT NULL,
            team_school_fk INTEGER NOT NULL REFERENCES school(school_pk),
            team_abbreviation TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ranking (
            ranking_pk INTEGER PRIMARY KEY AUTOINCREMENT,
            ranking_poll_fk INTEGER NOT NULL,
            ranking_week_fk INTEGER NOT NULL REFERENCES week(week_pk),
            ranking_team_fk INTEGER NOT NULL REFERENCES team(team_pk),
            ranking_current_rank INTEGER NOT NULL,
            ranking_points INTEGER NOT NULL,
            ranking_first_place_votes INTEGER NOT NULL,
            ranking_record_wins INTEGER NOT NULL,
            ranking_record_losses INTEGER NOT NULL,
            ranking_trend INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ranking_observation
            ON ranking(ranking_poll_fk, ranking_week_fk, ranking_team_fk);

        CREATE TABLE IF NOT EXISTS backfill_run (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            season_year INTEGER NOT NULL,
            poll_id INTEGER NOT NULL,
            weeks_total INTEGER NOT NULL DEFAULT 0,
            rankings_inserted INTEGER NOT NULL DEFAULT 0,
            rankings_skipped INTEGER NOT NULL DEFAULT 0,
            entries_dropped INTEGER NOT NULL DEFAULT 0,
            entries_malformed INTEGER NOT NULL DEFAULT 0,
            error TEXT NULL
        );

        -- Views are derived, so they are rebuilt on every open.
        DROP VIEW IF EXISTS v_team_rankings;
        CREATE VIEW v_team_rankings AS
        SELECT
            r.ranking_poll_fk AS poll_id,
            CASE r.ranking_poll_fk
                WHEN 1 THEN 'AP Top 25'
                WHEN 2 THEN 'Coaches Poll'
                ELSE 'Poll ' || r.ranking_poll_fk
            END AS poll_name,
            s.season_year AS season_year,
            w.week_season_type_fk AS season_type,
            CASE w.week_season_type_fk
                WHEN 1 THEN 'Preseason'
                WHEN 2 THEN 'Regular Season'
                WHEN 3 THEN 'Postseason'
                WHEN 4 THEN 'Off Season'
                ELSE 'Season Type ' || w.week_season_type_fk
            END AS season_type_name,
            r.ranking_week_fk AS ranking_week_fk,
            w.week_number AS week_number,
            t.team_name AS team_name,
            t.team_abbreviation AS team_abbreviation,
            sc.school_name AS school_name,
            r.ranking_current_rank AS ranking_current_rank,
            r.ranking_points AS ranking_points,
            r.ranking_first_place_votes AS ranking_first_place_votes,
            r.ranking_record_wins AS ranking_record_wins,
            r.ranking_record_losses AS ranking_record_losses,
            r.ranking_trend AS ranking_trend
        FROM ranking r
        JOIN week w ON w.week_pk = r.ranking_week_fk
        JOIN season s ON s.season_pk = w.week_season_fk
        JOIN team t ON t.team_pk = r.ranking_team_fk
        JOIN school sc ON sc.school_pk = t.team_school_fk
        ORDER BY s.season_year, r.ranking_poll_fk, w.week_season_type_fk, w.week_number,
                 r.ranking_current_rank;

        DROP VIEW IF EXISTS v_team_alltime_summary;
        CREATE VIEW v_team_alltime_summary AS
        SELECT
            poll_id,
            poll_name,
            team_name,
            team_abbreviation,
            COUNT(*) AS total_weeks_ranked,
            SUM(CASE WHEN ranking_current_rank = 1 THEN 1 ELSE 0 END) AS weeks_at_number_one,
            SUM(CASE WHEN ranking_current_rank <= 3 THEN 1 ELSE 0 END) AS weeks_in_top_3,
            SUM(CASE WHEN ranking_current_rank <= 10 THEN 1 ELSE 0 END) AS weeks_in_top_10,
            MIN(ranking_current_rank) AS best_rank,
            ROUND(AVG(ranking_current_rank), 2) AS average_rank
        FROM v_team_rankings
        GROUP BY poll_id, poll_name, team_name, team_abbreviation
        ORDER BY poll_id, total_weeks_ranked DESC, best_rank, team_name;

        -- Positive index: the team finished the season below where it started.
        DROP VIEW IF EXISTS v_team_overrated_index;
        CREATE VIEW v_team_overrated_index AS
        WITH ordered AS (
            SELECT
                poll_id, poll_name, season_year, team_name, team_abbreviation,
                ranking_current_rank,
                ROW_NUMBER() OVER (
                    PARTITION BY poll_id, season_year, team_name, team_abbreviation
                    ORDER BY season_type, week_number
                ) AS first_pos,
                ROW_NUMBER() OVER (
                    PARTITION BY poll_id, season_year, team_name, team_abbreviation
                    ORDER BY season_type DESC, week_number DESC
                ) AS last_pos
            FROM v_team_rankings
        )
        SELECT
            a.poll_id AS poll_id,
            a.poll_name AS poll_name,
            a.season_year AS season_year,
            a.team_name AS team_name,
            a.team_abbreviation AS team_abbreviation,
            a.ranking_current_rank AS initial_rank,
            b.ranking_current_rank AS final_rank,
            b.ranking_current_rank - a.ranking_current_rank AS overrated_index
        FROM ordered a
        JOIN ordered b
            ON b.poll_id = a.poll_id
           AND b.season_year = a.season_year
           AND b.team_name = a.team_name
           AND b.team_abbreviation = a.team_abbreviation
           AND b.last_pos = 1
        WHERE a.first_pos = 1
        ORDER BY overrated_index DESC, a.season_year, a.poll_id;

        DROP VIEW IF EXISTS v_team_overrated_index_stats;
        CREATE VIEW v_team_overrated_index_stats AS
        SELECT
            poll_id,
            poll_name,
            team_name,
            team_abbreviation,
            ROUND(AVG(overrated_index), 2) AS avg_overrated_index,
            MAX(overrated_index) AS max_overrated_index,
            COUNT(*) AS seasons_counted
        FROM v_team_overrated_index
        GROUP BY poll_id, poll_name, team_name, team_abbreviation
        ORDER BY poll_id, avg_overrated_index DESC, team_name;

        DROP VIEW IF EXISTS v_team_collapse_index;
        CREATE VIEW v_team_collapse_index AS
        WITH ordered AS (
            SELECT
                poll_id, poll_name, season_year, team_name, team_abbreviation,
                ranking_current_rank,
                MIN(ranking_current_rank) OVER (
                    PARTITION BY poll_id, season_year, team_name, team_abbreviation
                ) AS best_rank,
                ROW_NUMBER() OVER (
                    PARTITION BY poll_id, season_year, team_name, team_abbreviation
                    ORDER BY season_type DESC, week_number DESC
                ) AS last_pos
            FROM v_team_rankings
        )
        SELECT
            poll_id,
            poll_name,
            season_year,
            team_name,
            team_abbreviation,
            best_rank,
            ranking_current_rank AS final_rank,
            ranking_current_rank - best_rank AS collapse_index
        FROM ordered
        WHERE last_pos = 1
        ORDER BY collapse_index DESC, season_year, poll_id;

        DROP VIEW IF EXISTS v_team_collapse_index_stats;
        CREATE VIEW v_team_collapse_index_stats AS
        SELECT
            poll_id,
            poll_name,
            team_name,
            team_abbreviation,
            ROUND(AVG(collapse_index), 2) AS avg_collapse_index,
            MAX(collapse_index) AS max_collapse_index,
            COUNT(*) AS seasons_counted
        FROM v_team_collapse_index
        GROUP BY poll_id, poll_name, team_name, team_abbreviation
        ORDER BY poll_id, avg_collapse_index DESC, team_name;
        "#,
    )?;
    add_missing_column(
        conn,
        "backfill_run",
        "entries_malformed",
        "INTEGER NOT NULL DEFAULT 0",
    )?;
    Ok(())
}

/// Brings a ledger created by an older build up to the current columns.
fn add_missing_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let present = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut found = false;
        for name in names {
            found |= name? == column;
        }
        found
    };
    if present {
        return Ok(());
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
    debug!(table, column, "added missing column");
    Ok(())
}

pub struct Store {
    conn: Connection,
    ranking_policy: RankingPolicy,
}

impl Store {
    /// Opens (creating if needed) the database file and its schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn,
            ranking_policy: RankingPolicy::default(),
        })
    }

    pub fn with_ranking_policy(mut self, policy: RankingPolicy) -> Self {
        self.ranking_policy = policy;
        self
    }

    pub fn ranking_policy(&self) -> RankingPolicy {
        self.ranking_policy
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the key of the row whose columns equal `attributes` exactly,
    /// inserting it first if there is none. Commits immediately.
    pub fn get_or_create(&self, entity: Entity, attributes: &[(&str, SqlValue)]) -> Result<i64> {
        let table = entity.table();
        if attributes.is_empty() {
            return Err(Error::EmptyAttributes(table));
        }
        for (column, _) in attributes {
            if !entity.columns().contains(column) {
                return Err(Error::UnknownColumn {
                    table,
                    column: column.to_string(),
                });
            }
        }

        let predicate = attributes
            .iter()
            .enumerate()
            .map(|(idx, (column, _))| format!("{column} IS ?{}", idx + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let select = format!(
            "SELECT {key} FROM {table} WHERE {predicate} ORDER BY {key} LIMIT 1",
            key = entity.key_column()
        );
        let values = || attributes.iter().map(|(_, value)| value);

        let existing = self
            .conn
            .query_row(&select, params_from_iter(values()), |row| row.get::<_, i64>(0))
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let columns = attributes
            .iter()
            .map(|(column, _)| *column)
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=attributes.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute(
            &format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})"),
            params_from_iter(values()),
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(table, id, "created row");
        Ok(id)
    }

    pub fn season_id(&self, year: i32) -> Result<i64> {
        self.get_or_create(
            Entity::Season,
            &[
                ("season_year", SqlValue::Integer(i64::from(year))),
                ("season_description", SqlValue::Text(format!("{year} season"))),
            ],
        )
    }

    pub fn week_id(&self, week_number: i64, season_id: i64, season_type: i64) -> Result<i64> {
        self.get_or_create(
            Entity::Week,
            &[
                ("week_number", SqlValue::Integer(week_number)),
                ("week_season_fk", SqlValue::Integer(season_id)),
                ("week_season_type_fk", SqlValue::Integer(season_type)),
            ],
        )
    }

    pub fn school_id(&self, name: &str) -> Result<i64> {
        self.get_or_create(
            Entity::School,
            &[("school_name", SqlValue::Text(name.to_string()))],
        )
    }

    pub fn team_id(&self, name: &str, school_id: i64, abbreviation: &str) -> Result<i64> {
        self.get_or_create(
            Entity::Team,
            &[
                ("team_name", SqlValue::Text(name.to_string())),
                ("team_school_fk", SqlValue::Integer(school_id)),
                ("team_abbreviation", SqlValue::Text(abbreviation.to_string())),
            ],
        )
    }

    pub fn insert_ranking(
        &self,
        poll_id: i64,
        week_id: i64,
        team_id: i64,
        obs: &RankObservation,
    ) -> Result<RankingWrite> {
        let sql = match self.ranking_policy {
            RankingPolicy::Append => {
                r#"
                INSERT INTO ranking (
                    ranking_poll_fk, ranking_week_fk, ranking_team_fk,
                    ranking_current_rank, ranking_points, ranking_first_place_votes,
                    ranking_record_wins, ranking_record_losses, ranking_trend
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#
            }
            RankingPolicy::SkipExisting => {
                r#"
                INSERT INTO ranking (
                    ranking_poll_fk, ranking_week_fk, ranking_team_fk,
                    ranking_current_rank, ranking_points, ranking_first_place_votes,
                    ranking_record_wins, ranking_record_losses, ranking_trend
                )
                SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
                WHERE NOT EXISTS (
                    SELECT 1 FROM ranking
                    WHERE ranking_poll_fk = ?1
                      AND ranking_week_fk = ?2
                      AND ranking_team_fk = ?3
                )
                "#
            }
        };
        let changed = self.conn.execute(
            sql,
            params![
                poll_id,
                week_id,
                team_id,
                obs.current_rank,
                obs.points,
                obs.first_place_votes,
                obs.wins,
                obs.losses,
                obs.trend,
            ],
        )?;
        Ok(if changed == 0 {
            RankingWrite::Skipped
        } else {
            RankingWrite::Inserted
        })
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        if !TABLES.contains(&table) {
            return Err(Error::InvalidIdentifier(table.to_string()));
        }
        Ok(self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
    }

    pub fn begin_run(&self, season_year: i32, poll_id: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO backfill_run (started_at, season_year, poll_id) VALUES (?1, ?2, ?3)",
            params![Utc::now().to_rfc3339(), season_year, poll_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_run(&self, run_id: i64, counts: &RunCounts, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE backfill_run
            SET finished_at = ?1, weeks_total = ?2, rankings_inserted = ?3,
                rankings_skipped = ?4, entries_dropped = ?5, entries_malformed = ?6,
                error = ?7
            WHERE run_id = ?8
            "#,
            params![
                Utc::now().to_rfc3339(),
                counts.weeks as i64,
                counts.rankings_inserted as i64,
                counts.rankings_skipped as i64,
                counts.entries_dropped as i64,
                counts.entries_malformed as i64,
                error,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn load_runs(&self) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT run_id, started_at, finished_at, season_year, poll_id,
                   weeks_total, rankings_inserted, rankings_skipped, entries_dropped,
                   entries_malformed, error
            FROM backfill_run
            ORDER BY run_id ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                season_year: row.get(3)?,
                poll_id: row.get(4)?,
                counts: RunCounts {
                    weeks: row.get::<_, i64>(5)? as usize,
                    rankings_inserted: row.get::<_, i64>(6)? as usize,
                    rankings_skipped: row.get::<_, i64>(7)? as usize,
                    entries_dropped: row.get::<_, i64>(8)? as usize,
                    entries_malformed: row.get::<_, i64>(9)? as usize,
                },
                error: row.get(10)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
