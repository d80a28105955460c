use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use cfb_polls::export::{DEFAULT_EXPORTS, export_views, query_view};
use cfb_polls::ranking::RankObservation;
use cfb_polls::store::Store;

fn scratch_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("cfb_polls_{tag}_{}_{nanos}", std::process::id()))
}

fn rank(current_rank: i64) -> RankObservation {
    RankObservation {
        current_rank,
        points: 1600 - current_rank * 60,
        first_place_votes: if current_rank == 1 { 60 } else { 0 },
        wins: 1,
        losses: 0,
        trend: 0,
    }
}

/// Two weeks of poll 1: Georgia 1 -> 3, Texas 2 -> 1.
fn seeded_store() -> Store {
    let store = Store::open_in_memory().expect("in-memory store");
    let season = store.season_id(2024).unwrap();
    let week1 = store.week_id(1, season, 2).unwrap();
    let week2 = store.week_id(2, season, 2).unwrap();
    let uga_school = store.school_id("Georgia Bulldogs").unwrap();
    let tex_school = store.school_id("Texas Longhorns").unwrap();
    let uga = store.team_id("Georgia", uga_school, "UGA").unwrap();
    let tex = store.team_id("Texas", tex_school, "TEX").unwrap();

    store.insert_ranking(1, week1, uga, &rank(1)).unwrap();
    store.insert_ranking(1, week1, tex, &rank(2)).unwrap();
    store.insert_ranking(1, week2, uga, &rank(3)).unwrap();
    store.insert_ranking(1, week2, tex, &rank(1)).unwrap();
    store
}

#[test]
fn rankings_view_rows_are_keyed_by_column() {
    let store = seeded_store();
    let rows = query_view(store.connection(), "v_team_rankings").unwrap();
    assert_eq!(rows.len(), 4);
    let first = &rows[0];
    assert_eq!(first["poll_name"], Value::from("AP Top 25"));
    assert_eq!(first["season_year"], Value::from(2024));
    assert_eq!(first["season_type_name"], Value::from("Regular Season"));
    assert_eq!(first["week_number"], Value::from(1));
    assert_eq!(first["team_name"], Value::from("Georgia"));
    assert_eq!(first["school_name"], Value::from("Georgia Bulldogs"));
    assert_eq!(first["ranking_current_rank"], Value::from(1));
    assert_eq!(first["ranking_points"], Value::from(1540));
    assert_eq!(first["ranking_first_place_votes"], Value::from(60));
    assert!(first["ranking_week_fk"].is_i64());
}

#[test]
fn alltime_summary_counts_top_finishes() {
    let store = seeded_store();
    let summary = query_view(store.connection(), "v_team_alltime_summary").unwrap();
    let texas = summary
        .iter()
        .find(|row| row["team_abbreviation"] == "TEX")
        .expect("texas summary row");
    assert_eq!(texas["poll_name"], Value::from("AP Top 25"));
    assert_eq!(texas["total_weeks_ranked"], Value::from(2));
    assert_eq!(texas["weeks_at_number_one"], Value::from(1));
    assert_eq!(texas["weeks_in_top_3"], Value::from(2));
    assert_eq!(texas["weeks_in_top_10"], Value::from(2));
    assert_eq!(texas["best_rank"], Value::from(1));
}

#[test]
fn overrated_index_and_stats() {
    let store = seeded_store();
    let conn = store.connection();

    let overrated = query_view(conn, "v_team_overrated_index").unwrap();
    assert_eq!(overrated.len(), 2);
    assert_eq!(overrated[0]["team_abbreviation"], Value::from("UGA"));
    assert_eq!(overrated[0]["season_year"], Value::from(2024));
    assert_eq!(overrated[0]["initial_rank"], Value::from(1));
    assert_eq!(overrated[0]["final_rank"], Value::from(3));
    assert_eq!(overrated[0]["overrated_index"], Value::from(2));
    assert_eq!(overrated[1]["overrated_index"], Value::from(-1));

    let stats = query_view(conn, "v_team_overrated_index_stats").unwrap();
    let georgia = stats
        .iter()
        .find(|row| row["team_name"] == "Georgia" && row["poll_name"] == "AP Top 25")
        .expect("georgia stats row");
    assert_eq!(georgia["avg_overrated_index"].as_f64(), Some(2.0));
    assert_eq!(georgia["seasons_counted"], Value::from(1));
}

#[test]
fn stats_average_across_seasons() {
    let store = seeded_store();
    // Georgia 2023: 2 -> 2, so the two-season average is (2 + 0) / 2.
    let season = store.season_id(2023).unwrap();
    let week1 = store.week_id(1, season, 2).unwrap();
    let week2 = store.week_id(2, season, 2).unwrap();
    let school = store.school_id("Georgia Bulldogs").unwrap();
    let uga = store.team_id("Georgia", school, "UGA").unwrap();
    store.insert_ranking(1, week1, uga, &rank(2)).unwrap();
    store.insert_ranking(1, week2, uga, &rank(2)).unwrap();

    let conn = store.connection();
    let overrated = query_view(conn, "v_team_overrated_index_stats").unwrap();
    let georgia = overrated
        .iter()
        .find(|row| row["team_abbreviation"] == "UGA")
        .expect("georgia overrated stats");
    assert_eq!(georgia["avg_overrated_index"].as_f64(), Some(1.0));
    assert_eq!(georgia["seasons_counted"], Value::from(2));

    let collapse = query_view(conn, "v_team_collapse_index_stats").unwrap();
    let georgia = collapse
        .iter()
        .find(|row| row["team_abbreviation"] == "UGA")
        .expect("georgia collapse stats");
    assert_eq!(georgia["avg_collapse_index"].as_f64(), Some(1.0));
    assert_eq!(georgia["max_collapse_index"], Value::from(2));
    assert_eq!(georgia["seasons_counted"], Value::from(2));
}

#[test]
fn collapse_index_measures_best_to_last() {
    let store = seeded_store();
    let collapse = query_view(store.connection(), "v_team_collapse_index").unwrap();
    let georgia = collapse
        .iter()
        .find(|row| row["team_abbreviation"] == "UGA")
        .expect("georgia collapse row");
    assert_eq!(georgia["best_rank"], Value::from(1));
    assert_eq!(georgia["final_rank"], Value::from(3));
    assert_eq!(georgia["collapse_index"], Value::from(2));
}

#[test]
fn export_writes_one_pretty_array_per_view() {
    let store = seeded_store();
    let out_dir = scratch_dir("export");

    let exported = export_views(store.connection(), &out_dir, DEFAULT_EXPORTS).unwrap();
    assert_eq!(exported.len(), DEFAULT_EXPORTS.len());

    let rankings = exported
        .iter()
        .find(|e| e.view == "v_team_rankings")
        .expect("rankings export");
    assert_eq!(rankings.rows, 4);
    assert_eq!(rankings.path, out_dir.join("rankings.json"));
    for file in ["overrated_stats.json", "collapse_stats.json"] {
        assert!(out_dir.join(file).exists(), "{file} not written");
    }

    let raw = fs::read_to_string(&rankings.path).unwrap();
    assert!(raw.starts_with("[\n  {"));
    let parsed: Vec<Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.len(), 4);
    assert!(parsed.iter().all(|row| row.get("ranking_current_rank").is_some()));
    assert!(!out_dir.join("rankings.json.tmp").exists());

    fs::remove_dir_all(&out_dir).ok();
}

#[test]
fn export_of_missing_view_fails() {
    let store = seeded_store();
    let out_dir = scratch_dir("missing");
    let result = export_views(
        store.connection(),
        &out_dir,
        &[("v_does_not_exist", "nothing.json")],
    );
    assert!(result.is_err());
    fs::remove_dir_all(&out_dir).ok();
}
