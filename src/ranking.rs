use serde_json::Value;

use crate::error::{Error, Result};

/// One team's line in one poll week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RankObservation {
    pub current_rank: i64,
    pub points: i64,
    pub first_place_votes: i64,
    pub wins: i64,
    pub losses: i64,
    pub trend: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankEntry {
    pub observation: RankObservation,
    pub team_ref: String,
}

impl RankEntry {
    pub fn from_json(v: &Value) -> Result<Self> {
        let current_rank = v
            .get("current")
            .and_then(as_i64_any)
            .ok_or_else(|| Error::MalformedRank("missing current rank".to_string()))?;
        let team_ref = v
            .get("team")
            .and_then(|t| t.get("$ref"))
            .and_then(|r| r.as_str())
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                Error::MalformedRank(format!("rank {current_rank} has no team reference"))
            })?
            .to_string();

        let stats = v
            .get("record")
            .and_then(|r| r.get("stats"))
            .and_then(|s| s.as_array());
        let stat = |idx: usize| {
            stats
                .and_then(|s| s.get(idx))
                .and_then(|s| s.get("value"))
                .and_then(as_i64_any)
                .unwrap_or(0)
        };

        let trend = match v.get("trend") {
            None | Some(Value::Null) => 0,
            Some(Value::String(raw)) => normalize_trend(raw)?,
            Some(other) => as_i64_any(other).ok_or_else(|| Error::InvalidTrend(other.to_string()))?,
        };

        Ok(Self {
            observation: RankObservation {
                current_rank,
                points: v.get("points").and_then(as_i64_any).unwrap_or(0),
                first_place_votes: v.get("firstPlaceVotes").and_then(as_i64_any).unwrap_or(0),
                wins: stat(0),
                losses: stat(1),
                trend,
            },
            team_ref,
        })
    }
}

/// Upstream writes "no change" as a lone hyphen. Anything else must be a
/// signed integer, so "-3" is a three-place drop, not the sentinel.
pub fn normalize_trend(raw: &str) -> Result<i64> {
    let trimmed = raw.trim();
    if trimmed == "-" {
        return Ok(0);
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| Error::InvalidTrend(raw.to_string()))
}

/// Accepts integers, floats (truncated) and numeric strings.
fn as_i64_any(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if let Some(f) = v.as_f64() {
        return f.is_finite().then_some(f as i64);
    }
    let raw = v.as_str()?.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn trend_sentinel_is_exact() {
        assert_eq!(normalize_trend("-").unwrap(), 0);
        assert_eq!(normalize_trend("3").unwrap(), 3);
        assert_eq!(normalize_trend("-3").unwrap(), -3);
        assert_eq!(normalize_trend("+2").unwrap(), 2);
        assert!(matches!(normalize_trend("--"), Err(Error::InvalidTrend(_))));
        assert!(normalize_trend("up").is_err());
    }

    #[test]
    fn parses_full_rank_entry() {
        let entry = RankEntry::from_json(&json!({
            "current": 4,
            "previous": 6,
            "points": 1320.0,
            "firstPlaceVotes": 2,
            "trend": "+2",
            "record": {"stats": [{"name": "wins", "value": 6.0}, {"name": "losses", "value": 1.0}]},
            "team": {"$ref": "http://x/teams/61"}
        }))
        .unwrap();
        assert_eq!(
            entry.observation,
            RankObservation {
                current_rank: 4,
                points: 1320,
                first_place_votes: 2,
                wins: 6,
                losses: 1,
                trend: 2,
            }
        );
        assert_eq!(entry.team_ref, "http://x/teams/61");
    }

    #[test]
    fn missing_record_defaults_to_zero() {
        let entry = RankEntry::from_json(&json!({
            "current": 25,
            "trend": "-",
            "team": {"$ref": "http://x/teams/1"}
        }))
        .unwrap();
        assert_eq!(entry.observation.wins, 0);
        assert_eq!(entry.observation.losses, 0);
        assert_eq!(entry.observation.points, 0);
        assert_eq!(entry.observation.trend, 0);
    }

    #[test]
    fn numeric_trend_is_accepted() {
        let entry = RankEntry::from_json(&json!({
            "current": 3,
            "trend": -1,
            "team": {"$ref": "http://x/teams/1"}
        }))
        .unwrap();
        assert_eq!(entry.observation.trend, -1);
    }

    #[test]
    fn rejects_entries_without_rank_or_team() {
        assert!(matches!(
            RankEntry::from_json(&json!({"team": {"$ref": "http://x"}})),
            Err(Error::MalformedRank(_))
        ));
        assert!(matches!(
            RankEntry::from_json(&json!({"current": 1, "team": {}})),
            Err(Error::MalformedRank(_))
        ));
    }
}
