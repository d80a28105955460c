//! Client for the ESPN core API rankings resources.
//!
//! Every document is fetched through a [`JsonSource`], and every fetch goes
//! through [`with_retry`]. Listings hold opaque `$ref` links to the week
//! resources, which in turn link to teams.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::http_client::http_client;

pub const ESPN_BASE_URL: &str =
    "https://sports.core.api.espn.com/v2/sports/football/leagues/college-football";

/// Something that can turn a URL into a JSON document in a single attempt.
pub trait JsonSource: Sync {
    fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

impl<T: JsonSource + ?Sized> JsonSource for &T {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        (**self).get_json(url)
    }
}

pub struct HttpSource {
    client: &'static Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> crate::error::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

impl JsonSource for HttpSource {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let transport = |err: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        };

        let resp = self.client.get(url).send().map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.text().map_err(transport)?;
        serde_json::from_str::<Value>(body.trim()).map_err(|err| FetchError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Sleep after the `attempt`-th failure (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails permanently, or the policy runs out.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    url: &str,
    mut op: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    return Err(FetchError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "fetch failed, backing off"
                );
                std::thread::sleep(delay);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekRef {
    pub season_type: i64,
    pub week_number: i64,
    pub url: String,
}

pub struct EspnClient<S> {
    source: S,
    base_url: String,
    retry: RetryPolicy,
}

impl<S: JsonSource> EspnClient<S> {
    pub fn new(source: S, base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            source,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        debug!(url, "fetching");
        with_retry(&self.retry, url, || self.source.get_json(url))
    }

    pub fn listing_url(&self, year: i32, poll_id: i64) -> String {
        format!(
            "{}/seasons/{year}/rankings/{poll_id}?lang=en&region=us",
            self.base_url
        )
    }

    /// Weeks published for a poll in a season, in listing order.
    pub fn list_weeks(&self, year: i32, poll_id: i64) -> Result<Vec<WeekRef>, FetchError> {
        let listing = self.fetch(&self.listing_url(year, poll_id))?;
        Ok(week_refs_from_listing(&listing))
    }

    pub fn get_poll_week(&self, url: &str) -> Result<Value, FetchError> {
        self.fetch(url)
    }

    pub fn get_team(&self, url: &str) -> Result<Value, FetchError> {
        self.fetch(url)
    }
}

pub fn week_refs_from_listing(listing: &Value) -> Vec<WeekRef> {
    listing
        .get("rankings")
        .and_then(|v| v.as_array())
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("$ref").and_then(|v| v.as_str()))
                .filter_map(|url| {
                    let (season_type, week_number) = parse_week_ref(url)?;
                    Some(WeekRef {
                        season_type,
                        week_number,
                        url: url.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

static WEEK_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/types/(\d+)/weeks/(\d+)/").expect("week ref pattern is valid"));

/// Extracts `(season_type, week_number)` from a `.../types/{N}/weeks/{M}/...` link.
pub fn parse_week_ref(reference: &str) -> Option<(i64, i64)> {
    let caps = WEEK_REF.captures(reference)?;
    let season_type = caps[1].parse::<i64>().ok()?;
    let week_number = caps[2].parse::<i64>().ok()?;
    Some((season_type, week_number))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn server_error() -> FetchError {
        FetchError::Status {
            url: "u".to_string(),
            status: 503,
        }
    }

    #[test]
    fn parse_week_ref_reads_type_and_week() {
        let url = "http://sports.core.api.espn.com/v2/sports/football/leagues/college-football/seasons/2024/types/2/weeks/7/rankings/1?lang=en&region=us";
        assert_eq!(parse_week_ref(url), Some((2, 7)));
        assert_eq!(parse_week_ref("/types/3/weeks/1/"), Some((3, 1)));
    }

    #[test]
    fn parse_week_ref_rejects_other_shapes() {
        assert_eq!(parse_week_ref("/seasons/2024/rankings/1"), None);
        assert_eq!(parse_week_ref("/types/2/weeks/7"), None);
        assert_eq!(parse_week_ref("/types/x/weeks/7/"), None);
        assert_eq!(parse_week_ref("/types//weeks/7/"), None);
        assert_eq!(parse_week_ref(""), None);
    }

    #[test]
    fn parse_week_ref_keeps_scanning_after_a_false_start() {
        assert_eq!(parse_week_ref("/types/abc/types/1/weeks/16/x"), Some((1, 16)));
    }

    #[test]
    fn listing_skips_non_week_refs() {
        let listing = json!({
            "rankings": [
                {"$ref": "http://x/seasons/2024/types/2/weeks/1/rankings/1"},
                {"$ref": "http://x/seasons/2024/rankings/1/final"},
                {"name": "no ref here"},
                {"$ref": "http://x/seasons/2024/types/3/weeks/1/rankings/1"}
            ]
        });
        let weeks = week_refs_from_listing(&listing);
        assert_eq!(weeks.len(), 2);
        assert_eq!((weeks[0].season_type, weeks[0].week_number), (2, 1));
        assert_eq!((weeks[1].season_type, weeks[1].week_number), (3, 1));
        assert!(week_refs_from_listing(&json!({})).is_empty());
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let calls = Cell::new(0);
        let result = with_retry(&instant_policy(5), "u", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(server_error())
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&instant_policy(4), "u", || {
            calls.set(calls.get() + 1);
            Err(server_error())
        });
        assert_eq!(calls.get(), 4);
        match result {
            Err(FetchError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, FetchError::Status { status: 503, .. }));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn retry_does_not_repeat_permanent_failures() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&instant_policy(10), "u", || {
            calls.set(calls.get() + 1);
            Err(FetchError::Status {
                url: "u".to_string(),
                status: 404,
            })
        });
        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
    }
}
