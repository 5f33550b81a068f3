pub mod espn;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::models::PlayerStat;

/// Fetches structured payloads from the sports-data provider.
///
/// Transport failures and non-success responses come back as `None`; there is
/// no retry at this layer.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<serde_json::Value>;

    /// Release network resources. Called once on scheduler shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// `DataFetcher` backed by a shared reqwest client.
pub struct HttpFetcher {
    http: Client,
    closed: AtomicBool,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("livesports-grader/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpFetcher {
            http,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl DataFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Option<serde_json::Value> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        debug!("Fetching {}", url);

        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Provider request failed for {}: {}", url, e);
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!("Provider returned {} for {}", resp.status(), url);
            return None;
        }
        match resp.json::<serde_json::Value>().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Provider response from {} is not JSON: {}", url, e);
                None
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// A sport/league pair served by the provider, written `sport/league`
/// (e.g. `basketball/nba`, `soccer/eng.1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct League {
    pub sport: String,
    pub league: String,
}

impl League {
    pub fn new(sport: &str, league: &str) -> Self {
        League {
            sport: sport.to_string(),
            league: league.to_string(),
        }
    }
}

impl FromStr for League {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('/') {
            Some((sport, league)) if !sport.is_empty() && !league.is_empty() => {
                Ok(League::new(sport, league))
            }
            _ => anyhow::bail!("league '{}' must be written as sport/league", s),
        }
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sport, self.league)
    }
}

pub const DEFAULT_LEAGUES: &[&str] = &[
    "football/nfl",
    "football/college-football",
    "basketball/nba",
    "basketball/wnba",
    "basketball/mens-college-basketball",
    "baseball/mlb",
    "hockey/nhl",
    "soccer/eng.1",
    "soccer/usa.1",
];

/// One event as reported by the provider, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    pub event_id: String,
    pub sport: String,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    /// Machine status name, e.g. "STATUS_IN_PROGRESS"
    pub status: String,
    /// Human status line, e.g. "Halftime", "End of 3rd", "67'"
    pub status_detail: String,
    pub clock: Option<String>,
    pub period: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub home_odds: Option<i32>,
    pub away_odds: Option<i32>,
    pub spread: Option<f64>,
    pub total: Option<f64>,
}

/// Provider endpoints on top of a `DataFetcher`.
#[derive(Clone)]
pub struct ProviderClient {
    fetcher: Arc<dyn DataFetcher>,
    base_url: String,
}

impl ProviderClient {
    pub fn new(fetcher: Arc<dyn DataFetcher>, base_url: &str) -> Self {
        ProviderClient {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Events on a league's scoreboard; `date = None` asks for the
    /// provider's current day.
    pub async fn scoreboard(
        &self,
        league: &League,
        date: Option<NaiveDate>,
    ) -> Option<Vec<ProviderEvent>> {
        let url = espn::scoreboard_url(&self.base_url, league, date).ok()?;
        let raw = self.fetcher.fetch(url.as_str()).await?;
        Some(espn::parse_scoreboard(&raw, league))
    }

    /// Look one event up by id within a league.
    pub async fn event(&self, league: &League, event_id: &str) -> Option<ProviderEvent> {
        let url = espn::summary_url(&self.base_url, league, event_id).ok()?;
        let raw = self.fetcher.fetch(url.as_str()).await?;
        espn::parse_summary(&raw, league).filter(|ev| ev.event_id == event_id)
    }

    /// Per-participant statistics for a finished game.
    pub async fn box_score(&self, league: &League, game_id: &str) -> Option<Vec<PlayerStat>> {
        let url = espn::summary_url(&self.base_url, league, game_id).ok()?;
        let raw = self.fetcher.fetch(url.as_str()).await?;
        Some(espn::parse_box_score(&raw, game_id))
    }

    pub async fn close(&self) -> Result<()> {
        self.fetcher.close().await
    }
}
