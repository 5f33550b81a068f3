use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::time::Duration;

use crate::provider::{League, DEFAULT_LEAGUES};
use crate::queue::RetryPolicy;
use crate::scheduler::SchedulerSettings;

/// One operation to run instead of the cadence loop
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShot {
    FullRefresh,
    UpdateLive,
    Reconcile,
    BackfillStats,
    Grade,
}

/// Live sports ingestion and wager grading service
#[derive(Parser, Debug, Clone)]
#[command(name = "livesports-grader", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "livesports.db")]
    pub database_path: String,

    /// Sports-data provider base URL
    #[arg(
        long,
        env = "PROVIDER_BASE_URL",
        default_value = "https://site.api.espn.com/apis/site/v2/sports"
    )]
    pub provider_base_url: String,

    /// Leagues to follow, as comma-separated "sport/league" pairs
    #[arg(
        long,
        env = "LEAGUES",
        value_delimiter = ',',
        default_values_t = DEFAULT_LEAGUES.iter().map(|l| l.to_string()).collect::<Vec<_>>()
    )]
    pub leagues: Vec<String>,

    /// Live polling interval in seconds
    #[arg(long, env = "LIVE_INTERVAL_SECS", default_value = "60")]
    pub live_interval_secs: u64,

    /// Full multi-league refresh interval in seconds
    #[arg(long, env = "FULL_REFRESH_INTERVAL_SECS", default_value = "21600")]
    pub full_refresh_interval_secs: u64,

    /// Statistics backfill interval in seconds
    #[arg(long, env = "STATS_BACKFILL_INTERVAL_SECS", default_value = "7200")]
    pub stats_backfill_interval_secs: u64,

    /// Minimum wait before retrying a failed slow cadence, in seconds
    #[arg(long, env = "RETRY_AFTER_SECS", default_value = "300")]
    pub retry_after_secs: u64,

    /// Delay before the first scheduler cycle, in seconds
    #[arg(long, env = "STARTUP_DELAY_SECS", default_value = "30")]
    pub startup_delay_secs: u64,

    /// Status reconciliation interval in seconds
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value = "600")]
    pub reconcile_interval_secs: u64,

    /// How far back reconciliation looks for unfinished games, in days
    #[arg(long, env = "RECONCILE_LOOKBACK_DAYS", default_value = "3")]
    pub reconcile_lookback_days: u32,

    /// Days ahead of today covered by a full refresh
    #[arg(long, env = "REFRESH_DAYS_AHEAD", default_value = "3")]
    pub refresh_days_ahead: u32,

    /// How far back the statistics backfill looks for final games, in days
    #[arg(long, env = "STATS_LOOKBACK_DAYS", default_value = "3")]
    pub stats_lookback_days: u32,

    /// Write queue buffer size; tasks beyond it are dropped
    #[arg(long, env = "WRITE_QUEUE_CAPACITY", default_value = "256")]
    pub write_queue_capacity: usize,

    /// Bounded wait for each queue to drain on shutdown, in seconds
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value = "30")]
    pub drain_timeout_secs: u64,

    /// Retries for an alert write that hits a locked database
    #[arg(long, env = "ALERT_MAX_RETRIES", default_value = "5")]
    pub alert_max_retries: u32,

    /// Base backoff for alert retries in milliseconds (doubles each retry)
    #[arg(long, env = "ALERT_RETRY_BASE_MS", default_value = "200")]
    pub alert_retry_base_ms: u64,

    /// Provider HTTP request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    pub http_timeout_secs: u64,

    /// Concurrent provider requests per pipeline
    #[arg(long, env = "FETCH_CONCURRENCY", default_value = "4")]
    pub fetch_concurrency: usize,

    /// Run a single operation, drain the queues and exit
    #[arg(long, value_enum)]
    pub once: Option<OneShot>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.leagues.is_empty() {
            bail!("at least one league is required");
        }
        for l in &self.leagues {
            l.parse::<League>()?;
        }
        url::Url::parse(&self.provider_base_url)
            .with_context(|| format!("invalid provider_base_url {:?}", self.provider_base_url))?;
        if self.live_interval_secs == 0 {
            bail!("live_interval_secs must be positive");
        }
        if self.full_refresh_interval_secs < self.live_interval_secs {
            bail!("full_refresh_interval_secs must not be shorter than live_interval_secs");
        }
        if self.stats_backfill_interval_secs == 0 {
            bail!("stats_backfill_interval_secs must be positive");
        }
        if self.reconcile_interval_secs == 0 {
            bail!("reconcile_interval_secs must be positive");
        }
        if self.write_queue_capacity == 0 {
            bail!("write_queue_capacity must be positive");
        }
        if self.alert_retry_base_ms == 0 {
            bail!("alert_retry_base_ms must be positive");
        }
        if self.alert_max_retries > 10 {
            bail!("alert_max_retries must be at most 10");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be positive");
        }
        if !(1..=32).contains(&self.fetch_concurrency) {
            bail!("fetch_concurrency must be between 1 and 32");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn scheduler_settings(&self) -> Result<SchedulerSettings> {
        let leagues = self
            .leagues
            .iter()
            .map(|l| l.parse::<League>())
            .collect::<Result<Vec<_>>>()?;
        Ok(SchedulerSettings {
            leagues,
            provider_base_url: self.provider_base_url.clone(),
            live_interval: Duration::from_secs(self.live_interval_secs),
            full_refresh_interval: Duration::from_secs(self.full_refresh_interval_secs),
            stats_backfill_interval: Duration::from_secs(self.stats_backfill_interval_secs),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
            retry_after: Duration::from_secs(self.retry_after_secs),
            startup_delay: Duration::from_secs(self.startup_delay_secs),
            refresh_days_ahead: self.refresh_days_ahead,
            stats_lookback_days: self.stats_lookback_days,
            reconcile_lookback_days: self.reconcile_lookback_days,
            write_queue_capacity: self.write_queue_capacity,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            alert_retry: RetryPolicy {
                max_retries: self.alert_max_retries,
                base_delay: Duration::from_millis(self.alert_retry_base_ms),
            },
            fetch_concurrency: self.fetch_concurrency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::parse_from(["livesports-grader"]);
        config.validate().unwrap();
        let settings = config.scheduler_settings().unwrap();
        assert_eq!(settings.leagues.len(), DEFAULT_LEAGUES.len());
        assert_eq!(settings.live_interval, Duration::from_secs(60));
        assert_eq!(settings.alert_retry.max_retries, 5);
        assert_eq!(settings.reconcile_interval, Duration::from_secs(600));
        assert_eq!(settings.reconcile_lookback_days, 3);
        assert!(config.once.is_none());
    }

    #[test]
    fn test_league_list_and_one_shot() {
        let config = Config::parse_from([
            "livesports-grader",
            "--leagues",
            "basketball/nba,hockey/nhl",
            "--once",
            "backfill-stats",
        ]);
        config.validate().unwrap();
        let settings = config.scheduler_settings().unwrap();
        assert_eq!(settings.leagues, vec![League::new("basketball", "nba"), League::new("hockey", "nhl")]);
        assert_eq!(config.once, Some(OneShot::BackfillStats));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_league = Config::parse_from(["livesports-grader", "--leagues", "nba"]);
        assert!(bad_league.validate().is_err());

        let no_backoff = Config::parse_from(["livesports-grader", "--alert-retry-base-ms", "0"]);
        assert!(no_backoff.validate().is_err());

        let no_reconcile = Config::parse_from(["livesports-grader", "--reconcile-interval-secs", "0"]);
        assert!(no_reconcile.validate().is_err());

        let slow_live = Config::parse_from([
            "livesports-grader",
            "--live-interval-secs",
            "600",
            "--full-refresh-interval-secs",
            "60",
        ]);
        assert!(slow_live.validate().is_err());
    }
}
