//! Fetch → classify → enqueue pipelines. Everything here only reads from
//! storage; mutations travel to the write queue as one task per pipeline run.

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use futures_util::future::join_all;
use futures_util::{stream, FutureExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

use super::SchedulerSettings;
use crate::db::models::{AlertSeverity, GameRef, PlayerStat};
use crate::db::Database;
use crate::lifecycle::reconciliation_order;
use crate::provider::{League, ProviderClient, ProviderEvent};
use crate::queue::{panic_message, AlertSender, WriteCommand, WriteSender};

pub const SCRAPER_CATEGORY: &str = "scraper";
pub const SCHEDULER_CATEGORY: &str = "scheduler";

/// Box scores gathered ahead of a grading pass
#[derive(Debug, Default)]
pub(crate) struct GradingStats {
    pub(crate) stats: Vec<PlayerStat>,
    /// Games whose box score was received, even if it had no rows
    pub(crate) fetched_games: Vec<String>,
}

pub(crate) struct Pipelines {
    pub(crate) settings: SchedulerSettings,
    pub(crate) provider: ProviderClient,
    db: Database,
    writes: WriteSender,
    alerts: AlertSender,
}

impl Pipelines {
    pub(crate) fn new(
        settings: SchedulerSettings,
        provider: ProviderClient,
        db: Database,
        writes: WriteSender,
        alerts: AlertSender,
    ) -> Self {
        Pipelines {
            settings,
            provider,
            db,
            writes,
            alerts,
        }
    }

    fn concurrency(&self) -> usize {
        self.settings.fetch_concurrency.max(1)
    }

    // ── Live poll ─────────────────────────────────────────────────────────────

    /// Poll today's scoreboard of every league concurrently and enqueue the
    /// combined events as one write.
    pub(crate) async fn update_live(&self) -> Result<usize> {
        let leagues = &self.settings.leagues;
        let results = join_all(leagues.iter().map(|league| {
            async move { (league, self.provider.scoreboard(league, None).await) }.boxed()
        }))
        .await;

        let mut events = Vec::new();
        let mut failed = Vec::new();
        for (league, result) in results {
            match result {
                Some(evs) => events.extend(evs),
                None => failed.push(league.to_string()),
            }
        }
        self.check_partial("live poll", leagues.len(), &failed)?;

        let n = events.len();
        if n > 0 {
            self.writes
                .enqueue("update_live", WriteCommand::ApplyLiveSnapshot(events));
        }
        debug!("Live poll: {} event(s) from {} league(s)", n, leagues.len() - failed.len());
        Ok(n)
    }

    // ── Full refresh ──────────────────────────────────────────────────────────

    /// Fetch every league's schedule from yesterday through
    /// `refresh_days_ahead`, then re-resolve unfinished games.
    pub(crate) async fn run_full_refresh(&self) -> Result<usize> {
        let today = Utc::now().date_naive();
        let dates: Vec<NaiveDate> = (-1..=i64::from(self.settings.refresh_days_ahead))
            .filter_map(|d| today.checked_add_signed(chrono::Duration::days(d)))
            .collect();
        let requests: Vec<(League, NaiveDate)> = self
            .settings
            .leagues
            .iter()
            .flat_map(|l| dates.iter().map(move |d| (l.clone(), *d)))
            .collect();
        let total = requests.len();

        let results: Vec<(League, NaiveDate, Option<Vec<ProviderEvent>>)> = stream::iter(requests)
            .map(|(league, date)| {
                async move {
                    let events = self.provider.scoreboard(&league, Some(date)).await;
                    (league, date, events)
                }
                .boxed()
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        let mut by_id: HashMap<String, ProviderEvent> = HashMap::new();
        let mut failed = Vec::new();
        for (league, date, result) in results {
            match result {
                Some(events) => {
                    for ev in events {
                        by_id.insert(ev.event_id.clone(), ev);
                    }
                }
                None => failed.push(format!("{} {}", league, date)),
            }
        }
        self.check_partial("full refresh", total, &failed)?;

        let events: Vec<ProviderEvent> = by_id.into_values().collect();
        let n = events.len();
        if n > 0 {
            self.writes
                .enqueue("full_refresh", WriteCommand::ApplySchedule(events));
        }
        let reconciled = self.reconcile_statuses().await?;
        info!(
            "Full refresh: {} event(s) over {} day(s), {} game(s) reconciled",
            n,
            dates.len(),
            reconciled
        );
        Ok(n)
    }

    // ── Status reconciliation ─────────────────────────────────────────────────

    /// Re-resolve every unfinished game that started within the look-back
    /// window, trying its stored league first and then every configured
    /// league.
    pub(crate) async fn reconcile_statuses(&self) -> Result<usize> {
        let now = Utc::now();
        let since = now - chrono::Duration::days(i64::from(self.settings.reconcile_lookback_days));
        let games = self
            .db
            .with_session(|s| s.list_unfinished_games(Some(now), Some(since)))?;
        if games.is_empty() {
            return Ok(0);
        }

        let all = &self.settings.leagues;
        let found: Vec<Option<ProviderEvent>> = stream::iter(games.iter().map(|game| {
                async move {
                    let known = League::new(&game.sport, &game.league);
                    for league in reconciliation_order(Some(&known), all) {
                        if let Some(ev) = self.provider.event(&league, &game.game_id).await {
                            return Some(ev);
                        }
                    }
                    None
                }
                .boxed()
            }).collect::<Vec<_>>())
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        let events: Vec<ProviderEvent> = found.into_iter().flatten().collect();
        if events.len() < games.len() {
            debug!(
                "Reconcile: {} of {} unfinished game(s) not found in any league",
                games.len() - events.len(),
                games.len()
            );
        }
        let n = events.len();
        if n > 0 {
            self.writes
                .enqueue("reconcile", WriteCommand::ReconcileGames(events));
        }
        Ok(n)
    }

    // ── Statistics ────────────────────────────────────────────────────────────

    /// Box scores for final games that have pending prop wagers but no
    /// stored statistic.
    pub(crate) async fn collect_grading_stats(&self) -> Result<GradingStats> {
        let refs = self.db.with_session(|s| s.list_games_needing_stats())?;
        Ok(self.fetch_box_scores(&refs).await)
    }

    /// Fetch statistics for recent final games that have none stored.
    pub(crate) async fn backfill_stats(&self) -> Result<usize> {
        let since = Utc::now() - chrono::Duration::days(i64::from(self.settings.stats_lookback_days));
        let refs = self
            .db
            .with_session(|s| s.list_finals_missing_stats(since))?;
        let stats = self.fetch_box_scores(&refs).await.stats;
        let n = stats.len();
        if n > 0 {
            self.writes
                .enqueue("backfill_stats", WriteCommand::UpsertPlayerStats(stats));
        }
        info!("Stats backfill: {} statistic(s) for {} game(s)", n, refs.len());
        Ok(n)
    }

    async fn fetch_box_scores(&self, refs: &[GameRef]) -> GradingStats {
        let per_game: Vec<(String, Option<Vec<PlayerStat>>)> = stream::iter(refs.iter().map(|r| {
                async move {
                    let league = League::new(&r.sport, &r.league);
                    let stats = self.provider.box_score(&league, &r.game_id).await;
                    if stats.is_none() {
                        debug!("No box score for {} ({})", r.game_id, league);
                    }
                    (r.game_id.clone(), stats)
                }
                .boxed()
            }).collect::<Vec<_>>())
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        let mut out = GradingStats::default();
        for (game_id, stats) in per_game {
            if let Some(stats) = stats {
                out.stats.extend(stats);
                out.fetched_games.push(game_id);
            }
        }
        out
    }

    // ── Grading ───────────────────────────────────────────────────────────────

    pub(crate) async fn grade_pending(&self) -> Result<()> {
        let stats = self.collect_grading_stats().await?;
        self.enqueue_grading(stats);
        Ok(())
    }

    pub(crate) fn enqueue_grading(&self, input: GradingStats) -> bool {
        self.writes.enqueue(
            "grade",
            WriteCommand::GradeBets {
                stats: input.stats,
                stats_fetched: input.fetched_games,
            },
        )
    }

    // ── Failure isolation ─────────────────────────────────────────────────────

    /// Run one scheduled unit. Errors and panics stop here and become alerts.
    pub(crate) async fn run_unit<T, F>(&self, name: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                error!("{} failed: {:#}", name, e);
                self.alerts.enqueue(
                    AlertSeverity::Error,
                    SCRAPER_CATEGORY,
                    format!("{} failed: {:#}", name, e),
                    json!({ "unit": name, "error": format!("{:#}", e) }),
                );
                None
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!("{} panicked: {}", name, msg);
                self.alerts.enqueue(
                    AlertSeverity::Critical,
                    SCHEDULER_CATEGORY,
                    format!("{} panicked: {}", name, msg),
                    json!({ "unit": name, "panic": msg }),
                );
                None
            }
        }
    }

    /// Partial failure is reported and tolerated; total failure is an error.
    fn check_partial(&self, what: &str, total: usize, failed: &[String]) -> Result<()> {
        if failed.is_empty() {
            return Ok(());
        }
        if failed.len() == total {
            bail!("{}: no response for any of {} request(s)", what, total);
        }
        warn!("{}: {} of {} request(s) failed: {}", what, failed.len(), total, failed.join(", "));
        self.alerts.enqueue(
            AlertSeverity::Warning,
            SCRAPER_CATEGORY,
            format!("{}: {} of {} request(s) failed", what, failed.len(), total),
            json!({ "operation": what, "failed": failed }),
        );
        Ok(())
    }
}
