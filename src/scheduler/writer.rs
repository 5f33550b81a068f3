use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

use crate::db::models::PlayerStat;
use crate::db::Database;
use crate::grading::GradingEngine;
use crate::lifecycle::{self, SnapshotSource};
use crate::provider::ProviderEvent;
use crate::queue::{AlertSender, WriteCommand, WriteHandler, WriteTask};

/// The production [`WriteHandler`]: applies each command in one storage
/// transaction, then hands the resulting alerts to the alert queue.
///
/// Alerts are only sent after the transaction commits, so a rolled-back
/// write never announces anything.
pub struct StoreWriter {
    db: Database,
    alerts: AlertSender,
    grading: GradingEngine,
}

impl StoreWriter {
    pub fn new(db: Database, alerts: AlertSender) -> Self {
        StoreWriter {
            db,
            alerts,
            grading: GradingEngine::new(),
        }
    }

    fn apply_events(
        &self,
        source: SnapshotSource,
        events: &[ProviderEvent],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let outcome = self
            .db
            .with_session(|s| lifecycle::apply_events(s, source, events, now))
            .with_context(|| format!("applying {} {:?} event(s)", events.len(), source))?;

        for game in &outcome.went_live {
            self.alerts.send(lifecycle::live_alert(game));
        }
        for game in &outcome.finals {
            self.alerts.send(lifecycle::final_alert(game));
        }
        debug!(
            "{:?}: {} event(s) applied, {} went live, {} final",
            source,
            outcome.applied,
            outcome.went_live.len(),
            outcome.finals.len()
        );
        Ok(())
    }

    fn upsert_stats(&self, stats: &[PlayerStat]) -> Result<()> {
        self.db
            .with_session(|s| {
                for stat in stats {
                    s.upsert_player_stat(stat)?;
                }
                Ok(())
            })
            .with_context(|| format!("storing {} player statistic(s)", stats.len()))
    }

    fn grade(&self, stats: &[PlayerStat], stats_fetched: &[String], now: DateTime<Utc>) -> Result<()> {
        let fetched: HashSet<String> = stats_fetched.iter().cloned().collect();
        let report = self
            .db
            .with_session(|s| {
                for stat in stats {
                    s.upsert_player_stat(stat)?;
                }
                self.grading.grade_pending(s, now, &fetched)
            })
            .context("grading pending wagers")?;

        for alert in report.alerts() {
            self.alerts.send(alert);
        }
        Ok(())
    }
}

#[async_trait]
impl WriteHandler for StoreWriter {
    async fn apply(&self, task: &WriteTask) -> Result<()> {
        let now = Utc::now();
        match &task.command {
            WriteCommand::ApplyLiveSnapshot(events) => {
                self.apply_events(SnapshotSource::LivePoll, events, now)
            }
            WriteCommand::ApplySchedule(events) => {
                self.apply_events(SnapshotSource::Schedule, events, now)
            }
            WriteCommand::ReconcileGames(events) => {
                self.apply_events(SnapshotSource::Reconciliation, events, now)
            }
            WriteCommand::UpsertPlayerStats(stats) => self.upsert_stats(stats),
            WriteCommand::GradeBets {
                stats,
                stats_fetched,
            } => self.grade(stats, stats_fetched, now),
        }
    }
}
