pub mod odds;
pub mod parlay;
pub mod rules;

pub use parlay::{resolve_parlay, ParlayResolution};
pub use rules::{GameOutcome, GradeReason, GradeResult};

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::db::models::{AlertSeverity, GamePhase, NewAlert, PlayerStat, Wager, WagerStatus};
use crate::db::wagers::Settlement;
use crate::db::Session;
use crate::error::StoreResult;
use odds::{american_to_decimal, profit_for, round_cents};

pub const GRADING_CATEGORY: &str = "grading";

/// One wager moved out of `pending` during a pass.
#[derive(Debug, Clone)]
pub struct GradedWager {
    /// The wager as it was before grading
    pub wager: Wager,
    pub result: GradeResult,
    /// `None` for parlay legs (assigned when the group resolves) and for
    /// void/push singles
    pub profit: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedParlay {
    pub parlay_id: String,
    pub status: WagerStatus,
    pub legs: usize,
    pub stake: f64,
    pub total_profit: f64,
}

#[derive(Debug, Default)]
pub struct GradingReport {
    pub graded: Vec<GradedWager>,
    pub parlays: Vec<ResolvedParlay>,
    /// Pending wagers left for a later pass: no final result yet, or a prop
    /// whose statistic is missing before its box score was fetched
    pub deferred: usize,
}

impl GradingReport {
    pub fn is_empty(&self) -> bool {
        self.graded.is_empty() && self.parlays.is_empty()
    }

    /// One alert per graded single wager and one per resolved parlay.
    /// Individual legs do not alert.
    pub fn alerts(&self) -> Vec<NewAlert> {
        let singles = self
            .graded
            .iter()
            .filter(|g| !g.wager.is_parlay_leg())
            .map(|g| NewAlert {
                severity: AlertSeverity::Info,
                category: GRADING_CATEGORY.to_string(),
                message: format!(
                    "Wager #{} {}: {} (stake ${:.2}, profit ${:.2})",
                    g.wager.id,
                    g.result.status,
                    g.wager.selection,
                    g.wager.stake,
                    g.profit.unwrap_or(0.0)
                ),
                metadata: json!({
                    "wager_id": g.wager.id,
                    "game_id": g.wager.game_id,
                    "status": g.result.status.as_str(),
                    "reason": g.result.reason.as_str(),
                    "stake": g.wager.stake,
                    "profit": g.profit,
                    "result_value": g.result.result_value,
                }),
            });
        let parlays = self.parlays.iter().map(|p| NewAlert {
            severity: AlertSeverity::Info,
            category: GRADING_CATEGORY.to_string(),
            message: format!(
                "Parlay {} {}: {} legs (stake ${:.2}, profit ${:.2})",
                p.parlay_id, p.status, p.legs, p.stake, p.total_profit
            ),
            metadata: json!({
                "parlay_id": p.parlay_id,
                "status": p.status.as_str(),
                "legs": p.legs,
                "stake": p.stake,
                "profit": p.total_profit,
            }),
        });
        singles.chain(parlays).collect()
    }
}

/// Resolves pending wagers against final game results.
///
/// Runs inside a caller-provided session so the whole pass commits or rolls
/// back together. Only `pending` wagers and unresolved parlays are touched,
/// which makes repeated passes no-ops.
///
/// A prop whose statistic is missing is voided only when its game is in
/// `stats_fetched`, i.e. the provider's box score was already fetched for
/// this pass. Otherwise it stays pending.
#[derive(Debug, Default, Clone)]
pub struct GradingEngine;

impl GradingEngine {
    pub fn new() -> Self {
        GradingEngine
    }

    pub fn grade_pending(
        &self,
        session: &Session<'_>,
        now: DateTime<Utc>,
        stats_fetched: &HashSet<String>,
    ) -> StoreResult<GradingReport> {
        let mut report = GradingReport::default();
        let mut outcomes: HashMap<String, Option<GameOutcome>> = HashMap::new();
        let mut stats: HashMap<String, Vec<PlayerStat>> = HashMap::new();

        for wager in session.list_pending_wagers()? {
            let result = match wager.game_id.as_deref() {
                None => GradeResult::void(GradeReason::MissingGame),
                Some(game_id) => {
                    if !outcomes.contains_key(game_id) {
                        outcomes.insert(game_id.to_string(), final_outcome(session, game_id)?);
                    }
                    let Some(outcome) = outcomes.get(game_id).and_then(Option::as_ref) else {
                        report.deferred += 1;
                        continue;
                    };
                    if american_to_decimal(wager.odds).is_none() {
                        GradeResult::void(GradeReason::InvalidOdds)
                    } else if wager.kind.is_statistic() {
                        if !stats.contains_key(game_id) {
                            stats.insert(game_id.to_string(), session.list_player_stats(game_id)?);
                        }
                        let result = rules::grade_statistic(
                            &wager,
                            stats.get(game_id).map(Vec::as_slice).unwrap_or(&[]),
                        );
                        if result.reason == GradeReason::MissingStatistic
                            && !stats_fetched.contains(game_id)
                        {
                            report.deferred += 1;
                            continue;
                        }
                        result
                    } else {
                        rules::grade_outcome(&wager, outcome)
                    }
                }
            };

            let profit = if wager.is_parlay_leg() {
                None
            } else {
                match result.status {
                    WagerStatus::Won => profit_for(wager.stake, wager.odds),
                    WagerStatus::Lost => Some(-round_cents(wager.stake)),
                    _ => None,
                }
            };

            let settlement = Settlement {
                status: result.status,
                profit,
                result_value: result.result_value,
                graded_at: now,
            };
            if session.settle_wager(wager.id, &settlement)? {
                debug!(
                    "Wager #{} graded {} ({})",
                    wager.id,
                    result.status,
                    result.reason.as_str()
                );
                report.graded.push(GradedWager {
                    wager,
                    result,
                    profit,
                });
            }
        }

        for parlay_id in session.list_unresolved_parlays()? {
            let legs = session.list_parlay_legs(&parlay_id)?;
            let ParlayResolution::Resolved {
                status,
                total_profit,
                leg_profits,
            } = resolve_parlay(&legs)
            else {
                continue;
            };
            for (id, profit) in &leg_profits {
                session.set_leg_profit(*id, *profit)?;
            }
            report.parlays.push(ResolvedParlay {
                parlay_id,
                status,
                legs: legs.len(),
                stake: parlay::group_stake(&legs),
                total_profit,
            });
        }

        if !report.is_empty() {
            info!(
                "Grading pass: {} wager(s) graded, {} parlay(s) resolved, {} deferred",
                report.graded.len(),
                report.parlays.len(),
                report.deferred
            );
        }
        Ok(report)
    }
}

/// Final score for a game: the Final snapshot, or an umbrella record that
/// already carries a final status with both scores.
fn final_outcome(session: &Session<'_>, game_id: &str) -> StoreResult<Option<GameOutcome>> {
    if let Some(f) = session.get_final(game_id)? {
        return Ok(Some(GameOutcome::from(&f)));
    }
    Ok(session.get_game(game_id)?.and_then(|g| match (g.phase, g.home_score, g.away_score) {
        (GamePhase::Final, Some(home_score), Some(away_score)) => Some(GameOutcome {
            home_team: g.home_team,
            away_team: g.away_team,
            home_score,
            away_score,
        }),
        _ => None,
    }))
}
