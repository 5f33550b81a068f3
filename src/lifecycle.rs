//! Game lifecycle: classify polled provider status strings and fold events
//! into the Upcoming / Live / Final snapshots.
//!
//! The three snapshots are not exclusive. A game past its start time can hold
//! both an Upcoming and a Live row; Final is the only terminal target, and
//! writing it removes the Upcoming row.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::db::models::{
    AlertSeverity, FinalGame, GamePhase, GameRecord, LiveGame, NewAlert, UpcomingGame,
};
use crate::db::Session;
use crate::error::StoreResult;
use crate::provider::{League, ProviderEvent};

pub const GAME_LIVE_CATEGORY: &str = "game_live";
pub const GAME_FINAL_CATEGORY: &str = "game_final";

// ── Status classification ─────────────────────────────────────────────────────

/// Map a provider status to a phase.
///
/// Checked in order: final, interrupted, break, in-progress, soccer minute
/// marker, scheduled. Anything else is `Unknown`.
pub fn classify_status(status: &str, detail: &str, clock: Option<&str>, sport: &str) -> GamePhase {
    let lowered = status.trim().to_lowercase();
    let s = lowered.strip_prefix("status_").unwrap_or(&lowered);
    let d = detail.trim().to_lowercase();

    if s.starts_with("final")
        || matches!(s, "full_time" | "ft" | "finished" | "aet" | "pen" | "post" | "complete" | "completed")
        || d == "final"
        || d.starts_with("final/")
        || d == "ft"
    {
        return GamePhase::Final;
    }

    if matches!(
        s,
        "postponed" | "canceled" | "cancelled" | "suspended" | "delayed" | "rain_delay" | "abandoned" | "forfeit"
    ) || d.starts_with("postponed")
        || d.starts_with("suspended")
        || d.starts_with("delayed")
    {
        return GamePhase::Interrupted;
    }

    if matches!(s, "halftime" | "half_time" | "ht" | "end_period" | "end_of_period" | "intermission")
        || d.starts_with("halftime")
        || d.starts_with("end of")
        || d.contains("intermission")
    {
        return GamePhase::Break;
    }

    if matches!(
        s,
        "in_progress" | "in" | "live" | "early" | "first_half" | "second_half" | "overtime" | "shootout"
            | "extra_time" | "penalties"
    ) {
        return GamePhase::InProgress;
    }

    if sport == "soccer"
        && (is_minute_marker(&d) || clock.map(|c| is_minute_marker(c.trim())).unwrap_or(false))
    {
        return GamePhase::InProgress;
    }

    if matches!(s, "scheduled" | "pre" | "not_started" | "not started" | "ns" | "tbd" | "created") {
        return GamePhase::Scheduled;
    }

    GamePhase::Unknown
}

pub fn classify_event(ev: &ProviderEvent) -> GamePhase {
    classify_status(&ev.status, &ev.status_detail, ev.clock.as_deref(), &ev.sport)
}

/// Soccer match clock such as `67'` or `45'+2'`.
fn is_minute_marker(s: &str) -> bool {
    let Some((minute, rest)) = s.split_once('\'') else {
        return false;
    };
    if minute.is_empty() || minute.len() > 3 || !minute.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match rest.strip_prefix('+') {
        None => rest.is_empty(),
        Some(added) => {
            let added = added.strip_suffix('\'').unwrap_or(added);
            !added.is_empty() && added.len() <= 2 && added.bytes().all(|b| b.is_ascii_digit())
        }
    }
}

/// A game "goes live" when it is now in progress and the previous snapshot
/// was not (or there was none).
pub fn is_live_transition(previous: Option<GamePhase>, next: GamePhase) -> bool {
    next == GamePhase::InProgress && previous != Some(GamePhase::InProgress)
}

// ── Snapshot planning ─────────────────────────────────────────────────────────

/// The rows one provider event maps to
#[derive(Debug, Clone)]
pub struct SnapshotPlan {
    pub phase: GamePhase,
    pub game: GameRecord,
    pub live: Option<LiveGame>,
    pub upcoming: Option<UpcomingGame>,
    pub final_game: Option<FinalGame>,
}

pub fn plan_snapshot(ev: &ProviderEvent, now: DateTime<Utc>) -> SnapshotPlan {
    // A final status without both scores cannot be graded. Leave the game
    // unfinished so a later poll or reconciliation supplies them.
    let phase = match (classify_event(ev), ev.home_score, ev.away_score) {
        (GamePhase::Final, Some(_), Some(_)) => GamePhase::Final,
        (GamePhase::Final, _, _) => GamePhase::Unknown,
        (phase, _, _) => phase,
    };

    let game = GameRecord {
        game_id: ev.event_id.clone(),
        sport: ev.sport.clone(),
        league: ev.league.clone(),
        home_team: ev.home_team.clone(),
        away_team: ev.away_team.clone(),
        start_time: ev.start_time,
        status: ev.status.clone(),
        phase,
        home_score: ev.home_score,
        away_score: ev.away_score,
        updated_at: now,
    };

    let live = matches!(
        phase,
        GamePhase::Scheduled | GamePhase::InProgress | GamePhase::Break | GamePhase::Final
    )
    .then(|| LiveGame {
        game_id: ev.event_id.clone(),
        sport: ev.sport.clone(),
        league: ev.league.clone(),
        home_team: ev.home_team.clone(),
        away_team: ev.away_team.clone(),
        home_score: ev.home_score.unwrap_or(0),
        away_score: ev.away_score.unwrap_or(0),
        status: ev.status.clone(),
        phase,
        clock: ev.clock.clone(),
        period: ev.period,
        updated_at: now,
    });

    let upcoming = (phase != GamePhase::Final).then(|| UpcomingGame {
        game_id: ev.event_id.clone(),
        sport: ev.sport.clone(),
        league: ev.league.clone(),
        home_team: ev.home_team.clone(),
        away_team: ev.away_team.clone(),
        start_time: ev.start_time,
        home_odds: ev.home_odds,
        away_odds: ev.away_odds,
        spread: ev.spread,
        total: ev.total,
        updated_at: now,
    });

    let final_game = match (phase, ev.home_score, ev.away_score) {
        (GamePhase::Final, Some(home_score), Some(away_score)) => Some(FinalGame {
            game_id: ev.event_id.clone(),
            sport: ev.sport.clone(),
            league: ev.league.clone(),
            home_team: ev.home_team.clone(),
            away_team: ev.away_team.clone(),
            home_score,
            away_score,
            status: ev.status.clone(),
            completed_at: now,
        }),
        _ => None,
    };

    SnapshotPlan {
        phase,
        game,
        live,
        upcoming,
        final_game,
    }
}

// ── Applying snapshots ────────────────────────────────────────────────────────

/// Which pipeline produced a batch of events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Fast-cycle scoreboard poll
    LivePoll,
    /// Multi-day schedule refresh; never writes Live rows
    Schedule,
    /// Per-event status re-resolution
    Reconciliation,
}

/// What changed while applying a batch
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub applied: usize,
    /// Games that moved into in-progress during this batch
    pub went_live: Vec<GameRecord>,
    /// Final rows created (not merely updated) during this batch
    pub finals: Vec<FinalGame>,
}

/// Fold a batch of provider events into the snapshots inside one session.
///
/// Live transitions are judged against the Live row stored before this
/// write. Events for games that already have a Final row are ignored unless
/// they are final themselves.
pub fn apply_events(
    session: &Session<'_>,
    source: SnapshotSource,
    events: &[ProviderEvent],
    now: DateTime<Utc>,
) -> StoreResult<ApplyOutcome> {
    let mut outcome = ApplyOutcome::default();

    for ev in events {
        let plan = plan_snapshot(ev, now);
        let game_id = plan.game.game_id.as_str();

        if plan.phase != GamePhase::Final && session.get_final(game_id)?.is_some() {
            debug!("Ignoring stale {:?} update for final game {}", plan.phase, game_id);
            continue;
        }

        let previous = session.get_live(game_id)?.map(|l| l.phase);
        session.upsert_game(&plan.game)?;

        if source != SnapshotSource::Schedule {
            if let Some(live) = &plan.live {
                session.upsert_live(live)?;
            }
            if is_live_transition(previous, plan.phase) {
                outcome.went_live.push(plan.game.clone());
            }
        }
        if let Some(upcoming) = &plan.upcoming {
            session.upsert_upcoming(upcoming)?;
        }
        if let Some(final_game) = &plan.final_game {
            if session.upsert_final(final_game)? {
                outcome.finals.push(final_game.clone());
            }
            session.delete_upcoming(game_id)?;
        }
        outcome.applied += 1;
    }

    Ok(outcome)
}

/// Leagues to try when re-resolving an event: the best-known league first,
/// then every configured league once.
pub fn reconciliation_order(known: Option<&League>, all: &[League]) -> Vec<League> {
    let mut order: Vec<League> = Vec::with_capacity(all.len() + 1);
    if let Some(k) = known {
        order.push(k.clone());
    }
    for league in all {
        if !order.contains(league) {
            order.push(league.clone());
        }
    }
    order
}

// ── Alerts ────────────────────────────────────────────────────────────────────

pub fn live_alert(game: &GameRecord) -> NewAlert {
    NewAlert {
        severity: AlertSeverity::Info,
        category: GAME_LIVE_CATEGORY.to_string(),
        message: format!(
            "{} @ {} is now live ({})",
            game.away_team, game.home_team, game.league
        ),
        metadata: json!({
            "game_id": game.game_id,
            "sport": game.sport,
            "league": game.league,
        }),
    }
}

pub fn final_alert(game: &FinalGame) -> NewAlert {
    NewAlert {
        severity: AlertSeverity::Info,
        category: GAME_FINAL_CATEGORY.to_string(),
        message: format!(
            "Final: {} {} - {} {}",
            game.away_team, game.away_score, game.home_score, game.home_team
        ),
        metadata: json!({
            "game_id": game.game_id,
            "home_score": game.home_score,
            "away_score": game.away_score,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn event(id: &str, status: &str, home: Option<i32>, away: Option<i32>) -> ProviderEvent {
        ProviderEvent {
            event_id: id.into(),
            sport: "basketball".into(),
            league: "nba".into(),
            home_team: "Los Angeles Lakers".into(),
            away_team: "Boston Celtics".into(),
            home_score: home,
            away_score: away,
            status: status.into(),
            status_detail: String::new(),
            clock: None,
            period: None,
            start_time: Some(Utc::now()),
            home_odds: Some(-150),
            away_odds: Some(130),
            spread: Some(-3.5),
            total: Some(220.5),
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("STATUS_FINAL", "Final", None, "basketball"), GamePhase::Final);
        assert_eq!(classify_status("STATUS_FULL_TIME", "FT", None, "soccer"), GamePhase::Final);
        assert_eq!(classify_status("STATUS_HALFTIME", "Halftime", None, "basketball"), GamePhase::Break);
        assert_eq!(classify_status("STATUS_END_PERIOD", "End of 3rd", None, "hockey"), GamePhase::Break);
        assert_eq!(classify_status("STATUS_IN_PROGRESS", "4:12 - 3rd", None, "basketball"), GamePhase::InProgress);
        assert_eq!(classify_status("STATUS_POSTPONED", "Postponed", None, "baseball"), GamePhase::Interrupted);
        assert_eq!(classify_status("STATUS_SCHEDULED", "Sun 7:30 PM", None, "basketball"), GamePhase::Scheduled);
        assert_eq!(classify_status("mystery", "", None, "basketball"), GamePhase::Unknown);
    }

    #[test]
    fn test_soccer_minute_marker_implies_in_progress() {
        assert_eq!(classify_status("STATUS_UNKNOWN", "67'", None, "soccer"), GamePhase::InProgress);
        assert_eq!(classify_status("", "", Some("45'+2'"), "soccer"), GamePhase::InProgress);
        // only soccer clocks count
        assert_eq!(classify_status("STATUS_UNKNOWN", "67'", None, "basketball"), GamePhase::Unknown);
        assert!(!is_minute_marker("67"));
        assert!(!is_minute_marker("'"));
        assert!(is_minute_marker("90'+4"));
    }

    #[test]
    fn test_live_transition() {
        assert!(is_live_transition(None, GamePhase::InProgress));
        assert!(is_live_transition(Some(GamePhase::Scheduled), GamePhase::InProgress));
        assert!(is_live_transition(Some(GamePhase::Break), GamePhase::InProgress));
        assert!(!is_live_transition(Some(GamePhase::InProgress), GamePhase::InProgress));
        assert!(!is_live_transition(Some(GamePhase::Scheduled), GamePhase::Break));
    }

    #[test]
    fn test_plan_snapshot_by_phase() {
        let now = Utc::now();

        let scheduled = plan_snapshot(&event("1", "STATUS_SCHEDULED", None, None), now);
        assert!(scheduled.live.is_some());
        assert!(scheduled.upcoming.is_some());
        assert!(scheduled.final_game.is_none());

        let done = plan_snapshot(&event("2", "STATUS_FINAL", Some(101), Some(99)), now);
        assert!(done.live.is_some());
        assert!(done.upcoming.is_none());
        assert_eq!(done.final_game.as_ref().map(|f| f.home_score), Some(101));

        let no_scores = plan_snapshot(&event("3", "STATUS_FINAL", None, None), now);
        assert_eq!(no_scores.phase, GamePhase::Unknown);
        assert_eq!(no_scores.game.phase, GamePhase::Unknown);
        assert!(no_scores.live.is_none());
        assert!(no_scores.final_game.is_none());

        let postponed = plan_snapshot(&event("4", "STATUS_POSTPONED", None, None), now);
        assert!(postponed.live.is_none());
        assert!(postponed.upcoming.is_some());
    }

    #[test]
    fn test_apply_events_through_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let first = db
            .with_session(|s| apply_events(s, SnapshotSource::LivePoll, &[event("g1", "STATUS_SCHEDULED", None, None)], now))
            .unwrap();
        assert!(first.went_live.is_empty());

        let live = db
            .with_session(|s| apply_events(s, SnapshotSource::LivePoll, &[event("g1", "STATUS_IN_PROGRESS", Some(2), Some(0))], now))
            .unwrap();
        assert_eq!(live.went_live.len(), 1);

        // tri-state: Upcoming and Live coexist while in progress
        db.with_session(|s| {
            assert!(s.get_upcoming("g1")?.is_some());
            assert_eq!(s.get_live("g1")?.map(|l| l.home_score), Some(2));
            Ok(())
        })
        .unwrap();

        let again = db
            .with_session(|s| apply_events(s, SnapshotSource::LivePoll, &[event("g1", "STATUS_IN_PROGRESS", Some(4), Some(0))], now))
            .unwrap();
        assert!(again.went_live.is_empty());

        let done = db
            .with_session(|s| apply_events(s, SnapshotSource::LivePoll, &[event("g1", "STATUS_FINAL", Some(110), Some(100))], now))
            .unwrap();
        assert_eq!(done.finals.len(), 1);

        let repeat = db
            .with_session(|s| apply_events(s, SnapshotSource::Reconciliation, &[event("g1", "STATUS_FINAL", Some(110), Some(100))], now))
            .unwrap();
        assert!(repeat.finals.is_empty());

        db.with_session(|s| {
            assert!(s.get_upcoming("g1")?.is_none());
            assert!(s.get_final("g1")?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_stale_update_after_final_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.with_session(|s| apply_events(s, SnapshotSource::LivePoll, &[event("g1", "STATUS_FINAL", Some(3), Some(1))], now))
            .unwrap();
        let stale = db
            .with_session(|s| apply_events(s, SnapshotSource::LivePoll, &[event("g1", "STATUS_IN_PROGRESS", Some(2), Some(1))], now))
            .unwrap();
        assert_eq!(stale.applied, 0);
        assert!(stale.went_live.is_empty());
        let game = db.with_session(|s| s.get_game("g1")).unwrap().unwrap();
        assert_eq!(game.phase, GamePhase::Final);
    }

    #[test]
    fn test_final_without_scores_keeps_game_open() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.with_session(|s| {
            apply_events(s, SnapshotSource::LivePoll, &[event("g1", "STATUS_IN_PROGRESS", Some(60), Some(40))], now)?;
            apply_events(s, SnapshotSource::LivePoll, &[event("g1", "STATUS_FINAL", None, None)], now)
        })
        .unwrap();

        db.with_session(|s| {
            assert!(s.get_final("g1")?.is_none());
            let game = s.get_game("g1")?.unwrap();
            assert_ne!(game.phase, GamePhase::Final);
            assert_eq!(s.get_live("g1")?.map(|l| l.home_score), Some(60));
            let open = s.list_unfinished_games(Some(now + chrono::Duration::minutes(1)), None)?;
            assert!(open.iter().any(|g| g.game_id == "g1"));
            Ok(())
        })
        .unwrap();

        let id = db
            .with_session(|s| {
                s.insert_wager(&crate::db::models::NewWager {
                    parlay_id: None,
                    game_id: Some("g1".into()),
                    participant_id: None,
                    kind: crate::db::models::WagerKind::Moneyline,
                    selection: "Lakers".into(),
                    stat_type: None,
                    stake: 10.0,
                    original_stake: None,
                    odds: 100,
                })
            })
            .unwrap();
        let report = db
            .with_session(|s| crate::grading::GradingEngine::new().grade_pending(s, now, &Default::default()))
            .unwrap();
        assert_eq!(report.deferred, 1);
        let w = db.with_session(|s| s.get_wager(id)).unwrap().unwrap();
        assert_eq!(w.status, crate::db::models::WagerStatus::Pending);
    }

    #[test]
    fn test_schedule_source_skips_live_rows() {
        let db = Database::open_in_memory().unwrap();
        let out = db
            .with_session(|s| apply_events(s, SnapshotSource::Schedule, &[event("g1", "STATUS_IN_PROGRESS", Some(1), Some(0))], Utc::now()))
            .unwrap();
        assert!(out.went_live.is_empty());
        assert!(db.with_session(|s| s.get_live("g1")).unwrap().is_none());
        assert!(db.with_session(|s| s.get_game("g1")).unwrap().is_some());
    }

    #[test]
    fn test_reconciliation_order_prefers_known_league() {
        let nba = League::new("basketball", "nba");
        let wnba = League::new("basketball", "wnba");
        let nhl = League::new("hockey", "nhl");
        let order = reconciliation_order(Some(&wnba), &[nba.clone(), wnba.clone(), nhl.clone()]);
        assert_eq!(order, vec![wnba, nba, nhl]);
    }

    #[test]
    fn test_live_alert_carries_game_id() {
        let plan = plan_snapshot(&event("401", "STATUS_IN_PROGRESS", Some(0), Some(0)), Utc::now());
        let alert = live_alert(&plan.game);
        assert_eq!(alert.category, GAME_LIVE_CATEGORY);
        assert_eq!(alert.metadata["game_id"], "401");
    }
}
