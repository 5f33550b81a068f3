use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;

/// Lifecycle status of a wager. `Pending` moves exactly once to one of the
/// terminal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Void,
    Push,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "pending",
            WagerStatus::Won => "won",
            WagerStatus::Lost => "lost",
            WagerStatus::Void => "void",
            WagerStatus::Push => "push",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WagerStatus::Pending)
    }
}

impl std::str::FromStr for WagerStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WagerStatus::Pending),
            "won" => Ok(WagerStatus::Won),
            "lost" => Ok(WagerStatus::Lost),
            "void" => Ok(WagerStatus::Void),
            "push" => Ok(WagerStatus::Push),
            other => Err(StoreError::Invalid(format!("wager status '{}'", other))),
        }
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a wager is priced on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerKind {
    Moneyline,
    Spread,
    Total,
    /// Player/participant statistic ("prop") wager
    Prop,
}

impl WagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerKind::Moneyline => "moneyline",
            WagerKind::Spread => "spread",
            WagerKind::Total => "total",
            WagerKind::Prop => "prop",
        }
    }

    pub fn is_statistic(&self) -> bool {
        matches!(self, WagerKind::Prop)
    }
}

impl std::str::FromStr for WagerKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moneyline" => Ok(WagerKind::Moneyline),
            "spread" => Ok(WagerKind::Spread),
            "total" => Ok(WagerKind::Total),
            "prop" => Ok(WagerKind::Prop),
            other => Err(StoreError::Invalid(format!("wager kind '{}'", other))),
        }
    }
}

/// A placed wager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: i64,
    /// Shared by every leg of a parlay; `None` for a single wager
    pub parlay_id: Option<String>,
    pub game_id: Option<String>,
    pub participant_id: Option<String>,
    pub kind: WagerKind,
    /// Free-text selection, e.g. "Lakers -3.5" or "LeBron James Over 25.5 points"
    pub selection: String,
    /// Statistic key for prop wagers ("points", "rebounds", ...)
    pub stat_type: Option<String>,
    /// Stake allocated to this wager (a parlay leg's share)
    pub stake: f64,
    /// Whole-parlay stake before division across legs
    pub original_stake: Option<f64>,
    /// American odds (+150, -200)
    pub odds: i32,
    pub status: WagerStatus,
    pub placed_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
    pub profit: Option<f64>,
    /// Statistic value observed when a prop wager was graded
    pub result_value: Option<f64>,
}

impl Wager {
    pub fn is_parlay_leg(&self) -> bool {
        self.parlay_id.is_some()
    }
}

/// Fields supplied when recording a new wager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWager {
    pub parlay_id: Option<String>,
    pub game_id: Option<String>,
    pub participant_id: Option<String>,
    pub kind: WagerKind,
    pub selection: String,
    pub stat_type: Option<String>,
    pub stake: f64,
    pub original_stake: Option<f64>,
    pub odds: i32,
}

/// Classified phase of a game, derived from the provider's status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Scheduled,
    InProgress,
    /// Halftime, end of period, intermission
    Break,
    Final,
    /// Postponed, delayed, suspended or cancelled
    Interrupted,
    Unknown,
}

impl GamePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::Scheduled => "scheduled",
            GamePhase::InProgress => "in_progress",
            GamePhase::Break => "break",
            GamePhase::Final => "final",
            GamePhase::Interrupted => "interrupted",
            GamePhase::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> GamePhase {
        match s {
            "scheduled" => GamePhase::Scheduled,
            "in_progress" => GamePhase::InProgress,
            "break" => GamePhase::Break,
            "final" => GamePhase::Final,
            "interrupted" => GamePhase::Interrupted,
            _ => GamePhase::Unknown,
        }
    }
}

/// Umbrella game record, one row per provider event regardless of phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: String,
    pub sport: String,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time: Option<DateTime<Utc>>,
    /// Raw provider status string
    pub status: String,
    pub phase: GamePhase,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// Pre-game snapshot: schedule metadata and an odds snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingGame {
    pub game_id: String,
    pub sport: String,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time: Option<DateTime<Utc>>,
    pub home_odds: Option<i32>,
    pub away_odds: Option<i32>,
    pub spread: Option<f64>,
    pub total: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// In-game snapshot, refreshed every fast cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveGame {
    pub game_id: String,
    pub sport: String,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i32,
    pub away_score: i32,
    pub status: String,
    pub phase: GamePhase,
    pub clock: Option<String>,
    pub period: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// Authoritative end-of-game result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalGame {
    pub game_id: String,
    pub sport: String,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i32,
    pub away_score: i32,
    pub status: String,
    pub completed_at: DateTime<Utc>,
}

/// One recorded statistic for a participant in a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStat {
    pub game_id: String,
    pub participant_id: String,
    pub participant_name: String,
    /// Lower-case statistic key, e.g. "points"
    pub stat_type: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> AlertSeverity {
        match s {
            "warning" => AlertSeverity::Warning,
            "error" => AlertSeverity::Error,
            "critical" => AlertSeverity::Critical,
            _ => AlertSeverity::Info,
        }
    }
}

/// A persisted operational alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub category: String,
    pub message: String,
    /// Opaque structured payload; `game_live` alerts carry `game_id`
    pub metadata: serde_json::Value,
    pub acknowledged: bool,
}

/// Alert fields supplied by a producer, before persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub severity: AlertSeverity,
    pub category: String,
    pub message: String,
    pub metadata: serde_json::Value,
}

/// Provider coordinates of a game: enough to fetch it again
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameRef {
    pub game_id: String,
    pub sport: String,
    pub league: String,
}
