//! Per-wager grading rules.
//!
//! Anything that cannot be evaluated (unknown participant, missing line,
//! missing statistic) grades as `void`, never `lost`.

use std::cmp::Ordering;

use crate::db::models::{FinalGame, PlayerStat, Wager, WagerKind, WagerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeReason {
    /// Evaluated against the outcome
    Settled,
    /// No game reference on the wager
    MissingGame,
    InvalidOdds,
    /// Selection names neither participant, or both
    UnmatchedSelection,
    /// No usable line or over/under direction in the selection
    UnparsableLine,
    MissingStatistic,
}

impl GradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeReason::Settled => "settled",
            GradeReason::MissingGame => "missing_game",
            GradeReason::InvalidOdds => "invalid_odds",
            GradeReason::UnmatchedSelection => "unmatched_selection",
            GradeReason::UnparsableLine => "unparsable_line",
            GradeReason::MissingStatistic => "missing_statistic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeResult {
    pub status: WagerStatus,
    pub reason: GradeReason,
    /// Statistic observed for prop wagers
    pub result_value: Option<f64>,
}

impl GradeResult {
    fn settled(status: WagerStatus, result_value: Option<f64>) -> Self {
        GradeResult {
            status,
            reason: GradeReason::Settled,
            result_value,
        }
    }

    pub fn void(reason: GradeReason) -> Self {
        GradeResult {
            status: WagerStatus::Void,
            reason,
            result_value: None,
        }
    }
}

/// Final score of a game, as needed for outcome wagers.
#[derive(Debug, Clone, PartialEq)]
pub struct GameOutcome {
    pub home_team: String,
    pub away_team: String,
    pub home_score: i32,
    pub away_score: i32,
}

impl From<&FinalGame> for GameOutcome {
    fn from(g: &FinalGame) -> Self {
        GameOutcome {
            home_team: g.home_team.clone(),
            away_team: g.away_team.clone(),
            home_score: g.home_score,
            away_score: g.away_score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Over,
    Under,
}

/// Grade a moneyline, spread or total wager from the final score.
pub fn grade_outcome(wager: &Wager, outcome: &GameOutcome) -> GradeResult {
    let selection = wager.selection.as_str();
    match wager.kind {
        WagerKind::Moneyline => {
            let Some(side) = match_side(selection, outcome) else {
                return GradeResult::void(GradeReason::UnmatchedSelection);
            };
            let (mine, theirs) = scores_for(side, outcome);
            GradeResult::settled(status_from(f64::from(mine).partial_cmp(&f64::from(theirs))), None)
        }
        WagerKind::Spread => {
            let Some(side) = match_side(selection, outcome) else {
                return GradeResult::void(GradeReason::UnmatchedSelection);
            };
            let Some(line) = last_number(selection) else {
                return GradeResult::void(GradeReason::UnparsableLine);
            };
            let (mine, theirs) = scores_for(side, outcome);
            let adjusted = f64::from(mine) + line;
            GradeResult::settled(status_from(adjusted.partial_cmp(&f64::from(theirs))), None)
        }
        WagerKind::Total => {
            let (Some(dir), Some(line)) = (direction(selection), line_after_direction(selection)) else {
                return GradeResult::void(GradeReason::UnparsableLine);
            };
            let combined = f64::from(outcome.home_score + outcome.away_score);
            GradeResult::settled(compare_line(dir, combined, line), None)
        }
        WagerKind::Prop => GradeResult::void(GradeReason::MissingStatistic),
    }
}

/// Grade a prop wager from the statistics recorded for its game.
pub fn grade_statistic(wager: &Wager, stats: &[PlayerStat]) -> GradeResult {
    let selection = wager.selection.as_str();
    let (Some(dir), Some(line)) = (direction(selection), line_after_direction(selection)) else {
        return GradeResult::void(GradeReason::UnparsableLine);
    };
    let Some(stat_type) = stat_key(wager) else {
        return GradeResult::void(GradeReason::UnparsableLine);
    };
    match find_statistic(stats, wager.participant_id.as_deref(), selection, &stat_type) {
        Some(value) => GradeResult::settled(compare_line(dir, value, line), Some(value)),
        None => GradeResult::void(GradeReason::MissingStatistic),
    }
}

/// Look a participant's statistic up by id, or by the participant's name
/// appearing in the selection text when the wager carries no id.
pub fn find_statistic(
    stats: &[PlayerStat],
    participant_id: Option<&str>,
    selection: &str,
    stat_type: &str,
) -> Option<f64> {
    let selection = selection.to_lowercase();
    stats
        .iter()
        .filter(|s| s.stat_type == stat_type)
        .find(|s| match participant_id {
            Some(id) => s.participant_id == id,
            None => {
                let name = s.participant_name.trim().to_lowercase();
                !name.is_empty() && selection.contains(&name)
            }
        })
        .map(|s| s.value)
}

fn status_from(ord: Option<Ordering>) -> WagerStatus {
    match ord {
        Some(Ordering::Greater) => WagerStatus::Won,
        Some(Ordering::Less) => WagerStatus::Lost,
        _ => WagerStatus::Push,
    }
}

fn compare_line(direction: Direction, value: f64, line: f64) -> WagerStatus {
    let ord = value.partial_cmp(&line);
    match direction {
        Direction::Over => status_from(ord),
        Direction::Under => status_from(ord.map(Ordering::reverse)),
    }
}

fn scores_for(side: Side, outcome: &GameOutcome) -> (i32, i32) {
    match side {
        Side::Home => (outcome.home_score, outcome.away_score),
        Side::Away => (outcome.away_score, outcome.home_score),
    }
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, '(' | ')' | ',' | ';')))
        .filter(|t| !t.is_empty())
}

fn parse_number(token: &str) -> Option<f64> {
    let t = token.strip_prefix('+').unwrap_or(token);
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn last_number(text: &str) -> Option<f64> {
    tokens(text).filter_map(parse_number).last()
}

fn direction(text: &str) -> Option<Direction> {
    tokens(text).find_map(|t| match t.to_lowercase().as_str() {
        "over" => Some(Direction::Over),
        "under" => Some(Direction::Under),
        _ => None,
    })
}

/// First number after the over/under keyword, else the first number anywhere.
fn line_after_direction(text: &str) -> Option<f64> {
    let toks: Vec<&str> = tokens(text).collect();
    let start = toks
        .iter()
        .position(|t| matches!(t.to_lowercase().as_str(), "over" | "under"))
        .map(|i| i + 1)
        .unwrap_or(0);
    toks[start..]
        .iter()
        .find_map(|t| parse_number(t))
        .or_else(|| toks.iter().find_map(|t| parse_number(t)))
}

/// The wager's statistic key, or the words following the line
/// ("... Over 25.5 points" → "points").
fn stat_key(wager: &Wager) -> Option<String> {
    if let Some(key) = wager.stat_type.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        return Some(key.to_lowercase());
    }
    let toks: Vec<&str> = tokens(&wager.selection).collect();
    let line_at = toks.iter().rposition(|t| parse_number(t).is_some())?;
    let rest: Vec<String> = toks[line_at + 1..].iter().map(|t| t.to_lowercase()).collect();
    (!rest.is_empty()).then(|| rest.join("_"))
}

/// Which participant the selection names. `None` when it names neither or
/// both.
fn match_side(selection: &str, outcome: &GameOutcome) -> Option<Side> {
    let pick: String = tokens(selection)
        .filter(|t| parse_number(t).is_none())
        .map(str::to_lowercase)
        .filter(|t| !matches!(t.as_str(), "ml" | "moneyline" | "spread"))
        .collect::<Vec<_>>()
        .join(" ");
    if pick.is_empty() {
        return None;
    }
    match (team_matches(&pick, &outcome.home_team), team_matches(&pick, &outcome.away_team)) {
        (true, false) => Some(Side::Home),
        (false, true) => Some(Side::Away),
        _ => None,
    }
}

fn team_matches(pick: &str, team: &str) -> bool {
    let team = team.trim().to_lowercase();
    if team.is_empty() {
        return false;
    }
    if pick == team || pick.contains(&team) || team.contains(pick) {
        return true;
    }
    // nickname: "Celtics" for "Boston Celtics"
    team.split_whitespace()
        .last()
        .map(|nick| pick.split_whitespace().any(|w| w == nick))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn wager(kind: WagerKind, selection: &str) -> Wager {
        Wager {
            id: 1,
            parlay_id: None,
            game_id: Some("g1".into()),
            participant_id: None,
            kind,
            selection: selection.into(),
            stat_type: None,
            stake: 100.0,
            original_stake: None,
            odds: -110,
            status: WagerStatus::Pending,
            placed_at: Utc::now(),
            graded_at: None,
            profit: None,
            result_value: None,
        }
    }

    fn outcome(home: i32, away: i32) -> GameOutcome {
        GameOutcome {
            home_team: "Philadelphia 76ers".into(),
            away_team: "Boston Celtics".into(),
            home_score: home,
            away_score: away,
        }
    }

    fn stat(pid: &str, name: &str, key: &str, value: f64) -> PlayerStat {
        PlayerStat {
            game_id: "g1".into(),
            participant_id: pid.into(),
            participant_name: name.into(),
            stat_type: key.into(),
            value,
        }
    }

    #[test]
    fn test_moneyline() {
        let w = wager(WagerKind::Moneyline, "Boston Celtics");
        assert_eq!(grade_outcome(&w, &outcome(100, 110)).status, WagerStatus::Won);
        assert_eq!(grade_outcome(&w, &outcome(110, 100)).status, WagerStatus::Lost);
        assert_eq!(grade_outcome(&w, &outcome(100, 100)).status, WagerStatus::Push);
    }

    #[test]
    fn test_moneyline_nickname() {
        let w = wager(WagerKind::Moneyline, "76ers ML");
        assert_eq!(grade_outcome(&w, &outcome(101, 99)).status, WagerStatus::Won);
        let w = wager(WagerKind::Moneyline, "Celtics");
        assert_eq!(grade_outcome(&w, &outcome(101, 99)).status, WagerStatus::Lost);
    }

    #[test]
    fn test_unknown_selection_is_void() {
        let w = wager(WagerKind::Moneyline, "New York Knicks");
        let r = grade_outcome(&w, &outcome(101, 99));
        assert_eq!(r.status, WagerStatus::Void);
        assert_eq!(r.reason, GradeReason::UnmatchedSelection);
    }

    #[test]
    fn test_spread() {
        let w = wager(WagerKind::Spread, "Philadelphia 76ers -3.5");
        assert_eq!(grade_outcome(&w, &outcome(104, 100)).status, WagerStatus::Won);
        assert_eq!(grade_outcome(&w, &outcome(103, 100)).status, WagerStatus::Lost);
        let w = wager(WagerKind::Spread, "Celtics +3");
        assert_eq!(grade_outcome(&w, &outcome(103, 100)).status, WagerStatus::Push);
        assert_eq!(grade_outcome(&w, &outcome(102, 100)).status, WagerStatus::Won);
    }

    #[test]
    fn test_total() {
        let over = wager(WagerKind::Total, "Over 215.5");
        let under = wager(WagerKind::Total, "Under 215.5");
        assert_eq!(grade_outcome(&over, &outcome(110, 106)).status, WagerStatus::Won);
        assert_eq!(grade_outcome(&under, &outcome(110, 106)).status, WagerStatus::Lost);
        let under = wager(WagerKind::Total, "Under 216");
        assert_eq!(grade_outcome(&under, &outcome(110, 106)).status, WagerStatus::Push);
        let bad = wager(WagerKind::Total, "Lots of points");
        assert_eq!(grade_outcome(&bad, &outcome(1, 1)).reason, GradeReason::UnparsableLine);
    }

    #[test]
    fn test_prop_by_participant_id() {
        let mut w = wager(WagerKind::Prop, "Jayson Tatum Over 27.5 points");
        w.participant_id = Some("4065648".into());
        w.stat_type = Some("points".into());
        let stats = vec![
            stat("4065648", "Jayson Tatum", "points", 31.0),
            stat("4065648", "Jayson Tatum", "rebounds", 9.0),
        ];
        let r = grade_statistic(&w, &stats);
        assert_eq!(r.status, WagerStatus::Won);
        assert_eq!(r.result_value, Some(31.0));
    }

    #[test]
    fn test_prop_by_name_and_inferred_stat() {
        let w = wager(WagerKind::Prop, "Joel Embiid Under 10.5 rebounds");
        let stats = vec![stat("3059318", "Joel Embiid", "rebounds", 12.0)];
        let r = grade_statistic(&w, &stats);
        assert_eq!(r.status, WagerStatus::Lost);
        assert_eq!(r.result_value, Some(12.0));
    }

    #[test]
    fn test_prop_missing_statistic_is_void() {
        let mut w = wager(WagerKind::Prop, "Jaylen Brown Over 22.5 points");
        w.participant_id = Some("3917376".into());
        let stats = vec![stat("4065648", "Jayson Tatum", "points", 31.0)];
        let r = grade_statistic(&w, &stats);
        assert_eq!(r.status, WagerStatus::Void);
        assert_eq!(r.reason, GradeReason::MissingStatistic);
        assert_eq!(r.result_value, None);
    }

    #[test]
    fn test_line_parsing() {
        assert_eq!(line_after_direction("LeBron James Over 25.5 points"), Some(25.5));
        assert_eq!(line_after_direction("Over (215.5)"), Some(215.5));
        assert_eq!(last_number("76ers -3.5"), Some(-3.5));
        assert_eq!(last_number("Celtics +7"), Some(7.0));
        assert_eq!(direction("no direction 12"), None);
    }
}
