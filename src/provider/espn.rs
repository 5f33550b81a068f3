//! URL building and payload parsing for the ESPN site API
//! (`/apis/site/v2/sports/{sport}/{league}/...`).
//!
//! Parsing is lenient: missing fields become `None`/defaults and events
//! without an id or both team names are skipped.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use url::Url;

use super::{League, ProviderEvent};
use crate::db::models::PlayerStat;

pub fn scoreboard_url(
    base_url: &str,
    league: &League,
    date: Option<NaiveDate>,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!(
        "{}/{}/{}/scoreboard",
        base_url, league.sport, league.league
    ))?;
    if let Some(d) = date {
        url.query_pairs_mut()
            .append_pair("dates", &d.format("%Y%m%d").to_string());
    }
    Ok(url)
}

pub fn summary_url(base_url: &str, league: &League, event_id: &str) -> Result<Url, url::ParseError> {
    Url::parse_with_params(
        &format!("{}/{}/{}/summary", base_url, league.sport, league.league),
        &[("event", event_id)],
    )
}

/// Parse a scoreboard payload (`{"events": [...]}`).
pub fn parse_scoreboard(raw: &Value, league: &League) -> Vec<ProviderEvent> {
    let events = match raw["events"].as_array() {
        Some(a) => a,
        None => return vec![],
    };
    events
        .iter()
        .filter_map(|ev| {
            let id = value_as_string(&ev["id"])?;
            let competition = &ev["competitions"][0];
            let status = if ev["status"].is_object() {
                &ev["status"]
            } else {
                &competition["status"]
            };
            let date = ev["date"].as_str().or_else(|| competition["date"].as_str());
            parse_competition(id, date, competition, status, league)
        })
        .collect()
}

/// Parse an event summary payload (`{"header": {...}, "boxscore": {...}}`).
pub fn parse_summary(raw: &Value, league: &League) -> Option<ProviderEvent> {
    let header = &raw["header"];
    let id = value_as_string(&header["id"])?;
    let competition = &header["competitions"][0];
    let date = competition["date"].as_str();
    parse_competition(id, date, competition, &competition["status"], league)
}

fn parse_competition(
    event_id: String,
    date: Option<&str>,
    competition: &Value,
    status: &Value,
    league: &League,
) -> Option<ProviderEvent> {
    let mut home: Option<(String, Option<i32>)> = None;
    let mut away: Option<(String, Option<i32>)> = None;

    for comp in competition["competitors"].as_array()? {
        let team = &comp["team"];
        let name = team["displayName"]
            .as_str()
            .or_else(|| team["name"].as_str())
            .or_else(|| comp["athlete"]["displayName"].as_str())?
            .to_string();
        let score = match &comp["score"] {
            Value::String(s) => s.trim().parse::<i32>().ok(),
            Value::Number(n) => n.as_i64().map(|v| v as i32),
            Value::Object(o) => o.get("value").and_then(Value::as_f64).map(|v| v as i32),
            _ => None,
        };
        if comp["homeAway"].as_str() == Some("home") {
            home = Some((name, score));
        } else {
            away = Some((name, score));
        }
    }
    let (home_team, home_score) = home?;
    let (away_team, away_score) = away?;

    let status_type = &status["type"];
    let odds = &competition["odds"][0];

    Some(ProviderEvent {
        event_id,
        sport: league.sport.clone(),
        league: league.league.clone(),
        home_team,
        away_team,
        home_score,
        away_score,
        status: status_type["name"]
            .as_str()
            .or_else(|| status_type["state"].as_str())
            .unwrap_or("STATUS_SCHEDULED")
            .to_string(),
        status_detail: status_type["shortDetail"]
            .as_str()
            .or_else(|| status_type["detail"].as_str())
            .unwrap_or_default()
            .to_string(),
        clock: status["displayClock"].as_str().map(str::to_string),
        period: status["period"].as_i64().map(|p| p as i32),
        start_time: date.and_then(parse_event_date),
        home_odds: odds["homeTeamOdds"]["moneyLine"].as_i64().map(|v| v as i32),
        away_odds: odds["awayTeamOdds"]["moneyLine"].as_i64().map(|v| v as i32),
        spread: odds["spread"].as_f64(),
        total: odds["overUnder"].as_f64(),
    })
}

/// Extract per-athlete statistics from `boxscore.players`.
///
/// Each team block lists statistic groups with parallel `keys` (or `names`)
/// and per-athlete `stats` arrays. Non-numeric cells ("7-15", "--") are
/// skipped.
pub fn parse_box_score(raw: &Value, game_id: &str) -> Vec<PlayerStat> {
    let mut out = Vec::new();
    let teams = match raw["boxscore"]["players"].as_array() {
        Some(t) => t,
        None => return out,
    };
    for team in teams {
        for group in team["statistics"].as_array().into_iter().flatten() {
            let keys: Vec<String> = group["keys"]
                .as_array()
                .or_else(|| group["names"].as_array())
                .map(|a| {
                    a.iter()
                        .map(|k| normalize_stat_key(k.as_str().unwrap_or_default()))
                        .collect()
                })
                .unwrap_or_default();
            for entry in group["athletes"].as_array().into_iter().flatten() {
                let athlete = &entry["athlete"];
                let (Some(id), Some(name)) = (
                    value_as_string(&athlete["id"]),
                    athlete["displayName"].as_str(),
                ) else {
                    continue;
                };
                let stats = entry["stats"].as_array().into_iter().flatten();
                for (key, cell) in keys.iter().zip(stats) {
                    let Some(value) = cell.as_str().and_then(|s| s.trim().parse::<f64>().ok()) else {
                        continue;
                    };
                    if key.is_empty() {
                        continue;
                    }
                    out.push(PlayerStat {
                        game_id: game_id.to_string(),
                        participant_id: id.clone(),
                        participant_name: name.to_string(),
                        stat_type: key.clone(),
                        value,
                    });
                }
            }
        }
    }
    out
}

/// "fieldGoalsMade-fieldGoalsAttempted" stays as-is lowercased; "Points" -> "points"
pub fn normalize_stat_key(key: &str) -> String {
    key.trim().to_lowercase().replace(' ', "_")
}

fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// ESPN dates come as RFC 3339 or the minute-precision form "2024-10-20T17:00Z".
fn parse_event_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ")
                .ok()
                .map(|n| n.and_utc())
        })
}
