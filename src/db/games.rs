use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::models::{FinalGame, GamePhase, GameRecord, GameRef, LiveGame, PlayerStat, UpcomingGame};
use super::Session;
use crate::error::StoreResult;

impl Session<'_> {
    // ── Umbrella game record ──────────────────────────────────────────────────

    pub fn upsert_game(&self, game: &GameRecord) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO games (game_id, sport, league, home_team, away_team, start_time,
                                status, phase, home_score, away_score, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(game_id) DO UPDATE SET
                sport=excluded.sport,
                league=excluded.league,
                home_team=excluded.home_team,
                away_team=excluded.away_team,
                start_time=COALESCE(excluded.start_time, games.start_time),
                status=excluded.status,
                phase=excluded.phase,
                home_score=COALESCE(excluded.home_score, games.home_score),
                away_score=COALESCE(excluded.away_score, games.away_score),
                updated_at=excluded.updated_at",
            params![
                game.game_id,
                game.sport,
                game.league,
                game.home_team,
                game.away_team,
                game.start_time,
                game.status,
                game.phase.as_str(),
                game.home_score,
                game.away_score,
                game.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_game(&self, game_id: &str) -> StoreResult<Option<GameRecord>> {
        let game = self
            .tx
            .query_row(
                "SELECT game_id, sport, league, home_team, away_team, start_time,
                        status, phase, home_score, away_score, updated_at
                 FROM games WHERE game_id=?1",
                params![game_id],
                map_game,
            )
            .optional()?;
        Ok(game)
    }

    /// Games without a final result, optionally limited to start times in
    /// `[started_after, started_before]`.
    pub fn list_unfinished_games(
        &self,
        started_before: Option<DateTime<Utc>>,
        started_after: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<GameRecord>> {
        let mut stmt = self.tx.prepare(
            "SELECT game_id, sport, league, home_team, away_team, start_time,
                    status, phase, home_score, away_score, updated_at
             FROM games
             WHERE phase != 'final'
               AND game_id NOT IN (SELECT game_id FROM final_games)
               AND (?1 IS NULL OR (start_time IS NOT NULL AND start_time <= ?1))
               AND (?2 IS NULL OR (start_time IS NOT NULL AND start_time >= ?2))
             ORDER BY start_time ASC",
        )?;
        let games = stmt
            .query_map(params![started_before, started_after], map_game)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }

    // ── Upcoming snapshot ─────────────────────────────────────────────────────

    pub fn upsert_upcoming(&self, game: &UpcomingGame) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO upcoming_games (game_id, sport, league, home_team, away_team,
                                         start_time, home_odds, away_odds, spread, total, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(game_id) DO UPDATE SET
                start_time=COALESCE(excluded.start_time, upcoming_games.start_time),
                home_odds=COALESCE(excluded.home_odds, upcoming_games.home_odds),
                away_odds=COALESCE(excluded.away_odds, upcoming_games.away_odds),
                spread=COALESCE(excluded.spread, upcoming_games.spread),
                total=COALESCE(excluded.total, upcoming_games.total),
                updated_at=excluded.updated_at",
            params![
                game.game_id,
                game.sport,
                game.league,
                game.home_team,
                game.away_team,
                game.start_time,
                game.home_odds,
                game.away_odds,
                game.spread,
                game.total,
                game.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_upcoming(&self, game_id: &str) -> StoreResult<Option<UpcomingGame>> {
        let game = self
            .tx
            .query_row(
                "SELECT game_id, sport, league, home_team, away_team, start_time,
                        home_odds, away_odds, spread, total, updated_at
                 FROM upcoming_games WHERE game_id=?1",
                params![game_id],
                |row| {
                    Ok(UpcomingGame {
                        game_id: row.get(0)?,
                        sport: row.get(1)?,
                        league: row.get(2)?,
                        home_team: row.get(3)?,
                        away_team: row.get(4)?,
                        start_time: row.get(5)?,
                        home_odds: row.get(6)?,
                        away_odds: row.get(7)?,
                        spread: row.get(8)?,
                        total: row.get(9)?,
                        updated_at: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(game)
    }

    /// Remove the Upcoming row for a game. Returns whether a row existed.
    pub fn delete_upcoming(&self, game_id: &str) -> StoreResult<bool> {
        let n = self
            .tx
            .execute("DELETE FROM upcoming_games WHERE game_id=?1", params![game_id])?;
        Ok(n > 0)
    }

    // ── Live snapshot ─────────────────────────────────────────────────────────

    pub fn upsert_live(&self, game: &LiveGame) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO live_games (game_id, sport, league, home_team, away_team,
                                     home_score, away_score, status, phase, clock, period, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(game_id) DO UPDATE SET
                sport=excluded.sport,
                league=excluded.league,
                home_score=excluded.home_score,
                away_score=excluded.away_score,
                status=excluded.status,
                phase=excluded.phase,
                clock=excluded.clock,
                period=excluded.period,
                updated_at=excluded.updated_at",
            params![
                game.game_id,
                game.sport,
                game.league,
                game.home_team,
                game.away_team,
                game.home_score,
                game.away_score,
                game.status,
                game.phase.as_str(),
                game.clock,
                game.period,
                game.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_live(&self, game_id: &str) -> StoreResult<Option<LiveGame>> {
        let game = self
            .tx
            .query_row(
                "SELECT game_id, sport, league, home_team, away_team, home_score, away_score,
                        status, phase, clock, period, updated_at
                 FROM live_games WHERE game_id=?1",
                params![game_id],
                |row| {
                    let phase: String = row.get(8)?;
                    Ok(LiveGame {
                        game_id: row.get(0)?,
                        sport: row.get(1)?,
                        league: row.get(2)?,
                        home_team: row.get(3)?,
                        away_team: row.get(4)?,
                        home_score: row.get(5)?,
                        away_score: row.get(6)?,
                        status: row.get(7)?,
                        phase: GamePhase::parse(&phase),
                        clock: row.get(9)?,
                        period: row.get(10)?,
                        updated_at: row.get(11)?,
                    })
                },
            )
            .optional()?;
        Ok(game)
    }

    // ── Final snapshot ────────────────────────────────────────────────────────

    /// Idempotent upsert keyed by game id. Returns `true` only when the Final
    /// row did not exist before this call.
    pub fn upsert_final(&self, game: &FinalGame) -> StoreResult<bool> {
        let existed = self.get_final(&game.game_id)?.is_some();
        self.tx.execute(
            "INSERT INTO final_games (game_id, sport, league, home_team, away_team,
                                      home_score, away_score, status, completed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(game_id) DO UPDATE SET
                home_score=excluded.home_score,
                away_score=excluded.away_score,
                status=excluded.status",
            params![
                game.game_id,
                game.sport,
                game.league,
                game.home_team,
                game.away_team,
                game.home_score,
                game.away_score,
                game.status,
                game.completed_at,
            ],
        )?;
        Ok(!existed)
    }

    pub fn get_final(&self, game_id: &str) -> StoreResult<Option<FinalGame>> {
        let game = self
            .tx
            .query_row(
                "SELECT game_id, sport, league, home_team, away_team, home_score, away_score,
                        status, completed_at
                 FROM final_games WHERE game_id=?1",
                params![game_id],
                map_final,
            )
            .optional()?;
        Ok(game)
    }

    /// Final games completed since `since` that have no recorded statistics.
    pub fn list_finals_missing_stats(&self, since: DateTime<Utc>) -> StoreResult<Vec<GameRef>> {
        let mut stmt = self.tx.prepare(
            "SELECT f.game_id, f.sport, f.league FROM final_games f
             WHERE f.completed_at >= ?1
               AND NOT EXISTS (SELECT 1 FROM player_stats p WHERE p.game_id = f.game_id)
             ORDER BY f.completed_at DESC",
        )?;
        let refs = stmt
            .query_map(params![since], map_game_ref)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }

    // ── Player statistics ─────────────────────────────────────────────────────

    pub fn upsert_player_stat(&self, stat: &PlayerStat) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO player_stats (game_id, participant_id, participant_name, stat_type, value, recorded_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(game_id, participant_id, stat_type) DO UPDATE SET
                participant_name=excluded.participant_name,
                value=excluded.value,
                recorded_at=excluded.recorded_at",
            params![
                stat.game_id,
                stat.participant_id,
                stat.participant_name,
                stat.stat_type,
                stat.value,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn list_player_stats(&self, game_id: &str) -> StoreResult<Vec<PlayerStat>> {
        let mut stmt = self.tx.prepare(
            "SELECT game_id, participant_id, participant_name, stat_type, value
             FROM player_stats WHERE game_id=?1",
        )?;
        let stats = stmt
            .query_map(params![game_id], |row| {
                Ok(PlayerStat {
                    game_id: row.get(0)?,
                    participant_id: row.get(1)?,
                    participant_name: row.get(2)?,
                    stat_type: row.get(3)?,
                    value: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }
}

fn map_game(row: &rusqlite::Row) -> rusqlite::Result<GameRecord> {
    let phase: String = row.get(7)?;
    Ok(GameRecord {
        game_id: row.get(0)?,
        sport: row.get(1)?,
        league: row.get(2)?,
        home_team: row.get(3)?,
        away_team: row.get(4)?,
        start_time: row.get(5)?,
        status: row.get(6)?,
        phase: GamePhase::parse(&phase),
        home_score: row.get(8)?,
        away_score: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn map_final(row: &rusqlite::Row) -> rusqlite::Result<FinalGame> {
    Ok(FinalGame {
        game_id: row.get(0)?,
        sport: row.get(1)?,
        league: row.get(2)?,
        home_team: row.get(3)?,
        away_team: row.get(4)?,
        home_score: row.get(5)?,
        away_score: row.get(6)?,
        status: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

pub(super) fn map_game_ref(row: &rusqlite::Row) -> rusqlite::Result<GameRef> {
    Ok(GameRef {
        game_id: row.get(0)?,
        sport: row.get(1)?,
        league: row.get(2)?,
    })
}
