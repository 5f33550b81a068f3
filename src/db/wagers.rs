use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::games::map_game_ref;
use super::models::{GameRef, NewWager, Wager, WagerStatus};
use super::{parse_column, Session};
use crate::error::StoreResult;

const WAGER_COLUMNS: &str = "id, parlay_id, game_id, participant_id, kind, selection, stat_type,
     stake, original_stake, odds, status, placed_at, graded_at, profit, result_value";

/// Terminal values written when a wager is graded
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub status: WagerStatus,
    pub profit: Option<f64>,
    pub result_value: Option<f64>,
    pub graded_at: DateTime<Utc>,
}

impl Session<'_> {
    pub fn insert_wager(&self, wager: &NewWager) -> StoreResult<i64> {
        self.tx.execute(
            "INSERT INTO wagers (parlay_id, game_id, participant_id, kind, selection, stat_type,
                                 stake, original_stake, odds, status, placed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,'pending',?10)",
            params![
                wager.parlay_id,
                wager.game_id,
                wager.participant_id,
                wager.kind.as_str(),
                wager.selection,
                wager.stat_type,
                wager.stake,
                wager.original_stake,
                wager.odds,
                Utc::now(),
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn get_wager(&self, id: i64) -> StoreResult<Option<Wager>> {
        let wager = self
            .tx
            .query_row(
                &format!("SELECT {} FROM wagers WHERE id=?1", WAGER_COLUMNS),
                params![id],
                map_wager,
            )
            .optional()?;
        Ok(wager)
    }

    pub fn list_pending_wagers(&self) -> StoreResult<Vec<Wager>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM wagers WHERE status='pending' ORDER BY id ASC",
            WAGER_COLUMNS
        ))?;
        let wagers = stmt
            .query_map([], map_wager)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(wagers)
    }

    pub fn list_parlay_legs(&self, parlay_id: &str) -> StoreResult<Vec<Wager>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM wagers WHERE parlay_id=?1 ORDER BY id ASC",
            WAGER_COLUMNS
        ))?;
        let wagers = stmt
            .query_map(params![parlay_id], map_wager)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(wagers)
    }

    /// Parlay ids with at least one leg whose profit has not been assigned,
    /// i.e. groups that have not been resolved yet.
    pub fn list_unresolved_parlays(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self.tx.prepare(
            "SELECT DISTINCT parlay_id FROM wagers
             WHERE parlay_id IS NOT NULL AND profit IS NULL
             ORDER BY parlay_id ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Move a pending wager to a terminal status. A wager that is no longer
    /// pending is left untouched and `false` is returned.
    pub fn settle_wager(&self, id: i64, settlement: &Settlement) -> StoreResult<bool> {
        let n = self.tx.execute(
            "UPDATE wagers SET status=?1, profit=?2, result_value=?3, graded_at=?4
             WHERE id=?5 AND status='pending'",
            params![
                settlement.status.as_str(),
                settlement.profit,
                settlement.result_value,
                settlement.graded_at,
                id,
            ],
        )?;
        Ok(n == 1)
    }

    /// Assign a resolved parlay's profit share to one graded leg.
    pub fn set_leg_profit(&self, id: i64, profit: f64) -> StoreResult<bool> {
        let n = self.tx.execute(
            "UPDATE wagers SET profit=?1
             WHERE id=?2 AND parlay_id IS NOT NULL AND profit IS NULL AND status != 'pending'",
            params![profit, id],
        )?;
        Ok(n == 1)
    }

    /// Final games with pending prop wagers whose statistic is not stored yet.
    pub fn list_games_needing_stats(&self) -> StoreResult<Vec<GameRef>> {
        let mut stmt = self.tx.prepare(
            "SELECT DISTINCT f.game_id, f.sport, f.league
             FROM wagers w JOIN final_games f ON f.game_id = w.game_id
             WHERE w.status='pending' AND w.kind='prop'
               AND NOT EXISTS (
                   SELECT 1 FROM player_stats p
                   WHERE p.game_id = w.game_id
                     AND (w.stat_type IS NULL OR p.stat_type = w.stat_type)
                     AND (w.participant_id IS NULL OR p.participant_id = w.participant_id)
               )",
        )?;
        let refs = stmt
            .query_map([], map_game_ref)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }
}

fn map_wager(row: &rusqlite::Row) -> rusqlite::Result<Wager> {
    Ok(Wager {
        id: row.get(0)?,
        parlay_id: row.get(1)?,
        game_id: row.get(2)?,
        participant_id: row.get(3)?,
        kind: parse_column(row, 4)?,
        selection: row.get(5)?,
        stat_type: row.get(6)?,
        stake: row.get(7)?,
        original_stake: row.get(8)?,
        odds: row.get(9)?,
        status: parse_column(row, 10)?,
        placed_at: row.get(11)?,
        graded_at: row.get(12)?,
        profit: row.get(13)?,
        result_value: row.get(14)?,
    })
}
