use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub mod alerts;
pub mod games;
pub mod models;
pub mod wagers;

use crate::error::{StoreError, StoreResult};

/// Thread-safe SQLite handle (single connection with mutex).
///
/// Every read and write goes through [`Database::with_session`], which holds
/// the connection for the duration of one transaction.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Transactional handle handed to a `with_session` closure.
///
/// Committed when the closure returns `Ok`, rolled back otherwise.
pub struct Session<'c> {
    tx: Transaction<'c>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(1))?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Run `f` inside one immediate transaction.
    pub fn with_session<T>(
        &self,
        f: impl FnOnce(&Session<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let session = Session { tx };
        let out = f(&session)?;
        session.tx.commit()?;
        Ok(out)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

/// Read a text column through a `FromStr` that reports `StoreError`.
fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = StoreError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    game_id     TEXT    PRIMARY KEY,
    sport       TEXT    NOT NULL,
    league      TEXT    NOT NULL,
    home_team   TEXT    NOT NULL,
    away_team   TEXT    NOT NULL,
    start_time  TEXT,
    status      TEXT    NOT NULL,
    phase       TEXT    NOT NULL,
    home_score  INTEGER,
    away_score  INTEGER,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS upcoming_games (
    game_id     TEXT    PRIMARY KEY,
    sport       TEXT    NOT NULL,
    league      TEXT    NOT NULL,
    home_team   TEXT    NOT NULL,
    away_team   TEXT    NOT NULL,
    start_time  TEXT,
    home_odds   INTEGER,
    away_odds   INTEGER,
    spread      REAL,
    total       REAL,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS live_games (
    game_id     TEXT    PRIMARY KEY,
    sport       TEXT    NOT NULL,
    league      TEXT    NOT NULL,
    home_team   TEXT    NOT NULL,
    away_team   TEXT    NOT NULL,
    home_score  INTEGER NOT NULL,
    away_score  INTEGER NOT NULL,
    status      TEXT    NOT NULL,
    phase       TEXT    NOT NULL,
    clock       TEXT,
    period      INTEGER,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS final_games (
    game_id      TEXT    PRIMARY KEY,
    sport        TEXT    NOT NULL,
    league       TEXT    NOT NULL,
    home_team    TEXT    NOT NULL,
    away_team    TEXT    NOT NULL,
    home_score   INTEGER NOT NULL,
    away_score   INTEGER NOT NULL,
    status       TEXT    NOT NULL,
    completed_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS player_stats (
    game_id          TEXT    NOT NULL,
    participant_id   TEXT    NOT NULL,
    participant_name TEXT    NOT NULL,
    stat_type        TEXT    NOT NULL,
    value            REAL    NOT NULL,
    recorded_at      TEXT    NOT NULL,
    PRIMARY KEY (game_id, participant_id, stat_type)
);

CREATE TABLE IF NOT EXISTS wagers (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    parlay_id      TEXT,
    game_id        TEXT,
    participant_id TEXT,
    kind           TEXT    NOT NULL,
    selection      TEXT    NOT NULL,
    stat_type      TEXT,
    stake          REAL    NOT NULL,
    original_stake REAL,
    odds           INTEGER NOT NULL,
    status         TEXT    NOT NULL DEFAULT 'pending',
    placed_at      TEXT    NOT NULL,
    graded_at      TEXT,
    profit         REAL,
    result_value   REAL
);

CREATE TABLE IF NOT EXISTS alerts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at   TEXT    NOT NULL,
    severity     TEXT    NOT NULL,
    category     TEXT    NOT NULL,
    message      TEXT    NOT NULL,
    metadata     TEXT    NOT NULL DEFAULT '{}',
    acknowledged INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_games_phase ON games(phase);
CREATE INDEX IF NOT EXISTS idx_wagers_status ON wagers(status);
CREATE INDEX IF NOT EXISTS idx_wagers_parlay ON wagers(parlay_id);
CREATE INDEX IF NOT EXISTS idx_alerts_open ON alerts(category, acknowledged);
"#;
