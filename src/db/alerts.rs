use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;

use super::models::{Alert, AlertSeverity, NewAlert};
use super::{Database, Session};
use crate::error::StoreResult;
use crate::queue::AlertSink;

impl Session<'_> {
    pub fn insert_alert(&self, alert: &NewAlert) -> StoreResult<i64> {
        self.tx.execute(
            "INSERT INTO alerts (created_at, severity, category, message, metadata, acknowledged)
             VALUES (?1,?2,?3,?4,?5,0)",
            params![
                Utc::now(),
                alert.severity.as_str(),
                alert.category,
                alert.message,
                alert.metadata,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Whether an unacknowledged alert of `category` carries `metadata.<field> == key`.
    pub fn has_unacknowledged_alert(
        &self,
        category: &str,
        field: &str,
        key: &str,
    ) -> StoreResult<bool> {
        let path = format!("$.{}", field);
        let exists: bool = self.tx.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM alerts
                WHERE category=?1 AND acknowledged=0
                  AND CAST(json_extract(metadata, ?2) AS TEXT)=?3)",
            params![category, path, key],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn acknowledge_alert(&self, id: i64) -> StoreResult<bool> {
        let n = self.tx.execute(
            "UPDATE alerts SET acknowledged=1 WHERE id=?1 AND acknowledged=0",
            params![id],
        )?;
        Ok(n == 1)
    }

    /// Most recent alerts first
    pub fn list_alerts(&self, limit: i64, unacknowledged_only: bool) -> StoreResult<Vec<Alert>> {
        let mut stmt = self.tx.prepare(
            "SELECT id, created_at, severity, category, message, metadata, acknowledged
             FROM alerts
             WHERE (?2 = 0 OR acknowledged = 0)
             ORDER BY id DESC LIMIT ?1",
        )?;
        let alerts = stmt
            .query_map(params![limit, unacknowledged_only], |row| {
                let severity: String = row.get(2)?;
                Ok(Alert {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    severity: AlertSeverity::parse(&severity),
                    category: row.get(3)?,
                    message: row.get(4)?,
                    metadata: row.get(5)?,
                    acknowledged: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }
}

#[async_trait]
impl AlertSink for Database {
    async fn has_unacknowledged(&self, category: &str, field: &str, key: &str) -> StoreResult<bool> {
        self.with_session(|s| s.has_unacknowledged_alert(category, field, key))
    }

    async fn persist(&self, alert: &NewAlert) -> StoreResult<i64> {
        self.with_session(|s| s.insert_alert(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn live_alert(game_id: &str) -> NewAlert {
        NewAlert {
            severity: AlertSeverity::Info,
            category: "game_live".into(),
            message: format!("Game {} is live", game_id),
            metadata: json!({ "game_id": game_id }),
        }
    }

    #[test]
    fn test_unacknowledged_lookup_by_embedded_key() {
        let db = Database::open_in_memory().unwrap();
        let id = db.with_session(|s| s.insert_alert(&live_alert("401"))).unwrap();

        let open = |key: &str| {
            db.with_session(|s| s.has_unacknowledged_alert("game_live", "game_id", key))
                .unwrap()
        };
        assert!(open("401"));
        assert!(!open("402"));

        assert!(db.with_session(|s| s.acknowledge_alert(id)).unwrap());
        assert!(!open("401"));
    }

    #[test]
    fn test_list_alerts_round_trips_metadata() {
        let db = Database::open_in_memory().unwrap();
        db.with_session(|s| s.insert_alert(&live_alert("7"))).unwrap();

        let alerts = db.with_session(|s| s.list_alerts(10, true)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metadata["game_id"], "7");
        assert!(!alerts[0].acknowledged);
    }
}
