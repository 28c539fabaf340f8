//! Analysis history per chat.

use rusqlite::params;

use crate::kernel::Database;
use crate::kernel::database::{now_ts, prune_history};

/// Rows kept per chat.
pub const HISTORY_KEEP: usize = 10;
/// Rows shown under an analysis.
pub const HISTORY_SHOW: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub code: String,
    pub result: String,
    pub timestamp: i64,
}

pub fn init_schema(db: &Database) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                code TEXT NOT NULL,
                result TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_history_chat ON analysis_history(chat_id);
            "#,
        )
    })
}

pub fn save(db: &Database, chat_id: i64, code: &str, result: &str) -> rusqlite::Result<()> {
    db.transaction(|tx| {
        tx.execute(
            "INSERT INTO analysis_history (chat_id, code, result, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, code, result, now_ts()],
        )?;
        prune_history(tx, "analysis_history", chat_id, HISTORY_KEEP)?;
        Ok(())
    })
}

/// Most recent first.
pub fn recent(db: &Database, chat_id: i64, limit: usize) -> rusqlite::Result<Vec<AnalysisRecord>> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT code, result, timestamp FROM analysis_history WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
            Ok(AnalysisRecord { code: row.get(0)?, result: row.get(1)?, timestamp: row.get(2)? })
        })?;
        rows.collect()
    })
}

pub fn count(db: &Database, chat_id: i64) -> rusqlite::Result<usize> {
    db.with_conn(|conn| {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM analysis_history WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    })
}

/// Delete a chat's history. Returns the number of rows removed.
pub fn clear(db: &Database, chat_id: i64) -> rusqlite::Result<usize> {
    db.with_conn(|conn| conn.execute("DELETE FROM analysis_history WHERE chat_id = ?1", params![chat_id]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::in_memory().unwrap();
        init_schema(&db).unwrap();
        db
    }

    #[test]
    fn test_keeps_last_ten() {
        let db = db();
        for i in 0..13 {
            save(&db, 1, &format!("code{i}"), "ok").unwrap();
        }
        assert_eq!(count(&db, 1).unwrap(), HISTORY_KEEP);
        let recent = recent(&db, 1, HISTORY_SHOW).unwrap();
        assert_eq!(recent.len(), HISTORY_SHOW);
        assert_eq!(recent[0].code, "code12");
        assert_eq!(recent[4].code, "code8");
    }

    #[test]
    fn test_clear_only_touches_one_chat() {
        let db = db();
        save(&db, 555, "a", "ok").unwrap();
        save(&db, 555, "b", "ok").unwrap();
        save(&db, 777, "c", "ok").unwrap();
        assert_eq!(clear(&db, 555).unwrap(), 2);
        assert_eq!(clear(&db, 555).unwrap(), 0);
        assert_eq!(count(&db, 777).unwrap(), 1);
    }
}
