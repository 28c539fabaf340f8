//! Shared SQLite database.
//!
//! One connection behind a mutex, shared by every module. Each module creates
//! its own tables on startup; this file only owns the usage counters and the
//! helpers the modules have in common.

use rusqlite::{Connection, Transaction, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        info!("Opened database at {:?}", path);
        Ok(db)
    }

    /// Private database for tests.
    pub fn in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS module_stats (
                    module TEXT NOT NULL,
                    action TEXT NOT NULL,
                    uses INTEGER NOT NULL DEFAULT 0,
                    last_used INTEGER NOT NULL,
                    PRIMARY KEY (module, action)
                );
                "#,
            )
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut conn)
    }

    /// Run `f` inside a transaction, committing only if it succeeds.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    pub fn record_usage(&self, module: &str, action: &str) -> rusqlite::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO module_stats (module, action, uses, last_used) VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(module, action) DO UPDATE SET uses = uses + 1, last_used = ?3",
                params![module, action, now_ts()],
            )?;
            Ok(())
        })
    }

    /// Most used `(module, action, uses)` triples.
    pub fn usage_top(&self, limit: usize) -> rusqlite::Result<Vec<(String, String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT module, action, uses FROM module_stats ORDER BY uses DESC, module LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect()
        })
    }
}

/// Delete all but the newest `keep` rows of `table` for a chat.
///
/// `table` must be a trusted identifier with `id` and `chat_id` columns.
pub fn prune_history(tx: &Transaction<'_>, table: &str, chat_id: i64, keep: usize) -> rusqlite::Result<usize> {
    let sql = format!(
        "DELETE FROM {table} WHERE chat_id = ?1 AND id NOT IN (
            SELECT id FROM {table} WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2
        )"
    );
    tx.execute(&sql, params![chat_id, keep as i64])
}

/// Unix timestamp in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_usage_counts() {
        let db = Database::in_memory().unwrap();
        db.record_usage("weather", "weather").unwrap();
        db.record_usage("weather", "weather").unwrap();
        db.record_usage("gemini", "ask").unwrap();
        let top = db.usage_top(5).unwrap();
        assert_eq!(top[0], ("weather".to_string(), "weather".to_string(), 2));
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_prune_history_keeps_newest() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE log (id INTEGER PRIMARY KEY AUTOINCREMENT, chat_id INTEGER, v TEXT);",
            )
        })
        .unwrap();
        db.transaction(|tx| {
            for i in 0..7 {
                tx.execute("INSERT INTO log (chat_id, v) VALUES (1, ?1)", params![i.to_string()])?;
            }
            tx.execute("INSERT INTO log (chat_id, v) VALUES (2, 'other')", [])?;
            prune_history(tx, "log", 1, 3)
        })
        .unwrap();

        let values: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT v FROM log WHERE chat_id = 1 ORDER BY id")?;
                let rows = stmt.query_map([], |r| r.get(0))?;
                rows.collect()
            })
            .unwrap();
        assert_eq!(values, vec!["4", "5", "6"]);

        let other: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM log WHERE chat_id = 2", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(other, 1);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| conn.execute_batch("CREATE TABLE t (x INTEGER NOT NULL);")).unwrap();
        let result: rusqlite::Result<()> = db.transaction(|tx| {
            tx.execute("INSERT INTO t (x) VALUES (1)", [])?;
            tx.execute("INSERT INTO t (x) VALUES (NULL)", [])?;
            Ok(())
        });
        assert!(result.is_err());
        let count: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }
}
