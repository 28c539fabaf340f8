//! Answer cache, conversation history, modes and rate-limit timestamps.

use rusqlite::{OptionalExtension, params};

use super::Mode;
use crate::kernel::Database;
use crate::kernel::database::{now_ts, prune_history};

/// Exchanges kept (and replayed into the prompt) per chat.
pub const HISTORY_LIMIT: usize = 5;

pub fn init_schema(db: &Database) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS gemini_cache (
                question TEXT PRIMARY KEY,
                answer TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS gemini_conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS gemini_settings (
                chat_id INTEGER PRIMARY KEY,
                mode TEXT NOT NULL DEFAULT 'friendly'
            );

            CREATE TABLE IF NOT EXISTS gemini_rate_limit (
                chat_id INTEGER PRIMARY KEY,
                last_request INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_gemini_conversations_chat ON gemini_conversations(chat_id);
            "#,
        )
    })
}

pub fn cached_answer(db: &Database, key: &str, max_age_secs: i64) -> rusqlite::Result<Option<String>> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT answer FROM gemini_cache WHERE question = ?1 AND timestamp >= ?2",
            params![key, now_ts() - max_age_secs],
            |row| row.get(0),
        )
        .optional()
    })
}

pub fn cache_answer(db: &Database, key: &str, answer: &str) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR REPLACE INTO gemini_cache (question, answer, timestamp) VALUES (?1, ?2, ?3)",
            params![key, answer, now_ts()],
        )?;
        Ok(())
    })
}

/// Append an exchange and trim the chat's history in one transaction.
pub fn save_exchange(db: &Database, chat_id: i64, question: &str, answer: &str) -> rusqlite::Result<()> {
    db.transaction(|tx| {
        tx.execute(
            "INSERT INTO gemini_conversations (chat_id, question, answer, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, question, answer, now_ts()],
        )?;
        prune_history(tx, "gemini_conversations", chat_id, HISTORY_LIMIT)?;
        Ok(())
    })
}

/// Last exchanges, oldest first.
pub fn history(db: &Database, chat_id: i64) -> rusqlite::Result<Vec<(String, String)>> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT question, answer FROM gemini_conversations WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, HISTORY_LIMIT as i64], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        items.reverse();
        Ok(items)
    })
}

pub fn mode(db: &Database, chat_id: i64) -> rusqlite::Result<Mode> {
    db.with_conn(|conn| {
        let raw: Option<String> = conn
            .query_row("SELECT mode FROM gemini_settings WHERE chat_id = ?1", params![chat_id], |row| row.get(0))
            .optional()?;
        Ok(raw.as_deref().and_then(Mode::parse).unwrap_or_default())
    })
}

pub fn set_mode(db: &Database, chat_id: i64, mode: Mode) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR REPLACE INTO gemini_settings (chat_id, mode) VALUES (?1, ?2)",
            params![chat_id, mode.as_str()],
        )?;
        Ok(())
    })
}

/// Millisecond timestamp of the chat's last answered request.
pub fn last_request(db: &Database, chat_id: i64) -> rusqlite::Result<Option<i64>> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT last_request FROM gemini_rate_limit WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )
        .optional()
    })
}

pub fn touch_request(db: &Database, chat_id: i64, at_ms: i64) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR REPLACE INTO gemini_rate_limit (chat_id, last_request) VALUES (?1, ?2)",
            params![chat_id, at_ms],
        )?;
        Ok(())
    })
}

/// Wipe the answer cache and every conversation. Returns rows deleted.
pub fn clear_all(db: &Database) -> rusqlite::Result<usize> {
    db.transaction(|tx| {
        let cache = tx.execute("DELETE FROM gemini_cache", [])?;
        let conversations = tx.execute("DELETE FROM gemini_conversations", [])?;
        Ok(cache + conversations)
    })
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
    fn test_history_capped_and_ordered() {
        let db = db();
        for i in 0..8 {
            save_exchange(&db, 1, &format!("q{i}"), &format!("a{i}")).unwrap();
        }
        save_exchange(&db, 2, "other", "chat").unwrap();
        let h = history(&db, 1).unwrap();
        assert_eq!(h.len(), HISTORY_LIMIT);
        assert_eq!(h.first().unwrap().0, "q3");
        assert_eq!(h.last().unwrap().0, "q7");

        let total: i64 = db
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM gemini_conversations WHERE chat_id = 1", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(total, HISTORY_LIMIT as i64);
        assert_eq!(history(&db, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_mode_default_and_set() {
        let db = db();
        assert_eq!(mode(&db, 1).unwrap(), Mode::Friendly);
        set_mode(&db, 1, Mode::Sarcastic).unwrap();
        set_mode(&db, 1, Mode::Formal).unwrap();
        assert_eq!(mode(&db, 1).unwrap(), Mode::Formal);
    }

    #[test]
    fn test_cache_respects_age() {
        let db = db();
        cache_answer(&db, "friendly|hi", "hello").unwrap();
        assert_eq!(cached_answer(&db, "friendly|hi", 60).unwrap().as_deref(), Some("hello"));
        db.with_conn(|c| c.execute("UPDATE gemini_cache SET timestamp = timestamp - 120", [])).unwrap();
        assert_eq!(cached_answer(&db, "friendly|hi", 60).unwrap(), None);
    }

    #[test]
    fn test_clear_all_counts_rows() {
        let db = db();
        cache_answer(&db, "a", "b").unwrap();
        save_exchange(&db, 1, "q", "a").unwrap();
        save_exchange(&db, 2, "q", "a").unwrap();
        assert_eq!(clear_all(&db).unwrap(), 3);
        assert_eq!(clear_all(&db).unwrap(), 0);
    }

    #[test]
    fn test_rate_timestamp() {
        let db = db();
        assert_eq!(last_request(&db, 1).unwrap(), None);
        touch_request(&db, 1, 1000).unwrap();
        touch_request(&db, 1, 2000).unwrap();
        assert_eq!(last_request(&db, 1).unwrap(), Some(2000));
    }
}
