use rusqlite::{OptionalExtension, params};

use super::downloader::MediaKind;
use crate::kernel::Database;

pub const DEFAULT_QUALITY: u32 = 720;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoutubePrefs {
    pub format: MediaKind,
    pub quality: u32,
}

impl Default for YoutubePrefs {
    fn default() -> Self {
        Self { format: MediaKind::Video, quality: DEFAULT_QUALITY }
    }
}

pub fn init_schema(db: &Database) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS youtube_config (
                user_id INTEGER PRIMARY KEY,
                default_format TEXT NOT NULL DEFAULT 'video',
                default_quality INTEGER NOT NULL DEFAULT 720
            );
            "#,
        )
    })
}

pub fn prefs(db: &Database, user_id: i64) -> rusqlite::Result<YoutubePrefs> {
    let row: Option<(String, i64)> = db.with_conn(|conn| {
        conn.query_row(
            "SELECT default_format, default_quality FROM youtube_config WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    })?;
    Ok(match row {
        Some((format, quality)) => YoutubePrefs {
            format: MediaKind::parse(&format).unwrap_or(MediaKind::Video),
            quality: u32::try_from(quality).unwrap_or(DEFAULT_QUALITY),
        },
        None => YoutubePrefs::default(),
    })
}

pub fn save(db: &Database, user_id: i64, prefs: YoutubePrefs) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR REPLACE INTO youtube_config (user_id, default_format, default_quality) VALUES (?1, ?2, ?3)",
            params![user_id, prefs.format.as_str(), prefs.quality],
        )?;
        Ok(())
    })
}

/// Back to defaults. Returns true if a row existed.
pub fn reset(db: &Database, user_id: i64) -> rusqlite::Result<bool> {
    db.with_conn(|conn| {
        let n = conn.execute("DELETE FROM youtube_config WHERE user_id = ?1", params![user_id])?;
        Ok(n > 0)
    })
}
