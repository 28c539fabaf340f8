//! Per-user weather preferences.

use rusqlite::{OptionalExtension, params};

use super::client::Units;
use crate::kernel::Database;
use crate::kernel::database::now_ts;

pub const MAX_FAVORITES: usize = 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherPrefs {
    pub city: Option<String>,
    pub units: Option<Units>,
}

pub fn init_schema(db: &Database) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS weather_config (
                user_id INTEGER PRIMARY KEY,
                city TEXT,
                units TEXT
            );

            CREATE TABLE IF NOT EXISTS weather_favorites (
                user_id INTEGER NOT NULL,
                city TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, city)
            );
            "#,
        )
    })
}

pub fn prefs(db: &Database, user_id: i64) -> rusqlite::Result<WeatherPrefs> {
    db.with_conn(|conn| {
        let row: Option<(Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT city, units FROM weather_config WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row
            .map(|(city, units)| WeatherPrefs {
                city,
                units: units.as_deref().and_then(Units::parse),
            })
            .unwrap_or_default())
    })
}

pub fn set_default_city(db: &Database, user_id: i64, city: &str) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO weather_config (user_id, city) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET city = excluded.city",
            params![user_id, city],
        )?;
        Ok(())
    })
}

pub fn set_units(db: &Database, user_id: i64, units: Units) -> rusqlite::Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO weather_config (user_id, units) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET units = excluded.units",
            params![user_id, units.as_str()],
        )?;
        Ok(())
    })
}

pub fn favorites(db: &Database, user_id: i64) -> rusqlite::Result<Vec<String>> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT city FROM weather_favorites WHERE user_id = ?1 ORDER BY added_at, city")?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        rows.collect()
    })
}

/// Returns false when the list is already full.
pub fn add_favorite(db: &Database, user_id: i64, city: &str) -> rusqlite::Result<bool> {
    db.transaction(|tx| {
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM weather_favorites WHERE user_id = ?1 AND city != ?2",
            params![user_id, city],
            |row| row.get(0),
        )?;
        if count as usize >= MAX_FAVORITES {
            return Ok(false);
        }
        tx.execute(
            "INSERT OR IGNORE INTO weather_favorites (user_id, city, added_at) VALUES (?1, ?2, ?3)",
            params![user_id, city, now_ts()],
        )?;
        Ok(true)
    })
}

pub fn remove_favorite(db: &Database, user_id: i64, city: &str) -> rusqlite::Result<bool> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "DELETE FROM weather_favorites WHERE user_id = ?1 AND city = ?2",
            params![user_id, city],
        )?;
        Ok(n > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::in_memory().unwrap();
        init_schema(&db).unwrap();
        init_schema(&db).unwrap();
        db
    }

    #[test]
    fn test_prefs_default_then_set() {
        let db = db();
        assert_eq!(prefs(&db, 1).unwrap(), WeatherPrefs::default());
        set_default_city(&db, 1, "Berlin").unwrap();
        set_units(&db, 1, Units::Imperial).unwrap();
        set_default_city(&db, 1, "Paris").unwrap();
        let p = prefs(&db, 1).unwrap();
        assert_eq!(p.city.as_deref(), Some("Paris"));
        assert_eq!(p.units, Some(Units::Imperial));
    }

    #[test]
    fn test_one_row_per_user() {
        let db = db();
        set_default_city(&db, 1, "A").unwrap();
        set_default_city(&db, 1, "B").unwrap();
        set_units(&db, 1, Units::Metric).unwrap();
        let n: i64 = db
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM weather_config", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_favorites_cap_and_remove() {
        let db = db();
        for i in 0..MAX_FAVORITES {
            assert!(add_favorite(&db, 1, &format!("City{i}")).unwrap());
        }
        assert!(!add_favorite(&db, 1, "One too many").unwrap());
        // re-adding an existing one is fine
        assert!(add_favorite(&db, 1, "City0").unwrap());
        assert_eq!(favorites(&db, 1).unwrap().len(), MAX_FAVORITES);
        assert!(remove_favorite(&db, 1, "City3").unwrap());
        assert!(!remove_favorite(&db, 1, "City3").unwrap());
        assert!(favorites(&db, 2).unwrap().is_empty());
    }
}
