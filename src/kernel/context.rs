//! State shared by all modules, passed explicitly into every handler.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::database::Database;
use super::pending::PendingInputs;
use super::router::ModuleInfo;
use super::settings::ModuleSwitches;
use crate::config::Config;

pub struct ModuleContext {
    pub db: Database,
    pub admin_ids: HashSet<i64>,
    pub data_dir: PathBuf,
    /// Where installable plugin packages live.
    pub plugins_dir: PathBuf,
    /// The bot's own log file, tailed by the info module.
    pub log_file: PathBuf,
    pub switches: ModuleSwitches,
    pub pending: PendingInputs,
    pub http: reqwest::Client,
    started_at: Instant,
    handled_updates: AtomicU64,
    catalog: RwLock<Vec<ModuleInfo>>,
}

impl ModuleContext {
    pub fn new(db: Database, admin_ids: impl IntoIterator<Item = i64>, data_dir: &Path, input_ttl: Duration) -> Self {
        Self {
            db,
            admin_ids: admin_ids.into_iter().collect(),
            data_dir: data_dir.to_path_buf(),
            plugins_dir: data_dir.join("plugins"),
            log_file: data_dir.join("logs").join("bot.log"),
            switches: ModuleSwitches::load(data_dir.join("modules.json")),
            pending: PendingInputs::new(input_ttl),
            http: reqwest::Client::new(),
            started_at: Instant::now(),
            handled_updates: AtomicU64::new(0),
            catalog: RwLock::new(Vec::new()),
        }
    }

    pub fn from_config(config: &Config) -> rusqlite::Result<Self> {
        let db = Database::open(&config.database_path())?;
        let mut ctx = Self::new(
            db,
            config.admin_ids.iter().copied(),
            &config.data_dir,
            Duration::from_secs(config.input_timeout_secs),
        );
        ctx.plugins_dir = config.plugins_dir.clone();
        ctx.log_file = config.log_file();
        Ok(ctx)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Path of a module's JSON config file.
    pub fn config_path(&self, module: &str) -> PathBuf {
        self.data_dir.join("config").join(format!("{module}.json"))
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn count_update(&self) -> u64 {
        self.handled_updates.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn handled_updates(&self) -> u64 {
        self.handled_updates.load(Ordering::Relaxed)
    }

    pub(crate) fn register_info(&self, info: ModuleInfo) {
        self.catalog.write().unwrap_or_else(|e| e.into_inner()).push(info);
    }

    /// Registered modules in registration order.
    pub fn catalog(&self) -> Vec<ModuleInfo> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// A text message as the modules see it.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub text: String,
    pub is_private: bool,
}

impl Incoming {
    pub fn private(user_id: i64, text: &str) -> Self {
        Self {
            chat_id: user_id,
            user_id,
            username: format!("user{user_id}"),
            text: text.to_string(),
            is_private: true,
        }
    }
}

/// Format a duration as `1d 2h 3m`.
pub fn format_uptime(d: Duration) -> String {
    let secs = d.as_secs();
    let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{days}d {hours}h {mins}m")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m {}s", secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "0m 42s");
        assert_eq!(format_uptime(Duration::from_secs(3 * 3600 + 120)), "3h 2m");
        assert_eq!(format_uptime(Duration::from_secs(2 * 86_400 + 3600)), "2d 1h 0m");
    }

    #[test]
    fn test_admin_and_counter() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ModuleContext::new(Database::in_memory().unwrap(), [7], dir.path(), Duration::from_secs(60));
        assert!(ctx.is_admin(7));
        assert!(!ctx.is_admin(8));
        ctx.count_update();
        assert_eq!(ctx.count_update(), 2);
        assert_eq!(ctx.config_path("weather"), dir.path().join("config").join("weather.json"));
    }
}
