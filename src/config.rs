use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::ChatId;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Users allowed to run admin commands.
    admin_ids: Vec<i64>,
    /// Chat that receives the bot's own log lines.
    log_chat_id: Option<i64>,
    /// Directory for state files (database, logs, module configs). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_database_file")]
    database_file: String,
    /// Where installed plugin packages go. Defaults to `<data_dir>/plugins`.
    plugins_dir: Option<String>,
    /// How long a "send me ..." prompt waits for the answer.
    #[serde(default = "default_input_timeout")]
    input_timeout_secs: u64,
}

fn default_database_file() -> String {
    "bot.db".to_string()
}

fn default_input_timeout() -> u64 {
    600
}

pub struct Config {
    pub telegram_bot_token: String,
    pub admin_ids: Vec<i64>,
    pub log_chat_id: Option<ChatId>,
    pub data_dir: PathBuf,
    pub database_file: String,
    pub plugins_dir: PathBuf,
    pub input_timeout_secs: u64,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.admin_ids.is_empty() {
            return Err(ConfigError::Validation("admin_ids must contain at least one user ID".into()));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.input_timeout_secs == 0 {
            return Err(ConfigError::Validation("input_timeout_secs must be positive".into()));
        }
        if file.database_file.trim().is_empty() {
            return Err(ConfigError::Validation("database_file must not be empty".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let plugins_dir = file
            .plugins_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("plugins"));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            admin_ids: file.admin_ids,
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
            database_file: file.database_file,
            plugins_dir,
            input_timeout_secs: file.input_timeout_secs,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join("bot.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config() {
        let file = write_config(r#"{
            "admin_ids": [123456],
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.admin_ids, vec![123456]);
        assert!(config.is_admin(123456));
        assert_eq!(config.input_timeout_secs, 600);
        assert_eq!(config.database_path(), PathBuf::from("./bot.db"));
        assert_eq!(config.plugins_dir, PathBuf::from("./plugins"));
        assert!(config.log_chat_id.is_none());
    }

    #[test]
    fn test_paths_follow_data_dir() {
        let file = write_config(r#"{
            "admin_ids": [1],
            "telegram_bot_token": "123456789:ABC",
            "data_dir": "/var/lib/swiftbot",
            "log_chat_id": -100123
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log_file(), PathBuf::from("/var/lib/swiftbot/logs/bot.log"));
        assert_eq!(config.plugins_dir, PathBuf::from("/var/lib/swiftbot/plugins"));
        assert_eq!(config.log_chat_id, Some(ChatId(-100123)));
    }

    #[test]
    fn test_empty_admin_ids() {
        let file = write_config(r#"{
            "admin_ids": [],
            "telegram_bot_token": "123456789:ABCdef"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("admin_ids"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{
            "admin_ids": [123],
            "telegram_bot_token": ""
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{
            "admin_ids": [123],
            "telegram_bot_token": "invalid_token_no_colon"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{
            "admin_ids": [123],
            "telegram_bot_token": "notanumber:ABCdef"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_token_format_empty_secret() {
        let file = write_config(r#"{
            "admin_ids": [123],
            "telegram_bot_token": "123456789:"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_zero_input_timeout() {
        let file = write_config(r#"{
            "admin_ids": [123],
            "telegram_bot_token": "123456789:ABC",
            "input_timeout_secs": 0
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("input_timeout_secs"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
