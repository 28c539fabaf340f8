//! Plugin repositories and their module indexes.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::kernel::JsonStore;
use crate::kernel::database::now_ts;
use crate::kernel::settings::SettingsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub added_at: i64,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoriesFile {
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

/// One entry of a repository's `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableModule {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(skip)]
    pub repository_name: String,
    #[serde(skip)]
    pub repository_url: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct IndexFile {
    #[serde(default)]
    modules: Vec<AvailableModule>,
}

#[derive(Debug)]
pub enum RepoError {
    InvalidUrl(String),
    Duplicate(String),
    NoSuchIndex(usize),
    Save(SettingsError),
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::InvalidUrl(url) => {
                write!(f, "'{url}' must start with http://, https:// or file://")
            }
            RepoError::Duplicate(url) => write!(f, "repository {url} is already added"),
            RepoError::NoSuchIndex(i) => write!(f, "no repository #{i}"),
            RepoError::Save(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RepoError {}

impl From<SettingsError> for RepoError {
    fn from(e: SettingsError) -> Self {
        RepoError::Save(e)
    }
}

pub fn is_valid_repo_url(url: &str) -> bool {
    ["http://", "https://", "file://"]
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme))
        && !url.contains(char::is_whitespace)
}

/// `data_dir/repositories.json`, rewritten wholesale on each change.
pub struct RepoStore {
    store: JsonStore<RepositoriesFile>,
}

impl RepoStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self { store: JsonStore::load_or_default(path) }
    }

    pub fn list(&self) -> Vec<Repository> {
        self.store.get().repositories
    }

    /// Enabled repositories, highest priority first.
    pub fn enabled(&self) -> Vec<Repository> {
        let mut repos: Vec<Repository> = self.list().into_iter().filter(|r| r.enabled).collect();
        repos.sort_by(|a, b| b.priority.cmp(&a.priority));
        repos
    }

    pub fn add(&self, name: &str, url: &str) -> Result<Repository, RepoError> {
        let url = url.trim().trim_end_matches('/').to_string();
        if !is_valid_repo_url(&url) {
            return Err(RepoError::InvalidUrl(url));
        }
        let repo = Repository {
            name: name.trim().to_string(),
            url,
            enabled: true,
            priority: 0,
            added_at: now_ts(),
        };
        let added = self.store.update(|f| {
            if f.repositories.iter().any(|r| r.url == repo.url) {
                return Err(RepoError::Duplicate(repo.url.clone()));
            }
            f.repositories.push(repo.clone());
            Ok(repo)
        })??;
        info!("📚 Repository added: {} ({})", added.name, added.url);
        Ok(added)
    }

    /// Flip `enabled` of the repository at `index` and return the new state.
    pub fn toggle(&self, index: usize) -> Result<bool, RepoError> {
        self.store.update(|f| -> Result<bool, RepoError> {
            let repo = f.repositories.get_mut(index).ok_or(RepoError::NoSuchIndex(index))?;
            repo.enabled = !repo.enabled;
            Ok(repo.enabled)
        })?
    }

    pub fn delete(&self, index: usize) -> Result<Repository, RepoError> {
        let removed = self.store.update(|f| {
            if index >= f.repositories.len() {
                return Err(RepoError::NoSuchIndex(index));
            }
            Ok(f.repositories.remove(index))
        })??;
        info!("📚 Repository removed: {}", removed.name);
        Ok(removed)
    }
}

/// Read a repository's index, from disk for `file://` or over HTTP.
pub async fn fetch_index(http: &reqwest::Client, repo: &Repository) -> Vec<AvailableModule> {
    let parsed: Result<IndexFile, String> = match repo.url.strip_prefix("file://") {
        Some(path) => {
            let index = PathBuf::from(path).join("index.json");
            match tokio::fs::read_to_string(&index).await {
                Ok(s) => serde_json::from_str(&s).map_err(|e| e.to_string()),
                Err(e) => Err(format!("{}: {e}", index.display())),
            }
        }
        None => {
            let url = format!("{}/index.json", repo.url);
            match http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => resp.json().await.map_err(|e| e.to_string()),
                Ok(resp) => Err(format!("HTTP {}", resp.status())),
                Err(e) => Err(e.to_string()),
            }
        }
    };
    match parsed {
        Ok(index) => index
            .modules
            .into_iter()
            .map(|mut m| {
                m.repository_name = repo.name.clone();
                m.repository_url = repo.url.clone();
                m
            })
            .collect(),
        Err(e) => {
            error!("Failed to read index of {}: {e}", repo.name);
            Vec::new()
        }
    }
}

/// Modules from all enabled repositories. Higher priority wins on name clashes.
pub async fn available(http: &reqwest::Client, repos: &RepoStore) -> Vec<AvailableModule> {
    let mut all: Vec<AvailableModule> = Vec::new();
    for repo in repos.enabled() {
        for module in fetch_index(http, &repo).await {
            if all.iter().any(|m| m.name == module.name) {
                warn!("Module {} in {} shadowed by another repository", module.name, repo.name);
                continue;
            }
            all.push(module);
        }
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_url_validation() {
        assert!(is_valid_repo_url("https://example.org/repo"));
        assert!(is_valid_repo_url("file:///srv/repo"));
        assert!(!is_valid_repo_url("ftp://example.org"));
        assert!(!is_valid_repo_url("https://"));
        assert!(!is_valid_repo_url("https://a b"));
    }

    #[test]
    fn test_add_toggle_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.json");
        let repos = RepoStore::load(&path);

        repos.add("main", "https://example.org/repo/").unwrap();
        assert!(matches!(repos.add("again", "https://example.org/repo"), Err(RepoError::Duplicate(_))));
        assert!(matches!(repos.add("bad", "example.org"), Err(RepoError::InvalidUrl(_))));

        assert!(!repos.toggle(0).unwrap());
        assert!(repos.enabled().is_empty());
        assert!(matches!(repos.toggle(3), Err(RepoError::NoSuchIndex(3))));

        // persisted wholesale
        let reloaded = RepoStore::load(&path);
        assert_eq!(reloaded.list()[0].url, "https://example.org/repo");
        assert_eq!(reloaded.delete(0).unwrap().name, "main");
        assert!(reloaded.list().is_empty());
    }

    #[test]
    fn test_concurrent_deletes_do_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let repos = std::sync::Arc::new(RepoStore::load(dir.path().join("repositories.json")));
        repos.add("a", "https://a.example.org").unwrap();
        repos.add("b", "https://b.example.org").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repos = repos.clone();
                std::thread::spawn(move || repos.delete(1).is_ok() as usize + repos.toggle(1).is_ok() as usize)
            })
            .collect();
        let succeeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(succeeded >= 1);
        assert_eq!(repos.list().len(), 1);
        assert!(matches!(repos.delete(1), Err(RepoError::NoSuchIndex(1))));
    }

    #[tokio::test]
    async fn test_fetch_local_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"modules":[{"name":"echo","version":"1.2.0","description":"Echo","author":"me"}]}"#,
        )
        .unwrap();
        let repo = Repository {
            name: "local".into(),
            url: format!("file://{}", dir.path().display()),
            enabled: true,
            priority: 0,
            added_at: 0,
        };
        let modules = fetch_index(&reqwest::Client::new(), &repo).await;
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].version, "1.2.0");
        assert_eq!(modules[0].repository_name, "local");
    }

    #[tokio::test]
    async fn test_fetch_http_index() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repo/index.json")
            .with_body(r#"{"modules":[{"name":"quotes"}]}"#)
            .create_async()
            .await;
        let repo = Repository {
            name: "remote".into(),
            url: format!("{}/repo", server.url()),
            enabled: true,
            priority: 0,
            added_at: 0,
        };
        let modules = fetch_index(&reqwest::Client::new(), &repo).await;
        assert_eq!(modules[0].name, "quotes");
        assert_eq!(modules[0].version, "1.0.0");
    }
}
