//! Installing plugin packages into the plugins directory.
//!
//! A package is a directory holding `manifest.json` and the entry file the
//! manifest names. It comes either from a local repository (copied) or from
//! `<repo>/modules/<name>/<name>.zip` (downloaded and extracted). A failed
//! install never leaves a partial directory behind.

use std::fmt;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::repos::AvailableModule;

pub const MANIFEST: &str = "manifest.json";
pub const PLUGIN_CONFIG: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fields this bot does not interpret, kept on rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_entry() -> String {
    "module.py".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct Installed {
    pub manifest: Manifest,
    pub path: PathBuf,
}

#[derive(Debug)]
pub enum InstallError {
    InvalidName(String),
    AlreadyInstalled(String),
    NotInstalled(String),
    SourceMissing(String),
    Download(String),
    Archive(String),
    UnsafePath(String),
    MissingFiles(String),
    BadManifest(String),
    Io(std::io::Error),
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallError::InvalidName(n) => write!(f, "invalid module name '{n}'"),
            InstallError::AlreadyInstalled(n) => write!(f, "module {n} is already installed"),
            InstallError::NotInstalled(n) => write!(f, "module {n} is not installed"),
            InstallError::SourceMissing(p) => write!(f, "module source not found: {p}"),
            InstallError::Download(e) => write!(f, "download failed: {e}"),
            InstallError::Archive(e) => write!(f, "bad archive: {e}"),
            InstallError::UnsafePath(p) => write!(f, "archive entry escapes the module directory: {p}"),
            InstallError::MissingFiles(e) => write!(f, "package is incomplete: {e}"),
            InstallError::BadManifest(e) => write!(f, "bad {MANIFEST}: {e}"),
            InstallError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for InstallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstallError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for InstallError {
    fn from(e: std::io::Error) -> Self {
        InstallError::Io(e)
    }
}

/// Names become directory names and callback arguments.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 40
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub struct Installer {
    plugins_dir: PathBuf,
    http: reqwest::Client,
}

impl Installer {
    pub fn new(plugins_dir: &Path, http: reqwest::Client) -> Self {
        Self { plugins_dir: plugins_dir.to_path_buf(), http }
    }

    pub fn module_dir(&self, name: &str) -> PathBuf {
        self.plugins_dir.join(name)
    }

    /// Installed packages with a readable manifest, sorted by name.
    pub fn installed(&self) -> Vec<Installed> {
        let Ok(entries) = std::fs::read_dir(&self.plugins_dir) else {
            return Vec::new();
        };
        let mut found: Vec<Installed> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir() && !p.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.')))
            .filter_map(|path| match read_manifest(&path) {
                Ok(manifest) => Some(Installed { manifest, path }),
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    None
                }
            })
            .collect();
        found.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
        found
    }

    pub fn get(&self, name: &str) -> Result<Installed, InstallError> {
        if !is_valid_name(name) {
            return Err(InstallError::InvalidName(name.to_string()));
        }
        let path = self.module_dir(name);
        if !path.is_dir() {
            return Err(InstallError::NotInstalled(name.to_string()));
        }
        let manifest = read_manifest(&path)?;
        Ok(Installed { manifest, path })
    }

    pub async fn install(&self, module: &AvailableModule) -> Result<Manifest, InstallError> {
        if !is_valid_name(&module.name) {
            return Err(InstallError::InvalidName(module.name.clone()));
        }
        let target = self.module_dir(&module.name);
        if target.exists() {
            return Err(InstallError::AlreadyInstalled(module.name.clone()));
        }
        std::fs::create_dir_all(&target)?;

        match self.fetch_into(module, &target).await.and_then(|()| verify(&target)) {
            Ok(manifest) => {
                info!("📦 Installed {} {} into {}", manifest.name, manifest.version, target.display());
                Ok(manifest)
            }
            Err(e) => {
                error!("Install of {} failed: {e}", module.name);
                if let Err(rm) = std::fs::remove_dir_all(&target) {
                    warn!("Failed to clean up {}: {rm}", target.display());
                }
                Err(e)
            }
        }
    }

    async fn fetch_into(&self, module: &AvailableModule, target: &Path) -> Result<(), InstallError> {
        let name = &module.name;
        match module.repository_url.strip_prefix("file://") {
            Some(repo) => {
                let source = Path::new(repo).join("modules").join(name);
                if !source.is_dir() {
                    return Err(InstallError::SourceMissing(source.display().to_string()));
                }
                let target = target.to_path_buf();
                tokio::task::spawn_blocking(move || copy_dir(&source, &target))
                    .await
                    .map_err(|e| InstallError::Io(std::io::Error::other(e)))?
            }
            None => {
                let url = format!("{}/modules/{name}/{name}.zip", module.repository_url);
                let resp = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| InstallError::Download(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(InstallError::Download(format!("HTTP {} for {url}", resp.status())));
                }
                let bytes = resp.bytes().await.map_err(|e| InstallError::Download(e.to_string()))?;
                let target = target.to_path_buf();
                tokio::task::spawn_blocking(move || extract_zip(&bytes, &target))
                    .await
                    .map_err(|e| InstallError::Io(std::io::Error::other(e)))?
            }
        }
    }

    pub fn uninstall(&self, name: &str) -> Result<(), InstallError> {
        let installed = self.get(name)?;
        std::fs::remove_dir_all(&installed.path)?;
        info!("🗑️ Uninstalled {name}");
        Ok(())
    }

    /// Flip `enabled` in the package manifest and return the new state.
    pub fn toggle(&self, name: &str) -> Result<bool, InstallError> {
        let mut installed = self.get(name)?;
        installed.manifest.enabled = !installed.manifest.enabled;
        write_manifest(&installed.path, &installed.manifest)?;
        info!("🔧 Plugin {name} {}", if installed.manifest.enabled { "enabled" } else { "disabled" });
        Ok(installed.manifest.enabled)
    }

    /// The plugin's own `config.json`, if it has one.
    pub fn settings(&self, name: &str) -> Result<Option<serde_json::Value>, InstallError> {
        let installed = self.get(name)?;
        let path = installed.path.join(PLUGIN_CONFIG);
        match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| InstallError::MissingFiles(format!("{PLUGIN_CONFIG}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reinstall from the repository, restoring the old copy on failure.
    pub async fn update(&self, module: &AvailableModule) -> Result<Manifest, InstallError> {
        let current = self.get(&module.name)?;
        let backup = self.plugins_dir.join(format!(".{}.backup", module.name));
        if backup.exists() {
            std::fs::remove_dir_all(&backup)?;
        }
        std::fs::rename(&current.path, &backup)?;

        match self.install(module).await {
            Ok(manifest) => {
                if let Err(e) = std::fs::remove_dir_all(&backup) {
                    warn!("Failed to remove backup {}: {e}", backup.display());
                }
                info!("⬆️ Updated {} {} -> {}", module.name, current.manifest.version, manifest.version);
                Ok(manifest)
            }
            Err(e) => {
                std::fs::rename(&backup, &current.path)?;
                warn!("Update of {} failed, previous version restored", module.name);
                Err(e)
            }
        }
    }
}

pub fn read_manifest(dir: &Path) -> Result<Manifest, InstallError> {
    let path = dir.join(MANIFEST);
    let content = std::fs::read_to_string(&path)
        .map_err(|_| InstallError::MissingFiles(format!("{MANIFEST} not found")))?;
    serde_json::from_str(&content).map_err(|e| InstallError::MissingFiles(format!("{MANIFEST}: {e}")))
}

fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), InstallError> {
    let content = serde_json::to_string_pretty(manifest)
        .map_err(|e| InstallError::Io(std::io::Error::other(e)))?;
    std::fs::write(dir.join(MANIFEST), content)?;
    Ok(())
}

/// Both the manifest and its entry file must be present, inside `dir`.
fn verify(dir: &Path) -> Result<Manifest, InstallError> {
    let manifest = read_manifest(dir)?;
    let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if manifest.name != dir_name {
        return Err(InstallError::BadManifest(format!(
            "name '{}' does not match module '{dir_name}'",
            manifest.name
        )));
    }
    let entry = Path::new(&manifest.entry);
    if manifest.entry.is_empty() || !entry.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(InstallError::BadManifest(format!("entry '{}' must be a relative path", manifest.entry)));
    }
    if !dir.join(entry).is_file() {
        return Err(InstallError::MissingFiles(format!("entry file {} not found", manifest.entry)));
    }
    Ok(manifest)
}

fn copy_dir(source: &Path, target: &Path) -> Result<(), InstallError> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

/// Extract into `target`, rejecting entries that would land outside it.
pub fn extract_zip(bytes: &[u8], target: &Path) -> Result<(), InstallError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| InstallError::Archive(e.to_string()))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| InstallError::Archive(e.to_string()))?;
        let Some(relative) = file.enclosed_name() else {
            return Err(InstallError::UnsafePath(file.name().to_string()));
        };
        let out = target.join(relative);
        if file.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut dest = std::fs::File::create(&out)?;
        std::io::copy(&mut file, &mut dest)?;
    }
    Ok(())
}
