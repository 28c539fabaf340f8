//! Check-only package update detection.

use std::path::Path;

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Pacman,
    Brew,
    Pkg,
}

impl PackageManager {
    pub fn name(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Pacman => "pacman",
            PackageManager::Brew => "Homebrew",
            PackageManager::Pkg => "pkg",
        }
    }

    /// Pick the manager by the files present on this host.
    pub fn detect() -> Option<Self> {
        let exists = |p: &str| Path::new(p).exists();
        if cfg!(target_os = "macos") {
            return (exists("/usr/local/bin/brew") || exists("/opt/homebrew/bin/brew")).then_some(Self::Brew);
        }
        if cfg!(target_os = "freebsd") {
            return exists("/usr/sbin/pkg").then_some(Self::Pkg);
        }
        if exists("/etc/debian_version") || exists("/usr/bin/apt") {
            Some(Self::Apt)
        } else if exists("/usr/bin/dnf") {
            Some(Self::Dnf)
        } else if exists("/usr/bin/yum") {
            Some(Self::Yum)
        } else if exists("/etc/arch-release") || exists("/usr/bin/pacman") {
            Some(Self::Pacman)
        } else {
            None
        }
    }

    /// Command that lists pending upgrades without installing anything.
    pub fn check_command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            PackageManager::Apt => ("apt", &["list", "--upgradable"]),
            PackageManager::Dnf => ("dnf", &["check-update", "-q"]),
            PackageManager::Yum => ("yum", &["check-update", "-q"]),
            PackageManager::Pacman => ("pacman", &["-Qu"]),
            PackageManager::Brew => ("brew", &["outdated"]),
            PackageManager::Pkg => ("pkg", &["upgrade", "-n"]),
        }
    }

    pub fn count_upgradable(self, stdout: &str) -> usize {
        let lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        match self {
            PackageManager::Apt => lines.filter(|l| l.contains("upgradable from")).count(),
            PackageManager::Dnf | PackageManager::Yum => lines
                .filter(|l| l.split_whitespace().count() == 3 && !l.starts_with("Last metadata"))
                .count(),
            PackageManager::Pkg => lines.filter(|l| l.contains(" -> ")).count(),
            PackageManager::Pacman | PackageManager::Brew => lines.count(),
        }
    }
}

/// Human readable result of the update check.
pub async fn check() -> String {
    let Some(manager) = PackageManager::detect() else {
        return "📦 <b>Updates</b>\nNo supported package manager found.".to_string();
    };
    let (program, args) = manager.check_command();
    let output = tokio::process::Command::new(program).args(args).output().await;
    match output {
        // dnf/yum exit with 100 when updates are available
        Ok(out) if out.status.success() || out.status.code() == Some(100) => {
            let count = manager.count_upgradable(&String::from_utf8_lossy(&out.stdout));
            info!("📦 {count} upgradable packages ({})", manager.name());
            if count == 0 {
                format!("📦 <b>Updates</b>\nAll packages are up to date ({}).", manager.name())
            } else {
                format!("📦 <b>Updates</b>\n{count} package(s) can be upgraded ({}).", manager.name())
            }
        }
        // pacman -Qu exits 1 when nothing is pending
        Ok(out) if manager == PackageManager::Pacman && out.status.code() == Some(1) => {
            "📦 <b>Updates</b>\nAll packages are up to date (pacman).".to_string()
        }
        Ok(out) => {
            warn!("{program} check failed: {}", String::from_utf8_lossy(&out.stderr).trim());
            format!("📦 <b>Updates</b>\nUpdate check failed ({}).", manager.name())
        }
        Err(e) => {
            warn!("Cannot run {program}: {e}");
            format!("📦 <b>Updates</b>\n{program} is not available.")
        }
    }
}
