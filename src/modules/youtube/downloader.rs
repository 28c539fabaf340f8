//! Media download through the `yt-dlp` binary.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum DownloadError {
    Unavailable,
    Failed(String),
    Io(String),
    NoOutput,
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Unavailable => write!(f, "downloader is not installed"),
            DownloadError::Failed(e) => write!(f, "download failed: {e}"),
            DownloadError::Io(e) => write!(f, "downloader I/O error: {e}"),
            DownloadError::NoOutput => write!(f, "downloader did not report an output file"),
        }
    }
}

impl std::error::Error for DownloadError {}

#[async_trait]
pub trait Downloader: Send + Sync {
    fn available(&self) -> bool;

    /// Download `url` into `out_dir` and return the produced file.
    async fn download(
        &self,
        url: &str,
        kind: MediaKind,
        quality: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, DownloadError>;
}

/// Command-line arguments selecting format and quality.
pub fn selector_args(kind: MediaKind, quality: u32) -> Vec<String> {
    match kind {
        MediaKind::Video => vec![
            "-f".into(),
            format!("bestvideo[height<={quality}]+bestaudio/best[height<={quality}]"),
            "--merge-output-format".into(),
            "mp4".into(),
        ],
        MediaKind::Audio => vec![
            "-f".into(),
            "bestaudio".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            "mp3".into(),
        ],
    }
}

pub struct YtDlp {
    binary: String,
    available: bool,
}

impl YtDlp {
    pub fn detect(binary: &str) -> Self {
        let available = match std::process::Command::new(binary).arg("--version").output() {
            Ok(out) if out.status.success() => {
                info!("📺 Found {binary} {}", String::from_utf8_lossy(&out.stdout).trim());
                true
            }
            Ok(_) | Err(_) => {
                warn!("{binary} not available, /yt is disabled");
                false
            }
        };
        Self { binary: binary.to_string(), available }
    }
}

#[async_trait]
impl Downloader for YtDlp {
    fn available(&self) -> bool {
        self.available
    }

    async fn download(
        &self,
        url: &str,
        kind: MediaKind,
        quality: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        if !self.available {
            return Err(DownloadError::Unavailable);
        }
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| DownloadError::Io(e.to_string()))?;

        let template = out_dir.join("%(id)s.%(ext)s");
        let output = tokio::process::Command::new(&self.binary)
            .args(selector_args(kind, quality))
            .args(["--no-playlist", "--print", "after_move:filepath", "-o"])
            .arg(&template)
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DownloadError::Io(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {stderr}");
            let line = stderr
                .lines()
                .rev()
                .find(|l| l.starts_with("ERROR"))
                .unwrap_or("unknown error");
            return Err(DownloadError::Failed(line.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(PathBuf::from)
            .ok_or(DownloadError::NoOutput)?;
        if !path.exists() {
            return Err(DownloadError::NoOutput);
        }
        info!("📥 Downloaded {} ({})", path.display(), kind.as_str());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_args() {
        let video = selector_args(MediaKind::Video, 720);
        assert_eq!(video[1], "bestvideo[height<=720]+bestaudio/best[height<=720]");
        assert!(video.contains(&"mp4".to_string()));
        let audio = selector_args(MediaKind::Audio, 720);
        assert_eq!(audio[1], "bestaudio");
        assert!(audio.contains(&"mp3".to_string()));
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!(MediaKind::parse("audio"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::parse("gif"), None);
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dl = YtDlp::detect("no-such-yt-dlp");
        assert!(!dl.available());
        let dir = tempfile::tempdir().unwrap();
        let res = dl.download("https://youtu.be/x", MediaKind::Video, 360, dir.path()).await;
        assert_eq!(res, Err(DownloadError::Unavailable));
    }
}
