//! Video and audio downloads from YouTube and similar sites.

pub mod downloader;
pub mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::kernel::{
    Button, CallbackData, CallbackInvocation, CommandSpec, Incoming, Invocation, JsonStore, Keyboard, Module,
    ModuleContext, Outcome, Pending, Reply, html_escape,
};
use downloader::{DownloadError, Downloader, MediaKind, YtDlp};
use store::YoutubePrefs;

const NAME: &str = "yt";
const QUALITIES: [u32; 3] = [360, 720, 1080];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    pub max_quality: u32,
    pub max_file_mb: u64,
    pub binary: String,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            max_quality: 720,
            max_file_mb: 50,
            binary: "yt-dlp".to_string(),
        }
    }
}

/// URLs waiting for a format choice, keyed by (chat, user).
struct Selections {
    ttl: Duration,
    urls: Mutex<HashMap<(i64, i64), (Instant, String)>>,
}

impl Selections {
    fn new(ttl: Duration) -> Self {
        Self { ttl, urls: Mutex::new(HashMap::new()) }
    }

    fn put(&self, chat_id: i64, user_id: i64, url: String) {
        let mut urls = self.urls.lock().unwrap_or_else(|e| e.into_inner());
        urls.retain(|_, (at, _)| at.elapsed() < self.ttl);
        urls.insert((chat_id, user_id), (Instant::now(), url));
    }

    fn get(&self, chat_id: i64, user_id: i64) -> Option<String> {
        let urls = self.urls.lock().unwrap_or_else(|e| e.into_inner());
        urls.get(&(chat_id, user_id))
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, url)| url.clone())
    }

    fn take(&self, chat_id: i64, user_id: i64) -> Option<String> {
        let mut urls = self.urls.lock().unwrap_or_else(|e| e.into_inner());
        urls.remove(&(chat_id, user_id))
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, url)| url)
    }
}

pub struct YoutubeModule {
    downloader: Box<dyn Downloader>,
    config: JsonStore<YoutubeConfig>,
    selections: Selections,
    download_dir: PathBuf,
}

impl YoutubeModule {
    pub fn new(ctx: &ModuleContext) -> Self {
        let config: JsonStore<YoutubeConfig> = JsonStore::load_or_default(ctx.config_path("youtube"));
        let downloader = YtDlp::detect(&config.get().binary);
        Self::with_parts(ctx, config, Box::new(downloader))
    }

    pub fn with_parts(ctx: &ModuleContext, config: JsonStore<YoutubeConfig>, downloader: Box<dyn Downloader>) -> Self {
        Self {
            downloader,
            config,
            selections: Selections::new(Duration::from_secs(600)),
            download_dir: ctx.data_dir.join("downloads"),
        }
    }

    fn offer_formats(&self, msg: &Incoming, url: &str) -> Reply {
        if !is_http_url(url) {
            return Reply::text("❌ That is not a link. Send an http(s) URL.");
        }
        self.selections.put(msg.chat_id, msg.user_id, url.to_string());
        let kb = Keyboard::new()
            .row(vec![
                Button::new("🎬 Video", CallbackData::with_arg(NAME, "format", "video")),
                Button::new("🎵 Audio", CallbackData::with_arg(NAME, "format", "audio")),
            ])
            .row(vec![
                Button::new("⚡ My defaults", CallbackData::new(NAME, "default")),
                Button::new("✖️ Cancel", CallbackData::new(NAME, "cancel")),
            ]);
        Reply::with_keyboard(format!("📺 {}\nChoose what to download:", html_escape(url)), kb)
    }

    fn quality_keyboard(&self) -> Keyboard {
        let max = self.config.get().max_quality;
        let buttons = QUALITIES
            .iter()
            .filter(|q| **q <= max)
            .map(|q| Button::new(format!("{q}p"), CallbackData::with_arg(NAME, "quality", q.to_string())))
            .collect();
        Keyboard::new()
            .row(buttons)
            .button("✖️ Cancel", CallbackData::new(NAME, "cancel"))
    }

    /// A fresh directory per download, so parallel requests never share files.
    fn request_dir(&self, cb: &CallbackInvocation) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp_millis();
        self.download_dir.join(format!("{}_{}_{stamp}", cb.chat_id, cb.user_id))
    }

    /// Download the selected URL and hand the file to Telegram.
    async fn fetch(&self, cb: &CallbackInvocation, kind: MediaKind, quality: u32) -> Outcome {
        let cfg = self.config.get();
        if kind == MediaKind::Video && quality > cfg.max_quality {
            return vec![Reply::alert(format!("🚫 Maximum allowed quality is {}p.", cfg.max_quality))];
        }
        let Some(url) = self.selections.take(cb.chat_id, cb.user_id) else {
            return vec![Reply::edit("⌛ URL lost, start again with /yt", None)];
        };

        info!("📺 {} requested {} {}p: {}", cb.user_id, kind.as_str(), quality, url);
        let work_dir = self.request_dir(cb);
        let path = match self.downloader.download(&url, kind, quality, &work_dir).await {
            Ok(p) => p,
            Err(DownloadError::Unavailable) => {
                discard(&work_dir).await;
                return vec![Reply::edit("❌ Downloader (yt-dlp) is not installed.", None)];
            }
            Err(e) => {
                error!("Download of {url} failed: {e}");
                discard(&work_dir).await;
                return vec![Reply::edit("❌ Download failed. Check the link and try again.", None)];
            }
        };

        let size = match tokio::fs::metadata(&path).await {
            Ok(m) => m.len(),
            Err(e) => {
                error!("Downloaded file {} vanished: {e}", path.display());
                discard(&work_dir).await;
                return vec![Reply::edit("❌ Download failed.", None)];
            }
        };
        let limit = cfg.max_file_mb * 1024 * 1024;
        if size > limit {
            discard(&work_dir).await;
            return vec![Reply::edit(
                format!(
                    "🚫 The file is {:.1} MB, the limit is {} MB. Try a lower quality or audio.",
                    size as f64 / 1_048_576.0,
                    cfg.max_file_mb
                ),
                None,
            )];
        }

        let caption = html_escape(&url);
        let media = match kind {
            MediaKind::Video => Reply::Video { path, caption, remove_after: true },
            MediaKind::Audio => Reply::Audio { path, caption, remove_after: true },
        };
        vec![Reply::edit("✅ Done, sending the file.", None), media]
    }

    fn settings_view(&self, ctx: &ModuleContext, user_id: i64) -> (String, Keyboard) {
        let prefs = store::prefs(&ctx.db, user_id).unwrap_or_else(|e| {
            error!("Failed to load youtube prefs: {e}");
            YoutubePrefs::default()
        });
        let max = self.config.get().max_quality;
        let text = format!(
            "⚙️ <b>Download settings</b>\n\nFormat: {}\nQuality: {}p\nServer maximum: {}p",
            prefs.format.as_str(),
            prefs.quality,
            max
        );
        let mark = |on: bool, label: String| if on { format!("✅ {label}") } else { label };
        let kb = Keyboard::new()
            .row(vec![
                Button::new(
                    mark(prefs.format == MediaKind::Video, "Video".into()),
                    CallbackData::with_arg(NAME, "set_format", "video"),
                ),
                Button::new(
                    mark(prefs.format == MediaKind::Audio, "Audio".into()),
                    CallbackData::with_arg(NAME, "set_format", "audio"),
                ),
            ])
            .row(
                QUALITIES
                    .iter()
                    .map(|q| {
                        Button::new(
                            mark(prefs.quality == *q, format!("{q}p")),
                            CallbackData::with_arg(NAME, "set_quality", q.to_string()),
                        )
                    })
                    .collect(),
            )
            .button("♻️ Reset", CallbackData::new(NAME, "reset"));
        (text, kb)
    }

    fn update_prefs(&self, ctx: &ModuleContext, user_id: i64, f: impl FnOnce(&mut YoutubePrefs)) -> Outcome {
        let result = store::prefs(&ctx.db, user_id).and_then(|mut prefs| {
            f(&mut prefs);
            store::save(&ctx.db, user_id, prefs)
        });
        if let Err(e) = result {
            error!("Failed to save youtube prefs: {e}");
            return vec![Reply::alert("❌ Could not save the settings.")];
        }
        let (text, kb) = self.settings_view(ctx, user_id);
        vec![Reply::notice("Saved"), Reply::edit(text, Some(kb))]
    }
}

fn is_http_url(s: &str) -> bool {
    let s = s.trim();
    (s.starts_with("http://") || s.starts_with("https://")) && !s.contains(char::is_whitespace) && s.len() > 10
}

#[async_trait]
impl Module for YoutubeModule {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn display_name(&self) -> &'static str {
        "YouTube"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::public("yt", "Download video or audio: /yt <url>"),
            CommandSpec::public("ytsettings", "Default download format and quality"),
            CommandSpec::admin("ytmax", "Set the maximum quality: /ytmax <360|720|1080>"),
        ]
    }

    fn callback_prefixes(&self) -> &'static [&'static str] {
        &[NAME]
    }

    fn init(&self, ctx: &ModuleContext) -> rusqlite::Result<()> {
        store::init_schema(&ctx.db)
    }

    fn startup_notices(&self) -> Vec<String> {
        if self.downloader.available() {
            Vec::new()
        } else {
            vec!["⚠️ YouTube: yt-dlp not found, downloads are disabled.".to_string()]
        }
    }

    async fn on_command(&self, ctx: &ModuleContext, inv: &Invocation) -> Outcome {
        let msg = &inv.msg;
        match inv.command.as_str() {
            "ytsettings" => {
                let (text, kb) = self.settings_view(ctx, msg.user_id);
                vec![Reply::with_keyboard(text, kb)]
            }
            "ytmax" => {
                let Some(q) = inv.args.as_deref().and_then(|a| a.trim().parse::<u32>().ok()) else {
                    return vec![Reply::text("Usage: /ytmax <360|720|1080>")];
                };
                if !QUALITIES.contains(&q) {
                    return vec![Reply::text("❌ Quality must be 360, 720 or 1080.")];
                }
                match self.config.update(|c| c.max_quality = q) {
                    Ok(()) => {
                        info!("📺 Max quality set to {q}p by {}", msg.user_id);
                        vec![Reply::text(format!("✅ Maximum quality is now {q}p."))]
                    }
                    Err(e) => {
                        error!("Failed to save youtube config: {e}");
                        vec![Reply::text("❌ Could not save the setting.")]
                    }
                }
            }
            _ => match inv.args.as_deref() {
                Some(url) => vec![self.offer_formats(msg, url.trim())],
                None => {
                    ctx.pending.begin(msg.chat_id, msg.user_id, "youtube", "url", Vec::new());
                    vec![Reply::text("🔗 Send me a video link, or /cancel.")]
                }
            },
        }
    }

    async fn on_input(&self, _ctx: &ModuleContext, msg: &Incoming, _pending: Pending) -> Outcome {
        vec![self.offer_formats(msg, msg.text.trim())]
    }

    async fn on_callback(&self, ctx: &ModuleContext, cb: &CallbackInvocation) -> Outcome {
        let arg = cb.data.arg();
        match cb.data.action.as_str() {
            "format" => match MediaKind::parse(arg) {
                Some(MediaKind::Audio) => self.fetch(cb, MediaKind::Audio, 0).await,
                Some(MediaKind::Video) => {
                    if self.selections.get(cb.chat_id, cb.user_id).is_none() {
                        return vec![Reply::edit("⌛ URL lost, start again with /yt", None)];
                    }
                    vec![Reply::edit("🎞️ Choose the quality:", Some(self.quality_keyboard()))]
                }
                None => vec![Reply::notice("Unknown format")],
            },
            "quality" => match arg.parse::<u32>() {
                Ok(q) => self.fetch(cb, MediaKind::Video, q).await,
                Err(_) => vec![Reply::notice("Unknown quality")],
            },
            "default" => {
                let prefs = store::prefs(&ctx.db, cb.user_id).unwrap_or_default();
                let quality = prefs.quality.min(self.config.get().max_quality);
                self.fetch(cb, prefs.format, quality).await
            }
            "cancel" => {
                self.selections.take(cb.chat_id, cb.user_id);
                vec![Reply::edit("✖️ Cancelled.", None)]
            }
            "set_format" => match MediaKind::parse(arg) {
                Some(kind) => self.update_prefs(ctx, cb.user_id, |p| p.format = kind),
                None => vec![Reply::notice("Unknown format")],
            },
            "set_quality" => match arg.parse::<u32>() {
                Ok(q) if QUALITIES.contains(&q) => self.update_prefs(ctx, cb.user_id, |p| p.quality = q),
                _ => vec![Reply::notice("Unknown quality")],
            },
            "reset" => {
                if let Err(e) = store::reset(&ctx.db, cb.user_id) {
                    error!("Failed to reset youtube prefs: {e}");
                    return vec![Reply::alert("❌ Could not reset the settings.")];
                }
                let (text, kb) = self.settings_view(ctx, cb.user_id);
                vec![Reply::notice("Settings reset"), Reply::edit(text, Some(kb))]
            }
            other => {
                warn!("Unknown youtube action {other}");
                vec![Reply::notice("Unknown action")]
            }
        }
    }
}

async fn discard(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to delete {}: {e}", dir.display());
    }
}
