//! Host and bot diagnostics for admins.

pub mod metrics;
pub mod updates;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::kernel::context::format_uptime;
use crate::kernel::{
    Button, CallbackData, CallbackInvocation, CommandSpec, Invocation, Keyboard, Module, ModuleContext, Outcome,
    Reply, html_escape,
};

const NAME: &str = "info";
const IPIFY_URL: &str = "https://api.ipify.org";
const REFRESH_EVERY: Duration = Duration::from_secs(60);
const LOG_LINES: usize = 20;

/// Sections served from the metrics cache.
const CACHED: [&str; 6] = ["cpu", "memory", "disk", "system", "network", "temperature"];

pub struct InfoSystemModule {
    ip_url: String,
    metrics: RwLock<HashMap<&'static str, String>>,
    log_tail: RwLock<Vec<String>>,
}

impl InfoSystemModule {
    pub fn new() -> Self {
        Self::with_ip_url(IPIFY_URL)
    }

    pub fn with_ip_url(ip_url: &str) -> Self {
        Self {
            ip_url: ip_url.to_string(),
            metrics: RwLock::new(HashMap::new()),
            log_tail: RwLock::new(Vec::new()),
        }
    }

    async fn collect(&self, ctx: &ModuleContext, section: &'static str) -> String {
        match section {
            "cpu" => metrics::cpu_report().await,
            "memory" => metrics::memory_report().await,
            "disk" => metrics::disk_report().await,
            "system" => metrics::system_report().await,
            "network" => metrics::network_report(&ctx.http, &self.ip_url).await,
            _ => metrics::temperature_report().await,
        }
    }

    /// Recompute every cached section.
    pub async fn refresh_metrics(&self, ctx: &ModuleContext) {
        let mut fresh = HashMap::new();
        for section in CACHED {
            fresh.insert(section, self.collect(ctx, section).await);
        }
        *self.metrics.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        debug!("Metrics cache refreshed");
    }

    pub async fn refresh_logs(&self, ctx: &ModuleContext) {
        let lines = metrics::tail(&ctx.log_file, LOG_LINES).await.unwrap_or_default();
        *self.log_tail.write().unwrap_or_else(|e| e.into_inner()) = lines;
    }

    async fn section(&self, ctx: &ModuleContext, section: &'static str) -> String {
        let cached = self.metrics.read().unwrap_or_else(|e| e.into_inner()).get(section).cloned();
        match cached {
            Some(text) => text,
            None => self.collect(ctx, section).await,
        }
    }

    fn logs_view(&self) -> String {
        let lines = self.log_tail.read().unwrap_or_else(|e| e.into_inner()).clone();
        if lines.is_empty() {
            return "📜 <b>Logs</b>\nNo log lines yet.".to_string();
        }
        format!("📜 <b>Last {} log lines</b>\n<pre>{}</pre>", lines.len(), html_escape(&lines.join("\n")))
    }
}

impl Default for InfoSystemModule {
    fn default() -> Self {
        Self::new()
    }
}

pub fn bot_stats(ctx: &ModuleContext) -> String {
    let mut text = format!(
        "🤖 <b>Bot statistics</b>\nUptime: {}\nHandled updates: {}\nModules: {}",
        format_uptime(ctx.uptime()),
        ctx.handled_updates(),
        ctx.catalog().len()
    );
    match ctx.db.usage_top(10) {
        Ok(top) if !top.is_empty() => {
            text.push_str("\n\n<b>Most used</b>");
            for (module, action, uses) in top {
                text.push_str(&format!("\n• {module}/{}: {uses}", html_escape(&action)));
            }
        }
        Ok(_) => {}
        Err(e) => error!("Failed to load usage stats: {e}"),
    }
    text
}

fn menu_keyboard() -> Keyboard {
    let b = |label: &str, action: &str| Button::new(label, CallbackData::new(NAME, action));
    Keyboard::new()
        .row(vec![b("🖥 CPU", "cpu"), b("🧠 Memory", "memory"), b("💽 Disk", "disk")])
        .row(vec![b("⚙️ System", "system"), b("🌐 Network", "network"), b("🌡 Temp", "temperature")])
        .row(vec![b("📦 Updates", "updates"), b("🤖 Bot", "botstats"), b("📜 Logs", "logs")])
        .button("🔄 Refresh", CallbackData::new(NAME, "refresh"))
}

fn back_keyboard() -> Keyboard {
    Keyboard::new().button("⬅️ Back", CallbackData::new(NAME, "menu"))
}

const MENU_TEXT: &str = "ℹ️ <b>System information</b>\nChoose a section:";

#[async_trait]
impl Module for InfoSystemModule {
    fn name(&self) -> &'static str {
        "infosystem"
    }

    fn display_name(&self) -> &'static str {
        "System info"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::admin("info", "Host information"),
            CommandSpec::admin("botstats", "Bot statistics"),
        ]
    }

    fn callback_prefixes(&self) -> &'static [&'static str] {
        &[NAME]
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn on_command(&self, ctx: &ModuleContext, inv: &Invocation) -> Outcome {
        match inv.command.as_str() {
            "botstats" => vec![Reply::text(bot_stats(ctx))],
            _ => vec![Reply::with_keyboard(MENU_TEXT, menu_keyboard())],
        }
    }

    async fn on_callback(&self, ctx: &ModuleContext, cb: &CallbackInvocation) -> Outcome {
        let text = match cb.data.action.as_str() {
            "menu" => return vec![Reply::edit(MENU_TEXT, Some(menu_keyboard()))],
            "refresh" => {
                self.refresh_metrics(ctx).await;
                self.refresh_logs(ctx).await;
                return vec![Reply::notice("🔄 Refreshed"), Reply::edit(MENU_TEXT, Some(menu_keyboard()))];
            }
            "updates" => updates::check().await,
            "botstats" => bot_stats(ctx),
            "logs" => self.logs_view(),
            action => match CACHED.iter().find(|s| **s == action) {
                Some(section) => self.section(ctx, *section).await,
                None => return vec![Reply::notice("Unknown section")],
            },
        };
        vec![Reply::edit(text, Some(back_keyboard()))]
    }

    fn spawn_background(self: Arc<Self>, ctx: Arc<ModuleContext>) -> Vec<JoinHandle<()>> {
        let metrics = {
            let (module, ctx) = (self.clone(), ctx.clone());
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(REFRESH_EVERY);
                loop {
                    tick.tick().await;
                    module.refresh_metrics(&ctx).await;
                }
            })
        };
        let logs = tokio::spawn(async move {
            let mut tick = tokio::time::interval(REFRESH_EVERY);
            loop {
                tick.tick().await;
                self.refresh_logs(&ctx).await;
            }
        });
        info!("ℹ️ Metrics and log refresh loops started");
        vec![metrics, logs]
    }
}
