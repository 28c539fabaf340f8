//! Command router: the seam between Telegram updates and feature modules.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::callback::CallbackData;
use super::context::{Incoming, ModuleContext};
use super::pending::Pending;
use super::reply::{Outcome, Reply, html_escape};

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub command: &'static str,
    pub description: &'static str,
    pub admin_only: bool,
}

impl CommandSpec {
    pub const fn public(command: &'static str, description: &'static str) -> Self {
        Self { command, description, admin_only: false }
    }

    pub const fn admin(command: &'static str, description: &'static str) -> Self {
        Self { command, description, admin_only: true }
    }
}

/// A parsed `/command args` message.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: String,
    pub args: Option<String>,
    pub msg: Incoming,
}

impl Invocation {
    /// Split `/cmd@bot rest` into command and trimmed arguments.
    pub fn parse(msg: Incoming) -> Option<Self> {
        let text = msg.text.trim_start();
        let body = text.strip_prefix('/')?;
        let (head, rest) = match body.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (body, ""),
        };
        let command = head.split('@').next().unwrap_or_default().to_lowercase();
        if command.is_empty() {
            return None;
        }
        let args = if rest.is_empty() { None } else { Some(rest.to_string()) };
        Some(Self { command, args, msg })
    }
}

/// A pressed inline button.
#[derive(Debug, Clone)]
pub struct CallbackInvocation {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub data: CallbackData,
}

#[async_trait]
pub trait Module: Send + Sync {
    /// Stable identifier, used for switches, pending input and config files.
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn commands(&self) -> Vec<CommandSpec>;

    /// Callback prefixes routed to this module.
    fn callback_prefixes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Callbacks of this module are restricted to admins.
    fn admin_only(&self) -> bool {
        false
    }

    /// Create tables. Must be idempotent.
    fn init(&self, _ctx: &ModuleContext) -> rusqlite::Result<()> {
        Ok(())
    }

    /// Messages for admins after startup (missing tools and such).
    fn startup_notices(&self) -> Vec<String> {
        Vec::new()
    }

    async fn on_command(&self, ctx: &ModuleContext, inv: &Invocation) -> Outcome;

    async fn on_input(&self, _ctx: &ModuleContext, _msg: &Incoming, _pending: Pending) -> Outcome {
        Vec::new()
    }

    async fn on_callback(&self, _ctx: &ModuleContext, _cb: &CallbackInvocation) -> Outcome {
        Vec::new()
    }

    /// Free text that is neither a command nor awaited input.
    async fn on_text(&self, _ctx: &ModuleContext, _msg: &Incoming) -> Option<Outcome> {
        None
    }

    fn spawn_background(self: Arc<Self>, _ctx: Arc<ModuleContext>) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

/// Name, title and commands of a registered module.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub commands: Vec<CommandSpec>,
}

pub struct Router {
    ctx: Arc<ModuleContext>,
    modules: Vec<Arc<dyn Module>>,
}

impl Router {
    pub fn new(ctx: Arc<ModuleContext>) -> Self {
        Self { ctx, modules: Vec::new() }
    }

    pub fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    /// Initialize the module's storage and add it to the dispatch table.
    pub fn register(&mut self, module: Arc<dyn Module>) -> rusqlite::Result<()> {
        module.init(&self.ctx)?;
        self.ctx.register_info(ModuleInfo {
            name: module.name(),
            display_name: module.display_name(),
            commands: module.commands(),
        });
        info!("📦 Registered module {}", module.name());
        self.modules.push(module);
        Ok(())
    }

    /// Commands visible in the Telegram menu.
    pub fn public_commands(&self) -> Vec<CommandSpec> {
        let mut cmds = vec![CommandSpec::public("cancel", "Cancel the current action")];
        for m in &self.modules {
            cmds.extend(m.commands().into_iter().filter(|c| !c.admin_only));
        }
        cmds
    }

    pub fn startup_notices(&self) -> Vec<String> {
        self.modules.iter().flat_map(|m| m.startup_notices()).collect()
    }

    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        self.modules
            .iter()
            .flat_map(|m| m.clone().spawn_background(self.ctx.clone()))
            .collect()
    }

    fn module(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    fn disabled_reply(&self, module: &dyn Module) -> Option<Reply> {
        if self.ctx.switches.is_enabled(module.name()) {
            None
        } else {
            Some(Reply::text(format!("⛔ {} is disabled.", html_escape(module.display_name()))))
        }
    }

    pub async fn handle_message(&self, msg: Incoming) -> Outcome {
        self.ctx.count_update();
        let ctx = &*self.ctx;

        if let Some(inv) = Invocation::parse(msg.clone()) {
            return self.dispatch_command(inv).await;
        }

        if let Some(pending) = ctx.pending.take(msg.chat_id, msg.user_id) {
            let Some(module) = self.module(pending.module) else {
                warn!("Pending input for unknown module {}", pending.module);
                return Vec::new();
            };
            if let Some(reply) = self.disabled_reply(module.as_ref()) {
                return vec![reply];
            }
            info!("✏️ Input for {}/{} from {}", module.name(), pending.step, msg.user_id);
            if let Err(e) = ctx.db.record_usage(module.name(), &pending.step) {
                warn!("Failed to record usage: {e}");
            }
            return module.on_input(ctx, &msg, pending).await;
        }

        for module in &self.modules {
            if !ctx.switches.is_enabled(module.name()) {
                continue;
            }
            if let Some(outcome) = module.on_text(ctx, &msg).await {
                if let Err(e) = ctx.db.record_usage(module.name(), "text") {
                    warn!("Failed to record usage: {e}");
                }
                return outcome;
            }
        }
        Vec::new()
    }

    async fn dispatch_command(&self, inv: Invocation) -> Outcome {
        let ctx = &*self.ctx;
        let (chat_id, user_id) = (inv.msg.chat_id, inv.msg.user_id);

        if inv.command == "cancel" {
            let text = if ctx.pending.cancel(chat_id, user_id) {
                "✅ Action cancelled."
            } else {
                "Nothing to cancel."
            };
            return vec![Reply::text(text)];
        }

        let found = self.modules.iter().find_map(|m| {
            m.commands()
                .into_iter()
                .find(|c| c.command == inv.command)
                .map(|spec| (m, spec))
        });
        let Some((module, spec)) = found else {
            return Vec::new();
        };

        if let Some(reply) = self.disabled_reply(module.as_ref()) {
            return vec![reply];
        }
        if spec.admin_only && !ctx.is_admin(user_id) {
            warn!("🚫 /{} denied for {} ({})", inv.command, inv.msg.username, user_id);
            return vec![Reply::text("🚫 You don't have access to this command.")];
        }

        // A new command abandons whatever dialog was in progress.
        ctx.pending.cancel(chat_id, user_id);

        info!("📨 /{} from {} ({})", inv.command, inv.msg.username, user_id);
        if let Err(e) = ctx.db.record_usage(module.name(), &inv.command) {
            warn!("Failed to record usage: {e}");
        }
        module.on_command(ctx, &inv).await
    }

    pub async fn handle_callback(&self, chat_id: i64, user_id: i64, username: &str, raw: &str) -> Outcome {
        self.ctx.count_update();
        let ctx = &*self.ctx;

        let data = match CallbackData::decode(raw) {
            Ok(d) => d,
            Err(e) => {
                warn!("Bad callback payload {:?}: {e}", raw);
                return vec![Reply::notice("⚠️ This button is no longer valid.")];
            }
        };
        let Some(module) = self.modules.iter().find(|m| m.callback_prefixes().contains(&data.prefix.as_str())) else {
            return vec![Reply::notice("⚠️ This button is no longer valid.")];
        };
        if !ctx.switches.is_enabled(module.name()) {
            return vec![Reply::alert(format!("⛔ {} is disabled.", module.display_name()))];
        }
        if module.admin_only() && !ctx.is_admin(user_id) {
            return vec![Reply::alert("🚫 Admins only.")];
        }

        if let Err(e) = ctx.db.record_usage(module.name(), &data.action) {
            warn!("Failed to record usage: {e}");
        }
        let cb = CallbackInvocation {
            chat_id,
            user_id,
            username: username.to_string(),
            data,
        };
        module.on_callback(ctx, &cb).await
    }

    /// A photo, sticker or voice message. Only answered while input is awaited.
    pub fn handle_non_text(&self, chat_id: i64, user_id: i64) -> Outcome {
        self.ctx.count_update();
        match self.ctx.pending.peek(chat_id, user_id) {
            Some(_) => vec![Reply::text("✏️ Please send text, or /cancel.")],
            None => Vec::new(),
        }
    }
}
