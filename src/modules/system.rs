//! Greeting, help and the module switchboard.

use async_trait::async_trait;
use tracing::{error, info};

use crate::kernel::{
    CallbackData, CallbackInvocation, CommandSpec, Invocation, Keyboard, Module, ModuleContext, Outcome, Reply,
    html_escape,
};

const NAME: &str = "sys";

pub struct SystemModule;

/// Commands the user may run, grouped by module.
pub fn help_text(ctx: &ModuleContext, user_id: i64) -> String {
    let admin = ctx.is_admin(user_id);
    let mut text = String::from("📖 <b>Commands</b>\n");
    for info in ctx.catalog() {
        if !ctx.switches.is_enabled(info.name) {
            continue;
        }
        let visible: Vec<&CommandSpec> = info.commands.iter().filter(|c| admin || !c.admin_only).collect();
        if visible.is_empty() {
            continue;
        }
        text.push_str(&format!("\n<b>{}</b>\n", html_escape(info.display_name)));
        for c in visible {
            let lock = if c.admin_only { " 🔒" } else { "" };
            text.push_str(&format!("/{} {}{lock}\n", c.command, html_escape(c.description)));
        }
    }
    text.push_str("\n/cancel Cancel the current action\n");
    text
}

fn sysconf_view(ctx: &ModuleContext) -> (String, Keyboard) {
    let mut text = String::from("🛠 <b>Modules</b>\n\n");
    let mut kb = Keyboard::new();
    for info in ctx.catalog().into_iter().filter(|i| i.name != "system") {
        let enabled = ctx.switches.is_enabled(info.name);
        let mark = if enabled { "✅" } else { "⛔" };
        text.push_str(&format!("{mark} {}\n", html_escape(info.display_name)));
        kb = kb.button(
            format!("{mark} {}", info.display_name),
            CallbackData::with_arg(NAME, "toggle", info.name),
        );
    }
    (text, kb)
}

#[async_trait]
impl Module for SystemModule {
    fn name(&self) -> &'static str {
        "system"
    }

    fn display_name(&self) -> &'static str {
        "General"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::public("start", "Start the bot"),
            CommandSpec::public("help", "List commands"),
            CommandSpec::admin("sysconf", "Enable or disable modules"),
        ]
    }

    fn callback_prefixes(&self) -> &'static [&'static str] {
        &[NAME]
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn on_command(&self, ctx: &ModuleContext, inv: &Invocation) -> Outcome {
        let msg = &inv.msg;
        match inv.command.as_str() {
            "start" => vec![Reply::text(format!(
                "👋 Hi, {}! I am a modular assistant bot.\nSend /help to see what I can do.",
                html_escape(&msg.username)
            ))],
            "sysconf" => {
                let (text, kb) = sysconf_view(ctx);
                vec![Reply::with_keyboard(text, kb)]
            }
            _ => vec![Reply::text(help_text(ctx, msg.user_id))],
        }
    }

    async fn on_callback(&self, ctx: &ModuleContext, cb: &CallbackInvocation) -> Outcome {
        if cb.data.action != "toggle" {
            return vec![Reply::notice("Unknown action")];
        }
        let module = cb.data.arg();
        if module == "system" || !ctx.catalog().iter().any(|i| i.name == module) {
            return vec![Reply::notice("Unknown module")];
        }
        match ctx.switches.toggle(module) {
            Ok(enabled) => {
                info!("🛠 {module} {} by {}", if enabled { "enabled" } else { "disabled" }, cb.user_id);
                let (text, kb) = sysconf_view(ctx);
                vec![
                    Reply::notice(format!("{module}: {}", if enabled { "on" } else { "off" })),
                    Reply::edit(text, Some(kb)),
                ]
            }
            Err(e) => {
                error!("Failed to save module switches: {e}");
                vec![Reply::alert("❌ Could not save the setting.")]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Database, Incoming, Router};
    use crate::modules::news::NewsModule;
    use std::sync::Arc;
    use std::time::Duration;

    fn router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ModuleContext::new(Database::in_memory().unwrap(), [1], dir.path(), Duration::from_secs(60)));
        let mut router = Router::new(ctx.clone());
        router.register(Arc::new(SystemModule)).unwrap();
        router.register(Arc::new(NewsModule::new(&ctx))).unwrap();
        (router, dir)
    }

    #[tokio::test]
    async fn test_help_hides_admin_commands() {
        let (router, _dir) = router();
        let user = router.handle_message(Incoming::private(5, "/help")).await;
        assert!(user[0].body().contains("/news"));
        assert!(!user[0].body().contains("/sysconf"));
        let admin = router.handle_message(Incoming::private(1, "/help")).await;
        assert!(admin[0].body().contains("/sysconf"));
    }

    #[tokio::test]
    async fn test_toggle_module() {
        let (router, _dir) = router();
        let out = router.handle_callback(1, 1, "admin", "sys:toggle:news").await;
        assert_eq!(out[0], Reply::notice("news: off"));
        let out = router.handle_message(Incoming::private(5, "/news")).await;
        assert!(out[0].body().contains("disabled"));
        // hidden from help while disabled
        let help = router.handle_message(Incoming::private(5, "/help")).await;
        assert!(!help[0].body().contains("/news"));

        let denied = router.handle_callback(5, 5, "user", "sys:toggle:news").await;
        assert!(denied[0].body().contains("Admins only"));
        let out = router.handle_callback(1, 1, "admin", "sys:toggle:system").await;
        assert_eq!(out, vec![Reply::notice("Unknown module")]);
    }
}
