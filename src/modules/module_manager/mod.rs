//! Plugin repositories, installation and maintenance for admins.

pub mod installer;
pub mod repos;

use async_trait::async_trait;
use tracing::{error, info};

use crate::kernel::{
    Button, CallbackData, CallbackInvocation, CommandSpec, Incoming, Invocation, Keyboard, Module, ModuleContext,
    Outcome, Pending, Reply, html_escape,
};
use installer::{InstallError, Installer};
use repos::{AvailableModule, RepoError, RepoStore};

const NAME: &str = "module_manager";
const REPO: &str = "repo";
const MODULE: &str = "module";

pub struct ModuleManager {
    repos: RepoStore,
    installer: Installer,
}

impl ModuleManager {
    pub fn new(ctx: &ModuleContext) -> Self {
        Self {
            repos: RepoStore::load(ctx.data_dir.join("repositories.json")),
            installer: Installer::new(&ctx.plugins_dir, ctx.http.clone()),
        }
    }

    fn repo_list_view(&self) -> (String, Keyboard) {
        let list = self.repos.list();
        let mut text = String::from("📚 <b>Repositories</b>\n\n");
        if list.is_empty() {
            text.push_str("No repositories yet. Add one to browse modules.");
        }
        let mut kb = Keyboard::new();
        for (i, repo) in list.iter().enumerate() {
            let mark = if repo.enabled { "✅" } else { "⏸" };
            text.push_str(&format!(
                "{}. {mark} <b>{}</b>\n   {}\n",
                i + 1,
                html_escape(&repo.name),
                html_escape(&repo.url)
            ));
            kb = kb.row(vec![
                Button::new(
                    format!("{} {}", if repo.enabled { "⏸" } else { "▶️" }, i + 1),
                    CallbackData::with_arg(REPO, "toggle", i.to_string()),
                ),
                Button::new(format!("🗑 {}", i + 1), CallbackData::with_arg(REPO, "delete", i.to_string())),
            ]);
        }
        kb = kb
            .row(vec![
                Button::new("➕ Add", CallbackData::new(REPO, "add")),
                Button::new("🔄 Refresh", CallbackData::new(REPO, "refresh")),
            ])
            .button("📦 Available modules", CallbackData::new(MODULE, "available"));
        (text, kb)
    }

    async fn available_view(&self, ctx: &ModuleContext) -> (String, Keyboard) {
        let modules = repos::available(&ctx.http, &self.repos).await;
        let installed = self.installer.installed();
        let mut text = String::from("📦 <b>Available modules</b>\n\n");
        if modules.is_empty() {
            text.push_str("Nothing found. Make sure at least one repository is added and enabled.");
        }
        for (i, m) in modules.iter().enumerate() {
            let mark = if installed.iter().any(|x| x.manifest.name == m.name) { " ✅" } else { "" };
            text.push_str(&format!(
                "{}. <b>{}</b> v{}{mark}\n   {}\n",
                i + 1,
                html_escape(&m.name),
                html_escape(&m.version),
                html_escape(&m.description)
            ));
            if let Some(author) = &m.author {
                text.push_str(&format!("   Author: {}\n", html_escape(author)));
            }
            text.push_str(&format!("   Repository: {}\n", html_escape(&m.repository_name)));
        }
        let kb = Keyboard::new()
            .row(vec![
                Button::new("💾 Install", CallbackData::new(MODULE, "pick")),
                Button::new("📦 Installed", CallbackData::new(MODULE, "installed")),
            ])
            .row(vec![
                Button::new("⬆️ Update all", CallbackData::new(MODULE, "update_all")),
                Button::new("📚 Repositories", CallbackData::new(REPO, "list")),
            ]);
        (text, kb)
    }

    async fn pick_view(&self, ctx: &ModuleContext) -> (String, Keyboard) {
        let installed = self.installer.installed();
        let candidates: Vec<AvailableModule> = repos::available(&ctx.http, &self.repos)
            .await
            .into_iter()
            .filter(|m| !installed.iter().any(|x| x.manifest.name == m.name))
            .filter(|m| installer::is_valid_name(&m.name))
            .collect();
        let mut kb = Keyboard::new();
        for m in &candidates {
            kb = kb.button(
                format!("{} v{}", m.name, m.version),
                CallbackData::with_arg(MODULE, "install", m.name.clone()),
            );
        }
        kb = kb.button("⬅️ Back", CallbackData::new(MODULE, "available"));
        let text = if candidates.is_empty() {
            "💾 Every available module is already installed."
        } else {
            "💾 <b>Install a module</b>\nChoose one:"
        };
        (text.to_string(), kb)
    }

    fn installed_view(&self) -> (String, Keyboard) {
        let installed = self.installer.installed();
        let mut text = String::from("📦 <b>Installed modules</b>\n\n");
        if installed.is_empty() {
            text.push_str("No plugins installed.");
        }
        let mut kb = Keyboard::new();
        for m in &installed {
            let mark = if m.manifest.enabled { "✅" } else { "⏸" };
            text.push_str(&format!(
                "{mark} <b>{}</b> v{}\n",
                html_escape(&m.manifest.name),
                html_escape(&m.manifest.version)
            ));
            if installer::is_valid_name(&m.manifest.name) {
                kb = kb.button(
                    format!("{mark} {}", m.manifest.name),
                    CallbackData::with_arg(MODULE, "details", m.manifest.name.clone()),
                );
            }
        }
        kb = kb.button("⬅️ Back", CallbackData::new(MODULE, "available"));
        (text, kb)
    }

    async fn details_view(&self, ctx: &ModuleContext, name: &str) -> Reply {
        let installed = match self.installer.get(name) {
            Ok(m) => m,
            Err(e) => return Reply::edit(format!("❌ {}", html_escape(&e.to_string())), Some(back_to_installed())),
        };
        let m = &installed.manifest;
        let latest = self.find_available(ctx, name).await;
        let mut text = format!(
            "📦 <b>{}</b> v{}\n{}\n\nStatus: {}\nEntry: {}\nPath: {}",
            html_escape(&m.name),
            html_escape(&m.version),
            html_escape(&m.description),
            if m.enabled { "enabled" } else { "disabled" },
            html_escape(&m.entry),
            html_escape(&installed.path.display().to_string())
        );
        if let Some(author) = &m.author {
            text.push_str(&format!("\nAuthor: {}", html_escape(author)));
        }
        let mut kb = Keyboard::new().row(vec![
            Button::new(
                if m.enabled { "⏸ Disable" } else { "▶️ Enable" },
                CallbackData::with_arg(MODULE, "toggle", name),
            ),
            Button::new("⚙️ Settings", CallbackData::with_arg(MODULE, "settings", name)),
        ]);
        if let Some(latest) = latest.filter(|l| l.version != m.version) {
            text.push_str(&format!("\n\n⬆️ Version {} is available.", html_escape(&latest.version)));
            kb = kb.button("⬆️ Update", CallbackData::with_arg(MODULE, "update", name));
        }
        kb = kb
            .button("🗑 Delete", CallbackData::with_arg(MODULE, "confirm_delete", name))
            .button("⬅️ Back", CallbackData::new(MODULE, "installed"));
        Reply::edit(text, Some(kb))
    }

    async fn find_available(&self, ctx: &ModuleContext, name: &str) -> Option<AvailableModule> {
        repos::available(&ctx.http, &self.repos)
            .await
            .into_iter()
            .find(|m| m.name == name)
    }

    /// Install by name from the enabled repositories.
    pub async fn install(&self, ctx: &ModuleContext, name: &str) -> String {
        let Some(module) = self.find_available(ctx, name).await else {
            return format!(
                "⚠️ Module <b>{}</b> was not found in the enabled repositories. See /modules.",
                html_escape(name)
            );
        };
        match self.installer.install(&module).await {
            Ok(manifest) => format!(
                "✅ Module <b>{}</b> v{} installed.\n{}",
                html_escape(&manifest.name),
                html_escape(&manifest.version),
                html_escape(&manifest.description)
            ),
            Err(e) => format!("❌ Could not install <b>{}</b>: {}", html_escape(name), html_escape(&e.to_string())),
        }
    }

    async fn update_one(&self, ctx: &ModuleContext, name: &str) -> Result<String, InstallError> {
        let module = self
            .find_available(ctx, name)
            .await
            .ok_or_else(|| InstallError::SourceMissing(format!("{name} in enabled repositories")))?;
        let manifest = self.installer.update(&module).await?;
        Ok(manifest.version)
    }

    async fn update_all(&self, ctx: &ModuleContext) -> String {
        let available = repos::available(&ctx.http, &self.repos).await;
        let (mut updated, mut failed) = (Vec::new(), Vec::new());
        for installed in self.installer.installed() {
            let Some(module) = available.iter().find(|m| m.name == installed.manifest.name) else {
                continue;
            };
            if module.version == installed.manifest.version {
                continue;
            }
            match self.installer.update(module).await {
                Ok(m) => updated.push(format!("{} → {}", m.name, m.version)),
                Err(e) => failed.push(format!("{}: {e}", module.name)),
            }
        }
        if updated.is_empty() && failed.is_empty() {
            return "✅ All installed modules are up to date.".to_string();
        }
        let mut text = String::from("⬆️ <b>Update results</b>\n");
        for line in &updated {
            text.push_str(&format!("✅ {}\n", html_escape(line)));
        }
        for line in &failed {
            text.push_str(&format!("❌ {}\n", html_escape(line)));
        }
        text
    }

    async fn on_repo_callback(&self, ctx: &ModuleContext, cb: &CallbackInvocation) -> Outcome {
        let index = cb.data.arg().parse::<usize>().ok();
        match (cb.data.action.as_str(), index) {
            ("list", _) => {
                let (text, kb) = self.repo_list_view();
                vec![Reply::edit(text, Some(kb))]
            }
            ("add", _) => {
                ctx.pending.begin(cb.chat_id, cb.user_id, NAME, "repo_name", Vec::new());
                vec![Reply::edit("📚 Send a name for the new repository, or /cancel.", None)]
            }
            ("refresh", _) => {
                let found = repos::available(&ctx.http, &self.repos).await.len();
                let (text, kb) = self.repo_list_view();
                vec![Reply::notice(format!("Found {found} module(s)")), Reply::edit(text, Some(kb))]
            }
            ("toggle", Some(i)) => {
                let notice = match self.repos.toggle(i) {
                    Ok(true) => Reply::notice("Repository enabled"),
                    Ok(false) => Reply::notice("Repository disabled"),
                    Err(e) => repo_error_notice(e),
                };
                let (text, kb) = self.repo_list_view();
                vec![notice, Reply::edit(text, Some(kb))]
            }
            ("delete", Some(i)) => {
                let notice = match self.repos.delete(i) {
                    Ok(repo) => Reply::notice(format!("🗑 {} removed", repo.name)),
                    Err(e) => repo_error_notice(e),
                };
                let (text, kb) = self.repo_list_view();
                vec![notice, Reply::edit(text, Some(kb))]
            }
            _ => vec![Reply::notice("Unknown action")],
        }
    }

    async fn on_module_callback(&self, ctx: &ModuleContext, cb: &CallbackInvocation) -> Outcome {
        let name = cb.data.arg();
        match cb.data.action.as_str() {
            "available" => {
                let (text, kb) = self.available_view(ctx).await;
                vec![Reply::edit(text, Some(kb))]
            }
            "installed" => {
                let (text, kb) = self.installed_view();
                vec![Reply::edit(text, Some(kb))]
            }
            "pick" => {
                let (text, kb) = self.pick_view(ctx).await;
                vec![Reply::edit(text, Some(kb))]
            }
            "install" => {
                let text = self.install(ctx, name).await;
                vec![Reply::edit(text, Some(back_to_installed()))]
            }
            "details" => vec![self.details_view(ctx, name).await],
            "toggle" => match self.installer.toggle(name) {
                Ok(enabled) => vec![
                    Reply::notice(if enabled { "Enabled" } else { "Disabled" }),
                    self.details_view(ctx, name).await,
                ],
                Err(e) => vec![Reply::alert(format!("❌ {e}"))],
            },
            "settings" => {
                let text = match self.installer.settings(name) {
                    Ok(Some(value)) => format!(
                        "⚙️ <b>{}</b> settings\n<pre>{}</pre>",
                        html_escape(name),
                        html_escape(&serde_json::to_string_pretty(&value).unwrap_or_default())
                    ),
                    Ok(None) => format!("⚙️ <b>{}</b> has no settings.", html_escape(name)),
                    Err(e) => format!("❌ {}", html_escape(&e.to_string())),
                };
                let kb = Keyboard::new().button("⬅️ Back", CallbackData::with_arg(MODULE, "details", name));
                vec![Reply::edit(text, Some(kb))]
            }
            "confirm_delete" => {
                let kb = Keyboard::new().row(vec![
                    Button::new("🗑 Yes, delete", CallbackData::with_arg(MODULE, "delete", name)),
                    Button::new("✖️ No", CallbackData::with_arg(MODULE, "details", name)),
                ]);
                vec![Reply::edit(format!("Delete module <b>{}</b>?", html_escape(name)), Some(kb))]
            }
            "delete" => match self.installer.uninstall(name) {
                Ok(()) => {
                    info!("🗑️ Plugin {name} deleted by {}", cb.user_id);
                    let (text, kb) = self.installed_view();
                    vec![Reply::notice(format!("{name} deleted")), Reply::edit(text, Some(kb))]
                }
                Err(e) => {
                    error!("Failed to delete plugin {name}: {e}");
                    vec![Reply::alert(format!("❌ {e}"))]
                }
            },
            "update" => match self.update_one(ctx, name).await {
                Ok(version) => vec![
                    Reply::notice(format!("Updated to {version}")),
                    self.details_view(ctx, name).await,
                ],
                Err(e) => vec![Reply::alert(format!("❌ {e}"))],
            },
            "update_all" => {
                let text = self.update_all(ctx).await;
                vec![Reply::edit(text, Some(back_to_installed()))]
            }
            _ => vec![Reply::notice("Unknown action")],
        }
    }
}

fn back_to_installed() -> Keyboard {
    Keyboard::new().button("📦 Installed modules", CallbackData::new(MODULE, "installed"))
}

fn repo_error_notice(e: RepoError) -> Reply {
    match e {
        RepoError::Save(e) => {
            error!("Failed to save repositories: {e}");
            Reply::alert("❌ Could not save the repositories.")
        }
        other => Reply::alert(format!("❌ {other}")),
    }
}

#[async_trait]
impl Module for ModuleManager {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Module manager"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::admin("repos", "Manage plugin repositories"),
            CommandSpec::admin("modules", "Browse available plugins"),
            CommandSpec::admin("install", "Install a plugin: /install <name>"),
        ]
    }

    fn callback_prefixes(&self) -> &'static [&'static str] {
        &[REPO, MODULE]
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn on_command(&self, ctx: &ModuleContext, inv: &Invocation) -> Outcome {
        let msg = &inv.msg;
        match inv.command.as_str() {
            "repos" => {
                let (text, kb) = self.repo_list_view();
                vec![Reply::with_keyboard(text, kb)]
            }
            "modules" => {
                let (text, kb) = self.available_view(ctx).await;
                vec![Reply::with_keyboard(text, kb)]
            }
            _ => match inv.args.as_deref() {
                Some(name) => vec![Reply::text(self.install(ctx, name.trim()).await)],
                None => {
                    ctx.pending.begin(msg.chat_id, msg.user_id, NAME, "module_name", Vec::new());
                    vec![Reply::text("💾 Send the name of the module to install, or /cancel.")]
                }
            },
        }
    }

    async fn on_input(&self, ctx: &ModuleContext, msg: &Incoming, pending: Pending) -> Outcome {
        let input = msg.text.trim();
        match pending.step.as_str() {
            "module_name" => vec![Reply::text(self.install(ctx, input).await)],
            "repo_name" => {
                if input.is_empty() || input.chars().count() > 50 {
                    ctx.pending.begin(msg.chat_id, msg.user_id, NAME, "repo_name", Vec::new());
                    return vec![Reply::text("❌ The name must be 1 to 50 characters. Try again.")];
                }
                ctx.pending.begin(msg.chat_id, msg.user_id, NAME, "repo_url", vec![input.to_string()]);
                vec![Reply::text(
                    "🔗 Now send the repository URL (http://, https:// or file://).",
                )]
            }
            "repo_url" => {
                let name = pending.first().unwrap_or("repository").to_string();
                match self.repos.add(&name, input) {
                    Ok(repo) => {
                        let (text, kb) = self.repo_list_view();
                        vec![
                            Reply::text(format!("✅ Repository <b>{}</b> added.", html_escape(&repo.name))),
                            Reply::with_keyboard(text, kb),
                        ]
                    }
                    Err(RepoError::InvalidUrl(_)) => {
                        ctx.pending.begin(msg.chat_id, msg.user_id, NAME, "repo_url", pending.data.clone());
                        vec![Reply::text(
                            "❌ The URL must start with http://, https:// or file://. Send it again, or /cancel.",
                        )]
                    }
                    Err(RepoError::Duplicate(_)) => vec![Reply::text("⚠️ This repository is already added.")],
                    Err(e) => {
                        error!("Failed to add repository: {e}");
                        vec![Reply::text("❌ Could not save the repository.")]
                    }
                }
            }
            _ => Vec::new(),
        }
    }

    async fn on_callback(&self, ctx: &ModuleContext, cb: &CallbackInvocation) -> Outcome {
        match cb.data.prefix.as_str() {
            REPO => self.on_repo_callback(ctx, cb).await,
            _ => self.on_module_callback(ctx, cb).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Database;
    use std::time::Duration;

    fn setup() -> (ModuleContext, ModuleManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ModuleContext::new(Database::in_memory().unwrap(), [1], dir.path(), Duration::from_secs(60));
        let m = ModuleManager::new(&ctx);
        (ctx, m, dir)
    }

    #[tokio::test]
    async fn test_add_repository_dialog() {
        let (ctx, m, _dir) = setup();
        let cb = CallbackInvocation { chat_id: 1, user_id: 1, username: "a".into(), data: CallbackData::new(REPO, "add") };
        m.on_callback(&ctx, &cb).await;

        let p = ctx.pending.take(1, 1).unwrap();
        assert_eq!(p.step, "repo_name");
        m.on_input(&ctx, &Incoming::private(1, "main"), p).await;

        let p = ctx.pending.take(1, 1).unwrap();
        assert_eq!(p.first(), Some("main"));
        let out = m.on_input(&ctx, &Incoming::private(1, "gopher://x"), p).await;
        assert!(out[0].body().contains("must start with"));

        let p = ctx.pending.take(1, 1).unwrap();
        let out = m.on_input(&ctx, &Incoming::private(1, "https://example.org/repo"), p).await;
        assert!(out[0].body().contains("added"));
        assert_eq!(m.repos.list().len(), 1);
        assert!(ctx.pending.peek(1, 1).is_none());
    }

    #[tokio::test]
    async fn test_install_unknown_module() {
        let (ctx, m, _dir) = setup();
        assert!(m.install(&ctx, "ghost").await.contains("not found"));
    }

    #[test]
    fn test_callback_payloads_fit() {
        let long = "a".repeat(40);
        let data = CallbackData::with_arg(MODULE, "confirm_delete", long);
        assert!(data.encode().is_ok());
    }
}
