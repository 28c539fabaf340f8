//! Generative-AI answers through Gemini, with cache, history and modes.

pub mod client;
pub mod store;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::kernel::{
    Button, CallbackData, CallbackInvocation, CommandSpec, Incoming, Invocation, JsonStore, Keyboard, Module,
    ModuleContext, Outcome, Pending, Reply, SecretBox, html_escape,
};
use client::{GEMINI_API_URL, GeminiClient, GeminiError, Generation, RetryPolicy};

const NAME: &str = "gemini";

/// Minimum time between two answered questions in one chat.
pub const RATE_WINDOW_MS: i64 = 5_000;

const MIN_QUESTION_CHARS: usize = 3;

pub const ENCRYPTION_KEY_VAR: &str = "GEMINI_ENCRYPTION_KEY";
pub const PLAIN_KEY_VAR: &str = "GEMINI_KEY";

const DEFAULT_CONTEXT: &str = "SwiftBot is a modular Telegram bot written in Rust. \
Modules add commands for weather, code analysis, downloads, system info and AI answers.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Formal,
    #[default]
    Friendly,
    Sarcastic,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Formal, Mode::Friendly, Mode::Sarcastic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Formal => "formal",
            Mode::Friendly => "friendly",
            Mode::Sarcastic => "sarcastic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s.trim().to_lowercase())
    }

    fn instruction(&self) -> &'static str {
        match self {
            Mode::Formal => "Answer formally and precisely, in a professional tone.",
            Mode::Friendly => "Answer in a friendly, relaxed tone.",
            Mode::Sarcastic => "Answer with light sarcasm, but keep the answer correct and helpful.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Sealed with `GEMINI_ENCRYPTION_KEY`.
    pub encrypted_api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub persona: String,
    /// Extra project description fed into every prompt.
    pub context_file: Option<PathBuf>,
    pub cache_ttl_secs: i64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            encrypted_api_key: String::new(),
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.9,
            max_output_tokens: 2048,
            persona: "You are a helpful assistant inside a Telegram bot. Keep answers short.".to_string(),
            context_file: None,
            cache_ttl_secs: 86_400,
        }
    }
}

pub struct GeminiModule {
    client: GeminiClient,
    config: JsonStore<GeminiConfig>,
    secret: Option<SecretBox>,
}

impl GeminiModule {
    pub fn new(ctx: &ModuleContext) -> Self {
        Self::with_parts(
            ctx,
            GeminiClient::new(GEMINI_API_URL, RetryPolicy::default()),
            SecretBox::from_env(ENCRYPTION_KEY_VAR),
        )
    }

    pub fn with_parts(ctx: &ModuleContext, client: GeminiClient, secret: Option<SecretBox>) -> Self {
        Self {
            client,
            config: JsonStore::load_or_default(ctx.config_path(NAME)),
            secret,
        }
    }

    /// Decrypted key, or the plain env key when none is stored or it cannot be opened.
    fn api_key(&self) -> Option<String> {
        let plain = std::env::var(PLAIN_KEY_VAR).ok();
        resolve_key(&self.config.get().encrypted_api_key, self.secret.as_ref(), plain)
    }

    fn store_key(&self, key: &str) -> Reply {
        let Some(secret) = &self.secret else {
            error!("🔐 {ENCRYPTION_KEY_VAR} is not set, refusing to store the Gemini key");
            return Reply::text(format!("❌ {ENCRYPTION_KEY_VAR} is not set on the server. The key was not saved."));
        };
        let sealed = match secret.seal(key.trim()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to encrypt Gemini key: {e}");
                return Reply::text("❌ Could not encrypt the key.");
            }
        };
        match self.config.update(|c| c.encrypted_api_key = sealed) {
            Ok(()) => {
                info!("🔑 Gemini API key updated");
                Reply::text("✅ API key saved (encrypted). You may delete your message with the key.")
            }
            Err(e) => {
                error!("Failed to save Gemini config: {e}");
                Reply::text("❌ Could not save the key.")
            }
        }
    }

    fn context_text(&self, cfg: &GeminiConfig) -> String {
        match &cfg.context_file {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Context file {} unreadable: {e}", path.display());
                    DEFAULT_CONTEXT.to_string()
                }
            },
            None => DEFAULT_CONTEXT.to_string(),
        }
    }

    /// Rate limit, cache, prompt, request, persist.
    pub async fn ask(&self, ctx: &ModuleContext, chat_id: i64, question: &str) -> Reply {
        let question = question.trim();
        if question.chars().count() < MIN_QUESTION_CHARS {
            return Reply::text("❓ The question is too short.");
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        match store::last_request(&ctx.db, chat_id) {
            Ok(Some(last)) => {
                if let Err(wait) = check_rate(last, now_ms) {
                    return Reply::text(format!("⏳ Too fast! Wait {wait} s before the next question."));
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Rate limit lookup failed: {e}"),
        }

        let Some(api_key) = self.api_key() else {
            return Reply::text("⚠️ The AI key is not configured. An admin can set it with /setkey.");
        };

        let cfg = self.config.get();
        let mode = store::mode(&ctx.db, chat_id).unwrap_or_default();
        let cache_key = format!("{}|{}", mode.as_str(), question.to_lowercase());

        let answer = match store::cached_answer(&ctx.db, &cache_key, cfg.cache_ttl_secs) {
            Ok(Some(cached)) => {
                info!("🤖 Cache hit for chat {chat_id}");
                Ok(cached)
            }
            _ => {
                let history = store::history(&ctx.db, chat_id).unwrap_or_default();
                let prompt = build_prompt(&cfg.persona, &self.context_text(&cfg), mode, &history, question);
                let generation = Generation {
                    model: cfg.model.clone(),
                    temperature: cfg.temperature,
                    max_output_tokens: cfg.max_output_tokens,
                };
                let result = self.client.generate(&api_key, &generation, &prompt).await;
                if let Ok(answer) = &result
                    && let Err(e) = store::cache_answer(&ctx.db, &cache_key, answer)
                {
                    warn!("Failed to cache answer: {e}");
                }
                result
            }
        };

        if let Err(e) = store::touch_request(&ctx.db, chat_id, chrono::Utc::now().timestamp_millis()) {
            warn!("Failed to update rate limit: {e}");
        }

        match answer {
            Ok(answer) => {
                if let Err(e) = store::save_exchange(&ctx.db, chat_id, question, &answer) {
                    warn!("Failed to save conversation: {e}");
                }
                Reply::text(format!("<b>🤖 Gemini:</b>\n\n{}", format_answer(&answer)))
            }
            Err(e) => {
                error!("Gemini request failed: {e}");
                Reply::text(match e {
                    GeminiError::Overloaded(_) => "❌ The AI service is overloaded, try again later.",
                    GeminiError::Empty | GeminiError::Blocked(_) => "❌ The AI could not answer this question.",
                    _ => "❌ Could not get an answer from the AI.",
                })
            }
        }
    }

    fn mode_keyboard(current: Mode) -> Keyboard {
        Keyboard::new().row(
            Mode::ALL
                .into_iter()
                .map(|m| {
                    let label = if m == current { format!("✅ {}", m.as_str()) } else { m.as_str().to_string() };
                    Button::new(label, CallbackData::with_arg(NAME, "mode", m.as_str()))
                })
                .collect(),
        )
    }

    fn history_text(&self, ctx: &ModuleContext, chat_id: i64) -> String {
        let history = store::history(&ctx.db, chat_id).unwrap_or_default();
        if history.is_empty() {
            return "📭 No conversation history yet.".to_string();
        }
        let mut text = String::from("🗂 <b>Recent questions</b>\n");
        for (i, (q, a)) in history.iter().rev().enumerate() {
            text.push_str(&format!(
                "\n{}. <b>{}</b>\n{}\n",
                i + 1,
                html_escape(&preview(q, 60)),
                html_escape(&preview(a, 120))
            ));
        }
        text
    }
}

/// Ok when the window has passed, else the whole seconds left.
pub fn check_rate(last_ms: i64, now_ms: i64) -> Result<(), i64> {
    let elapsed = now_ms - last_ms;
    if elapsed < RATE_WINDOW_MS {
        Err(((RATE_WINDOW_MS - elapsed) + 999) / 1000)
    } else {
        Ok(())
    }
}

pub fn build_prompt(persona: &str, context: &str, mode: Mode, history: &[(String, String)], question: &str) -> String {
    let mut prompt = format!("{persona}\n\nProject context:\n{}\n\n{}\n", context.trim(), mode.instruction());
    if !history.is_empty() {
        prompt.push_str("\nPrevious conversation:\n");
        for (q, a) in history {
            prompt.push_str(&format!("User: {q}\nAssistant: {a}\n"));
        }
    }
    prompt.push_str(&format!("\nQuestion: {question}"));
    prompt
}

/// Escape, drop markdown asterisks and bold short `Title: text` lines.
pub fn format_answer(answer: &str) -> String {
    let cleaned = html_escape(answer).replace('*', "");
    cleaned
        .lines()
        .map(|line| {
            let trimmed = line.trim_start_matches(['-', '•', ' ']);
            match trimmed.split_once(": ") {
                Some((title, body)) if !title.is_empty() && title.chars().count() < 50 && !body.trim().is_empty() => {
                    format!("<b>• {}:</b> {}", title.trim(), body.trim())
                }
                _ => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max {
        format!("{}…", line.chars().take(max).collect::<String>())
    } else {
        line.to_string()
    }
}

#[async_trait]
impl Module for GeminiModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Gemini AI"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::public("ask", "Ask the AI a question"),
            CommandSpec::public("mode", "AI answer style: formal, friendly, sarcastic"),
            CommandSpec::public("aihistory", "Recent AI questions in this chat"),
            CommandSpec::admin("clearcache", "Clear AI cache and history"),
            CommandSpec::admin("setkey", "Set the Gemini API key"),
        ]
    }

    fn callback_prefixes(&self) -> &'static [&'static str] {
        &[NAME]
    }

    fn init(&self, ctx: &ModuleContext) -> rusqlite::Result<()> {
        store::init_schema(&ctx.db)
    }

    fn startup_notices(&self) -> Vec<String> {
        let mut notices = Vec::new();
        if self.secret.is_none() {
            notices.push(format!("⚠️ Gemini: {ENCRYPTION_KEY_VAR} is not set, /setkey is disabled."));
        }
        if self.api_key().is_none() {
            notices.push("⚠️ Gemini: no API key configured.".to_string());
        }
        notices
    }

    async fn on_command(&self, ctx: &ModuleContext, inv: &Invocation) -> Outcome {
        let msg = &inv.msg;
        match inv.command.as_str() {
            "ask" => match &inv.args {
                Some(q) => vec![self.ask(ctx, msg.chat_id, q).await],
                None => {
                    ctx.pending.begin(msg.chat_id, msg.user_id, NAME, "question", Vec::new());
                    vec![Reply::text("🤖 What is your question?")]
                }
            },
            "mode" => {
                let current = store::mode(&ctx.db, msg.chat_id).unwrap_or_default();
                match inv.args.as_deref() {
                    None => vec![Reply::with_keyboard(
                        format!("🎭 Current mode: <b>{}</b>. Pick a new one:", current.as_str()),
                        Self::mode_keyboard(current),
                    )],
                    Some(arg) => match Mode::parse(arg) {
                        Some(mode) => match store::set_mode(&ctx.db, msg.chat_id, mode) {
                            Ok(()) => vec![Reply::text(format!("✅ Mode set to <b>{}</b>.", mode.as_str()))],
                            Err(e) => {
                                error!("Failed to save mode: {e}");
                                vec![Reply::text("❌ Could not save the mode.")]
                            }
                        },
                        None => vec![Reply::text("❌ Unknown mode. Available: formal, friendly, sarcastic.")],
                    },
                }
            }
            "aihistory" => vec![Reply::text(self.history_text(ctx, msg.chat_id))],
            "clearcache" => match store::clear_all(&ctx.db) {
                Ok(n) => {
                    info!("🧹 Gemini cache cleared by {} ({n} rows)", msg.user_id);
                    vec![Reply::text(format!("🧹 Cache and history cleared ({n} records)."))]
                }
                Err(e) => {
                    error!("Failed to clear Gemini cache: {e}");
                    vec![Reply::text("❌ Could not clear the cache.")]
                }
            },
            "setkey" => match &inv.args {
                Some(key) => vec![self.store_key(key)],
                None => {
                    if self.secret.is_none() {
                        return vec![self.store_key("")];
                    }
                    ctx.pending.begin(msg.chat_id, msg.user_id, NAME, "api_key", Vec::new());
                    vec![Reply::text("🔐 Send me the Gemini API key.")]
                }
            },
            _ => Vec::new(),
        }
    }

    async fn on_input(&self, ctx: &ModuleContext, msg: &Incoming, pending: Pending) -> Outcome {
        match pending.step.as_str() {
            "api_key" if ctx.is_admin(msg.user_id) => vec![self.store_key(&msg.text)],
            "question" => vec![self.ask(ctx, msg.chat_id, &msg.text).await],
            _ => Vec::new(),
        }
    }

    async fn on_callback(&self, ctx: &ModuleContext, cb: &CallbackInvocation) -> Outcome {
        if cb.data.action != "mode" {
            return vec![Reply::notice("Unknown action")];
        }
        let Some(mode) = Mode::parse(cb.data.arg()) else {
            return vec![Reply::notice("Unknown mode")];
        };
        if let Err(e) = store::set_mode(&ctx.db, cb.chat_id, mode) {
            error!("Failed to save mode: {e}");
            return vec![Reply::alert("❌ Could not save the mode.")];
        }
        vec![
            Reply::notice(format!("Mode: {}", mode.as_str())),
            Reply::edit(
                format!("🎭 Current mode: <b>{}</b>. Pick a new one:", mode.as_str()),
                Some(Self::mode_keyboard(mode)),
            ),
        ]
    }

    async fn on_text(&self, ctx: &ModuleContext, msg: &Incoming) -> Option<Outcome> {
        if !msg.is_private || msg.text.trim().chars().count() < MIN_QUESTION_CHARS {
            return None;
        }
        Some(vec![self.ask(ctx, msg.chat_id, &msg.text).await])
    }
}

fn resolve_key(sealed: &str, secret: Option<&SecretBox>, plain: Option<String>) -> Option<String> {
    if !sealed.is_empty() {
        match secret.map(|s| s.open(sealed)) {
            Some(Ok(key)) => return Some(key),
            Some(Err(e)) => warn!("🔐 Stored Gemini key unusable: {e}"),
            None => warn!("🔐 Stored Gemini key present but {ENCRYPTION_KEY_VAR} is not set"),
        }
    }
    plain.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Database;
    use std::time::Duration;

    const OK_BODY: &str = r#"{"candidates":[{"content":{"parts":[{"text":"Rust: a systems language"}]}}]}"#;

    fn ctx(dir: &std::path::Path) -> ModuleContext {
        ModuleContext::new(Database::in_memory().unwrap(), [1], dir, Duration::from_secs(60))
    }

    fn module(ctx: &ModuleContext, url: &str) -> GeminiModule {
        let client = GeminiClient::new(url, RetryPolicy { attempts: 3, base_delay: Duration::from_millis(1) });
        let m = GeminiModule::with_parts(ctx, client, Some(SecretBox::new("test-passphrase")));
        m.init(ctx).unwrap();
        m
    }

    #[test]
    fn test_check_rate() {
        assert_eq!(check_rate(0, 4_000), Err(1));
        assert_eq!(check_rate(0, 1_000), Err(4));
        assert_eq!(check_rate(0, 5_000), Ok(()));
        assert_eq!(check_rate(0, 60_000), Ok(()));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse(" Formal "), Some(Mode::Formal));
        assert_eq!(Mode::parse("angry"), None);
    }

    #[test]
    fn test_format_answer() {
        let out = format_answer("**Speed**: fast\nplain line\nSee https://example.com");
        assert!(out.contains("<b>• Speed:</b> fast"));
        assert!(out.contains("plain line"));
        assert!(out.contains("See https://example.com"));
        assert!(!out.contains('*'));
        assert!(format_answer("a < b").contains("a &lt; b"));
    }

    #[test]
    fn test_build_prompt_contains_history_in_order() {
        let history = vec![("q1".to_string(), "a1".to_string()), ("q2".to_string(), "a2".to_string())];
        let p = build_prompt("persona", "ctx", Mode::Sarcastic, &history, "why?");
        assert!(p.starts_with("persona"));
        assert!(p.contains("sarcasm"));
        assert!(p.find("User: q1").unwrap() < p.find("User: q2").unwrap());
        assert!(p.ends_with("Question: why?"));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_without_touching_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let m = module(&ctx, "http://127.0.0.1:9");
        let recent = chrono::Utc::now().timestamp_millis() - 1_000;
        store::touch_request(&ctx.db, 42, recent).unwrap();

        let reply = m.ask(&ctx, 42, "what is rust?").await;
        assert!(reply.body().contains("Too fast"));
        assert_eq!(store::last_request(&ctx.db, 42).unwrap(), Some(recent));
    }

    #[tokio::test]
    async fn test_ask_stores_history_and_timestamp() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(OK_BODY)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let m = module(&ctx, &server.url());
        assert!(m.store_key("AIza-test").body().contains("saved"));

        let reply = m.ask(&ctx, 42, "What is Rust?").await;
        assert!(reply.body().contains("<b>• Rust:</b> a systems language"));
        assert_eq!(store::history(&ctx.db, 42).unwrap().len(), 1);
        assert!(store::last_request(&ctx.db, 42).unwrap().is_some());

        // same question from another chat comes from the cache
        let reply = m.ask(&ctx, 43, "what is rust?").await;
        assert!(reply.body().contains("systems language"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_overloaded_message_after_retries() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .expect(3)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let m = module(&ctx, &server.url());
        m.store_key("AIza-test");
        let reply = m.ask(&ctx, 7, "hello there").await;
        assert!(reply.body().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_undecryptable_key_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let m = module(&ctx, "http://127.0.0.1:9");
        m.store_key("AIza-test");
        let other = GeminiModule::with_parts(
            &ctx,
            GeminiClient::new("http://127.0.0.1:9", RetryPolicy::default()),
            Some(SecretBox::new("different")),
        );
        assert!(other.api_key().is_none());
        let reply = other.ask(&ctx, 9, "hello there").await;
        assert!(reply.body().contains("not configured"));
    }

    #[test]
    fn test_env_key_when_nothing_stored() {
        assert_eq!(resolve_key("", None, Some("AIza-from-env".into())), Some("AIza-from-env".into()));
        assert_eq!(resolve_key("", None, Some("  ".into())), None);
        assert_eq!(resolve_key("", None, None), None);
    }

    #[test]
    fn test_env_key_when_stored_key_cannot_be_opened() {
        let sealed = SecretBox::new("old-passphrase").seal("AIza-stored").unwrap();
        let current = SecretBox::new("new-passphrase");
        assert_eq!(
            resolve_key(&sealed, Some(&current), Some("AIza-from-env".into())),
            Some("AIza-from-env".into())
        );
        assert_eq!(resolve_key(&sealed, None, Some("AIza-from-env".into())), Some("AIza-from-env".into()));
        assert_eq!(resolve_key(&sealed, Some(&current), None), None);
        // a readable stored key wins over the env
        let stored = SecretBox::new("old-passphrase");
        assert_eq!(resolve_key(&sealed, Some(&stored), Some("AIza-from-env".into())), Some("AIza-stored".into()));
    }

    #[tokio::test]
    async fn test_setkey_without_encryption_key() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let m = GeminiModule::with_parts(&ctx, GeminiClient::new("http://127.0.0.1:9", RetryPolicy::default()), None);
        let reply = m.store_key("AIza");
        assert!(reply.body().contains(ENCRYPTION_KEY_VAR));
        assert!(m.config.get().encrypted_api_key.is_empty());
    }

    #[tokio::test]
    async fn test_private_text_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let m = module(&ctx, "http://127.0.0.1:9");
        let mut group = Incoming::private(5, "hello bot");
        group.is_private = false;
        group.chat_id = -100;
        assert!(m.on_text(&ctx, &group).await.is_none());
        assert!(m.on_text(&ctx, &Incoming::private(5, "hi")).await.is_none());
    }
}
