//! Rust snippet analysis and formatting.

pub mod analyzer;
pub mod formatter;
pub mod store;

use async_trait::async_trait;
use tracing::{error, info};

use crate::kernel::{
    CommandSpec, Incoming, Invocation, Module, ModuleContext, Outcome, Pending, Reply, html_escape,
};
use formatter::{CodeFormatter, FormatError, Rustfmt};

const NAME: &str = "code_analyzer";

pub struct CodeAnalyzerModule {
    formatter: Box<dyn CodeFormatter>,
}

impl CodeAnalyzerModule {
    pub fn new() -> Self {
        Self::with_formatter(Box::new(Rustfmt::detect("rustfmt")))
    }

    pub fn with_formatter(formatter: Box<dyn CodeFormatter>) -> Self {
        Self { formatter }
    }

    pub async fn analyze(&self, ctx: &ModuleContext, chat_id: i64, input: &str) -> Reply {
        let prepared = analyzer::prepare(input);
        if prepared.code.trim().is_empty() {
            return Reply::text("❌ There is no code to analyze.");
        }

        let (syntax_line, syntax_summary) = match self.formatter.format(&prepared.code).await {
            Ok(_) => ("✅ Syntax: OK".to_string(), "syntax ok"),
            Err(FormatError::Syntax(e)) => (
                format!("❌ Syntax error:\n<pre>{}</pre>", html_escape(&e)),
                "syntax error",
            ),
            Err(FormatError::Unavailable) => {
                ("⚠️ Syntax: not checked (rustfmt unavailable)".to_string(), "syntax not checked")
            }
            Err(e) => {
                error!("Formatter failed: {e}");
                ("⚠️ Syntax: not checked (formatter error)".to_string(), "syntax not checked")
            }
        };

        let tips = analyzer::recommendations(&prepared.code);
        let mut text = format!("🔍 <b>Code analysis</b>\n\n{syntax_line}\n");
        if prepared.fixed_invisible {
            text.push_str("🧹 Invisible characters were replaced.\n");
        }
        text.push_str(&format!("📏 Lines: {}\n", prepared.code.lines().count()));
        if tips.is_empty() {
            text.push_str("\n✨ No recommendations.\n");
        } else {
            text.push_str("\n💡 <b>Recommendations</b>\n");
            for tip in &tips {
                text.push_str(&format!("• {}\n", html_escape(tip)));
            }
        }

        let summary = format!("{syntax_summary}, {} recommendation(s)", tips.len());
        if let Err(e) = store::save(&ctx.db, chat_id, &prepared.code, &summary) {
            error!("Failed to save analysis: {e}");
        }
        info!("🔍 Analyzed {} lines for chat {chat_id}: {summary}", prepared.code.lines().count());

        match store::recent(&ctx.db, chat_id, store::HISTORY_SHOW) {
            Ok(history) if !history.is_empty() => {
                text.push_str("\n🗂 <b>Recent analyses</b>\n");
                for (i, record) in history.iter().enumerate() {
                    text.push_str(&format!(
                        "{}. <code>{}</code> ({})\n",
                        i + 1,
                        html_escape(&preview(&record.code, 60)),
                        html_escape(&record.result)
                    ));
                }
            }
            Ok(_) => {}
            Err(e) => error!("Failed to load analysis history: {e}"),
        }
        Reply::text(text)
    }

    pub async fn format(&self, input: &str) -> Reply {
        let prepared = analyzer::prepare(input);
        if prepared.code.trim().is_empty() {
            return Reply::text("❌ There is no code to format.");
        }
        match self.formatter.format(&prepared.code).await {
            Ok(out) if !out.changed => Reply::text("✅ The code is already formatted."),
            Ok(out) => Reply::text(format!(
                "✨ <b>Formatted code</b>\n<pre><code class=\"language-rust\">{}</code></pre>",
                html_escape(out.code.trim_end())
            )),
            Err(FormatError::Unavailable) => Reply::text("❌ Formatting (rustfmt) is unavailable."),
            Err(FormatError::Syntax(e)) => Reply::text(format!(
                "❌ Could not format, the code has a syntax error:\n<pre>{}</pre>",
                html_escape(&e)
            )),
            Err(e) => {
                error!("Formatter failed: {e}");
                Reply::text("❌ Formatting failed.")
            }
        }
    }

    fn clear_history(&self, ctx: &ModuleContext, inv: &Invocation) -> Reply {
        let chat_id = match inv.args.as_deref() {
            None => inv.msg.chat_id,
            Some(arg) => match arg.trim().parse::<i64>() {
                Ok(id) => id,
                Err(_) => return Reply::text("❌ Invalid chat id. Usage: /clear_analysis [chat_id]"),
            },
        };
        match store::clear(&ctx.db, chat_id) {
            Ok(0) => Reply::text(format!("📭 Analysis history for chat {chat_id} is already empty.")),
            Ok(n) => {
                info!("🗑️ Cleared {n} analyses for chat {chat_id} (by {})", inv.msg.user_id);
                Reply::text(format!("🗑️ Deleted {n} analyses for chat {chat_id}."))
            }
            Err(e) => {
                error!("Failed to clear analysis history: {e}");
                Reply::text("❌ Could not clear the history.")
            }
        }
    }
}

impl Default for CodeAnalyzerModule {
    fn default() -> Self {
        Self::new()
    }
}

fn preview(code: &str, max: usize) -> String {
    let line = code.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() > max {
        format!("{}…", line.chars().take(max).collect::<String>())
    } else {
        line.to_string()
    }
}

#[async_trait]
impl Module for CodeAnalyzerModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Code analyzer"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::public("analyze", "Analyze Rust code"),
            CommandSpec::public("format", "Format Rust code with rustfmt"),
            CommandSpec::admin("clear_analysis", "Clear analysis history: /clear_analysis [chat_id]"),
        ]
    }

    fn init(&self, ctx: &ModuleContext) -> rusqlite::Result<()> {
        store::init_schema(&ctx.db)
    }

    fn startup_notices(&self) -> Vec<String> {
        if self.formatter.available() {
            Vec::new()
        } else {
            vec!["⚠️ Code analyzer: rustfmt not found, /format is disabled and syntax is not checked.".to_string()]
        }
    }

    async fn on_command(&self, ctx: &ModuleContext, inv: &Invocation) -> Outcome {
        let msg = &inv.msg;
        match (inv.command.as_str(), inv.args.as_deref()) {
            ("clear_analysis", _) => vec![self.clear_history(ctx, inv)],
            ("analyze", Some(code)) => vec![self.analyze(ctx, msg.chat_id, code).await],
            ("format", Some(code)) => vec![self.format(code).await],
            (step @ ("analyze" | "format"), None) => {
                ctx.pending.begin(msg.chat_id, msg.user_id, NAME, step, Vec::new());
                let verb = if step == "analyze" { "analyze" } else { "format" };
                vec![Reply::text(format!("📝 Send me the Rust code to {verb}, or /cancel."))]
            }
            _ => Vec::new(),
        }
    }

    async fn on_input(&self, ctx: &ModuleContext, msg: &Incoming, pending: Pending) -> Outcome {
        match pending.step.as_str() {
            "analyze" => vec![self.analyze(ctx, msg.chat_id, &msg.text).await],
            "format" => vec![self.format(&msg.text).await],
            _ => Vec::new(),
        }
    }
}
