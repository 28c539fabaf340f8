//! Forwards log events to an admin chat.
//!
//! WARN and ERROR go out immediately. INFO lines are batched and flushed every
//! few seconds so a busy bot does not hit the Telegram rate limit.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::kernel::telegram::split_message;

const FLUSH_EVERY: Duration = Duration::from_secs(5);
const MAX_BUFFERED: usize = 50;

/// Targets whose events would loop back through the Bot API.
const MUTED_TARGETS: [&str; 4] = ["teloxide", "reqwest", "hyper", "swiftbot::telegram_log"];

#[derive(Debug, PartialEq)]
pub enum LogLine {
    Urgent(String),
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl TelegramLogLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (layer, mut rx) = Self::channel();

        tokio::spawn(async move {
            let mut buffer: Vec<String> = Vec::new();
            let mut tick = tokio::time::interval(FLUSH_EVERY);
            loop {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(LogLine::Urgent(text)) => send(&bot, chat_id, &text).await,
                        Some(LogLine::Info(text)) => {
                            buffer.push(text);
                            if buffer.len() >= MAX_BUFFERED {
                                send(&bot, chat_id, &buffer.join("\n")).await;
                                buffer.clear();
                            }
                        }
                        None => break,
                    },
                    _ = tick.tick() => {
                        if !buffer.is_empty() {
                            send(&bot, chat_id, &buffer.join("\n")).await;
                            buffer.clear();
                        }
                    }
                }
            }
        });

        layer
    }

    /// The layer and the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

async fn send(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_message(text, 4000) {
        // Plain text: log lines carry arbitrary characters.
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            eprintln!("Failed to send log to Telegram: {e}");
            return;
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }
}

impl MessageVisitor {
    fn render(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} ({})", self.message, self.fields.join(", "))
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let level = *meta.level();
        if level > Level::INFO || MUTED_TARGETS.iter().any(|t| meta.target().starts_with(t)) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let text = visitor.render();

        let line = match level {
            Level::ERROR => LogLine::Urgent(format!("❌ {text}")),
            Level::WARN => LogLine::Urgent(format!("⚠️ {text}")),
            _ => LogLine::Info(text),
        };
        if self.tx.send(line).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
