//! Telegram client using teloxide. Renders module replies.

use std::path::Path;

use teloxide::prelude::*;
use teloxide::types::{BotCommand, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode};
use tracing::{debug, info, warn};

use super::reply::{Keyboard, Outcome, Reply, strip_html};
use super::router::CommandSpec;

/// Telegram caps messages at 4096 characters; leave room for entities.
const MAX_MESSAGE_CHARS: usize = 4000;

pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send every reply of a message handler. Edits become new messages.
    pub async fn deliver(&self, chat_id: i64, outcome: Outcome) {
        for reply in outcome {
            match reply {
                Reply::Text { text, keyboard } | Reply::Edit { text, keyboard } => {
                    self.send_html(chat_id, &text, keyboard.as_ref()).await.ok();
                }
                Reply::Notice { text, .. } => {
                    self.send_html(chat_id, &text, None).await.ok();
                }
                Reply::Video { path, caption, remove_after } => {
                    self.send_file(chat_id, &path, &caption, true).await.ok();
                    cleanup(&path, remove_after);
                }
                Reply::Audio { path, caption, remove_after } => {
                    self.send_file(chat_id, &path, &caption, false).await.ok();
                    cleanup(&path, remove_after);
                }
            }
        }
    }

    /// Send the replies of a callback handler and always answer the query.
    pub async fn deliver_callback(&self, q: &CallbackQuery, outcome: Outcome) {
        let origin = q.message.as_ref().map(|m| (m.chat().id.0, m.id()));
        let mut answered = false;

        for reply in outcome {
            match reply {
                Reply::Notice { text, alert } => {
                    if answered {
                        continue;
                    }
                    answered = true;
                    if let Err(e) = self
                        .bot
                        .answer_callback_query(q.id.clone())
                        .text(strip_html(&text))
                        .show_alert(alert)
                        .await
                    {
                        warn!("Failed to answer callback: {e}");
                    }
                }
                Reply::Edit { text, keyboard } => match origin {
                    Some((chat_id, message_id)) => {
                        self.edit_html(chat_id, message_id, &text, keyboard.as_ref()).await.ok();
                    }
                    None => warn!("Callback without message, dropping edit"),
                },
                other => {
                    if let Some((chat_id, _)) = origin {
                        self.deliver(chat_id, vec![other]).await;
                    }
                }
            }
        }

        if !answered && let Err(e) = self.bot.answer_callback_query(q.id.clone()).await {
            debug!("Failed to answer callback: {e}");
        }
    }

    /// Send HTML, falling back to plain text if Telegram rejects the markup.
    pub async fn send_html(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<(), String> {
        let chunks = split_message(text, MAX_MESSAGE_CHARS);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { keyboard.map(to_markup) } else { None };
            let mut request = self
                .bot
                .send_message(ChatId(chat_id), chunk.as_str())
                .parse_mode(ParseMode::Html);
            if let Some(ref m) = markup {
                request = request.reply_markup(m.clone());
            }

            match request.await {
                Ok(_) => {}
                Err(e) if is_entity_error(&e) => {
                    warn!("HTML rejected ({e}), resending as plain text");
                    let mut plain = self.bot.send_message(ChatId(chat_id), strip_html(chunk));
                    if let Some(m) = markup {
                        plain = plain.reply_markup(m);
                    }
                    plain.await.map_err(|e| {
                        let msg = format!("Failed to send: {e}");
                        warn!("{}", msg);
                        msg
                    })?;
                }
                Err(e) => {
                    let msg = format!("Failed to send: {e}");
                    warn!("{}", msg);
                    return Err(msg);
                }
            }
        }
        Ok(())
    }

    async fn edit_html(
        &self,
        chat_id: i64,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), String> {
        let text: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), message_id, &text)
            .parse_mode(ParseMode::Html);
        if let Some(kb) = keyboard {
            request = request.reply_markup(to_markup(kb));
        }

        match request.await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("message is not modified") => Ok(()),
            Err(e) if is_entity_error(&e) => {
                let mut plain = self.bot.edit_message_text(ChatId(chat_id), message_id, strip_html(&text));
                if let Some(kb) = keyboard {
                    plain = plain.reply_markup(to_markup(kb));
                }
                plain.await.map(|_| ()).map_err(|e| format!("Failed to edit: {e}"))
            }
            Err(e) => {
                let msg = format!("Failed to edit: {e}");
                warn!("{}", msg);
                Err(msg)
            }
        }
    }

    async fn send_file(&self, chat_id: i64, path: &Path, caption: &str, video: bool) -> Result<(), String> {
        info!("📤 Sending {} to chat {}", path.display(), chat_id);
        let file = InputFile::file(path.to_path_buf());
        let result = if video {
            self.bot
                .send_video(ChatId(chat_id), file)
                .caption(caption)
                .parse_mode(ParseMode::Html)
                .supports_streaming(true)
                .await
        } else {
            self.bot
                .send_audio(ChatId(chat_id), file)
                .caption(caption)
                .parse_mode(ParseMode::Html)
                .await
        };
        result.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send file: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Direct message every admin. Failures are logged and skipped.
    pub async fn notify_admins(&self, admin_ids: &[i64], text: &str) {
        for &admin in admin_ids {
            self.send_html(admin, text, None).await.ok();
        }
    }

    pub async fn register_commands(&self, commands: &[CommandSpec]) {
        let list: Vec<BotCommand> = commands
            .iter()
            .map(|c| BotCommand::new(c.command, c.description))
            .collect();
        match self.bot.set_my_commands(list).await {
            Ok(_) => info!("Registered {} bot commands", commands.len()),
            Err(e) => warn!("Failed to register commands: {e}"),
        }
    }
}

/// Remove a sent file and its per-request directory once that is empty.
fn cleanup(path: &Path, remove: bool) {
    if !remove {
        return;
    }
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove {}: {e}", path.display());
    }
    if let Some(dir) = path.parent() {
        // fails while other files remain
        let _ = std::fs::remove_dir(dir);
    }
}

fn is_entity_error(e: &teloxide::RequestError) -> bool {
    e.to_string().to_lowercase().contains("can't parse entities")
}

fn to_markup(kb: &Keyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = kb
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|b| match b.data.encode() {
                    Ok(data) => Some(InlineKeyboardButton::callback(b.text.clone(), data)),
                    Err(e) => {
                        warn!("Dropping button {:?}: {e}", b.text);
                        None
                    }
                })
                .collect()
        })
        .filter(|row: &Vec<InlineKeyboardButton>| !row.is_empty())
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Split on line boundaries into chunks of at most `max` characters.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::callback::CallbackData;

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn test_split_on_lines() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc"]);
    }

    #[test]
    fn test_split_very_long_line() {
        let chunks = split_message(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_markup_drops_invalid_buttons() {
        let kb = Keyboard::new()
            .button("ok", CallbackData::new("info", "cpu"))
            .button("bad", CallbackData::with_arg("weather", "get", "z".repeat(90)));
        let markup = to_markup(&kb);
        assert_eq!(markup.inline_keyboard.len(), 1);
    }

    #[test]
    fn test_cleanup_removes_empty_request_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("5_5_1");
        std::fs::create_dir_all(&dir).unwrap();
        let clip = dir.join("clip.mp4");
        std::fs::write(&clip, b"x").unwrap();
        cleanup(&clip, true);
        assert!(!dir.exists());

        let busy = root.path().join("6_6_1");
        std::fs::create_dir_all(&busy).unwrap();
        std::fs::write(busy.join("a.mp3"), b"x").unwrap();
        std::fs::write(busy.join("b.mp3"), b"x").unwrap();
        cleanup(&busy.join("a.mp3"), true);
        assert!(busy.join("b.mp3").exists());

        cleanup(&busy.join("b.mp3"), false);
        assert!(busy.join("b.mp3").exists());
    }
}
