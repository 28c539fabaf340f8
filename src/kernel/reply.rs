//! What a handler wants sent back to Telegram.
//!
//! Handlers never touch the Bot API directly. They return a list of `Reply`
//! values and `TelegramClient` renders them, which keeps module logic
//! testable without a network.

use std::path::PathBuf;

use super::callback::CallbackData;

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub text: String,
    pub data: CallbackData,
}

impl Button {
    pub fn new(text: impl Into<String>, data: CallbackData) -> Self {
        Self { text: text.into(), data }
    }
}

/// Rows of inline buttons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    pub fn button(self, text: impl Into<String>, data: CallbackData) -> Self {
        self.row(vec![Button::new(text, data)])
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// New message in the current chat, HTML formatted.
    Text { text: String, keyboard: Option<Keyboard> },
    /// Replace the message whose button was pressed.
    Edit { text: String, keyboard: Option<Keyboard> },
    /// Answer a callback query with a toast or an alert box.
    Notice { text: String, alert: bool },
    Video { path: PathBuf, caption: String, remove_after: bool },
    Audio { path: PathBuf, caption: String, remove_after: bool },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text { text: text.into(), keyboard: None }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Reply::Text { text: text.into(), keyboard: Some(keyboard) }
    }

    pub fn edit(text: impl Into<String>, keyboard: Option<Keyboard>) -> Self {
        Reply::Edit { text: text.into(), keyboard }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Reply::Notice { text: text.into(), alert: false }
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Reply::Notice { text: text.into(), alert: true }
    }

    /// Text body of text-like replies.
    pub fn body(&self) -> &str {
        match self {
            Reply::Text { text, .. } | Reply::Edit { text, .. } | Reply::Notice { text, .. } => text,
            Reply::Video { caption, .. } | Reply::Audio { caption, .. } => caption,
        }
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        match self {
            Reply::Text { keyboard, .. } | Reply::Edit { keyboard, .. } => keyboard.as_ref(),
            _ => None,
        }
    }
}

pub type Outcome = Vec<Reply>;

/// Escape user-provided text for Telegram HTML.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Drop tags and unescape entities, for resending rejected HTML as plain text.
pub fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("a < b && c > \"d\""), "a &lt; b &amp;&amp; c &gt; &quot;d&quot;");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<b>Weather</b> in &lt;Paris&gt;"), "Weather in <Paris>");
        assert_eq!(strip_html("<pre><code>x &amp;&amp; y</code></pre>"), "x && y");
    }

    #[test]
    fn test_keyboard_skips_empty_rows() {
        let kb = Keyboard::new()
            .row(vec![])
            .button("Back", CallbackData::new("sys", "menu"));
        assert_eq!(kb.rows.len(), 1);
        assert_eq!(kb.buttons().count(), 1);
    }
}
