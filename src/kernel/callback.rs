//! Typed callback payloads for inline keyboards.
//!
//! Telegram hands back an opaque string of at most 64 bytes when a button is
//! pressed. Every button this bot renders carries `prefix:action[:arg]`, where
//! the prefix routes to a module and the action is matched by that module.

use std::fmt;

/// Telegram rejects callback data longer than this.
pub const MAX_CALLBACK_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    Empty,
    TooLong(usize),
    BadSegment(String),
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty callback payload"),
            Self::TooLong(len) => {
                write!(f, "callback payload is {len} bytes (max {MAX_CALLBACK_LEN})")
            }
            Self::BadSegment(s) => write!(f, "invalid callback segment '{s}'"),
        }
    }
}

impl std::error::Error for CallbackError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackData {
    pub prefix: String,
    pub action: String,
    pub arg: Option<String>,
}

impl CallbackData {
    pub fn new(prefix: &str, action: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            action: action.to_string(),
            arg: None,
        }
    }

    pub fn with_arg(prefix: &str, action: &str, arg: impl Into<String>) -> Self {
        Self {
            prefix: prefix.to_string(),
            action: action.to_string(),
            arg: Some(arg.into()),
        }
    }

    /// Argument or empty string.
    pub fn arg(&self) -> &str {
        self.arg.as_deref().unwrap_or("")
    }

    pub fn encode(&self) -> Result<String, CallbackError> {
        check_segment(&self.prefix)?;
        check_segment(&self.action)?;
        let encoded = match &self.arg {
            Some(arg) => format!("{}:{}:{}", self.prefix, self.action, arg),
            None => format!("{}:{}", self.prefix, self.action),
        };
        if encoded.len() > MAX_CALLBACK_LEN {
            return Err(CallbackError::TooLong(encoded.len()));
        }
        Ok(encoded)
    }

    /// Parse a raw payload. The argument may itself contain `:`.
    pub fn decode(raw: &str) -> Result<Self, CallbackError> {
        if raw.is_empty() {
            return Err(CallbackError::Empty);
        }
        if raw.len() > MAX_CALLBACK_LEN {
            return Err(CallbackError::TooLong(raw.len()));
        }
        let mut parts = raw.splitn(3, ':');
        let prefix = parts.next().unwrap_or_default();
        let action = parts
            .next()
            .ok_or_else(|| CallbackError::BadSegment(raw.to_string()))?;
        check_segment(prefix)?;
        check_segment(action)?;
        Ok(Self {
            prefix: prefix.to_string(),
            action: action.to_string(),
            arg: parts.next().map(str::to_string),
        })
    }
}

fn check_segment(segment: &str) -> Result<(), CallbackError> {
    if segment.is_empty() || segment.contains(':') || segment.contains(char::is_whitespace) {
        return Err(CallbackError::BadSegment(segment.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_arg() {
        let data = CallbackData::decode("weather:get:Paris").unwrap();
        assert_eq!(data.prefix, "weather");
        assert_eq!(data.action, "get");
        assert_eq!(data.arg(), "Paris");
    }

    #[test]
    fn test_decode_arg_keeps_colons() {
        let data = CallbackData::decode("module:install:a:b").unwrap();
        assert_eq!(data.action, "install");
        assert_eq!(data.arg.as_deref(), Some("a:b"));
    }

    #[test]
    fn test_decode_without_arg() {
        let data = CallbackData::decode("info:cpu").unwrap();
        assert_eq!(data, CallbackData::new("info", "cpu"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(CallbackData::decode(""), Err(CallbackError::Empty));
        assert!(matches!(CallbackData::decode("nocolon"), Err(CallbackError::BadSegment(_))));
        assert!(matches!(CallbackData::decode(":x"), Err(CallbackError::BadSegment(_))));
        let long = format!("weather:get:{}", "x".repeat(80));
        assert!(matches!(CallbackData::decode(&long), Err(CallbackError::TooLong(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_arg() {
        let data = CallbackData::with_arg("weather", "get", "y".repeat(70));
        assert!(matches!(data.encode(), Err(CallbackError::TooLong(_))));
    }

    #[test]
    fn test_encode_rejects_colon_in_action() {
        let data = CallbackData::new("yt", "a:b");
        assert!(matches!(data.encode(), Err(CallbackError::BadSegment(_))));
    }
}
