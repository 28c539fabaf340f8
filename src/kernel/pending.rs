//! Waiting-for-input state.
//!
//! When a command arrives without arguments the module asks a question and
//! parks a `Pending` entry here. The next plain message from the same user in
//! the same chat is routed back to that module. Entries expire so an
//! abandoned prompt does not swallow messages forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Pending {
    /// Name of the module that asked.
    pub module: &'static str,
    /// Module-defined step name, e.g. "city" or "repo_url".
    pub step: String,
    /// Values collected by earlier steps of the same dialog.
    pub data: Vec<String>,
    expires_at: Instant,
}

impl Pending {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn first(&self) -> Option<&str> {
        self.data.first().map(String::as_str)
    }
}

pub struct PendingInputs {
    ttl: Duration,
    entries: Mutex<HashMap<(i64, i64), Pending>>,
}

impl PendingInputs {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Start waiting for the next message. Replaces any earlier wait.
    pub fn begin(&self, chat_id: i64, user_id: i64, module: &'static str, step: &str, data: Vec<String>) {
        let pending = Pending {
            module,
            step: step.to_string(),
            data,
            expires_at: Instant::now() + self.ttl,
        };
        self.lock().insert((chat_id, user_id), pending);
    }

    /// Remove and return the wait, unless it has expired.
    pub fn take(&self, chat_id: i64, user_id: i64) -> Option<Pending> {
        let pending = self.lock().remove(&(chat_id, user_id))?;
        if pending.is_expired() { None } else { Some(pending) }
    }

    /// Look at the wait without consuming it.
    pub fn peek(&self, chat_id: i64, user_id: i64) -> Option<Pending> {
        self.lock()
            .get(&(chat_id, user_id))
            .filter(|p| !p.is_expired())
            .cloned()
    }

    /// Drop the wait. Returns true if a live one existed.
    pub fn cancel(&self, chat_id: i64, user_id: i64) -> bool {
        match self.lock().remove(&(chat_id, user_id)) {
            Some(p) => !p.is_expired(),
            None => false,
        }
    }

    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, p| !p.is_expired());
        before - entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(i64, i64), Pending>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes_entry() {
        let store = PendingInputs::new(Duration::from_secs(60));
        store.begin(1, 2, "weather", "city", vec![]);
        let p = store.take(1, 2).expect("pending entry");
        assert_eq!(p.module, "weather");
        assert_eq!(p.step, "city");
        assert!(store.take(1, 2).is_none());
    }

    #[test]
    fn test_keyed_by_chat_and_user() {
        let store = PendingInputs::new(Duration::from_secs(60));
        store.begin(1, 2, "weather", "city", vec![]);
        assert!(store.peek(1, 3).is_none());
        assert!(store.peek(9, 2).is_none());
        assert!(store.peek(1, 2).is_some());
    }

    #[test]
    fn test_expired_entry_is_ignored() {
        let store = PendingInputs::new(Duration::ZERO);
        store.begin(1, 2, "weather", "city", vec![]);
        assert!(store.peek(1, 2).is_none());
        assert!(store.take(1, 2).is_none());
    }

    #[test]
    fn test_cancel_reports_live_entry() {
        let store = PendingInputs::new(Duration::from_secs(60));
        assert!(!store.cancel(1, 2));
        store.begin(1, 2, "code_analyzer", "analyze", vec![]);
        assert!(store.cancel(1, 2));
        assert!(store.peek(1, 2).is_none());
    }

    #[test]
    fn test_new_wait_replaces_old() {
        let store = PendingInputs::new(Duration::from_secs(60));
        store.begin(1, 2, "module_manager", "repo_name", vec![]);
        store.begin(1, 2, "module_manager", "repo_url", vec!["main".into()]);
        let p = store.take(1, 2).unwrap();
        assert_eq!(p.step, "repo_url");
        assert_eq!(p.first(), Some("main"));
    }

    #[test]
    fn test_purge_expired() {
        let store = PendingInputs::new(Duration::ZERO);
        store.begin(1, 2, "weather", "city", vec![]);
        store.begin(3, 4, "weather", "city", vec![]);
        assert_eq!(store.purge_expired(), 2);
    }
}
