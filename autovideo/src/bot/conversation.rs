//! Pending `/newvideo` conversations.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Conversation timeout after `/newvideo`.
pub const CONVERSATION_TIMEOUT: Duration = Duration::from_secs(300);

/// `(chat_id, user_id)` pairs waiting for their request text.
pub struct PendingPrompts {
    entries: DashMap<(i64, i64), Instant>,
    timeout: Duration,
}

impl Default for PendingPrompts {
    fn default() -> Self {
        Self::new(CONVERSATION_TIMEOUT)
    }
}

impl PendingPrompts {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
        }
    }

    pub fn start(&self, chat_id: i64, user_id: i64) {
        self.entries.insert((chat_id, user_id), Instant::now());
    }

    /// Consume a pending conversation. Expired ones count as absent.
    pub fn take(&self, chat_id: i64, user_id: i64) -> bool {
        self.entries
            .remove(&(chat_id, user_id))
            .is_some_and(|(_, started)| started.elapsed() <= self.timeout)
    }

    /// Drop a pending conversation, returning whether one was active.
    pub fn cancel(&self, chat_id: i64, user_id: i64) -> bool {
        self.take(chat_id, user_id)
    }

    /// Forget conversations past the timeout. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        let timeout = self.timeout;
        self.entries.retain(|_, started| started.elapsed() <= timeout);
        before.saturating_sub(self.entries.len())
    }
}
