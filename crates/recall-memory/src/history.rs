//! Per-session message log.
//!
//! Append-only ordered storage of turns, newest at the head of the store
//! list. The stored length is capped at `max_history_length`; that cap is
//! independent of the token-budget compression applied at read time.

use std::sync::Arc;
use std::time::Duration;

use recall_core::Message;

use crate::store::{history_key, Result, Store};

/// Append-only message log for sessions.
pub struct MessageLog<S> {
    store: Arc<S>,
    ttl: Duration,
    max_length: usize,
}

impl<S: Store> MessageLog<S> {
    /// Create a log over the given store.
    pub fn new(store: Arc<S>, ttl: Duration, max_length: usize) -> Self {
        Self {
            store,
            ttl,
            max_length,
        }
    }

    /// Append one turn: push to the head, trim to the retained cap, refresh
    /// the TTL.
    ///
    /// Called once per turn; the caller follows up with
    /// `SessionRegistry::increment_message_count`.
    pub async fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        let key = history_key(session_id);
        let payload = serde_json::to_string(message)?;

        self.store.list_push_front(&key, &payload).await?;
        self.store
            .list_trim(&key, 0, self.max_length as isize - 1)
            .await?;
        self.store.expire(&key, self.ttl).await?;

        tracing::debug!(session_id, role = message.role.as_str(), "Turn appended");
        Ok(())
    }

    /// Read messages in chronological order (oldest first).
    ///
    /// With `limit`, only the most recent `limit` messages are returned,
    /// still chronologically ordered. A missing or expired log reads as
    /// empty. Entries that fail to parse are skipped.
    pub async fn range(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        if limit == Some(0) {
            return Ok(vec![]);
        }

        let key = history_key(session_id);
        // The head of the list is the newest turn, so the most recent
        // `limit` messages are exactly the first `limit` entries.
        let stop = limit.map_or(-1, |l| l as isize - 1);
        let raw = self.store.list_range(&key, 0, stop).await?;

        let mut messages: Vec<Message> = Vec::with_capacity(raw.len());
        for payload in &raw {
            match serde_json::from_str(payload) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    tracing::warn!(session_id, error = %err, "Skipping corrupt history entry");
                }
            }
        }

        messages.reverse();
        Ok(messages)
    }

    /// Empty the log. The session record, including its lifetime message
    /// count, is untouched.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        self.store.delete(&history_key(session_id)).await?;
        tracing::debug!(session_id, "History cleared");
        Ok(())
    }
}
