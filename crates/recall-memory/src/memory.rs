//! Conversation memory facade.
//!
//! Wires the registry, the message log, and the budgeter into the shape an
//! agent loop uses: look up or create a session, recall a bounded context,
//! record the turns that come back.

use std::sync::Arc;

use recall_core::config::MemoryConfig;
use recall_core::{Message, SessionRecord};

use crate::context::{BudgetConfig, ContextBudgeter};
use crate::history::MessageLog;
use crate::registry::SessionRegistry;
use crate::store::{Result, Store, StoreError};

/// Persistent, budget-bounded conversation memory over one store.
pub struct ConversationMemory<S> {
    registry: SessionRegistry<S>,
    log: MessageLog<S>,
    budgeter: ContextBudgeter,
    max_context_tokens: usize,
}

impl<S: Store> ConversationMemory<S> {
    /// Build the subsystem over a shared store handle.
    pub fn new(store: Arc<S>, config: &MemoryConfig) -> Self {
        let ttl = config.session_ttl();
        Self {
            registry: SessionRegistry::new(store.clone(), ttl),
            log: MessageLog::new(store, ttl, config.max_history_length),
            budgeter: ContextBudgeter::with_config(BudgetConfig::from_settings(&config.budget)),
            max_context_tokens: config.budget.max_context_tokens,
        }
    }

    /// The session registry.
    pub fn registry(&self) -> &SessionRegistry<S> {
        &self.registry
    }

    /// The message log.
    pub fn log(&self) -> &MessageLog<S> {
        &self.log
    }

    /// The context budgeter.
    pub fn budgeter(&self) -> &ContextBudgeter {
        &self.budgeter
    }

    /// Resolve a session: fetch it when the ID is known and still live,
    /// otherwise create a fresh one. An expired ID silently maps to a new
    /// session, since expiry is indistinguishable from never-existed.
    pub async fn get_or_create(
        &self,
        session_id: Option<&str>,
        owner_id: Option<&str>,
    ) -> Result<SessionRecord> {
        if let Some(id) = session_id {
            match self.registry.get(id).await {
                Ok(record) => return Ok(record),
                Err(StoreError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        self.registry.create(owner_id, None).await
    }

    /// Record one turn: append it to the log and count it on the session.
    pub async fn record_turn(&self, session_id: &str, message: &Message) -> Result<()> {
        self.log.append(session_id, message).await?;
        self.registry.increment_message_count(session_id).await
    }

    /// Read the session's history compressed to the configured token
    /// budget, ready to hand to the model.
    pub async fn recall(&self, session_id: &str) -> Result<Vec<Message>> {
        let history = self.log.range(session_id, None).await?;
        Ok(self.budgeter.compress(&history, self.max_context_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn memory() -> ConversationMemory<MemoryStore> {
        ConversationMemory::new(Arc::new(MemoryStore::new()), &MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_get_or_create_round_trips_known_id() {
        let memory = memory();
        let created = memory.get_or_create(None, Some("alice")).await.unwrap();

        let fetched = memory
            .get_or_create(Some(&created.session_id), Some("alice"))
            .await
            .unwrap();
        assert_eq!(fetched.session_id, created.session_id);
    }

    #[tokio::test]
    async fn test_get_or_create_replaces_unknown_id() {
        let memory = memory();
        let record = memory
            .get_or_create(Some("expired-or-bogus"), Some("alice"))
            .await
            .unwrap();
        assert_ne!(record.session_id, "expired-or-bogus");
        assert_eq!(record.owner_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_record_turn_updates_log_and_count() {
        let memory = memory();
        let session = memory.get_or_create(None, None).await.unwrap();

        memory
            .record_turn(&session.session_id, &Message::user("hello"))
            .await
            .unwrap();
        memory
            .record_turn(&session.session_id, &Message::assistant("hi there"))
            .await
            .unwrap();

        let record = memory.registry().get(&session.session_id).await.unwrap();
        assert_eq!(record.message_count, 2);

        let recalled = memory.recall(&session.session_id).await.unwrap();
        assert_eq!(recalled.len(), 2);
        assert_eq!(recalled[0].content, "hello");
    }

    #[tokio::test]
    async fn test_recall_of_empty_session_is_empty() {
        let memory = memory();
        let session = memory.get_or_create(None, None).await.unwrap();
        assert!(memory.recall(&session.session_id).await.unwrap().is_empty());
    }
}
