//! Session registry.
//!
//! CRUD over [`SessionRecord`]s, serialized into the store at
//! `session:{id}`. Every successful write refreshes the session TTL, so an
//! idle session eventually expires and becomes indistinguishable from one
//! that never existed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use recall_core::{SessionPatch, SessionRecord};

use crate::store::{history_key, session_key, Result, Store, StoreError};

/// Registry for session metadata records.
pub struct SessionRegistry<S> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: Store> SessionRegistry<S> {
    /// Create a registry over the given store.
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Create a new session with a fresh unique ID and zero message count.
    pub async fn create(
        &self,
        owner_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<SessionRecord> {
        let record = SessionRecord::new(owner_id, metadata);
        self.persist(&record).await?;
        tracing::debug!(session_id = %record.session_id, owner = ?record.owner_id, "Session created");
        Ok(record)
    }

    /// Fetch a session record.
    ///
    /// A missing key and an unparseable record both surface as
    /// [`StoreError::NotFound`]; the corrupt case is logged.
    pub async fn get(&self, session_id: &str) -> Result<SessionRecord> {
        let payload = self
            .store
            .get(&session_key(session_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        match serde_json::from_str(&payload) {
            Ok(record) => Ok(record),
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Corrupt session record, treating as not found");
                Err(StoreError::NotFound(session_id.to_string()))
            }
        }
    }

    /// Merge a partial update into a session record and re-persist it.
    pub async fn update(&self, session_id: &str, patch: SessionPatch) -> Result<SessionRecord> {
        let mut record = self.get(session_id).await?;
        patch.apply(&mut record);
        record.touch();
        self.persist(&record).await?;
        Ok(record)
    }

    /// Count one recorded turn: bump the lifetime message counter and
    /// refresh `last_active_at`.
    pub async fn increment_message_count(&self, session_id: &str) -> Result<()> {
        let mut record = self.get(session_id).await?;
        record.record_turn();
        self.persist(&record).await
    }

    /// Delete a session record together with its message log.
    ///
    /// Succeeds when the session is already gone.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.store.delete(&session_key(session_id)).await?;
        self.store.delete(&history_key(session_id)).await?;
        tracing::debug!(session_id, "Session deleted");
        Ok(())
    }

    /// List the sessions belonging to one owner, most recently active first.
    ///
    /// Backed by a full key scan; acceptable for moderate session counts
    /// only.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SessionRecord>> {
        let mut sessions = self.list_all().await?;
        sessions.retain(|s| s.owner_id.as_deref() == Some(owner_id));
        Ok(sessions)
    }

    /// List every session, most recently active first. Same scan caveat as
    /// [`Self::list_by_owner`].
    pub async fn list_all(&self) -> Result<Vec<SessionRecord>> {
        let keys = self.store.keys("session:*").await?;

        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            // A key can expire or turn out corrupt between the scan and the
            // read; skip it either way.
            let Some(payload) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<SessionRecord>(&payload) {
                Ok(record) => sessions.push(record),
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Skipping corrupt session record");
                }
            }
        }

        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    async fn persist(&self, record: &SessionRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        self.store
            .set_with_ttl(&session_key(&record.session_id), &payload, self.ttl)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> SessionRegistry<MemoryStore> {
        SessionRegistry::new(Arc::new(MemoryStore::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = registry();

        let created = registry.create(Some("alice"), None).await.unwrap();
        let fetched = registry.get(&created.session_id).await.unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.message_count, 0);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.get("no-such-session").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_not_found() {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(store.clone(), Duration::from_secs(60));

        store
            .set_with_ttl(&session_key("bad"), "{not json", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            registry.get("bad").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_increment_message_count() {
        let registry = registry();
        let session = registry.create(None, None).await.unwrap();

        registry
            .increment_message_count(&session.session_id)
            .await
            .unwrap();
        registry
            .increment_message_count(&session.session_id)
            .await
            .unwrap();

        let fetched = registry.get(&session.session_id).await.unwrap();
        assert_eq!(fetched.message_count, 2);
        assert!(fetched.last_active_at >= session.last_active_at);
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let registry = registry();
        let session = registry.create(Some("alice"), None).await.unwrap();

        let mut metadata = Map::new();
        metadata.insert("topic".to_string(), serde_json::json!("travel"));
        let updated = registry
            .update(
                &session.session_id,
                SessionPatch::default().with_metadata(metadata),
            )
            .await
            .unwrap();

        assert_eq!(updated.owner_id.as_deref(), Some("alice"));
        assert_eq!(updated.metadata["topic"], serde_json::json!("travel"));

        let fetched = registry.get(&session.session_id).await.unwrap();
        assert_eq!(fetched, updated);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let registry = registry();
        let session = registry.create(None, None).await.unwrap();

        registry.delete(&session.session_id).await.unwrap();

        assert!(matches!(
            registry.get(&session.session_id).await,
            Err(StoreError::NotFound(_))
        ));
        // Deleting again is still ok.
        registry.delete(&session.session_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_owner_filters() {
        let registry = registry();
        registry.create(Some("alice"), None).await.unwrap();
        registry.create(Some("alice"), None).await.unwrap();
        registry.create(Some("bob"), None).await.unwrap();
        registry.create(None, None).await.unwrap();

        let alice = registry.list_by_owner("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|s| s.owner_id.as_deref() == Some("alice")));

        assert_eq!(registry.list_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_expired_session_is_gone() {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(store, Duration::from_millis(20));

        let session = registry.create(Some("alice"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(matches!(
            registry.get(&session.session_id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(registry.list_by_owner("alice").await.unwrap().is_empty());
    }
}
