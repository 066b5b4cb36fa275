//! Key/value store backends.
//!
//! The [`Store`] trait abstracts the small slice of a Redis-style store this
//! subsystem needs: scalar get/set with expiry, ordered lists with push,
//! range and trim, and key enumeration. [`RedisStore`] is the production
//! backend; [`MemoryStore`] is an in-process backend with the same TTL
//! semantics, used by tests and as a degraded single-process fallback.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use thiserror::Error;
use tokio::sync::RwLock;

use recall_core::config::StoreSettings;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store unreachable, timed out, or returned a protocol error. Transient;
    /// retry policy is the caller's decision.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The store handle was closed and not reopened.
    #[error("Store is closed")]
    Closed,

    /// Unknown session ID. Expected and common (new users, expired sessions);
    /// distinct from connectivity failure.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Serialization failure on the write path.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// List operation against a scalar key or vice versa.
    #[error("Wrong value type at key: {0}")]
    WrongType(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Key for a session metadata record.
pub(crate) fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// Key for a session's message log.
pub(crate) fn history_key(session_id: &str) -> String {
    format!("history:{session_id}")
}

/// Minimal async key/value-and-list store interface.
///
/// All operations return explicit errors; none retries internally. `get`
/// encodes the expected miss as `None` rather than an error.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a scalar value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a scalar value with an expiry.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Push a value to the head of a list.
    async fn list_push_front(&self, key: &str, value: &str) -> Result<()>;

    /// Read a list slice, LRANGE semantics (inclusive bounds, negative
    /// indices count from the end). A missing key reads as empty.
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Trim a list to the given inclusive range, discarding the rest.
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()>;

    /// Refresh a key's expiry.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remove a key. Succeeds when the key is already absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate keys matching a glob pattern. Best-effort scan; not
    /// suitable for large keyspaces.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Health check.
    async fn ping(&self) -> Result<()>;

    /// Release the connection. Subsequent operations fail with
    /// [`StoreError::Closed`].
    async fn close(&self) -> Result<()>;
}

fn map_redis_err(key: &str, err: redis::RedisError) -> StoreError {
    if err.kind() == redis::ErrorKind::TypeError {
        StoreError::WrongType(key.to_string())
    } else {
        StoreError::Connection(err.to_string())
    }
}

/// Redis-backed store.
///
/// One multiplexed connection is opened at [`RedisStore::connect`] and shared
/// for the process lifetime; it is usable from any number of tasks without
/// caller-side locking. Connect and response timeouts are configured on the
/// connection, so operations fail fast instead of hanging.
pub struct RedisStore {
    settings: StoreSettings,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Open a connection to the store.
    pub async fn connect(settings: StoreSettings) -> Result<Self> {
        let client = redis::Client::open(settings.url.as_str())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(settings.connect_timeout())
            .set_response_timeout(settings.response_timeout())
            .set_number_of_retries(1);

        let manager = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::debug!(url = %settings.url, "Connected to store");

        Ok(Self {
            settings,
            conn: RwLock::new(Some(manager)),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.settings.key_prefix, key)
    }

    async fn manager(&self) -> Result<ConnectionManager> {
        self.conn.read().await.clone().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(self.prefixed(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, e))?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager().await?;
        redis::cmd("SETEX")
            .arg(self.prefixed(key))
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, e))?;
        Ok(())
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager().await?;
        redis::cmd("LPUSH")
            .arg(self.prefixed(key))
            .arg(value)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, e))?;
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.manager().await?;
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(self.prefixed(key))
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, e))?;
        Ok(values)
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut conn = self.manager().await?;
        redis::cmd("LTRIM")
            .arg(self.prefixed(key))
            .arg(start)
            .arg(stop)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, e))?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager().await?;
        redis::cmd("EXPIRE")
            .arg(self.prefixed(key))
            .arg(ttl.as_secs().max(1) as i64)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager().await?;
        redis::cmd("DEL")
            .arg(self.prefixed(key))
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, e))?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager().await?;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(self.prefixed(pattern))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(pattern, e))?;

        let prefix = &self.settings.key_prefix;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Connection(format!(
                "unexpected PING reply: {reply}"
            )))
        }
    }

    async fn close(&self) -> Result<()> {
        *self.conn.write().await = None;
        tracing::debug!("Store connection closed");
        Ok(())
    }
}

enum Slot {
    Scalar(String),
    List(VecDeque<String>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-process store with the same TTL and list semantics as the Redis
/// backend. Expired entries are purged on access, which makes passive
/// expiry observable without a background sweeper.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Resolve LRANGE-style inclusive bounds against a list length.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let n = len as isize;
    let start = (if start < 0 { n + start } else { start }).max(0);
    let stop = (if stop < 0 { n + stop } else { stop }).min(n - 1);
    if start > stop || start >= n || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Glob match supporting at most one `*`, which is all key scans here use.
fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
        }
        None => pattern == key,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_open()?;
        let mut entries = self.entries.lock().expect("store lock");
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
            return Ok(None);
        }
        match entries.get(key) {
            Some(entry) => match &entry.slot {
                Slot::Scalar(value) => Ok(Some(value.clone())),
                Slot::List(_) => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_open()?;
        let mut entries = self.entries.lock().expect("store lock");
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Scalar(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<()> {
        self.check_open()?;
        let mut entries = self.entries.lock().expect("store lock");
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::List(list) => {
                list.push_front(value.to_string());
                Ok(())
            }
            Slot::Scalar(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.check_open()?;
        let mut entries = self.entries.lock().expect("store lock");
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
            return Ok(vec![]);
        }
        match entries.get(key) {
            Some(entry) => match &entry.slot {
                Slot::List(list) => Ok(resolve_range(list.len(), start, stop)
                    .map(|(lo, hi)| list.iter().skip(lo).take(hi - lo + 1).cloned().collect())
                    .unwrap_or_default()),
                Slot::Scalar(_) => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(vec![]),
        }
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        self.check_open()?;
        let mut entries = self.entries.lock().expect("store lock");
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
            return Ok(());
        }
        let now_empty = match entries.get_mut(key) {
            None => return Ok(()),
            Some(entry) => match &mut entry.slot {
                Slot::List(list) => {
                    match resolve_range(list.len(), start, stop) {
                        Some((lo, hi)) => {
                            list.truncate(hi + 1);
                            list.drain(..lo);
                        }
                        None => list.clear(),
                    }
                    list.is_empty()
                }
                Slot::Scalar(_) => return Err(StoreError::WrongType(key.to_string())),
            },
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.check_open()?;
        let mut entries = self.entries.lock().expect("store lock");
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
            return Ok(());
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_open()?;
        self.entries.lock().expect("store lock").remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_open()?;
        let mut entries = self.entries.lock().expect("store lock");
        entries.retain(|_, entry| !entry.expired());
        Ok(entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check_open()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scalar_round_trip() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scalar_expires() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_push_and_range() {
        let store = MemoryStore::new();
        for v in ["a", "b", "c"] {
            store.list_push_front("l", v).await.unwrap();
        }
        // Head of the list is the most recent push.
        assert_eq!(
            store.list_range("l", 0, -1).await.unwrap(),
            vec!["c", "b", "a"]
        );
        assert_eq!(store.list_range("l", 0, 1).await.unwrap(), vec!["c", "b"]);
        assert_eq!(store.list_range("l", -2, -1).await.unwrap(), vec!["b", "a"]);
        assert!(store.list_range("l", 5, 9).await.unwrap().is_empty());
        assert!(store.list_range("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_trim_keeps_head() {
        let store = MemoryStore::new();
        for v in ["a", "b", "c", "d"] {
            store.list_push_front("l", v).await.unwrap();
        }
        store.list_trim("l", 0, 1).await.unwrap();
        assert_eq!(store.list_range("l", 0, -1).await.unwrap(), vec!["d", "c"]);
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            store.list_push_front("k", "x").await,
            Err(StoreError::WrongType(_))
        ));

        store.list_push_front("l", "x").await.unwrap();
        assert!(matches!(store.get("l").await, Err(StoreError::WrongType(_))));
    }

    #[tokio::test]
    async fn test_expire_refreshes_deadline() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_millis(30))
            .await
            .unwrap();
        store.expire("k", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_keys_matches_glob() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("session:1", "a", Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set_with_ttl("session:2", "b", Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set_with_ttl("other:3", "c", Duration::from_secs(60))
            .await
            .unwrap();

        let mut keys = store.keys("session:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session:1", "session:2"]);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        assert!(matches!(store.get("k").await, Err(StoreError::Closed)));
        assert!(matches!(store.ping().await, Err(StoreError::Closed)));
    }

    #[test]
    fn test_resolve_range_bounds() {
        assert_eq!(resolve_range(3, 0, -1), Some((0, 2)));
        assert_eq!(resolve_range(3, 1, 100), Some((1, 2)));
        assert_eq!(resolve_range(3, -2, -1), Some((1, 2)));
        assert_eq!(resolve_range(3, 2, 1), None);
        assert_eq!(resolve_range(0, 0, -1), None);
    }
}
