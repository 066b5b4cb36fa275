//! # recall-memory
//!
//! Persistent, budget-bounded conversation memory for agent loops.
//!
//! This crate provides:
//! - A [`store::Store`] abstraction over a Redis-style key/value-and-list
//!   backend, with a production [`store::RedisStore`] and an in-process
//!   [`store::MemoryStore`]
//! - A [`registry::SessionRegistry`] for session metadata records with
//!   TTL-based passive expiry
//! - A [`history::MessageLog`] of ordered turns with a retained-length cap
//! - A [`context::ContextBudgeter`] that counts tokens and compresses a
//!   history to fit a token budget
//! - A [`memory::ConversationMemory`] facade wiring the pieces together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use recall_core::{Message, MemoryConfig};
//! use recall_memory::{ConversationMemory, RedisStore};
//!
//! let config = MemoryConfig::load_validated()?;
//! let store = Arc::new(RedisStore::connect(config.store.clone()).await?);
//! let memory = ConversationMemory::new(store, &config);
//!
//! let session = memory.get_or_create(None, Some("alice")).await?;
//! let context = memory.recall(&session.session_id).await?;
//! // ... hand `context` to the model, then record both turns:
//! memory.record_turn(&session.session_id, &Message::user("hi")).await?;
//! memory.record_turn(&session.session_id, &Message::assistant("hello")).await?;
//! ```
//!
//! ## Failure model
//!
//! Store operations return typed errors and never retry internally; a
//! caller that sees [`StoreError::Connection`] is expected to continue the
//! conversation turn without memory rather than abort it. Unknown sessions
//! surface as [`StoreError::NotFound`], and corrupt stored records degrade
//! to the same, never to a parse panic.

pub mod context;
pub mod history;
pub mod memory;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use context::{BudgetCheck, BudgetConfig, ContextBudgeter, ContextStats};
pub use history::MessageLog;
pub use memory::ConversationMemory;
pub use registry::SessionRegistry;
pub use store::{MemoryStore, RedisStore, Store, StoreError};
