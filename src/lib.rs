//! Chatvault - persistent multi-turn chat conversation storage
//!
//! This library stores, retrieves and searches chat conversations behind a
//! single storage contract with two backends: a Redis primary with indexed
//! full-text search, and a local-file fallback that works fully offline.
//! The facade selects a backend at startup and transparently demotes to the
//! fallback if the primary becomes unavailable mid-session.

pub mod cli;
pub mod config;
pub mod core;
pub mod storage;
pub mod utils;

pub use crate::config::Settings;

pub use crate::core::manager::ConversationManager;
pub use crate::core::models::{Conversation, ConversationSummary, Message, Role, StorageStats};

pub use crate::storage::{
    CleanupReport, ConversationStore, FileStore, RedisStore, SearchHit, StoreError, StoreFacade,
};
