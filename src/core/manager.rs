//! Conversation Manager - lifecycle and context windowing
//!
//! Information Hiding:
//! - Which backend persists a conversation is invisible here; everything
//!   goes through the store facade
//! - Title derivation and input validation are internalized so callers
//!   just append turns
//!
//! The manager hands the inference layer its context window and nothing
//! else; the store core never calls the model directly.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::core::models::{Conversation, ConversationSummary, Message, Role, StorageStats};
use crate::storage::{CleanupReport, Result, SearchHit, StoreError, StoreFacade};

/// Longest derived title before truncation
const TITLE_MAX_CHARS: usize = 48;

pub struct ConversationManager {
    store: Arc<StoreFacade>,
    max_context_messages: usize,
}

impl ConversationManager {
    pub fn new(store: Arc<StoreFacade>, max_context_messages: usize) -> Self {
        Self {
            store,
            max_context_messages,
        }
    }

    /// Allocate a new empty conversation. The id is assigned immediately;
    /// no record is persisted until the first message is appended (or the
    /// caller saves explicitly).
    pub fn start_new(&self) -> Conversation {
        let conversation = Conversation::new();
        info!("[ConversationManager] Started conversation '{}'", conversation.id);
        conversation
    }

    /// Append a turn, bump `updated_at` and persist through the facade.
    /// Empty user/assistant content is rejected with `Validation`.
    pub async fn append(
        &self,
        conversation: &mut Conversation,
        role: Role,
        content: &str,
    ) -> Result<()> {
        if matches!(role, Role::User | Role::Assistant) && content.trim().is_empty() {
            return Err(StoreError::Validation(format!(
                "{} message content must not be empty",
                role.as_str()
            )));
        }

        if conversation.title.is_empty() && role == Role::User {
            conversation.title = derive_title(content);
        }

        conversation.push(role, content);
        self.store.save(conversation).await?;

        debug!(
            "[ConversationManager] Appended {} message to '{}'",
            role.as_str(),
            conversation.id
        );
        Ok(())
    }

    /// The most recent messages in chronological order - the exact input
    /// handed to the inference layer. `None` uses the configured default.
    pub fn context_window<'a>(
        &self,
        conversation: &'a Conversation,
        max_messages: Option<usize>,
    ) -> &'a [Message] {
        let max = max_messages.unwrap_or(self.max_context_messages);
        let start = conversation.messages.len().saturating_sub(max);
        &conversation.messages[start..]
    }

    pub async fn rename(&self, conversation: &mut Conversation, title: &str) -> Result<()> {
        if title.trim().is_empty() {
            return Err(StoreError::Validation(
                "conversation title must not be empty".to_string(),
            ));
        }
        conversation.title = title.trim().to_string();
        conversation.updated_at = Utc::now();
        self.store.save(conversation).await
    }

    pub async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.store.save(conversation).await
    }

    pub async fn load(&self, id: &str) -> Result<Conversation> {
        self.store.load(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await
    }

    pub async fn list_all(&self) -> Result<Vec<ConversationSummary>> {
        self.store.list().await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.store.search(query).await
    }

    pub async fn cleanup_old(&self, older_than: Duration) -> Result<CleanupReport> {
        self.store.cleanup(older_than).await
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        self.store.stats().await
    }

    pub async fn active_backend(&self) -> &'static str {
        self.store.active_backend().await
    }
}

/// First line of the first user message, truncated on a char boundary
fn derive_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= TITLE_MAX_CHARS {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}…", truncated.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackConfig, PrimaryConfig, StorageConfig};
    use tempfile::TempDir;

    async fn manager_in(dir: &TempDir, max_context: usize) -> ConversationManager {
        let config = StorageConfig {
            use_primary: false,
            primary: PrimaryConfig::default(),
            fallback: FallbackConfig {
                directory: dir.path().to_string_lossy().into_owned(),
            },
            retention_days: 30,
        };
        let facade = StoreFacade::initialize(&config).await.unwrap();
        ConversationManager::new(Arc::new(facade), max_context)
    }

    #[tokio::test]
    async fn test_start_new_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 10).await;

        let conversation = manager.start_new();
        assert!(conversation.messages.is_empty());
        assert!(matches!(
            manager.load(&conversation.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_append_persists_and_derives_title() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 10).await;

        let mut conversation = manager.start_new();
        manager
            .append(&mut conversation, Role::User, "How do lifetimes work?")
            .await
            .unwrap();
        manager
            .append(&mut conversation, Role::Assistant, "They name borrow scopes.")
            .await
            .unwrap();

        assert_eq!(conversation.title, "How do lifetimes work?");

        let loaded = manager.load(&conversation.id).await.unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.title, "How do lifetimes work?");
    }

    #[tokio::test]
    async fn test_append_rejects_empty_content() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 10).await;

        let mut conversation = manager.start_new();
        let result = manager.append(&mut conversation, Role::User, "   ").await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert!(conversation.messages.is_empty());
    }

    #[tokio::test]
    async fn test_context_window_keeps_most_recent_in_order() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 2).await;

        let mut conversation = manager.start_new();
        manager
            .append(&mut conversation, Role::User, "first question")
            .await
            .unwrap();
        manager
            .append(&mut conversation, Role::Assistant, "first answer")
            .await
            .unwrap();
        manager
            .append(&mut conversation, Role::User, "second question")
            .await
            .unwrap();

        let window = manager.context_window(&conversation, None);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "first answer");
        assert_eq!(window[1].content, "second question");

        // Explicit size overrides the configured default
        let full = manager.context_window(&conversation, Some(10));
        assert_eq!(full.len(), 3);
    }

    #[tokio::test]
    async fn test_rename_persists() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 10).await;

        let mut conversation = manager.start_new();
        manager
            .append(&mut conversation, Role::User, "hello")
            .await
            .unwrap();
        manager
            .rename(&mut conversation, "renamed thread")
            .await
            .unwrap();

        let loaded = manager.load(&conversation.id).await.unwrap();
        assert_eq!(loaded.title, "renamed thread");
    }

    #[tokio::test]
    async fn test_cleanup_old_passthrough() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 10).await;

        let mut stale = manager.start_new();
        manager
            .append(&mut stale, Role::User, "ancient history")
            .await
            .unwrap();
        stale.updated_at = Utc::now() - Duration::days(90);
        manager.save(&stale).await.unwrap();

        let report = manager.cleanup_old(Duration::days(30)).await.unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn test_derive_title_truncates_long_first_line() {
        let long = "a very long question that keeps going well past the limit of a title";
        let title = derive_title(long);
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));

        assert_eq!(derive_title("short one\nsecond line"), "short one");
    }
}
