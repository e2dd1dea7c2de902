//! File Conversation Storage (fallback backend)
//!
//! Information Hiding:
//! - File naming and the JSON record envelope are hidden from users
//! - Write locking and atomic-rename persistence are internal
//!
//! One human-inspectable JSON file per conversation. Works with no network
//! at all, so it is always eligible as the facade's fallback. A corrupted
//! record only ever fails operations on its own id; bulk operations skip
//! it and keep going.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    keyword_score, query_keywords, rank_hits, rank_summaries, searchable_text, CleanupReport,
    ConversationStore, Result, SearchHit, StoreError,
};
use crate::config::FallbackConfig;
use crate::core::models::{Conversation, ConversationSummary, StorageStats};

const RECORD_PREFIX: &str = "conversation_";
const RECORD_SUFFIX: &str = ".json";

pub struct FileStore {
    directory: PathBuf,
    /// Guards mutating filesystem operations; acquired per record, never
    /// across a whole bulk sweep
    write_lock: Mutex<()>,
}

impl FileStore {
    pub async fn open(config: &FallbackConfig) -> Result<Self> {
        let directory = PathBuf::from(&config.directory);
        fs::create_dir_all(&directory).await?;
        debug!("[FileStore] Conversations directory: {:?}", directory);

        Ok(Self {
            directory,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.directory
            .join(format!("{RECORD_PREFIX}{id}{RECORD_SUFFIX}"))
    }

    async fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(RECORD_PREFIX) && name.ends_with(RECORD_SUFFIX) {
                paths.push(path);
            }
        }

        Ok(paths)
    }

    async fn read_record(&self, path: &Path) -> Result<Conversation> {
        let id = record_id(path);
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id))
            }
            Err(e) => return Err(e.into()),
        };

        Conversation::from_bytes(&bytes).map_err(|e| e.with_record_id(&id))
    }
}

/// Conversation id encoded in a record filename
fn record_id(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(RECORD_PREFIX))
        .and_then(|n| n.strip_suffix(RECORD_SUFFIX))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl ConversationStore for FileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let bytes = conversation.to_bytes()?;
        let path = self.record_path(&conversation.id);
        let staging = path.with_extension("json.tmp");

        // Write-then-rename keeps the prior record intact if the write dies
        let _guard = self.write_lock.lock().await;
        fs::write(&staging, &bytes).await?;
        fs::rename(&staging, &path).await?;

        debug!(
            "[FileStore] Saved conversation '{}' ({} messages) to {:?}",
            conversation.id,
            conversation.messages.len(),
            path
        );
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Conversation> {
        let conversation = self.read_record(&self.record_path(id)).await?;
        debug!("[FileStore] Loaded conversation '{}'", id);
        Ok(conversation)
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();

        for path in self.record_paths().await? {
            match self.read_record(&path).await {
                Ok(conversation) => summaries.push(conversation.summary()),
                Err(e) => {
                    warn!("[FileStore] Skipping unreadable record {:?}: {}", path, e);
                }
            }
        }

        rank_summaries(&mut summaries);
        debug!("[FileStore] Listed {} conversations", summaries.len());
        Ok(summaries)
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let keywords = query_keywords(query);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for path in self.record_paths().await? {
            let conversation = match self.read_record(&path).await {
                Ok(conversation) => conversation,
                Err(e) => {
                    warn!("[FileStore] Skipping unreadable record {:?}: {}", path, e);
                    continue;
                }
            };

            let score = keyword_score(
                &keywords,
                &conversation.title,
                &searchable_text(&conversation),
            );
            if score > 0.0 {
                hits.push(SearchHit {
                    summary: conversation.summary(),
                    score,
                });
            }
        }

        rank_hits(&mut hits);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);

        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("[FileStore] Deleted conversation '{}'", id);
                Ok(())
            }
            // Deleting a missing id is not an error
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn cleanup(&self, older_than: Duration) -> Result<CleanupReport> {
        let cutoff = Utc::now() - older_than;
        let mut report = CleanupReport::default();

        for path in self.record_paths().await? {
            let conversation = match self.read_record(&path).await {
                Ok(conversation) => conversation,
                Err(e) => {
                    warn!("[FileStore] Skipping unreadable record {:?}: {}", path, e);
                    report.skipped += 1;
                    continue;
                }
            };

            if conversation.updated_at < cutoff {
                match self.delete(&conversation.id).await {
                    Ok(()) => report.deleted += 1,
                    Err(e) => {
                        warn!("[FileStore] Could not delete {:?}: {}", path, e);
                        report.skipped += 1;
                    }
                }
            }
        }

        info!(
            "[FileStore] Cleanup removed {} conversations ({} skipped)",
            report.deleted, report.skipped
        );
        Ok(report)
    }

    async fn stats(&self) -> Result<StorageStats> {
        let mut conversations = 0u64;
        let mut approx_bytes = 0u64;

        for path in self.record_paths().await? {
            conversations += 1;
            if let Ok(metadata) = fs::metadata(&path).await {
                approx_bytes += metadata.len();
            }
        }

        Ok(StorageStats {
            conversations,
            approx_bytes,
            backend: self.backend_name().to_string(),
            connected: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Role;
    use tempfile::TempDir;

    async fn store_in(dir: &TempDir) -> FileStore {
        FileStore::open(&FallbackConfig {
            directory: dir.path().to_string_lossy().into_owned(),
        })
        .await
        .unwrap()
    }

    fn conversation(title: &str, lines: &[(Role, &str)]) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.title = title.to_string();
        for (role, content) in lines {
            conversation.push(*role, *content);
        }
        conversation
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let original = conversation(
            "greetings",
            &[(Role::User, "Hello"), (Role::Assistant, "Hi there")],
        );
        store.save(&original).await.unwrap();

        let loaded = store.load(&original.id).await.unwrap();
        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.messages, original.messages);
        assert_eq!(loaded.updated_at, original.updated_at);
    }

    #[tokio::test]
    async fn test_load_nonexistent_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let result = store.load("nonexistent").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let record = conversation("doomed", &[(Role::User, "bye")]);
        store.save(&record).await.unwrap();

        store.delete(&record.id).await.unwrap();
        // Second delete of the same id must also succeed
        store.delete(&record.id).await.unwrap();
        assert!(matches!(
            store.load(&record.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_orders_by_updated_at_descending() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let mut first = conversation("first", &[(Role::User, "a")]);
        first.updated_at = Utc::now() - Duration::hours(2);
        let mut second = conversation("second", &[(Role::User, "b")]);
        second.updated_at = Utc::now() - Duration::hours(1);
        let third = conversation("third", &[(Role::User, "c")]);

        store.save(&first).await.unwrap();
        store.save(&third).await.unwrap();
        store.save(&second).await.unwrap();

        let titles: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_corrupted_record_does_not_abort_list() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let good = conversation("intact", &[(Role::User, "fine")]);
        store.save(&good).await.unwrap();

        std::fs::write(dir.path().join("conversation_broken.json"), b"{ not json").unwrap();
        std::fs::write(
            dir.path().join("conversation_future.json"),
            serde_json::json!({ "version": 42, "conversation": {} }).to_string(),
        )
        .unwrap();

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, good.id);

        // Loading the corrupt record directly still reports it
        let result = store.load("broken").await;
        assert!(matches!(result, Err(StoreError::MalformedRecord { .. })));
    }

    #[tokio::test]
    async fn test_search_matches_message_content() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let matching = conversation("crash report", &[(Role::User, "let's debug the crash")]);
        let other = conversation("lunch plans", &[(Role::User, "pizza or ramen?")]);
        store.save(&matching).await.unwrap();
        store.save(&other).await.unwrap();

        let hits = store.search("debugging").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].summary.id, matching.id);
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_search_ranks_by_score_then_recency() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let mut heavy = conversation(
            "rust rust",
            &[(Role::User, "rust everywhere, rust all the way")],
        );
        heavy.updated_at = Utc::now() - Duration::days(5);
        let mut light_old = conversation("notes", &[(Role::User, "some rust here")]);
        light_old.updated_at = Utc::now() - Duration::days(3);
        let light_new = conversation("notes", &[(Role::User, "some rust here")]);

        store.save(&heavy).await.unwrap();
        store.save(&light_old).await.unwrap();
        store.save(&light_new).await.unwrap();

        let hits = store.search("rust").await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.summary.id.as_str()).collect();
        assert_eq!(ids[0], heavy.id);
        assert_eq!(ids[1], light_new.id);
        assert_eq!(ids[2], light_old.id);
    }

    #[tokio::test]
    async fn test_cleanup_removes_exactly_the_expired() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let mut stale = conversation("stale", &[(Role::User, "old news")]);
        stale.updated_at = Utc::now() - Duration::days(40);
        let fresh = conversation("fresh", &[(Role::User, "new stuff")]);

        store.save(&stale).await.unwrap();
        store.save(&fresh).await.unwrap();

        let report = store.cleanup(Duration::days(30)).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped, 0);
        assert!(matches!(
            store.load(&stale.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.load(&fresh.id).await.is_ok());

        // A second sweep finds nothing more to remove
        let again = store.cleanup(Duration::days(30)).await.unwrap();
        assert_eq!(again.deleted, 0);
    }

    #[tokio::test]
    async fn test_cleanup_counts_corrupted_records_as_skipped() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        std::fs::write(dir.path().join("conversation_junk.json"), b"junk").unwrap();

        let report = store.cleanup(Duration::days(30)).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_stats_reports_count_and_size() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        store
            .save(&conversation("one", &[(Role::User, "x")]))
            .await
            .unwrap();
        store
            .save(&conversation("two", &[(Role::User, "y")]))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.conversations, 2);
        assert!(stats.approx_bytes > 0);
        assert_eq!(stats.backend, "file");
        assert!(stats.connected);
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let dir = TempDir::new().unwrap();
        let record = conversation("durable", &[(Role::User, "persistent message")]);

        {
            let store = store_in(&dir).await;
            store.save(&record).await.unwrap();
        }

        {
            let store = store_in(&dir).await;
            let loaded = store.load(&record.id).await.unwrap();
            assert_eq!(loaded.messages[0].content, "persistent message");
        }
    }
}
