//! Conversation Storage Abstraction
//!
//! Information Hiding:
//! - Storage backend implementation details hidden behind trait
//! - Allows swapping between the Redis primary and the file fallback
//!   without API changes
//! - Brute-force search scoring lives here so every backend that degrades
//!   to a linear scan ranks results identically

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::core::models::{Conversation, ConversationSummary, StorageStats};

pub mod error;
pub mod facade;
pub mod file_store;
pub mod redis_store;
pub mod search_index;

pub use error::{Result, StoreError};
pub use facade::StoreFacade;
pub use file_store::FileStore;
pub use redis_store::RedisStore;

/// A search match: the conversation summary plus its relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub summary: ConversationSummary,
    pub score: f64,
}

/// Outcome of a retention sweep. `skipped` counts records that could not be
/// examined (corrupted or unreadable) and were left in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub skipped: usize,
}

/// Trait defining the conversation store contract
/// Both backends (Redis primary, file fallback) implement this; the facade
/// routes every caller through it
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Stable identity of the backend, reported in stats and logs
    fn backend_name(&self) -> &'static str;

    /// Upsert the full conversation record (atomic per conversation)
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Load a conversation by id, `NotFound` if absent
    async fn load(&self, id: &str) -> Result<Conversation>;

    /// All conversation summaries, ordered by `updated_at` descending
    async fn list(&self) -> Result<Vec<ConversationSummary>>;

    /// Full-text search over titles and message content, ranked by
    /// relevance descending with ties broken by `updated_at` descending
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;

    /// Remove a conversation and its index entries; deleting a missing id
    /// is not an error
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every conversation whose `updated_at` precedes
    /// `now - older_than`, record by record
    async fn cleanup(&self, older_than: Duration) -> Result<CleanupReport>;

    /// Backend-reported aggregate, recomputed on demand
    async fn stats(&self) -> Result<StorageStats>;
}

/// Searchable text cap, matching the primary backend's indexed `content`
/// field size
pub(crate) const SEARCHABLE_TEXT_MAX: usize = 5000;

/// Flatten a conversation's messages into the text both backends run
/// keyword matching against. Built identically at index time (primary) and
/// scan time (fallback) so rankings agree across backends.
pub(crate) fn searchable_text(conversation: &Conversation) -> String {
    let mut text = String::new();
    for message in &conversation.messages {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(message.role.as_str());
        text.push_str(": ");
        text.push_str(&message.content);
    }
    if text.chars().count() > SEARCHABLE_TEXT_MAX {
        text = text.chars().take(SEARCHABLE_TEXT_MAX).collect();
    }
    text
}

/// Lowercased alphanumeric keywords of a query
pub(crate) fn query_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// A query keyword matches a stored word when they are equal or when one is
/// a prefix of the other ("debugging" finds "debug" and vice versa). Prefix
/// matching kicks in at 3 chars so short tokens stay exact, keeping a rough
/// parity with the stemming the native index applies.
fn word_matches(keyword: &str, word: &str) -> bool {
    if keyword == word {
        return true;
    }
    keyword.len() >= 3 && word.len() >= 3 && (word.starts_with(keyword) || keyword.starts_with(word))
}

fn keyword_hits(keywords: &[String], text: &str) -> usize {
    let words = query_keywords(text);
    keywords
        .iter()
        .map(|keyword| {
            words
                .iter()
                .filter(|word| word_matches(keyword, word))
                .count()
        })
        .sum()
}

/// Brute-force relevance score: occurrence count of each keyword, with
/// title matches weighted 2.0 (same weight the native index schema uses)
pub(crate) fn keyword_score(keywords: &[String], title: &str, content: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    2.0 * keyword_hits(keywords, title) as f64 + keyword_hits(keywords, content) as f64
}

/// Relevance descending, ties broken by most-recent `updated_at` first.
/// The same ordering rule is applied on every search path so the
/// caller-visible ranking does not depend on the active backend.
pub(crate) fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.summary.updated_at.cmp(&a.summary.updated_at))
    });
}

/// Most-recent first, the ordering contract of `list()`
pub(crate) fn rank_summaries(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Role;
    use chrono::{TimeZone, Utc};

    fn conversation_with(title: &str, lines: &[&str]) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.title = title.to_string();
        for line in lines {
            conversation.push(Role::User, *line);
        }
        conversation
    }

    #[test]
    fn test_keyword_score_counts_occurrences() {
        let keywords = query_keywords("debug");
        let score = keyword_score(&keywords, "no match here", "debug the crash, debug it");
        assert_eq!(score, 2.0);
    }

    #[test]
    fn test_keyword_score_weights_title() {
        let keywords = query_keywords("rust");
        let score = keyword_score(&keywords, "rust questions", "learning rust");
        assert_eq!(score, 3.0);
    }

    #[test]
    fn test_keyword_score_case_insensitive() {
        let keywords = query_keywords("DEBUGGING");
        let score = keyword_score(&keywords, "", "we were Debugging all night");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_keyword_prefix_matches_stem() {
        // "debugging" finds "debug" the way the stemming index would
        let keywords = query_keywords("debugging");
        let score = keyword_score(&keywords, "", "let's debug the crash");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_short_keywords_stay_exact() {
        let keywords = query_keywords("it");
        let score = keyword_score(&keywords, "", "iteration over items");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_query_keywords_strips_punctuation() {
        assert_eq!(
            query_keywords("let's debug, quickly!"),
            vec!["let", "s", "debug", "quickly"]
        );
    }

    #[test]
    fn test_searchable_text_prefixes_roles() {
        let conversation = conversation_with("t", &["hello there"]);
        assert_eq!(searchable_text(&conversation), "user: hello there");
    }

    #[test]
    fn test_searchable_text_capped() {
        let long = "x".repeat(SEARCHABLE_TEXT_MAX * 2);
        let conversation = conversation_with("t", &[long.as_str()]);
        assert_eq!(
            searchable_text(&conversation).chars().count(),
            SEARCHABLE_TEXT_MAX
        );
    }

    #[test]
    fn test_rank_hits_ties_broken_by_recency() {
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let hit = |id: &str, updated_at, score| SearchHit {
            summary: ConversationSummary {
                id: id.to_string(),
                title: String::new(),
                updated_at,
                message_count: 0,
            },
            score,
        };

        let mut hits = vec![
            hit("old-low", older, 1.0),
            hit("new-low", newer, 1.0),
            hit("old-high", older, 5.0),
        ];
        rank_hits(&mut hits);

        let order: Vec<&str> = hits.iter().map(|h| h.summary.id.as_str()).collect();
        assert_eq!(order, vec!["old-high", "new-low", "old-low"]);
    }
}
