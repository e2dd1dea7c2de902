//! Search Index Adapter
//!
//! Information Hiding:
//! - RediSearch command syntax and reply shapes are contained here
//! - Capability detection happens once at construction; callers only ever
//!   see `IndexQuery::Ranked` or `IndexQuery::Unsupported`
//!
//! The adapter maintains the indexed projection of a conversation (title,
//! flattened content, numeric `updated_at`) inside the record hash. When the
//! server has no search module, `query` reports `Unsupported` so the primary
//! store falls back to a brute-force scan instead of silently returning
//! nothing.

use redis::aio::MultiplexedConnection;
use redis::Value;
use tracing::{debug, warn};

use super::redis_store::conversation_key;
use super::{query_keywords, Result, StoreError};
use crate::core::models::Conversation;

pub(crate) const INDEX_NAME: &str = "conversations_idx";

/// One indexed match; `updated_at` (unix seconds) carries the tie-break key
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub id: String,
    pub score: f64,
    pub updated_at: i64,
}

/// Result of an index query, distinguishable from an empty match list
#[derive(Debug)]
pub enum IndexQuery {
    Ranked(Vec<IndexMatch>),
    /// Native indexing is not available on this server; the caller must
    /// fall back to a brute-force scan
    Unsupported,
}

pub struct SearchIndex {
    conn: MultiplexedConnection,
    supported: bool,
}

impl SearchIndex {
    /// Probe the server for a search module and create the index if one is
    /// available. Never fails: an un-probeable or module-less server yields
    /// an adapter in unsupported mode.
    pub async fn initialize(conn: MultiplexedConnection) -> Self {
        let mut probe = conn.clone();
        let modules: std::result::Result<Value, redis::RedisError> =
            redis::cmd("MODULE").arg("LIST").query_async(&mut probe).await;
        let supported = match modules {
            Ok(reply) => value_mentions_search(&reply),
            Err(e) => {
                warn!("[SearchIndex] Could not probe server modules: {}", e);
                false
            }
        };

        let mut index = Self { conn, supported };

        if index.supported {
            if let Err(e) = index.ensure_index().await {
                warn!(
                    "[SearchIndex] Could not create search index, degrading to brute-force: {}",
                    e
                );
                index.supported = false;
            } else {
                debug!("[SearchIndex] Native indexed search available");
            }
        } else {
            warn!("[SearchIndex] No search module on server - queries will report unsupported");
        }

        index
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    async fn ensure_index(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: std::result::Result<Value, redis::RedisError> = redis::cmd("FT.CREATE")
            .arg(INDEX_NAME)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg("conversation:")
            .arg("SCHEMA")
            .arg("title")
            .arg("TEXT")
            .arg("WEIGHT")
            .arg("2.0")
            .arg("content")
            .arg("TEXT")
            .arg("updated_at")
            .arg("NUMERIC")
            .arg("SORTABLE")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => {
                debug!("[SearchIndex] Created index '{}'", INDEX_NAME);
                Ok(())
            }
            // Re-creating on reconnect is expected
            Err(e) if e.to_string().contains("Index already exists") => Ok(()),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    /// Refresh the indexed projection for a conversation. Idempotent:
    /// re-indexing unchanged content writes identical field values.
    pub async fn index(&self, conversation: &Conversation) -> Result<()> {
        if !self.supported {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let key = conversation_key(&conversation.id);
        let projection: &[(&str, String)] = &[
            ("title", conversation.title.clone()),
            ("content", super::searchable_text(conversation)),
            ("updated_at", conversation.updated_at.timestamp().to_string()),
        ];

        let _: () = redis::cmd("HSET")
            .arg(&key)
            .arg(projection)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!("[SearchIndex] Indexed conversation '{}'", conversation.id);
        Ok(())
    }

    /// Rank conversations matching the query text, relevance descending,
    /// ties broken by most-recent `updated_at` first
    pub async fn query(&self, query: &str) -> Result<IndexQuery> {
        if !self.supported {
            return Ok(IndexQuery::Unsupported);
        }

        let keywords = query_keywords(query);
        if keywords.is_empty() {
            return Ok(IndexQuery::Ranked(Vec::new()));
        }
        let terms = keywords.join(" ");
        let expr = format!("@title:({terms}) | @content:({terms})");

        let mut conn = self.conn.clone();
        let reply: std::result::Result<Value, redis::RedisError> = redis::cmd("FT.SEARCH")
            .arg(INDEX_NAME)
            .arg(&expr)
            .arg("WITHSCORES")
            .arg("RETURN")
            .arg(2)
            .arg("id")
            .arg("updated_at")
            .arg("LIMIT")
            .arg(0)
            .arg(10_000)
            .query_async(&mut conn)
            .await;

        let raw = match reply {
            Ok(raw) => raw,
            // A response error (index dropped, syntax rejected) means the
            // native path cannot serve this query; signal it rather than
            // masking it as zero results
            Err(e) if e.kind() == redis::ErrorKind::ResponseError => {
                warn!("[SearchIndex] Indexed query failed, reporting unsupported: {}", e);
                return Ok(IndexQuery::Unsupported);
            }
            Err(e) => return Err(StoreError::Unavailable(e.to_string())),
        };

        let mut matches = parse_search_reply(raw)?;
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });

        debug!("[SearchIndex] Query matched {} conversations", matches.len());
        Ok(IndexQuery::Ranked(matches))
    }

    /// Drop a conversation's entries from the index by clearing its
    /// projection fields
    pub async fn remove(&self, id: &str) -> Result<()> {
        if !self.supported {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let _: () = redis::cmd("HDEL")
            .arg(conversation_key(id))
            .arg("title")
            .arg("content")
            .arg("updated_at")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!("[SearchIndex] Removed index entries for '{}'", id);
        Ok(())
    }
}

/// FT.SEARCH with WITHSCORES and RETURN replies as
/// `[total, key, score, [field, value, ...], key, score, ...]`
fn parse_search_reply(raw: Value) -> Result<Vec<IndexMatch>> {
    let items = match raw {
        Value::Array(items) => items,
        other => {
            return Err(StoreError::Unavailable(format!(
                "unexpected FT.SEARCH reply: {other:?}"
            )))
        }
    };

    let mut matches = Vec::new();
    let mut i = 1; // skip the leading total count
    while i + 2 < items.len() {
        let score = value_to_f64(&items[i + 1]).unwrap_or(0.0);
        let mut id = None;
        let mut updated_at = 0i64;

        if let Value::Array(fields) = &items[i + 2] {
            let mut j = 0;
            while j + 1 < fields.len() {
                match value_to_string(&fields[j]).as_deref() {
                    Some("id") => id = value_to_string(&fields[j + 1]),
                    Some("updated_at") => {
                        updated_at = value_to_i64(&fields[j + 1]).unwrap_or(0);
                    }
                    _ => {}
                }
                j += 2;
            }
        }

        if let Some(id) = id {
            matches.push(IndexMatch {
                id,
                score,
                updated_at,
            });
        }
        i += 3;
    }

    Ok(matches)
}

fn value_mentions_search(value: &Value) -> bool {
    match value {
        Value::BulkString(bytes) => String::from_utf8_lossy(bytes)
            .to_lowercase()
            .contains("search"),
        Value::SimpleString(s) | Value::VerbatimString { text: s, .. } => {
            s.to_lowercase().contains("search")
        }
        Value::Array(items) | Value::Set(items) => items.iter().any(value_mentions_search),
        Value::Map(pairs) => pairs
            .iter()
            .any(|(k, v)| value_mentions_search(k) || value_mentions_search(v)),
        _ => false,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Double(d) => Some(*d),
        _ => value_to_string(value).and_then(|s| s.parse().ok()),
    }
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        _ => value_to_string(value).and_then(|s| s.parse().ok()),
    }
}
