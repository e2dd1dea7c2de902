//! Conversation data model and persisted record format
//!
//! Information Hiding:
//! - The on-disk/on-wire envelope (schema version + payload) is private;
//!   backends only see `to_bytes`/`from_bytes`
//! - Timestamp representation (RFC 3339 via chrono serde) is an
//!   implementation detail of the envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{Result, StoreError};

/// Schema version embedded in every persisted record. Readers reject any
/// other version with `MalformedRecord` instead of misparsing it.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(StoreError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Creation time, set once when the message is appended
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Strictly chronological, append-only outside explicit deletion
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Allocate a new empty conversation. Nothing is persisted until the
    /// first save.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: String::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Append a message and bump `updated_at`. Validation of content is the
    /// conversation manager's job; this keeps the invariants only.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        let now = Utc::now();
        self.messages.push(Message {
            role,
            content: content.into(),
            timestamp: now,
        });
        self.updated_at = now;
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            updated_at: self.updated_at,
            message_count: self.messages.len(),
        }
    }

    /// Serialize into the versioned record envelope both backends persist.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let envelope = RecordEnvelope {
            version: SCHEMA_VERSION,
            conversation: self.clone(),
        };
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }

    /// Parse a record envelope. Fails with `MalformedRecord` when the bytes
    /// do not match the expected schema version or shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::malformed("", format!("invalid record envelope: {e}")))?;

        if probe.version != SCHEMA_VERSION {
            return Err(StoreError::malformed(
                "",
                format!(
                    "unsupported schema version {} (expected {})",
                    probe.version, SCHEMA_VERSION
                ),
            ));
        }

        let envelope: RecordEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::malformed("", format!("invalid conversation record: {e}")))?;

        Ok(envelope.conversation)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight listing entry: everything the UI needs without loading
/// message bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Backend-reported aggregate, recomputed on every call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub conversations: u64,
    pub approx_bytes: u64,
    pub backend: String,
    pub connected: bool,
}

#[derive(Serialize, Deserialize)]
struct RecordEnvelope {
    version: u32,
    conversation: Conversation,
}

/// Partial parse used to check the schema version before committing to the
/// full record shape.
#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}
