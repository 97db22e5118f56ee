//! Conversation data model.
//!
//! Two persisted entities — [`Session`] and [`Message`] — stored in separate
//! collections of the document store: sessions are sharded by `ownerId`,
//! messages by `sessionId`. Both carry a `type` discriminator so they can be
//! queried through a single logical view. Field names serialize in the
//! document-store camelCase convention.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants & helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Title given to a session at creation when the caller supplies none.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Titles still considered "unset" when deriving one from the first user
/// message. `"New Chat"` is recognized for records written by older clients.
const PLACEHOLDER_TITLES: [&str; 2] = ["New Conversation", "New Chat"];

/// Maximum length of a derived session title.
pub const TITLE_MAX_CHARS: usize = 50;

/// Maximum length of a summary's last-message preview.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// Mint a session id (`sess_` + 12 hex chars).
pub fn new_session_id() -> String {
    format!("sess_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Mint a message id (`msg_` + 12 hex chars).
pub fn new_message_id() -> String {
    format!("msg_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Whether `title` still counts as an unset placeholder.
pub fn is_placeholder_title(title: &str) -> bool {
    PLACEHOLDER_TITLES.contains(&title)
}

/// Derive a session title from the first user message: the first
/// [`TITLE_MAX_CHARS`] characters, ellipsis-suffixed when truncated.
pub fn derive_title(content: &str) -> String {
    truncate_chars(content, TITLE_MAX_CHARS)
}

/// Truncate to at most `max` characters, appending `...` when shortened.
/// Character-based so multi-byte text is never split mid-codepoint.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles & feedback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    Tool,
}

/// End-user rating on a single assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
    #[default]
    None,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attachments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A typed attachment on a message.
///
/// Backend responses surface attachments in inconsistent shapes; the agent
/// layer normalizes every variant into this closed enum exactly once, and
/// nothing downstream re-inspects backend wire types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    File {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Image {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Document {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// A web citation embedded in the response text.
    UrlCitation {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// A citation pointing into a backend-hosted file.
    FileCitation {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quote: Option<String>,
    },
    /// Fallback for annotation shapes we do not classify.
    Annotation {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls & grounding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Sources and citations backing an assistant response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Grounding {
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub citations: Vec<HashMap<String, String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn session_doc_type() -> String {
    "session".to_owned()
}

fn message_doc_type() -> String {
    "message".to_owned()
}

fn default_true() -> bool {
    true
}

/// A conversation container, owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Document type discriminator, always `"session"`.
    #[serde(rename = "type", default = "session_doc_type")]
    pub doc_type: String,
    /// Shard key.
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub title: String,
    /// Which backend agent this session talks to.
    pub agent_id: String,
    /// Opaque backend-side conversation handle. `None` for legacy records.
    /// Immutable once set, except through an explicit rebind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_thread_ref: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Session {
    /// Build a fresh session for `owner_id` targeting `agent_id`.
    pub fn new(owner_id: &str, agent_id: &str, title: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: new_session_id(),
            doc_type: session_doc_type(),
            owner_id: owner_id.to_owned(),
            tenant_id: None,
            created_at: now,
            last_active_at: now,
            title: title.unwrap_or(DEFAULT_TITLE).to_owned(),
            agent_id: agent_id.to_owned(),
            remote_thread_ref: None,
            is_active: true,
            metadata: HashMap::new(),
        }
    }
}

/// Read-time summary of a session for listing.
///
/// `last_message_preview` and `message_count` are aggregates computed from
/// the messages collection at read time — they are not stored on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One conversation turn. Append-only once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Document type discriminator, always `"message"`.
    #[serde(rename = "type", default = "message_doc_type")]
    pub doc_type: String,
    /// Shard key.
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Embedding for future semantic retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<Grounding>,
    #[serde(default)]
    pub feedback: Feedback,
}

/// What a caller supplies when appending a message; the store mints the id
/// and timestamp.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub role: MessageRole,
    pub content: String,
    pub tokens: Option<u32>,
    pub attachments: Vec<Attachment>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub embedding_vector: Option<Vec<f32>>,
    pub grounding: Option<Grounding>,
}

impl MessageDraft {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            ..Default::default()
        }
    }

    /// Materialize the draft into a [`Message`] for `session_id`.
    pub fn into_message(self, session_id: &str) -> Message {
        Message {
            id: new_message_id(),
            doc_type: message_doc_type(),
            session_id: session_id.to_owned(),
            role: self.role,
            content: self.content,
            tokens: self.tokens,
            created_at: Utc::now(),
            attachments: self.attachments,
            tool_calls: self.tool_calls,
            embedding_vector: self.embedding_vector,
            grounding: self.grounding,
            feedback: Feedback::None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
