//! The store seam.
//!
//! One trait, two interchangeable implementations ([`crate::DurableStore`],
//! [`crate::MemoryStore`]), selected at construction time by the façade.
//!
//! Failure semantics: not-found and ownership mismatch are values
//! (`None` / `false` / empty), never errors. `Err` is reserved for
//! infrastructure failure, which is what triggers the façade's fallback.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use sb_domain::chat::{Feedback, Message, MessageDraft, Session, SessionSummary};
use sb_domain::Result;

/// Inputs for creating a session. The store mints the id and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub owner_id: String,
    pub tenant_id: Option<String>,
    pub agent_id: String,
    /// `None` uses the placeholder title, later replaced by the first user
    /// message.
    pub title: Option<String>,
    pub remote_thread_ref: Option<String>,
    pub metadata: HashMap<String, Value>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a session. Id collisions are resolved internally (regenerate
    /// and re-insert) so callers never observe a duplicate.
    async fn create_session(&self, new: NewSession) -> Result<Session>;

    /// Active sessions for `owner_id`, newest activity first, at most
    /// `limit`. Summaries carry read-time aggregates from the message side.
    async fn list_sessions(
        &self,
        owner_id: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionSummary>>;

    /// Owner-checked fetch. A mismatched owner, an unknown id, and a
    /// soft-deleted session all read as `None`.
    async fn get_session(&self, id: &str, owner_id: &str) -> Result<Option<Session>>;

    /// Append a message after verifying the session exists and belongs to
    /// `owner_id`. Returns the generated message id, or `None` when the
    /// session check fails. Bumps the session's `lastActiveAt`; the first
    /// user message also replaces a placeholder title.
    async fn append_message(
        &self,
        session_id: &str,
        owner_id: &str,
        draft: MessageDraft,
    ) -> Result<Option<String>>;

    /// Soft-delete: flip `isActive`, bump `lastActiveAt`.
    async fn soft_delete(&self, id: &str, owner_id: &str) -> Result<bool>;

    /// All messages of a session, ascending by `createdAt`.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Mutate one message's feedback field in place.
    async fn update_feedback(
        &self,
        session_id: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<bool>;

    /// Bind a session to a new remote thread. The only write path allowed
    /// to change `remoteThreadRef` after it is first set.
    async fn rebind_thread(
        &self,
        session_id: &str,
        owner_id: &str,
        thread_ref: &str,
    ) -> Result<bool>;
}
