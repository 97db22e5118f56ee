//! The conversation façade the gateway talks to.
//!
//! Routes every call to the durable store first and degrades to the
//! in-process fallback only when the durable store returns an error.
//! Value-level outcomes (`None`, `false`, empty) pass through untouched:
//! a not-found answered by a healthy store is an answer, not an outage.

use std::sync::Arc;

use sb_domain::chat::{Feedback, Message, MessageDraft, Session, SessionSummary};
use sb_domain::Result;

use crate::memory::MemoryStore;
use crate::traits::{ConversationStore, NewSession};

pub struct ConversationService {
    durable: Option<Arc<dyn ConversationStore>>,
    fallback: Arc<MemoryStore>,
}

/// On `Err` from the durable store, log and re-run the call against the
/// fallback. A macro rather than a helper fn: the operations differ in
/// arity and return type, and async closures would force boxing.
macro_rules! durable_first {
    ($self:ident, $op:literal, $call:ident ( $($arg:expr),* )) => {{
        match &$self.durable {
            Some(durable) => match durable.$call($($arg.clone()),*).await {
                Ok(value) => Ok(value),
                Err(e) => {
                    tracing::warn!(error = %e, op = $op, "durable store failed, serving from fallback");
                    $self.fallback.$call($($arg),*).await
                }
            },
            None => $self.fallback.$call($($arg),*).await,
        }
    }};
}

impl ConversationService {
    pub fn new(durable: Option<Arc<dyn ConversationStore>>) -> Self {
        Self {
            durable,
            fallback: Arc::new(MemoryStore::new()),
        }
    }

    /// Dev mode: fallback only, nothing survives a restart.
    pub fn memory_only() -> Self {
        Self::new(None)
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    pub async fn create_session(&self, new: NewSession) -> Result<Session> {
        durable_first!(self, "create_session", create_session(new))
    }

    pub async fn list_sessions(
        &self,
        owner_id: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionSummary>> {
        durable_first!(self, "list_sessions", list_sessions(owner_id, agent_id, limit))
    }

    pub async fn get_session(&self, id: &str, owner_id: &str) -> Result<Option<Session>> {
        durable_first!(self, "get_session", get_session(id, owner_id))
    }

    pub async fn append_message(
        &self,
        session_id: &str,
        owner_id: &str,
        draft: MessageDraft,
    ) -> Result<Option<String>> {
        durable_first!(self, "append_message", append_message(session_id, owner_id, draft))
    }

    pub async fn soft_delete(&self, id: &str, owner_id: &str) -> Result<bool> {
        durable_first!(self, "soft_delete", soft_delete(id, owner_id))
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        durable_first!(self, "list_messages", list_messages(session_id))
    }

    pub async fn update_feedback(
        &self,
        session_id: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<bool> {
        durable_first!(self, "update_feedback", update_feedback(session_id, message_id, feedback))
    }

    pub async fn rebind_thread(
        &self,
        session_id: &str,
        owner_id: &str,
        thread_ref: &str,
    ) -> Result<bool> {
        durable_first!(self, "rebind_thread", rebind_thread(session_id, owner_id, thread_ref))
    }

    /// Owner-checked message history: `None` when the session is missing,
    /// deleted, or belongs to someone else.
    pub async fn messages_for_owner(
        &self,
        session_id: &str,
        owner_id: &str,
    ) -> Result<Option<Vec<Message>>> {
        match self.get_session(session_id, owner_id).await? {
            Some(_) => Ok(Some(self.list_messages(session_id).await?)),
            None => Ok(None),
        }
    }
}
