//! In-process fallback store.
//!
//! Holds the same entities as [`crate::DurableStore`] in a `RwLock`ed map so
//! the gateway keeps serving conversations while the document store is down.
//! Contents do not survive a restart, and sessions created here are invisible
//! once the durable store recovers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use sb_domain::chat::{
    self, Feedback, Message, MessageDraft, MessageRole, Session, SessionSummary,
    PREVIEW_MAX_CHARS,
};
use sb_domain::Result;

use crate::traits::{ConversationStore, NewSession};

struct SessionRecord {
    session: Session,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions held, soft-deleted included.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_session(&self, new: NewSession) -> Result<Session> {
        let mut session = Session::new(&new.owner_id, &new.agent_id, new.title.as_deref());
        session.tenant_id = new.tenant_id;
        session.remote_thread_ref = new.remote_thread_ref;
        session.metadata = new.metadata;

        let mut records = self.records.write();
        // The id space is 48 bits; regenerate rather than clobber on the
        // astronomically rare collision.
        while records.contains_key(&session.id) {
            session.id = chat::new_session_id();
        }
        records.insert(
            session.id.clone(),
            SessionRecord {
                session: session.clone(),
                messages: Vec::new(),
            },
        );
        Ok(session)
    }

    async fn list_sessions(
        &self,
        owner_id: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionSummary>> {
        let records = self.records.read();
        let mut summaries: Vec<SessionSummary> = records
            .values()
            .filter(|r| {
                r.session.is_active
                    && r.session.owner_id == owner_id
                    && agent_id.map_or(true, |a| r.session.agent_id == a)
            })
            .map(|r| SessionSummary {
                id: r.session.id.clone(),
                title: r.session.title.clone(),
                agent_id: r.session.agent_id.clone(),
                last_message_preview: r
                    .messages
                    .last()
                    .map(|m| chat::truncate_chars(&m.content, PREVIEW_MAX_CHARS)),
                message_count: r.messages.len(),
                created_at: r.session.created_at,
                last_active_at: r.session.last_active_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn get_session(&self, id: &str, owner_id: &str) -> Result<Option<Session>> {
        let records = self.records.read();
        Ok(records
            .get(id)
            .filter(|r| r.session.is_active && r.session.owner_id == owner_id)
            .map(|r| r.session.clone()))
    }

    async fn append_message(
        &self,
        session_id: &str,
        owner_id: &str,
        draft: MessageDraft,
    ) -> Result<Option<String>> {
        let mut records = self.records.write();
        let Some(record) = records
            .get_mut(session_id)
            .filter(|r| r.session.is_active && r.session.owner_id == owner_id)
        else {
            return Ok(None);
        };

        let message = draft.into_message(session_id);
        record.session.last_active_at = Utc::now();
        if message.role == MessageRole::User
            && chat::is_placeholder_title(&record.session.title)
            && !message.content.trim().is_empty()
        {
            record.session.title = chat::derive_title(&message.content);
        }
        let id = message.id.clone();
        record.messages.push(message);
        Ok(Some(id))
    }

    async fn soft_delete(&self, id: &str, owner_id: &str) -> Result<bool> {
        let mut records = self.records.write();
        let Some(record) = records
            .get_mut(id)
            .filter(|r| r.session.is_active && r.session.owner_id == owner_id)
        else {
            return Ok(false);
        };
        record.session.is_active = false;
        record.session.last_active_at = Utc::now();
        Ok(true)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let records = self.records.read();
        Ok(records
            .get(session_id)
            .map(|r| r.messages.clone())
            .unwrap_or_default())
    }

    async fn update_feedback(
        &self,
        session_id: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<bool> {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(session_id) else {
            return Ok(false);
        };
        match record.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.feedback = feedback;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rebind_thread(
        &self,
        session_id: &str,
        owner_id: &str,
        thread_ref: &str,
    ) -> Result<bool> {
        let mut records = self.records.write();
        let Some(record) = records
            .get_mut(session_id)
            .filter(|r| r.session.is_active && r.session.owner_id == owner_id)
        else {
            return Ok(false);
        };
        record.session.remote_thread_ref = Some(thread_ref.to_owned());
        record.session.last_active_at = Utc::now();
        Ok(true)
    }
}
