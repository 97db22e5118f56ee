//! Durable [`ConversationStore`] backed by the document store.
//!
//! Sessions live in one collection partitioned by `ownerId`, messages in
//! another partitioned by `sessionId`. Listing aggregates (message count,
//! last-message preview) are computed at read time from the message side;
//! the session document never stores them.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use sb_domain::chat::{
    self, Feedback, Message, MessageDraft, MessageRole, Session, SessionSummary,
    PREVIEW_MAX_CHARS,
};
use sb_domain::config::StoreConfig;
use sb_domain::{Error, Result};

use crate::document::{DocumentStoreClient, Query};
use crate::traits::{ConversationStore, NewSession};

/// How many times an id collision is resolved by minting a fresh id.
const ID_COLLISION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct DurableStore {
    client: DocumentStoreClient,
    sessions: String,
    messages: String,
}

impl DurableStore {
    pub fn new(cfg: &StoreConfig) -> Result<Self> {
        Ok(Self {
            client: DocumentStoreClient::new(cfg)?,
            sessions: cfg.sessions_collection.clone(),
            messages: cfg.messages_collection.clone(),
        })
    }

    /// Raw owner-checked session read, ignoring `isActive`. Used by writes
    /// that must also reach soft-deleted records (none currently do) and by
    /// [`ConversationStore::get_session`], which then filters.
    async fn read_session(&self, id: &str, owner_id: &str) -> Result<Option<Session>> {
        let Some(doc) = self.client.get(&self.sessions, owner_id, id).await? else {
            return Ok(None);
        };
        let session: Session = serde_json::from_value(doc)?;
        // Partition routing already scopes by owner; the explicit check
        // guards against an emulator that ignores partition keys.
        if session.owner_id != owner_id {
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn write_session(&self, session: &Session) -> Result<bool> {
        let doc = serde_json::to_value(session)?;
        self.client
            .replace(&self.sessions, &session.owner_id, &session.id, &doc)
            .await
    }

    async fn message_count(&self, session_id: &str) -> Result<usize> {
        let q = Query::default().filter("type", "message");
        self.client.count(&self.messages, session_id, &q).await
    }

    async fn last_message_preview(&self, session_id: &str) -> Result<Option<String>> {
        let q = Query::default()
            .filter("type", "message")
            .order_by("createdAt", true)
            .limit(1);
        let docs = self.client.query(&self.messages, session_id, &q).await?;
        let Some(doc) = docs.into_iter().next() else {
            return Ok(None);
        };
        let msg: Message = serde_json::from_value(doc)?;
        Ok(Some(chat::truncate_chars(&msg.content, PREVIEW_MAX_CHARS)))
    }
}

#[async_trait]
impl ConversationStore for DurableStore {
    async fn create_session(&self, new: NewSession) -> Result<Session> {
        let mut session = Session::new(&new.owner_id, &new.agent_id, new.title.as_deref());
        session.tenant_id = new.tenant_id;
        session.remote_thread_ref = new.remote_thread_ref;
        session.metadata = new.metadata;

        for attempt in 1..=ID_COLLISION_ATTEMPTS {
            let doc = serde_json::to_value(&session)?;
            match self.client.insert(&self.sessions, &new.owner_id, &doc).await {
                Ok(()) => {
                    tracing::info!(session = %session.id, owner = %new.owner_id, "session created");
                    return Ok(session);
                }
                Err(Error::Conflict(_)) if attempt < ID_COLLISION_ATTEMPTS => {
                    session.id = chat::new_session_id();
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("collision loop returns on its last attempt")
    }

    async fn list_sessions(
        &self,
        owner_id: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionSummary>> {
        let mut q = Query::default()
            .filter("type", "session")
            .filter("ownerId", owner_id)
            .filter("isActive", true)
            .order_by("lastActiveAt", true)
            .limit(limit);
        if let Some(agent) = agent_id {
            q = q.filter("agentId", agent);
        }
        let docs = self.client.query(&self.sessions, owner_id, &q).await?;

        let mut summaries = Vec::with_capacity(docs.len());
        for doc in docs {
            let session: Session = serde_json::from_value(doc)?;
            let message_count = self.message_count(&session.id).await?;
            let last_message_preview = self.last_message_preview(&session.id).await?;
            summaries.push(SessionSummary {
                id: session.id,
                title: session.title,
                agent_id: session.agent_id,
                last_message_preview,
                message_count,
                created_at: session.created_at,
                last_active_at: session.last_active_at,
            });
        }
        Ok(summaries)
    }

    async fn get_session(&self, id: &str, owner_id: &str) -> Result<Option<Session>> {
        Ok(self
            .read_session(id, owner_id)
            .await?
            .filter(|s| s.is_active))
    }

    async fn append_message(
        &self,
        session_id: &str,
        owner_id: &str,
        draft: MessageDraft,
    ) -> Result<Option<String>> {
        let Some(mut session) = self.get_session(session_id, owner_id).await? else {
            return Ok(None);
        };

        let message = draft.into_message(session_id);
        let doc = serde_json::to_value(&message)?;
        self.client.insert(&self.messages, session_id, &doc).await?;

        session.last_active_at = Utc::now();
        if message.role == MessageRole::User
            && chat::is_placeholder_title(&session.title)
            && !message.content.trim().is_empty()
        {
            session.title = chat::derive_title(&message.content);
        }
        self.write_session(&session).await?;

        Ok(Some(message.id))
    }

    async fn soft_delete(&self, id: &str, owner_id: &str) -> Result<bool> {
        let Some(mut session) = self.get_session(id, owner_id).await? else {
            return Ok(false);
        };
        session.is_active = false;
        session.last_active_at = Utc::now();
        let replaced = self.write_session(&session).await?;
        if replaced {
            tracing::info!(session = %id, owner = %owner_id, "session soft-deleted");
        }
        Ok(replaced)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let q = Query::default()
            .filter("type", "message")
            .order_by("createdAt", false);
        let docs = self.client.query(&self.messages, session_id, &q).await?;
        docs.into_iter()
            .map(|d| serde_json::from_value(d).map_err(Error::from))
            .collect()
    }

    async fn update_feedback(
        &self,
        session_id: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<bool> {
        let Some(doc) = self.client.get(&self.messages, session_id, message_id).await? else {
            return Ok(false);
        };
        let mut message: Message = serde_json::from_value(doc)?;
        if message.session_id != session_id {
            return Ok(false);
        }
        message.feedback = feedback;
        let doc: Value = serde_json::to_value(&message)?;
        self.client
            .replace(&self.messages, session_id, message_id, &doc)
            .await
    }

    async fn rebind_thread(
        &self,
        session_id: &str,
        owner_id: &str,
        thread_ref: &str,
    ) -> Result<bool> {
        let Some(mut session) = self.get_session(session_id, owner_id).await? else {
            return Ok(false);
        };
        tracing::warn!(
            session = %session_id,
            old = session.remote_thread_ref.as_deref().unwrap_or("-"),
            new = %thread_ref,
            "rebinding session to a new remote thread"
        );
        session.remote_thread_ref = Some(thread_ref.to_owned());
        session.last_active_at = Utc::now();
        self.write_session(&session).await
    }
}
