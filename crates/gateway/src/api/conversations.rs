//! Conversation management endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use sb_domain::chat::Feedback;
use sb_store::NewSession;

use crate::api::error::ApiError;
use crate::api::identity::Caller;
use crate::state::AppState;
use crate::turns;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationBody {
    /// Agent to converse with; the first configured agent when omitted.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Create a conversation.
///
/// When the caller supplied an assertion the backend thread is opened
/// eagerly and the agent's greeting (if any) is persisted as the first
/// assistant message. A backend failure here is logged, not fatal: the
/// thread binds lazily on the first turn instead.
pub async fn create_conversation(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateConversationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state.agent(body.agent_id.as_deref())?;

    let (remote_thread_ref, welcome) = match caller.assertion.as_deref() {
        Some(assertion) => {
            let token = state.downstream_token(assertion).await?;
            match agent.start_thread(&token).await {
                Ok((thread_ref, welcome)) => (Some(thread_ref), welcome),
                Err(e) => {
                    tracing::warn!(agent = %agent.id(), error = %e, "eager thread start failed");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let session = state
        .conversations
        .create_session(NewSession {
            owner_id: caller.user_id.clone(),
            tenant_id: caller.tenant_id.clone(),
            agent_id: agent.id().to_owned(),
            title: body.title,
            remote_thread_ref,
            metadata: Default::default(),
        })
        .await?;

    let welcome_message = match welcome {
        Some(outcome) if !outcome.content.is_empty() => {
            turns::persist_outcome(&state.conversations, &session.id, &caller.user_id, &outcome)
                .await?
        }
        _ => None,
    };

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "session": session,
            "welcomeMessageId": welcome_message,
        })),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// List the caller's conversations, newest activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let conversations = state
        .conversations
        .list_sessions(&caller.user_id, query.agent_id.as_deref(), limit)
        .await?;

    Ok(Json(serde_json::json!({
        "conversations": conversations,
        "count": conversations.len(),
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/conversations/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fetch one conversation. Someone else's conversation reads as 404.
pub async fn get_conversation(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.conversations.get_session(&id, &caller.user_id).await? {
        Some(session) => Ok(Json(serde_json::json!({ "session": session }))),
        None => Err(ApiError::not_found(format!("conversation {id}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/conversations/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Soft-delete a conversation. The record survives for audit; the API
/// stops serving it.
pub async fn delete_conversation(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.conversations.soft_delete(&id, &caller.user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("conversation {id}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/conversations/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Message history, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state
        .conversations
        .messages_for_owner(&id, &caller.user_id)
        .await?
    {
        Some(messages) => Ok(Json(serde_json::json!({
            "messages": messages,
            "count": messages.len(),
        }))),
        None => Err(ApiError::not_found(format!("conversation {id}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/conversations/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub content: String,
}

/// Run one turn: persist the user message, drive the backend, return the
/// assistant's reply.
pub async fn send_message(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("content must not be empty"));
    }
    let assertion = caller.assertion()?;

    let reply = turns::run_turn(&state, &caller.user_id, &id, content, assertion)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("conversation {id}")))?;

    Ok(Json(serde_json::json!({
        "sessionId": reply.session_id,
        "userMessageId": reply.user_message_id,
        "message": {
            "id": reply.assistant_message_id,
            "role": "assistant",
            "content": reply.outcome.content,
            "attachments": reply.outcome.attachments,
            "grounding": reply.outcome.grounding,
        },
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/conversations/:id/messages/:message_id/feedback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub feedback: Feedback,
}

/// Record a thumbs-up/down on one assistant message. Sending `"none"`
/// clears a previous rating.
pub async fn set_feedback(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, message_id)): Path<(String, String)>,
    Json(body): Json<FeedbackBody>,
) -> Result<impl IntoResponse, ApiError> {
    // Ownership gate first: feedback writes go through the message
    // partition, which carries no owner.
    if state
        .conversations
        .get_session(&id, &caller.user_id)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found(format!("conversation {id}")));
    }

    if state
        .conversations
        .update_feedback(&id, &message_id, body.feedback)
        .await?
    {
        Ok(Json(serde_json::json!({ "updated": true })))
    } else {
        Err(ApiError::not_found(format!("message {message_id}")))
    }
}
