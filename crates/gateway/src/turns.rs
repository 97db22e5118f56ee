//! Turn orchestration.
//!
//! One turn: persist the user message, drive the backend run, persist the
//! normalized reply. The user message is written before the backend is
//! touched so a failed turn still shows in history.
//!
//! Threads are bound lazily: a session created while the backend was
//! unreachable gets its thread on the first turn. A thread the backend
//! dropped ([`Error::ThreadNotFound`]) triggers one recovery: open a fresh
//! thread, rebind the session to it, replay prior turns, resend.

use std::sync::Arc;

use sb_agents::{gateway::replayable_turns, AccessToken, AgentBackend, TurnOutcome};
use sb_domain::chat::{Message, MessageDraft};
use sb_domain::{Error, Result};
use sb_store::ConversationService;

use crate::state::AppState;

/// Everything the frontend needs to render a completed turn.
#[derive(Debug)]
pub struct TurnReply {
    pub session_id: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub outcome: TurnOutcome,
}

pub async fn run_turn(
    state: &AppState,
    owner_id: &str,
    session_id: &str,
    content: &str,
    assertion: &str,
) -> Result<Option<TurnReply>> {
    let Some(session) = state.conversations.get_session(session_id, owner_id).await? else {
        return Ok(None);
    };
    let agent = state.agent(Some(&session.agent_id))?;
    let token = state.downstream_token(assertion).await?;

    let Some(user_message_id) = state
        .conversations
        .append_message(session_id, owner_id, MessageDraft::user(content))
        .await?
    else {
        return Ok(None);
    };

    let thread_ref = match &session.remote_thread_ref {
        Some(thread_ref) => thread_ref.clone(),
        None => bind_thread(state, agent.as_ref(), &token, session_id, owner_id).await?,
    };

    let outcome = match agent.send_turn(&token, &thread_ref, content).await {
        Ok(outcome) => outcome,
        Err(Error::ThreadNotFound(_)) => {
            tracing::warn!(
                session = %session_id,
                thread = %thread_ref,
                "backend lost the thread, rebinding and replaying"
            );
            let fresh = bind_thread(state, agent.as_ref(), &token, session_id, owner_id).await?;
            let history = state.conversations.list_messages(session_id).await?;
            let replayed = agent
                .replay_history(&token, &fresh, &prior_turns(&history, content))
                .await?;
            tracing::info!(session = %session_id, replayed, "context restored on fresh thread");
            // One retry only; a second loss is a real failure.
            agent.send_turn(&token, &fresh, content).await?
        }
        Err(e) => return Err(e),
    };

    let assistant_message_id = persist_outcome(&state.conversations, session_id, owner_id, &outcome)
        .await?
        .ok_or_else(|| Error::Store("session vanished while persisting reply".into()))?;

    Ok(Some(TurnReply {
        session_id: session_id.to_owned(),
        user_message_id,
        assistant_message_id,
        outcome,
    }))
}

/// Open a fresh backend thread and bind the session to it. A welcome
/// greeting arriving here is dropped: the conversation already has turns.
async fn bind_thread(
    state: &AppState,
    agent: &dyn AgentBackend,
    token: &AccessToken,
    session_id: &str,
    owner_id: &str,
) -> Result<String> {
    let (thread_ref, _welcome) = agent.start_thread(token).await?;
    state
        .conversations
        .rebind_thread(session_id, owner_id, &thread_ref)
        .await?;
    Ok(thread_ref)
}

/// Replay candidates for a recovered thread: everything except the user
/// message of the in-flight turn, which the resend posts itself.
fn prior_turns(
    history: &[Message],
    in_flight: &str,
) -> Vec<(sb_domain::chat::MessageRole, String)> {
    let mut turns = replayable_turns(history);
    if turns
        .last()
        .is_some_and(|(role, text)| *role == sb_domain::chat::MessageRole::User && text == in_flight)
    {
        turns.pop();
    }
    turns
}

/// Persist the assistant side of a turn with its attachments and grounding.
pub async fn persist_outcome(
    conversations: &Arc<ConversationService>,
    session_id: &str,
    owner_id: &str,
    outcome: &TurnOutcome,
) -> Result<Option<String>> {
    let mut draft = MessageDraft::assistant(outcome.content.clone());
    draft.attachments = outcome.attachments.clone();
    draft.grounding = outcome.grounding.clone();
    conversations.append_message(session_id, owner_id, draft).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::chat::MessageRole;

    #[test]
    fn prior_turns_drop_the_in_flight_message() {
        let history = vec![
            MessageDraft::user("first").into_message("sess_1"),
            MessageDraft::assistant("answer").into_message("sess_1"),
            MessageDraft::user("current question").into_message("sess_1"),
        ];

        let turns = prior_turns(&history, "current question");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1], (MessageRole::Assistant, "answer".into()));
    }

    #[test]
    fn prior_turns_keep_unrelated_tail() {
        let history = vec![MessageDraft::assistant("welcome").into_message("sess_1")];
        let turns = prior_turns(&history, "current question");
        assert_eq!(turns.len(), 1);
    }
}
