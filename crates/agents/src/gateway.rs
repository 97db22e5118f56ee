//! The backend seam the HTTP layer talks to.
//!
//! [`AgentBackend`] abstracts over conversational backends; [`ThreadAgent`]
//! is the thread/run implementation. It owns the per-turn lifecycle:
//! reconcile stale runs, post the user message, drive a run to a terminal
//! status, and normalize the reply's annotation zoo into the closed
//! [`Attachment`] enum exactly once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sb_domain::chat::{Attachment, Grounding, Message, MessageRole};
use sb_domain::config::{AgentConfig, ReconcilerConfig};
use sb_domain::retry::RetryPolicy;
use sb_domain::run::RunStatus;
use sb_domain::{Error, Result};

use crate::broker::AccessToken;
use crate::reconciler::{RunControl, RunReconciler};
use crate::threads::{ContentPart, Run, ThreadApiClient, WireMessage};

/// How often a turn's own run is polled for completion.
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stand-in reply when a run completes without producing any text.
const EMPTY_REPLY_ACK: &str = "I'm sorry, I couldn't generate a response. Please try again.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait & outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The assistant's side of one turn, already normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub grounding: Option<Grounding>,
}

/// Post-processing hook applied to every normalized reply before it is
/// persisted or returned (markdown cleanup, citation re-numbering, ...).
pub trait ResponseTransform: Send + Sync {
    fn apply(&self, outcome: TurnOutcome) -> TurnOutcome;
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// The configured agent id sessions are tagged with.
    fn id(&self) -> &str;

    /// Open a fresh backend conversation. Returns its thread reference and,
    /// when the agent defines one, a greeting to persist as the first
    /// assistant message.
    async fn start_thread(
        &self,
        token: &AccessToken,
    ) -> Result<(String, Option<TurnOutcome>)>;

    /// Run one full turn on an existing thread.
    async fn send_turn(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        content: &str,
    ) -> Result<TurnOutcome>;

    /// The thread's turns as the backend stores them, oldest first, at most
    /// `limit`, normalized. For reconciling local history against the
    /// backend's.
    async fn list_turns(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        limit: usize,
    ) -> Result<Vec<(MessageRole, TurnOutcome)>>;

    /// Re-post prior turns onto a (fresh) thread so the agent regains its
    /// context after a rebind. Best effort per message; returns how many
    /// were posted.
    async fn replay_history(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        turns: &[(MessageRole, String)],
    ) -> Result<usize>;
}

/// Which persisted messages are worth re-posting after a rebind: user and
/// assistant turns with non-empty text. Tool chatter and empty placeholders
/// add nothing to the agent's context.
pub fn replayable_turns(messages: &[Message]) -> Vec<(MessageRole, String)> {
    messages
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| (m.role, m.content.clone()))
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flatten a wire message into text plus typed attachments.
///
/// URL citations are deduplicated by URL within the turn: agents commonly
/// cite the same source once per paragraph.
pub fn normalize_reply(msg: &WireMessage) -> TurnOutcome {
    let mut content = String::new();
    let mut attachments = Vec::new();
    let mut seen_urls = HashSet::new();
    let mut sources = Vec::new();

    for part in &msg.content {
        match part {
            ContentPart::Text { text } => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(&text.value);

                for ann in &text.annotations {
                    if let Some(url) = &ann.url_citation {
                        if seen_urls.insert(url.url.clone()) {
                            sources.push(url.url.clone());
                            attachments.push(Attachment::UrlCitation {
                                url: url.url.clone(),
                                title: url.title.clone(),
                            });
                        }
                    } else if let Some(file) = &ann.file_citation {
                        attachments.push(Attachment::FileCitation {
                            file_id: file.file_id.clone(),
                            quote: file.quote.clone(),
                        });
                    } else {
                        attachments.push(Attachment::Annotation {
                            text: ann.text.clone(),
                            payload: None,
                        });
                    }
                }
            }
            ContentPart::ImageFile { image_file } => {
                attachments.push(Attachment::Image {
                    uri: image_file.file_id.clone(),
                    mime: None,
                    title: None,
                });
            }
            ContentPart::Unknown => {}
        }
    }

    let grounding = (!sources.is_empty()).then(|| Grounding {
        sources,
        citations: vec![],
    });

    TurnOutcome {
        content,
        attachments,
        grounding,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ThreadAgent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ThreadAgent {
    id: String,
    client: ThreadApiClient,
    reconciler: RunReconciler,
    run_timeout: Duration,
    send_welcome: bool,
    transform: Option<Arc<dyn ResponseTransform>>,
}

/// [`RunControl`] over one client/token pair, so the reconciler stays
/// token-agnostic.
struct BoundRunControl<'a> {
    client: &'a ThreadApiClient,
    token: &'a AccessToken,
}

#[async_trait]
impl RunControl for BoundRunControl<'_> {
    async fn list_runs(&self, thread_ref: &str) -> Result<Vec<Run>> {
        self.client.list_runs(self.token, thread_ref).await
    }

    async fn cancel_run(&self, thread_ref: &str, run_id: &str) -> Result<()> {
        self.client.cancel_run(self.token, thread_ref, run_id).await
    }
}

impl ThreadAgent {
    pub fn new(cfg: &AgentConfig, reconciler_cfg: &ReconcilerConfig) -> Result<Self> {
        Ok(Self {
            id: cfg.id.clone(),
            client: ThreadApiClient::new(cfg)?,
            reconciler: RunReconciler::new(reconciler_cfg),
            run_timeout: Duration::from_secs(cfg.run_timeout_secs),
            send_welcome: cfg.send_welcome_message,
            transform: None,
        })
    }

    pub fn with_transform(mut self, transform: Arc<dyn ResponseTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    fn finish(&self, outcome: TurnOutcome) -> TurnOutcome {
        match &self.transform {
            Some(t) => t.apply(outcome),
            None => outcome,
        }
    }

    /// Drive `run_id` to a terminal status within the turn budget.
    async fn await_run(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        run_id: &str,
    ) -> Result<Run> {
        let attempts =
            (self.run_timeout.as_millis() / RUN_POLL_INTERVAL.as_millis()).max(1) as u32;
        let poll = RetryPolicy::fixed(RUN_POLL_INTERVAL, attempts);
        let run = poll
            .poll_until(|| async {
                match self.client.get_run(token, thread_ref, run_id).await {
                    Ok(run) if run.status.is_terminal() => Some(Ok(run)),
                    Ok(_) => None,
                    // Losing the thread mid-run is final; transient poll
                    // failures are not.
                    Err(e @ Error::ThreadNotFound(_)) => Some(Err(e)),
                    Err(_) => None,
                }
            })
            .await;

        match run {
            Some(run) => run,
            None => Err(Error::Timeout(format!(
                "run {run_id} did not finish within {}s",
                self.run_timeout.as_secs()
            ))),
        }
    }

    /// The newest assistant message on the thread, normalized. A run that
    /// completes with no text still gets an answer the dashboard can show.
    async fn latest_reply(
        &self,
        token: &AccessToken,
        thread_ref: &str,
    ) -> Result<TurnOutcome> {
        let messages = self.client.list_messages(token, thread_ref).await?;
        let mut reply = messages
            .iter()
            .rev()
            .find(|m| m.role == "assistant")
            .map(normalize_reply)
            .unwrap_or_default();
        if reply.content.trim().is_empty() {
            tracing::warn!(agent = %self.id, thread = %thread_ref, "run produced no text");
            reply.content = EMPTY_REPLY_ACK.to_owned();
        }
        Ok(reply)
    }
}

#[async_trait]
impl AgentBackend for ThreadAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_thread(
        &self,
        token: &AccessToken,
    ) -> Result<(String, Option<TurnOutcome>)> {
        let thread_ref = self.client.create_thread(token).await?;
        tracing::info!(agent = %self.id, thread = %thread_ref, "thread created");

        let welcome = if self.send_welcome {
            // A missing greeting is not an error; a failed lookup is not
            // worth failing session creation over either.
            match self.client.agent_greeting(token).await {
                Ok(greeting) => greeting.map(|content| {
                    self.finish(TurnOutcome {
                        content,
                        ..Default::default()
                    })
                }),
                Err(e) => {
                    tracing::warn!(agent = %self.id, error = %e, "greeting lookup failed");
                    None
                }
            }
        } else {
            None
        };

        Ok((thread_ref, welcome))
    }

    async fn send_turn(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        content: &str,
    ) -> Result<TurnOutcome> {
        let control = BoundRunControl {
            client: &self.client,
            token,
        };
        self.reconciler.ensure_clean(&control, thread_ref).await?;

        self.client
            .post_message(token, thread_ref, "user", content)
            .await?;
        let run = self.client.create_run(token, thread_ref).await?;
        tracing::debug!(agent = %self.id, thread = %thread_ref, run = %run.id, "run started");

        let run = if run.status.is_terminal() {
            run
        } else {
            self.await_run(token, thread_ref, &run.id).await?
        };

        match run.status {
            RunStatus::Completed => {
                let outcome = self.latest_reply(token, thread_ref).await?;
                Ok(self.finish(outcome))
            }
            status => {
                let detail = run
                    .last_error
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or_else(|| format!("run ended as {status:?}"));
                Err(Error::Backend {
                    agent: self.id.clone(),
                    message: detail,
                })
            }
        }
    }

    async fn list_turns(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        limit: usize,
    ) -> Result<Vec<(MessageRole, TurnOutcome)>> {
        let messages = self.client.list_messages(token, thread_ref).await?;
        Ok(messages
            .iter()
            .filter_map(|m| {
                let role = match m.role.as_str() {
                    "user" => MessageRole::User,
                    "assistant" => MessageRole::Assistant,
                    _ => return None,
                };
                Some((role, normalize_reply(m)))
            })
            .take(limit)
            .collect())
    }

    async fn replay_history(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        turns: &[(MessageRole, String)],
    ) -> Result<usize> {
        let mut posted = 0;
        for (role, content) in turns {
            let role = match role {
                MessageRole::Assistant => "assistant",
                _ => "user",
            };
            // One lost turn degrades context, not the conversation.
            match self
                .client
                .post_message(token, thread_ref, role, content)
                .await
            {
                Ok(_) => posted += 1,
                Err(e) => {
                    tracing::warn!(thread = %thread_ref, error = %e, "replay of one turn failed");
                }
            }
        }
        tracing::info!(thread = %thread_ref, posted, total = turns.len(), "history replayed");
        Ok(posted)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
