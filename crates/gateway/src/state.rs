use std::collections::HashMap;
use std::sync::Arc;

use sb_agents::{AccessToken, AgentBackend, CredentialBroker};
use sb_domain::config::Config;
use sb_domain::{Error, Result};
use sb_store::ConversationService;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Conversation persistence (durable store with in-process fallback).
    pub conversations: Arc<ConversationService>,
    /// On-behalf-of exchange. `None` = dev mode, the caller's assertion is
    /// forwarded downstream unexchanged.
    pub broker: Option<Arc<CredentialBroker>>,
    /// Configured backends, keyed by agent id.
    pub agents: HashMap<String, Arc<dyn AgentBackend>>,
}

impl AppState {
    /// The backend for `agent_id`, or the default agent when `None`.
    pub fn agent(&self, agent_id: Option<&str>) -> Result<Arc<dyn AgentBackend>> {
        let id = match agent_id {
            Some(id) => id,
            None => {
                &self
                    .config
                    .default_agent()
                    .ok_or_else(|| Error::Config("no agents configured".into()))?
                    .id
            }
        };
        self.agents
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown agent {id}")))
    }

    /// Turn the caller's bearer assertion into a downstream token.
    pub async fn downstream_token(&self, assertion: &str) -> Result<AccessToken> {
        match &self.broker {
            Some(broker) => broker.exchange(assertion).await,
            None => Ok(AccessToken {
                access_token: assertion.to_owned(),
                expires_in: 0,
                token_type: "Bearer".to_owned(),
            }),
        }
    }
}
