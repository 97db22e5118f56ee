//! Shared-state construction for the server and CLI entry points.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use sb_agents::{AgentBackend, CredentialBroker, ThreadAgent};
use sb_domain::config::Config;
use sb_store::{ConversationService, ConversationStore, DurableStore};

use crate::state::AppState;

pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let conversations = match &config.store {
        Some(store_cfg) => {
            let durable: Arc<dyn ConversationStore> =
                Arc::new(DurableStore::new(store_cfg).context("document store client")?);
            tracing::info!(
                database = %store_cfg.database,
                "durable conversation store enabled"
            );
            Arc::new(ConversationService::new(Some(durable)))
        }
        None => {
            tracing::warn!("no [store] configured — conversations are in-memory only");
            Arc::new(ConversationService::memory_only())
        }
    };

    let broker = if config.identity.token_url.is_empty() {
        tracing::warn!("no identity.token_url — caller tokens forwarded without exchange");
        None
    } else {
        Some(Arc::new(
            CredentialBroker::new(&config.identity).context("credential broker")?,
        ))
    };

    let mut agents: HashMap<String, Arc<dyn AgentBackend>> = HashMap::new();
    for agent_cfg in &config.agents {
        let agent = ThreadAgent::new(agent_cfg, &config.reconciler)
            .with_context(|| format!("agent {}", agent_cfg.id))?;
        tracing::info!(agent = %agent_cfg.id, base_url = %agent_cfg.base_url, "agent registered");
        agents.insert(agent_cfg.id.clone(), Arc::new(agent));
    }
    if agents.is_empty() {
        tracing::warn!("no [[agents]] configured — chat endpoints will reject turns");
    }

    Ok(AppState {
        config,
        conversations,
        broker,
        agents,
    })
}
