//! Configuration.
//!
//! Loaded from `switchboard.toml` with serde defaults for every field.
//! Secrets never live in the file: each section names the environment
//! variable that carries its secret and the value is read once at startup.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Durable store connection. `None` runs the gateway on the in-process
    /// fallback store only (dev mode, nothing survives a restart).
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults so a bare `switchboard serve` still starts in dev mode.
    pub fn load(path: &str) -> Result<Self> {
        if !std::path::Path::new(path).exists() {
            tracing::warn!(path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{path}: {e}")))
    }

    /// The agent handling requests that name no agent: the first configured.
    pub fn default_agent(&self) -> Option<&AgentConfig> {
        self.agents.first()
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_8080")]
    pub port: u16,
    /// CORS allow-list for the dashboard frontend.
    #[serde(default = "d_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: 8080,
            allowed_origins: d_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the managed document-store account.
    pub base_url: String,
    /// Env var holding the store API key. Empty value = unauthenticated
    /// (local emulator).
    #[serde(default = "d_store_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_database")]
    pub database: String,
    #[serde(default = "d_sessions_coll")]
    pub sessions_collection: String,
    #[serde(default = "d_messages_coll")]
    pub messages_collection: String,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity (on-behalf-of exchange)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Token endpoint of the identity provider.
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    /// Env var holding the confidential client secret.
    #[serde(default = "d_identity_secret_env")]
    pub client_secret_env: String,
    /// Scope requested for the downstream conversational backend.
    #[serde(default = "d_scope")]
    pub scope: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            token_url: String::new(),
            client_id: String::new(),
            client_secret_env: d_identity_secret_env(),
            scope: d_scope(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run reconciliation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Upper bound on waiting for active runs to reach a terminal status.
    #[serde(default = "d_15")]
    pub max_wait_secs: u64,
    #[serde(default = "d_500")]
    pub poll_interval_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 15,
            poll_interval_ms: 500,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable identifier sessions are tagged with (e.g. `"insights"`).
    pub id: String,
    /// Base URL of the backend's thread API.
    pub base_url: String,
    /// The backend-side agent/assistant identifier runs execute against.
    pub remote_agent_id: String,
    /// Fetch the agent's configured greeting when a thread starts.
    #[serde(default = "d_true")]
    pub send_welcome_message: bool,
    /// Upper bound on waiting for a turn's run to finish.
    #[serde(default = "d_60")]
    pub run_timeout_secs: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_8080() -> u16 {
    8080
}
fn d_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".into(),
        "http://localhost:5173".into(),
    ]
}
fn d_store_key_env() -> String {
    "SB_STORE_API_KEY".into()
}
fn d_database() -> String {
    "callcenter".into()
}
fn d_sessions_coll() -> String {
    "Sessions".into()
}
fn d_messages_coll() -> String {
    "Messages".into()
}
fn d_8000() -> u64 {
    8000
}
fn d_3() -> u32 {
    3
}
fn d_identity_secret_env() -> String {
    "SB_IDENTITY_CLIENT_SECRET".into()
}
fn d_scope() -> String {
    "https://agents.example.com/.default".into()
}
fn d_15() -> u64 {
    15
}
fn d_500() -> u64 {
    500
}
fn d_true() -> bool {
    true
}
fn d_60() -> u64 {
    60
}
