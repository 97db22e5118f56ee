//! Command-line interface.

use clap::{Parser, Subcommand};

use sb_domain::config::Config;

pub const DEFAULT_CONFIG_PATH: &str = "switchboard.toml";

#[derive(Debug, Parser)]
#[command(name = "switchboard", about = "Conversation gateway for the analytics dashboard")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP gateway (the default).
    Serve,
    /// Inspect or validate configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version and exit.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Check the config file and report problems without starting.
    Validate,
    /// Print the effective configuration (secrets stay in env vars).
    Show,
}

pub fn load_config(path: &str) -> anyhow::Result<Config> {
    Ok(Config::load(path)?)
}

/// Sanity-check a loaded config. Returns `false` when any check fails.
pub fn validate(config: &Config, path: &str) -> bool {
    let mut ok = true;
    let mut fail = |msg: &str| {
        eprintln!("FAIL {msg}");
        ok = false;
    };

    if config.agents.is_empty() {
        fail("no [[agents]] configured; chat endpoints will reject every turn");
    }
    for agent in &config.agents {
        if agent.base_url.is_empty() {
            fail(&format!("agents.{}: base_url is empty", agent.id));
        }
        if agent.remote_agent_id.is_empty() {
            fail(&format!("agents.{}: remote_agent_id is empty", agent.id));
        }
    }

    if let Some(store) = &config.store {
        if store.base_url.is_empty() {
            fail("store.base_url is empty");
        }
        if std::env::var(&store.api_key_env).is_err() {
            eprintln!("WARN {} not set; store requests go unauthenticated", store.api_key_env);
        }
    } else {
        eprintln!("WARN no [store] section; conversations will not survive a restart");
    }

    if config.identity.token_url.is_empty() {
        eprintln!("WARN no identity.token_url; caller tokens forwarded without exchange");
    } else {
        if config.identity.client_id.is_empty() {
            fail("identity.client_id is empty but token_url is set");
        }
        if std::env::var(&config.identity.client_secret_env).is_err() {
            fail(&format!("{} is not set", config.identity.client_secret_env));
        }
    }

    if ok {
        println!("OK {path}");
    }
    ok
}

/// Print the effective config as TOML. Only env-var *names* appear; the
/// config never holds secret values.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => print!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_warns_but_needs_agents() {
        // An empty config is loadable but fails validation on agents.
        let config = Config::default();
        assert!(!validate(&config, "test.toml"));
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let config = load_config("/nonexistent/switchboard.toml").unwrap();
        assert!(config.agents.is_empty());
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn load_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9090

            [[agents]]
            id = "insights"
            base_url = "https://agents.example.com/api/projects/CallCenter"
            remote_agent_id = "asst_42"
            "#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(validate(&config, "test.toml"));
    }
}
