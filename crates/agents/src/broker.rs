//! On-behalf-of credential exchange.
//!
//! The gateway never calls a backend with its own identity: each request's
//! bearer assertion is exchanged at the identity provider for a token scoped
//! to the downstream backend, so per-user permissions hold end to end.
//!
//! Transient provider failures (5xx, timeouts) retry on a short backoff with
//! a fresh connection per attempt. A structured rejection in the response
//! body is a decision, not an outage, and is surfaced immediately as
//! [`Error::Auth`].

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use sb_domain::config::IdentityConfig;
use sb_domain::retry::RetryPolicy;
use sb_domain::{Error, Result};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A downstream-scoped access token. The secret never appears in `Debug`
/// output or logs.
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: String,
}

impl AccessToken {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ProviderRejection {
    error: String,
    #[serde(default)]
    error_description: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct CredentialBroker {
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    retry: RetryPolicy,
}

impl fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

impl CredentialBroker {
    /// Build a broker from the identity section of the config. The client
    /// secret is read once from the environment variable the config names.
    pub fn new(cfg: &IdentityConfig) -> Result<Self> {
        if cfg.token_url.is_empty() {
            return Err(Error::Config("identity.token_url is not set".into()));
        }
        let client_secret = std::env::var(&cfg.client_secret_env).map_err(|_| {
            Error::Config(format!("{} is not set", cfg.client_secret_env))
        })?;
        Ok(Self {
            token_url: cfg.token_url.clone(),
            client_id: cfg.client_id.clone(),
            client_secret,
            scope: cfg.scope.clone(),
            retry: RetryPolicy::new(
                3,
                vec![Duration::from_millis(500), Duration::from_secs(1)],
            ),
        })
    }

    /// Exchange the caller's assertion for a downstream-scoped token.
    pub async fn exchange(&self, assertion: &str) -> Result<AccessToken> {
        self.retry
            .run(|attempt| async move {
                tracing::debug!(attempt, "requesting on-behalf-of token");
                self.exchange_once(assertion).await
            })
            .await
    }

    async fn exchange_once(&self, assertion: &str) -> Result<AccessToken> {
        // A stale pooled connection must not poison the retry, so each
        // attempt gets its own client.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let form = [
            ("grant_type", GRANT_TYPE),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("assertion", assertion),
            ("scope", self.scope.as_str()),
            ("requested_token_use", "on_behalf_of"),
        ];

        let resp = http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token endpoint: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Http(format!("token endpoint: {e}")))?;

        // The provider answers rejections with a structured body; prefer
        // that over the status code, which varies by provider.
        if let Ok(rejection) = serde_json::from_str::<ProviderRejection>(&body) {
            return Err(Error::Auth(format!(
                "{}: {}",
                rejection.error, rejection.error_description
            )));
        }

        if status.is_server_error() {
            return Err(Error::Http(format!("token endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::Auth(format!("token endpoint returned {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(Error::from)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn broker(server: &MockServer) -> CredentialBroker {
        CredentialBroker {
            token_url: format!("{}/oauth2/v2.0/token", server.uri()),
            client_id: "app-123".into(),
            client_secret: "s3cret".into(),
            scope: "https://agents.example.com/.default".into(),
            retry: RetryPolicy::new(
                3,
                vec![Duration::from_millis(1), Duration::from_millis(1)],
            ),
        }
    }

    #[tokio::test]
    async fn exchange_sends_obo_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .and(body_string_contains("requested_token_use=on_behalf_of"))
            .and(body_string_contains("assertion=caller-jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "downstream-token",
                "expires_in": 3599,
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = broker(&server).exchange("caller-jwt").await.unwrap();
        assert_eq!(token.bearer(), "Bearer downstream-token");
    }

    #[tokio::test]
    async fn transient_provider_failures_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "t",
                "expires_in": 3599,
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = broker(&server).exchange("caller-jwt").await.unwrap();
        assert_eq!(token.access_token, "t");
    }

    #[tokio::test]
    async fn structured_rejection_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS50013: assertion audience mismatch",
            })))
            // Rejections must not be retried.
            .expect(1)
            .mount(&server)
            .await;

        let err = broker(&server).exchange("bad-jwt").await.unwrap_err();
        match err {
            Error::Auth(msg) => assert!(msg.contains("invalid_grant")),
            other => panic!("expected Auth, got {other:?}"),
        }
    }

    #[test]
    fn debug_never_prints_secrets() {
        let token = AccessToken {
            access_token: "super-secret".into(),
            expires_in: 60,
            token_type: "Bearer".into(),
        };
        let printed = format!("{token:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
