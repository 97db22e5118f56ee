//! Wire client for the backend thread/run API.
//!
//! Threads hold the backend-side conversation state; runs execute one agent
//! over a thread. Every call carries the caller's exchanged token, never the
//! gateway's own identity. 5xx answers are transient and retried; a 404 on a
//! thread path means the backend expired or dropped the thread and surfaces
//! as [`Error::ThreadNotFound`] so the caller can rebind.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use sb_domain::config::AgentConfig;
use sb_domain::retry::RetryPolicy;
use sb_domain::run::RunStatus;
use sb_domain::{Error, Result};

use crate::broker::AccessToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ThreadInfo {
    pub id: String,
}

/// One message as the backend returns it: content split into typed parts,
/// citations attached as annotations inside text parts.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: TextPart,
    },
    ImageFile {
        image_file: FileRef,
    },
    /// Part types we do not model; kept so deserialization never fails on
    /// a backend addition.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextPart {
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<WireAnnotation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAnnotation {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub url_citation: Option<UrlCitation>,
    #[serde(default)]
    pub file_citation: Option<FileCitation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlCitation {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileCitation {
    pub file_id: String,
    #[serde(default)]
    pub quote: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AgentInfo {
    #[serde(default)]
    greeting: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ThreadApiClient {
    http: Client,
    base_url: String,
    agent_id: String,
    retry: RetryPolicy,
}

impl ThreadApiClient {
    pub fn new(cfg: &AgentConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            agent_id: cfg.remote_agent_id.clone(),
            retry: RetryPolicy::new(
                3,
                vec![Duration::from_millis(250), Duration::from_millis(500)],
            ),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn execute(
        &self,
        endpoint: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Value> {
        self.retry
            .run(|_attempt| async {
                let resp = build()
                    .send()
                    .await
                    .map_err(|e| Error::Http(format!("{endpoint}: {e}")))?;
                let status = resp.status();

                if status.is_success() {
                    return resp
                        .json()
                        .await
                        .map_err(|e| Error::Http(format!("{endpoint}: {e}")));
                }

                let body = resp.text().await.unwrap_or_default();
                match status {
                    StatusCode::NOT_FOUND => Err(Error::ThreadNotFound(endpoint.to_owned())),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        Err(Error::Auth(format!("{endpoint} ({status}): {body}")))
                    }
                    s if s.is_server_error() => Err(Error::Backend {
                        agent: self.agent_id.clone(),
                        message: format!("{endpoint} returned {s}: {body}"),
                    }),
                    s => Err(Error::Other(format!("{endpoint} returned {s}: {body}"))),
                }
            })
            .await
    }

    pub async fn create_thread(&self, token: &AccessToken) -> Result<String> {
        let url = format!("{}/threads", self.base_url);
        let body = self
            .execute("POST threads", || {
                self.http
                    .post(&url)
                    .header("authorization", token.bearer())
                    .json(&json!({}))
            })
            .await?;
        let info: ThreadInfo = serde_json::from_value(body)?;
        Ok(info.id)
    }

    pub async fn post_message(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        role: &str,
        content: &str,
    ) -> Result<String> {
        let url = format!("{}/threads/{thread_ref}/messages", self.base_url);
        let payload = json!({ "role": role, "content": content });
        let body = self
            .execute("POST message", || {
                self.http
                    .post(&url)
                    .header("authorization", token.bearer())
                    .json(&payload)
            })
            .await?;
        let info: ThreadInfo = serde_json::from_value(body)?;
        Ok(info.id)
    }

    /// All messages of a thread, oldest first.
    pub async fn list_messages(
        &self,
        token: &AccessToken,
        thread_ref: &str,
    ) -> Result<Vec<WireMessage>> {
        let url = format!("{}/threads/{thread_ref}/messages?order=asc", self.base_url);
        let body = self
            .execute("GET messages", || {
                self.http.get(&url).header("authorization", token.bearer())
            })
            .await?;
        let page: Page<WireMessage> = serde_json::from_value(body)?;
        Ok(page.data)
    }

    pub async fn create_run(&self, token: &AccessToken, thread_ref: &str) -> Result<Run> {
        let url = format!("{}/threads/{thread_ref}/runs", self.base_url);
        let payload = json!({ "assistant_id": self.agent_id });
        let body = self
            .execute("POST run", || {
                self.http
                    .post(&url)
                    .header("authorization", token.bearer())
                    .json(&payload)
            })
            .await?;
        serde_json::from_value(body).map_err(Error::from)
    }

    pub async fn get_run(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        run_id: &str,
    ) -> Result<Run> {
        let url = format!("{}/threads/{thread_ref}/runs/{run_id}", self.base_url);
        let body = self
            .execute("GET run", || {
                self.http.get(&url).header("authorization", token.bearer())
            })
            .await?;
        serde_json::from_value(body).map_err(Error::from)
    }

    pub async fn list_runs(&self, token: &AccessToken, thread_ref: &str) -> Result<Vec<Run>> {
        let url = format!("{}/threads/{thread_ref}/runs", self.base_url);
        let body = self
            .execute("GET runs", || {
                self.http.get(&url).header("authorization", token.bearer())
            })
            .await?;
        let page: Page<Run> = serde_json::from_value(body)?;
        Ok(page.data)
    }

    /// Request cancellation. The response body reports a transitional
    /// status ("cancelling") outside the modeled set, so it is discarded;
    /// polling observes the terminal state.
    pub async fn cancel_run(
        &self,
        token: &AccessToken,
        thread_ref: &str,
        run_id: &str,
    ) -> Result<()> {
        let url = format!("{}/threads/{thread_ref}/runs/{run_id}/cancel", self.base_url);
        self.execute("POST cancel", || {
            self.http
                .post(&url)
                .header("authorization", token.bearer())
                .json(&json!({}))
        })
        .await?;
        Ok(())
    }

    /// The agent's configured greeting, if any.
    pub async fn agent_greeting(&self, token: &AccessToken) -> Result<Option<String>> {
        let url = format!("{}/agents/{}", self.base_url, self.agent_id);
        let body = self
            .execute("GET agent", || {
                self.http.get(&url).header("authorization", token.bearer())
            })
            .await?;
        let info: AgentInfo = serde_json::from_value(body)?;
        Ok(info.greeting.filter(|g| !g.is_empty()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ThreadApiClient {
        ThreadApiClient::new(&AgentConfig {
            id: "insights".into(),
            base_url: server.uri(),
            remote_agent_id: "asst_42".into(),
            send_welcome_message: true,
            run_timeout_secs: 60,
        })
        .unwrap()
    }

    fn token() -> AccessToken {
        AccessToken {
            access_token: "downstream".into(),
            expires_in: 3599,
            token_type: "Bearer".into(),
        }
    }

    #[tokio::test]
    async fn create_thread_carries_user_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads"))
            .and(header("authorization", "Bearer downstream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "thread_1"})))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).create_thread(&token()).await.unwrap();
        assert_eq!(id, "thread_1");
    }

    #[tokio::test]
    async fn run_targets_configured_agent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/thread_1/runs"))
            .and(body_partial_json(json!({"assistant_id": "asst_42"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "run_1",
                "status": "queued",
            })))
            .mount(&server)
            .await;

        let run = client(&server)
            .create_run(&token(), "thread_1")
            .await
            .unwrap();
        assert_eq!(run.id, "run_1");
        assert_eq!(run.status, RunStatus::Queued);
    }

    #[tokio::test]
    async fn missing_thread_is_thread_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/thread_gone/messages"))
            .respond_with(ResponseTemplate::new(404))
            // Permanent, never retried.
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .post_message(&token(), "thread_gone", "user", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ThreadNotFound(_)));
    }

    #[tokio::test]
    async fn backend_5xx_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/threads/thread_1/runs"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/thread_1/runs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "run_1", "status": "in_progress"}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let runs = client(&server).list_runs(&token(), "thread_1").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].status.is_active());
    }

    #[tokio::test]
    async fn message_parts_deserialize() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/threads/thread_1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "wmsg_1",
                    "role": "assistant",
                    "content": [
                        {"type": "text", "text": {
                            "value": "See the report【1】",
                            "annotations": [{
                                "type": "url_citation",
                                "text": "【1】",
                                "url_citation": {"url": "https://example.com/r", "title": "Report"},
                            }],
                        }},
                        {"type": "future_part_kind"},
                    ],
                }],
            })))
            .mount(&server)
            .await;

        let msgs = client(&server)
            .list_messages(&token(), "thread_1")
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        match &msgs[0].content[0] {
            ContentPart::Text { text } => {
                assert!(text.value.starts_with("See the report"));
                assert_eq!(text.annotations.len(), 1);
            }
            other => panic!("expected text part, got {other:?}"),
        }
        assert!(matches!(msgs[0].content[1], ContentPart::Unknown));
    }
}
