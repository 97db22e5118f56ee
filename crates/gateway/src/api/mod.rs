pub mod conversations;
pub mod error;
pub mod identity;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/conversations", post(conversations::create_conversation))
        .route("/v1/conversations", get(conversations::list_conversations))
        .route("/v1/conversations/:id", get(conversations::get_conversation))
        .route("/v1/conversations/:id", delete(conversations::delete_conversation))
        .route("/v1/conversations/:id/messages", get(conversations::list_messages))
        .route("/v1/conversations/:id/messages", post(conversations::send_message))
        .route(
            "/v1/conversations/:id/messages/:message_id/feedback",
            post(conversations::set_feedback),
        )
}

/// Liveness/readiness probe. Reports whether the durable store is wired,
/// not whether it is reachable: probes must stay cheap.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "durableStore": state.conversations.is_durable(),
        "agents": state.agents.keys().collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use sb_agents::{AccessToken, AgentBackend, TurnOutcome};
    use sb_domain::chat::MessageRole;
    use sb_domain::config::{AgentConfig, Config};
    use sb_domain::{Error, Result};
    use sb_store::ConversationService;

    /// Backend double: greets on start, echoes on turns, loses the first
    /// thread when `lose_first_thread` is set.
    struct EchoAgent {
        lose_first_thread: bool,
        threads_started: parking_lot::Mutex<u32>,
        replayed: parking_lot::Mutex<Vec<(MessageRole, String)>>,
    }

    impl EchoAgent {
        fn new(lose_first_thread: bool) -> Self {
            Self {
                lose_first_thread,
                threads_started: parking_lot::Mutex::new(0),
                replayed: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentBackend for EchoAgent {
        fn id(&self) -> &str {
            "insights"
        }

        async fn start_thread(
            &self,
            _token: &AccessToken,
        ) -> Result<(String, Option<TurnOutcome>)> {
            let mut n = self.threads_started.lock();
            *n += 1;
            Ok((
                format!("thread_{n}"),
                Some(TurnOutcome {
                    content: "Hi there, how can I help?".into(),
                    ..Default::default()
                }),
            ))
        }

        async fn send_turn(
            &self,
            _token: &AccessToken,
            thread_ref: &str,
            content: &str,
        ) -> Result<TurnOutcome> {
            if self.lose_first_thread && thread_ref == "thread_1" {
                return Err(Error::ThreadNotFound(thread_ref.to_owned()));
            }
            Ok(TurnOutcome {
                content: format!("echo: {content}"),
                ..Default::default()
            })
        }

        async fn list_turns(
            &self,
            _token: &AccessToken,
            _thread_ref: &str,
            _limit: usize,
        ) -> Result<Vec<(MessageRole, TurnOutcome)>> {
            Ok(vec![])
        }

        async fn replay_history(
            &self,
            _token: &AccessToken,
            _thread_ref: &str,
            turns: &[(MessageRole, String)],
        ) -> Result<usize> {
            self.replayed.lock().extend_from_slice(turns);
            Ok(turns.len())
        }
    }

    fn test_state(agent: Arc<EchoAgent>) -> AppState {
        let mut config = Config::default();
        config.agents.push(AgentConfig {
            id: "insights".into(),
            base_url: "http://unused.invalid".into(),
            remote_agent_id: "asst_42".into(),
            send_welcome_message: true,
            run_timeout_secs: 5,
        });

        let mut agents: HashMap<String, Arc<dyn AgentBackend>> = HashMap::new();
        agents.insert("insights".into(), agent);

        AppState {
            config: Arc::new(config),
            conversations: Arc::new(ConversationService::memory_only()),
            broker: None,
            agents,
        }
    }

    fn app(state: AppState) -> Router {
        router().with_state(state)
    }

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", "alice")
            .header("authorization", "Bearer caller-jwt")
            .header("content-type", "application/json");
        match body {
            Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_shape() {
        let app = app(test_state(Arc::new(EchoAgent::new(false))));
        let resp = app
            .oneshot(request("GET", "/healthz", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["durableStore"], false);
    }

    #[tokio::test]
    async fn missing_identity_is_rejected() {
        let app = app(test_state(Arc::new(EchoAgent::new(false))));
        let req = Request::builder()
            .method("GET")
            .uri("/v1/conversations")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_persists_welcome_and_lists() {
        let state = test_state(Arc::new(EchoAgent::new(false)));
        let app = app(state);

        let resp = app
            .clone()
            .oneshot(request("POST", "/v1/conversations", Some(serde_json::json!({}))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_body(resp).await;
        let session_id = body["session"]["id"].as_str().unwrap().to_owned();
        assert_eq!(body["session"]["agentId"], "insights");
        assert!(body["welcomeMessageId"].as_str().unwrap().starts_with("msg_"));

        let resp = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/v1/conversations/{session_id}/messages"),
                None,
            ))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["messages"][0]["role"], "assistant");
        assert_eq!(body["messages"][0]["content"], "Hi there, how can I help?");

        // Welcome must not become the title; it is not a user message.
        let resp = app
            .clone()
            .oneshot(request("GET", "/v1/conversations", None))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["conversations"][0]["title"], "New Conversation");
        assert_eq!(body["conversations"][0]["messageCount"], 1);

        // Point read, owner-scoped.
        let resp = app
            .oneshot(request("GET", &format!("/v1/conversations/{session_id}"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["session"]["remoteThreadRef"], "thread_1");
    }

    #[tokio::test]
    async fn turn_round_trip() {
        let app = app(test_state(Arc::new(EchoAgent::new(false))));

        let resp = app
            .clone()
            .oneshot(request("POST", "/v1/conversations", Some(serde_json::json!({}))))
            .await
            .unwrap();
        let session_id = json_body(resp).await["session"]["id"]
            .as_str()
            .unwrap()
            .to_owned();

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/v1/conversations/{session_id}/messages"),
                Some(serde_json::json!({"content": "why did volume spike?"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["message"]["content"], "echo: why did volume spike?");
        assert!(body["userMessageId"].as_str().unwrap().starts_with("msg_"));

        // History: welcome, user turn, assistant reply.
        let resp = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/v1/conversations/{session_id}/messages"),
                None,
            ))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["count"], 3);

        // And the first user message became the title.
        let resp = app
            .oneshot(request("GET", "/v1/conversations", None))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["conversations"][0]["title"], "why did volume spike?");
    }

    #[tokio::test]
    async fn lost_thread_rebinds_and_replays() {
        let agent = Arc::new(EchoAgent::new(true));
        let app = app(test_state(agent.clone()));

        let resp = app
            .clone()
            .oneshot(request("POST", "/v1/conversations", Some(serde_json::json!({}))))
            .await
            .unwrap();
        let session_id = json_body(resp).await["session"]["id"]
            .as_str()
            .unwrap()
            .to_owned();

        let resp = app
            .oneshot(request(
                "POST",
                &format!("/v1/conversations/{session_id}/messages"),
                Some(serde_json::json!({"content": "second wind"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["message"]["content"], "echo: second wind");

        // Two threads: the lost one and the rebind.
        assert_eq!(*agent.threads_started.lock(), 2);
        // The welcome replayed; the in-flight user turn did not.
        let replayed = agent.replayed.lock();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].0, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let app = app(test_state(Arc::new(EchoAgent::new(false))));
        let resp = app
            .oneshot(request(
                "POST",
                "/v1/conversations/sess_x/messages",
                Some(serde_json::json!({"content": "   "})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_then_404() {
        let app = app(test_state(Arc::new(EchoAgent::new(false))));

        let resp = app
            .clone()
            .oneshot(request("POST", "/v1/conversations", Some(serde_json::json!({}))))
            .await
            .unwrap();
        let session_id = json_body(resp).await["session"]["id"]
            .as_str()
            .unwrap()
            .to_owned();

        let resp = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/v1/conversations/{session_id}"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/v1/conversations/{session_id}/messages"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(request(
                "DELETE",
                &format!("/v1/conversations/{session_id}"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn feedback_flow() {
        let app = app(test_state(Arc::new(EchoAgent::new(false))));

        let resp = app
            .clone()
            .oneshot(request("POST", "/v1/conversations", Some(serde_json::json!({}))))
            .await
            .unwrap();
        let body = json_body(resp).await;
        let session_id = body["session"]["id"].as_str().unwrap().to_owned();
        let message_id = body["welcomeMessageId"].as_str().unwrap().to_owned();

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/v1/conversations/{session_id}/messages/{message_id}/feedback"),
                Some(serde_json::json!({"feedback": "positive"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(request(
                "POST",
                &format!("/v1/conversations/{session_id}/messages/msg_missing/feedback"),
                Some(serde_json::json!({"feedback": "negative"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
