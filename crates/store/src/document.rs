//! REST client for the managed document store.
//!
//! Wraps one pooled `reqwest::Client` and speaks the store's document API:
//! `/dbs/{db}/colls/{collection}/docs` for point operations and
//! `/dbs/{db}/colls/{collection}/query` for filtered reads. Every request
//! carries the partition key, so reads and writes for one entity always
//! route to the same shard.
//!
//! Transient failures (5xx, timeouts, connection errors) retry with the
//! shared [`RetryPolicy`]; 4xx responses are permanent.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sb_domain::config::StoreConfig;
use sb_domain::retry::RetryPolicy;
use sb_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A filtered read against one collection partition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Query {
    /// Field = value equality filters, all of which must match.
    pub filter: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default)]
    pub descending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Query {
    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(field.to_owned(), value.into());
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(field.to_owned());
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    docs: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    #[serde(default)]
    count: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Document store client, created once and shared for the process lifetime.
#[derive(Debug, Clone)]
pub struct DocumentStoreClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    database: String,
    retry: RetryPolicy,
}

impl DocumentStoreClient {
    /// Build a client from the store section of the config. The API key is
    /// read once from the environment variable the config names.
    pub fn new(cfg: &StoreConfig) -> Result<Self> {
        let timeout = Duration::from_millis(cfg.timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|v| !v.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %cfg.api_key_env,
                "document store API key not set — requests go unauthenticated"
            );
        }

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
            database: cfg.database.clone(),
            retry: RetryPolicy::new(cfg.max_retries, vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]),
        })
    }

    fn docs_url(&self, collection: &str) -> String {
        format!("{}/dbs/{}/colls/{collection}/docs", self.base_url, self.database)
    }

    fn doc_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{id}", self.docs_url(collection))
    }

    fn query_url(&self, collection: &str) -> String {
        format!("{}/dbs/{}/colls/{collection}/query", self.base_url, self.database)
    }

    /// Decorate a request with the partition key and credentials.
    fn decorate(&self, rb: RequestBuilder, partition_key: &str) -> RequestBuilder {
        let mut rb = rb.header("x-partition-key", partition_key);
        if let Some(ref key) = self.api_key {
            rb = rb.header("x-api-key", key);
        }
        rb
    }

    /// Send one request with retry, mapping the status into the taxonomy.
    ///
    /// * 5xx / timeout / connect → transient, retried.
    /// * 404 → `Ok(None)`; 409 → `Error::Conflict`; 401/403 → `Error::Auth`.
    /// * Any other 4xx is permanent.
    async fn execute(
        &self,
        endpoint: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Option<Value>> {
        self.retry
            .run(|_attempt| async {
                let resp = build()
                    .send()
                    .await
                    .map_err(|e| Error::Http(format!("{endpoint}: {e}")))?;
                let status = resp.status();

                if status.is_success() {
                    if status == StatusCode::NO_CONTENT {
                        return Ok(Some(Value::Null));
                    }
                    let body: Value = resp
                        .json()
                        .await
                        .map_err(|e| Error::Http(format!("{endpoint}: {e}")))?;
                    return Ok(Some(body));
                }

                let body = resp.text().await.unwrap_or_default();
                match status {
                    StatusCode::NOT_FOUND => Ok(None),
                    StatusCode::CONFLICT => Err(Error::Conflict(format!("{endpoint}: {body}"))),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        Err(Error::Auth(format!("{endpoint} ({status}): {body}")))
                    }
                    s if s.is_server_error() => {
                        Err(Error::Store(format!("{endpoint} returned {s}: {body}")))
                    }
                    s => Err(Error::Other(format!("{endpoint} returned {s}: {body}"))),
                }
            })
            .await
    }

    // ── point operations ─────────────────────────────────────────────

    /// Insert a new document. `Error::Conflict` when the id already exists.
    pub async fn insert(&self, collection: &str, partition_key: &str, doc: &Value) -> Result<()> {
        let url = self.docs_url(collection);
        self.execute(&format!("POST {collection}"), || {
            self.decorate(self.http.post(&url), partition_key).json(doc)
        })
        .await?
        .ok_or_else(|| Error::Store(format!("insert into {collection} returned not-found")))?;
        Ok(())
    }

    /// Point-read a document. `Ok(None)` when absent (or wrong partition).
    pub async fn get(
        &self,
        collection: &str,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<Value>> {
        let url = self.doc_url(collection, id);
        self.execute(&format!("GET {collection}/{id}"), || {
            self.decorate(self.http.get(&url), partition_key)
        })
        .await
    }

    /// Replace a document in full. `false` when it does not exist.
    pub async fn replace(
        &self,
        collection: &str,
        partition_key: &str,
        id: &str,
        doc: &Value,
    ) -> Result<bool> {
        let url = self.doc_url(collection, id);
        let out = self
            .execute(&format!("PUT {collection}/{id}"), || {
                self.decorate(self.http.put(&url), partition_key).json(doc)
            })
            .await?;
        Ok(out.is_some())
    }

    // ── queries ──────────────────────────────────────────────────────

    /// Run a filtered read within one partition.
    pub async fn query(
        &self,
        collection: &str,
        partition_key: &str,
        query: &Query,
    ) -> Result<Vec<Value>> {
        let url = self.query_url(collection);
        let body = self
            .execute(&format!("QUERY {collection}"), || {
                self.decorate(self.http.post(&url), partition_key).json(query)
            })
            .await?
            .unwrap_or(Value::Null);
        let parsed: QueryResponse = serde_json::from_value(body)?;
        Ok(parsed.docs)
    }

    /// Count documents matching a filter within one partition.
    pub async fn count(
        &self,
        collection: &str,
        partition_key: &str,
        query: &Query,
    ) -> Result<usize> {
        let url = format!("{}/count", self.query_url(collection));
        let body = self
            .execute(&format!("COUNT {collection}"), || {
                self.decorate(self.http.post(&url), partition_key).json(query)
            })
            .await?
            .unwrap_or(Value::Null);
        let parsed: CountResponse = serde_json::from_value(body)?;
        Ok(parsed.count)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> StoreConfig {
        StoreConfig {
            base_url: base_url.to_owned(),
            api_key_env: "SB_TEST_STORE_KEY_UNSET".into(),
            database: "callcenter".into(),
            sessions_collection: "Sessions".into(),
            messages_collection: "Messages".into(),
            timeout_ms: 2000,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn get_returns_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dbs/callcenter/colls/Sessions/docs/sess_1"))
            .and(header("x-partition-key", "u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sess_1"})))
            .mount(&server)
            .await;

        let client = DocumentStoreClient::new(&test_config(&server.uri())).unwrap();
        let doc = client.get("Sessions", "u1", "sess_1").await.unwrap();
        assert_eq!(doc.unwrap()["id"], "sess_1");
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = DocumentStoreClient::new(&test_config(&server.uri())).unwrap();
        let doc = client.get("Sessions", "u1", "sess_missing").await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn insert_conflict_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dbs/callcenter/colls/Sessions/docs"))
            .respond_with(ResponseTemplate::new(409))
            // A conflict must not be retried.
            .expect(1)
            .mount(&server)
            .await;

        let client = DocumentStoreClient::new(&test_config(&server.uri())).unwrap();
        let err = client
            .insert("Sessions", "u1", &json!({"id": "sess_dup"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn server_errors_retry_then_succeed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dbs/callcenter/colls/Messages/query"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dbs/callcenter/colls/Messages/query"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"docs": [{"id": "msg_1"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = DocumentStoreClient::new(&test_config(&server.uri())).unwrap();
        let docs = client
            .query("Messages", "sess_1", &Query::default())
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn retries_exhaust_into_store_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = DocumentStoreClient::new(&test_config(&server.uri())).unwrap();
        let err = client.get("Sessions", "u1", "sess_1").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn count_parses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dbs/callcenter/colls/Messages/query/count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 5})))
            .mount(&server)
            .await;

        let client = DocumentStoreClient::new(&test_config(&server.uri())).unwrap();
        let n = client
            .count("Messages", "sess_1", &Query::default())
            .await
            .unwrap();
        assert_eq!(n, 5);
    }
}
