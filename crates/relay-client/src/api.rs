//! Thin typed wrapper over the relay's HTTP endpoints.
//!
//! The pipeline uses it to publish manifests; the CLI and tests use the
//! LLM-side calls (create session, enqueue, fetch response).

use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_core::{
    ConnectionError, ParseError, RequestId, SessionCode, ToolManifest, ToolRequest, ToolResponse,
};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::errors::DeliveryError;

/// A session as returned by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    /// Session code.
    pub code: SessionCode,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry unless refreshed.
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueReply {
    request_id: RequestId,
}

#[derive(Deserialize)]
struct PollReply {
    requests: Vec<Value>,
}

/// Map a reqwest failure onto the connection taxonomy.
pub(crate) fn connection_error(err: &reqwest::Error) -> ConnectionError {
    if err.is_timeout() {
        ConnectionError::timeout(err.to_string())
    } else if let Some(status) = err.status() {
        ConnectionError::from_status(status.as_u16(), err.to_string())
    } else if err.is_decode() {
        ConnectionError::protocol(err.to_string())
    } else {
        ConnectionError::network(err.to_string())
    }
}

/// HTTP client for one relay server.
#[derive(Clone, Debug)]
pub struct RelayApi {
    http: Client,
    base_url: String,
}

impl RelayApi {
    /// Client for `base_url` (e.g. `http://127.0.0.1:8765`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Reuse an existing reqwest client.
    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http, base_url }
    }

    /// Server base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Underlying reqwest client.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// URL of a session-scoped endpoint.
    pub fn session_url(&self, code: &SessionCode, tail: &str) -> String {
        if tail.is_empty() {
            format!("{}/api/sessions/{code}", self.base_url)
        } else {
            format!("{}/api/sessions/{code}/{tail}", self.base_url)
        }
    }

    /// Create a session, optionally with a chosen code.
    #[instrument(skip_all)]
    pub async fn create_session(&self, code: Option<&SessionCode>) -> Result<SessionHandle, DeliveryError> {
        let body = code.map_or_else(|| json!({}), |c| json!({ "code": c }));
        let resp = self
            .http
            .post(format!("{}/api/sessions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| connection_error(&e))?;
        decode(check(resp).await?).await
    }

    /// Fetch a session; fails on unknown or expired sessions.
    pub async fn get_session(&self, code: &SessionCode) -> Result<SessionHandle, DeliveryError> {
        let resp = self
            .http
            .get(self.session_url(code, ""))
            .send()
            .await
            .map_err(|e| connection_error(&e))?;
        decode(check(resp).await?).await
    }

    /// Enqueue a tool call; returns the request ID the response will carry.
    #[instrument(skip_all, fields(session_code = %code, tool = tool_name))]
    pub async fn enqueue(
        &self,
        code: &SessionCode,
        id: Option<&RequestId>,
        tool_name: &str,
        params: Value,
    ) -> Result<RequestId, DeliveryError> {
        let mut body = json!({ "toolName": tool_name, "params": params });
        if let Some(id) = id {
            body["id"] = json!(id);
        }
        let resp = self
            .http
            .post(self.session_url(code, "requests"))
            .json(&body)
            .send()
            .await
            .map_err(|e| connection_error(&e))?;
        let reply: EnqueueReply = decode(check(resp).await?).await?;
        debug!(request_id = %reply.request_id, "request enqueued");
        Ok(reply.request_id)
    }

    /// Dequeue up to `max` requests through the poll endpoint.
    ///
    /// Malformed entries are dropped one by one; the rest of the reply is
    /// still returned.
    pub async fn poll(&self, code: &SessionCode, max: usize) -> Result<Vec<ToolRequest>, DeliveryError> {
        let resp = self
            .http
            .get(self.session_url(code, "requests/next"))
            .query(&[("max", max)])
            .send()
            .await
            .map_err(|e| connection_error(&e))?;
        let reply: PollReply = decode(check(resp).await?).await?;
        Ok(reply.requests.into_iter().filter_map(parse_polled).collect())
    }

    /// Fetch a response, long-polling up to `wait`. `None` while pending.
    pub async fn get_response(
        &self,
        code: &SessionCode,
        request_id: &RequestId,
        wait: Duration,
    ) -> Result<Option<ToolResponse>, DeliveryError> {
        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        let resp = self
            .http
            .get(self.session_url(code, &format!("responses/{request_id}")))
            .query(&[("waitMs", wait_ms)])
            .send()
            .await
            .map_err(|e| connection_error(&e))?;
        let resp = check(resp).await?;
        if resp.status() == StatusCode::ACCEPTED {
            return Ok(None);
        }
        decode(resp).await.map(Some)
    }

    /// Publish the client's tool manifest.
    #[instrument(skip_all, fields(session_code = %code, tools = manifest.tools.len()))]
    pub async fn publish_tools(&self, code: &SessionCode, manifest: &ToolManifest) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .put(self.session_url(code, "tools"))
            .json(manifest)
            .send()
            .await
            .map_err(|e| connection_error(&e))?;
        let _ = check(resp).await?;
        Ok(())
    }

    /// Explicit activity ping.
    pub async fn ack(&self, code: &SessionCode) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .post(self.session_url(code, "ack"))
            .send()
            .await
            .map_err(|e| connection_error(&e))?;
        let _ = check(resp).await?;
        Ok(())
    }
}

/// Turn non-success statuses into [`DeliveryError`]s.
pub(crate) async fn check(resp: Response) -> Result<Response, DeliveryError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(relay_core::retry::parse_retry_after_header)
            .unwrap_or(1000);
        return Err(DeliveryError::RateLimited { retry_after_ms });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(DeliveryError::Status {
        status: status.as_u16(),
        body,
    })
}

fn parse_polled(value: Value) -> Option<ToolRequest> {
    match serde_json::from_value::<ToolRequest>(value).map_err(ParseError::from) {
        Ok(request) => Some(request),
        Err(err) => {
            warn!(error = %err, "dropping malformed polled request");
            None
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, DeliveryError> {
    resp.json::<T>()
        .await
        .map_err(|e| DeliveryError::Connection(ConnectionError::protocol(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn code() -> SessionCode {
        SessionCode::parse("ABCD2345").unwrap()
    }

    #[tokio::test]
    async fn enqueue_posts_camel_case_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions/ABCD2345/requests"))
            .and(body_partial_json(json!({ "id": "r1", "toolName": "noop" })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "requestId": "r1", "queueLength": 1 })))
            .expect(1)
            .mount(&server)
            .await;

        let api = RelayApi::new(server.uri());
        let id = api
            .enqueue(&code(), Some(&RequestId::from("r1")), "noop", json!({}))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "r1");
    }

    #[tokio::test]
    async fn poll_drops_malformed_entries_and_keeps_the_rest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/ABCD2345/requests/next"))
            .and(query_param("max", "16"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "requests": [
                    {
                        "id": "good",
                        "toolName": "noop",
                        "params": {},
                        "sessionCode": "ABCD2345",
                        "timestamp": "2026-01-01T00:00:00Z",
                    },
                    { "id": "bad", "toolName": "noop" },
                    "not a request",
                ]
            })))
            .mount(&server)
            .await;

        let api = RelayApi::new(server.uri());
        let requests = api.poll(&code(), 16).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id.as_str(), "good");
    }

    #[tokio::test]
    async fn pending_response_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/ABCD2345/responses/r1"))
            .and(query_param("waitMs", "0"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "status": "pending" })))
            .mount(&server)
            .await;

        let api = RelayApi::new(format!("{}/", server.uri()));
        let got = api
            .get_response(&code(), &RequestId::from("r1"), Duration::ZERO)
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn error_statuses_map_to_delivery_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions/ABCD2345/ack"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/ABCD2345"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unknown"))
            .mount(&server)
            .await;

        let api = RelayApi::new(server.uri());
        assert_matches!(
            api.ack(&code()).await,
            Err(DeliveryError::RateLimited { retry_after_ms: 2000 })
        );
        assert_matches!(
            api.get_session(&code()).await,
            Err(DeliveryError::Status { status: 401, .. })
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let api = RelayApi::new("http://127.0.0.1:9");
        match api.ack(&code()).await {
            Err(DeliveryError::Connection(err)) => assert!(err.is_retryable()),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
