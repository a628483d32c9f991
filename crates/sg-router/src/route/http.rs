//! HTTP route
//!
//! POSTs the message payload to a fixed URL and turns the response into the
//! route's result message. Transport details (timeouts, connection reuse) are
//! left to `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use sg_common::{Message, Payload, RouteError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Route;

/// HTTP route configuration
#[derive(Debug, Clone)]
pub struct HttpRouteConfig {
    pub name: String,
    pub url: String,
    /// Optional Bearer token for authentication
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpRouteConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auth_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

pub struct HttpRoute {
    config: HttpRouteConfig,
    client: reqwest::Client,
}

impl HttpRoute {
    pub fn new(config: HttpRouteConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_request(&self, message: &Message) -> Result<reqwest::RequestBuilder, RouteError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header("X-Message-Id", &message.id);

        if let Some(ref token) = self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let request = match &message.payload {
            Payload::Empty => request,
            Payload::Json(value) => request.json(value),
            Payload::Text(text) => request
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(text.clone()),
            Payload::Bytes(bytes) => request
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
            Payload::Collection(_) | Payload::RouteMap(_) => request.json(&message.payload),
            Payload::Stream(_) => {
                return Err(RouteError::execution("stream payloads cannot be sent over HTTP"));
            }
        };

        Ok(request)
    }

    async fn send(&self, message: Message) -> Result<Message, RouteError> {
        let request = self.build_request(&message)?;

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            let error_body = String::from_utf8_lossy(&body);
            warn!(
                route = %self.config.name,
                status = status.as_u16(),
                "Route returned non-success status"
            );
            return Err(RouteError::Execution(format!("HTTP {}: {}", status, error_body)));
        }

        debug!(
            route = %self.config.name,
            status = status.as_u16(),
            bytes = body.len(),
            "Route responded"
        );

        let payload = decode_body(content_type.as_deref(), body);
        let mut result = message.with_payload(payload);
        result
            .attributes
            .insert("http.status".to_string(), serde_json::json!(status.as_u16()));
        Ok(result)
    }

    fn classify(&self, error: reqwest::Error) -> RouteError {
        if error.is_timeout() {
            RouteError::Timeout(self.config.request_timeout.as_millis() as u64)
        } else if error.is_connect() || error.is_request() {
            RouteError::Transport(error.to_string())
        } else {
            RouteError::Execution(error.to_string())
        }
    }
}

fn decode_body(content_type: Option<&str>, body: Bytes) -> Payload {
    if body.is_empty() {
        return Payload::Empty;
    }

    match content_type {
        Some(ct) if ct.contains("json") => match serde_json::from_slice(&body) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Bytes(body),
        },
        Some(ct) if ct.starts_with("text/") => match String::from_utf8(body.to_vec()) {
            Ok(text) => Payload::Text(text),
            Err(_) => Payload::Bytes(body),
        },
        _ => Payload::Bytes(body),
    }
}

#[async_trait]
impl Route for HttpRoute {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, message: Message, cancel: CancellationToken) -> Result<Message, RouteError> {
        tokio::select! {
            result = self.send(message) => result,
            _ = cancel.cancelled() => Err(RouteError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn route_for(server: &MockServer, route_path: &str) -> HttpRoute {
        HttpRoute::new(HttpRouteConfig::new("inventory", format!("{}{}", server.uri(), route_path))).unwrap()
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reserve"))
            .and(header("X-Message-Id", "msg-1"))
            .and(body_json(json!({"sku": "A-1", "qty": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reserved": true})))
            .mount(&server)
            .await;

        let route = route_for(&server, "/reserve");
        let message = Message::new(json!({"sku": "A-1", "qty": 2})).with_id("msg-1");

        let result = route.execute(message, CancellationToken::new()).await.unwrap();

        assert_eq!(result.id, "msg-1");
        assert_eq!(result.payload.as_json(), Some(&json!({"reserved": true})));
        assert_eq!(result.attributes["http.status"], json!(200));
    }

    #[tokio::test]
    async fn test_text_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
            .mount(&server)
            .await;

        let route = route_for(&server, "/");
        let result = route
            .execute(Message::new("ping"), CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(result.payload, Payload::Text(ref t) if t == "accepted"));
    }

    #[tokio::test]
    async fn test_error_status_is_route_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let route = route_for(&server, "/");
        let err = route
            .execute(Message::new(json!({})), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::Execution(ref msg) if msg.contains("503") && msg.contains("down")));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let config = HttpRouteConfig::new("slow", server.uri()).with_request_timeout(Duration::from_millis(50));
        let route = HttpRoute::new(config).unwrap();

        let err = route
            .execute(Message::new(json!({})), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, RouteError::Timeout(50));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let route = route_for(&server, "/");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = route.execute(Message::new(json!({})), cancel).await.unwrap_err();
        assert_eq!(err, RouteError::Cancelled);
    }

    #[tokio::test]
    async fn test_stream_payload_rejected() {
        let server = MockServer::start().await;
        let route = route_for(&server, "/");
        let stream = sg_common::ConsumableStream::new(futures::stream::empty());

        let err = route
            .execute(Message::new(stream), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Execution(_)));
    }
}
