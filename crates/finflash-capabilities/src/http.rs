//! JSON-over-HTTP capability
//!
//! Posts the task input to an external analysis service and returns the
//! JSON body it answers with. The request body looks like:
//!
//! ```json
//! {"task": "analyze-risk", "run_id": "...", "attempt": 1, "source": "newswire", "input": {...}}
//! ```

use async_trait::async_trait;
use finflash_core::{Capability, CapabilityError, TaskContext};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Where and how to reach one analysis service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,

    /// Client-side request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Environment variable holding a bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Extra headers sent with every request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    60
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_timeout_secs(),
            api_key_env: None,
            headers: BTreeMap::new(),
        }
    }
}

/// Capability that delegates to a remote service
pub struct HttpCapability {
    name: String,
    url: String,
    client: Client,
    api_key: Option<String>,
    headers: BTreeMap<String, String>,
}

impl HttpCapability {
    /// Create a capability posting to `url`
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
            api_key: None,
            headers: BTreeMap::new(),
        })
    }

    /// Create a capability from an endpoint section of the configuration
    ///
    /// A named but unset API key variable is logged and the capability is
    /// built without authentication.
    pub fn from_config(
        name: impl Into<String>,
        config: &EndpointConfig,
    ) -> Result<Self, reqwest::Error> {
        let mut capability = Self::new(
            name,
            config.url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;

        if let Some(var) = &config.api_key_env {
            match std::env::var(var) {
                Ok(key) if !key.is_empty() => capability.api_key = Some(key),
                _ => warn!(
                    capability = %capability.name,
                    "{var} is not set, calling endpoint without credentials"
                ),
            }
        }
        capability.headers.clone_from(&config.headers);
        Ok(capability)
    }

    /// Set the bearer token
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    task: &'a str,
    run_id: Uuid,
    attempt: u32,
    source: &'a str,
    input: Value,
}

/// Whether a non-success status is worth retrying
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn transport_error(err: &reqwest::Error) -> CapabilityError {
    if err.is_builder() {
        CapabilityError::fatal(format!("invalid request: {err}"))
    } else {
        CapabilityError::transient(format!("request failed: {err}"))
    }
}

#[async_trait]
impl Capability for HttpCapability {
    #[instrument(skip(self, input, ctx), fields(task = %ctx.task, attempt = ctx.attempt))]
    async fn invoke(&self, input: Value, ctx: &TaskContext) -> Result<Value, CapabilityError> {
        debug!("Posting task to {}", self.url);

        let body = InvokeRequest {
            task: ctx.task.as_str(),
            run_id: ctx.run_id,
            attempt: ctx.attempt,
            source: &ctx.source,
            input,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {text}");
            return Err(if is_transient(status) {
                CapabilityError::transient(message)
            } else {
                CapabilityError::fatal(message)
            });
        }

        let value: Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                CapabilityError::fatal(format!("Failed to parse response: {e}"))
            } else {
                transport_error(&e)
            }
        })?;

        debug!("Received response from {}", self.url);
        Ok(value)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finflash_core::TaskKind;
    use mockito::Matcher;
    use serde_json::json;

    fn ctx() -> TaskContext {
        TaskContext::new(Uuid::new_v4(), TaskKind::ANALYZE_RISK, "newswire")
    }

    fn capability(server: &mockito::ServerGuard) -> HttpCapability {
        HttpCapability::new("risk", format!("{}/analyze", server.url()), Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/analyze")
            .match_body(Matcher::PartialJson(json!({
                "task": "analyze-risk",
                "attempt": 1,
                "source": "newswire",
                "input": {"upstream": {}},
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"risk_level": "low", "score": 2}"#)
            .create_async()
            .await;

        let value = capability(&server)
            .invoke(json!({"upstream": {}}), &ctx())
            .await
            .unwrap();

        assert_eq!(value, json!({"risk_level": "low", "score": 2}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/analyze")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = capability(&server)
            .invoke(json!({}), &ctx())
            .await
            .unwrap_err();

        assert!(err.retryable);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn test_too_many_requests_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/analyze")
            .with_status(429)
            .create_async()
            .await;

        let err = capability(&server)
            .invoke(json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/analyze")
            .with_status(400)
            .with_body("bad input")
            .create_async()
            .await;

        let err = capability(&server)
            .invoke(json!({}), &ctx())
            .await
            .unwrap_err();

        assert!(!err.retryable);
        assert!(err.message.contains("bad input"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/analyze")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = capability(&server)
            .invoke(json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_credentials_and_headers_are_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/analyze")
            .match_header("authorization", "Bearer secret")
            .match_header("x-tenant", "desk-7")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        capability(&server)
            .with_api_key("secret")
            .with_header("x-tenant", "desk-7")
            .invoke(json!({}), &ctx())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let capability =
            HttpCapability::new("risk", "http://127.0.0.1:1/analyze", Duration::from_secs(1))
                .unwrap();

        let err = capability.invoke(json!({}), &ctx()).await.unwrap_err();
        assert!(err.retryable);
    }

    #[test]
    fn test_endpoint_config_defaults() {
        let config: EndpointConfig =
            serde_json::from_value(json!({"url": "http://localhost:8080/risk"})).unwrap();

        assert_eq!(config, EndpointConfig::new("http://localhost:8080/risk"));
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_from_config_copies_headers() {
        let mut config = EndpointConfig::new("http://localhost:8080/risk");
        config.headers.insert("x-tenant".to_string(), "desk-7".to_string());
        config.api_key_env = Some("FINFLASH_TEST_UNSET_KEY".to_string());

        let capability = HttpCapability::from_config("risk", &config).unwrap();
        assert_eq!(capability.url(), "http://localhost:8080/risk");
        assert_eq!(capability.headers.get("x-tenant").map(String::as_str), Some("desk-7"));
        assert!(capability.api_key.is_none());
    }
}
