//! Shared outbound HTTP client for the web and medical toolkits.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::dispatch::{CallContext, ProviderError};
use crate::types::{Error, HttpConfig, Result};

/// One `reqwest::Client` shared by every tool of a toolkit; rebuilt after a
/// call against it was abandoned.
#[derive(Debug)]
pub struct HttpGateway {
    config: HttpConfig,
    client: Mutex<Client>,
    suspect: AtomicBool,
}

impl HttpGateway {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            client: Mutex::new(client),
            suspect: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn mark_suspect(&self) {
        self.suspect.store(true, Ordering::SeqCst);
    }

    /// Current client, rebuilding it first if it was marked suspect.
    pub async fn client(&self) -> std::result::Result<Client, ProviderError> {
        let mut client = self.client.lock().await;
        if self.suspect.swap(false, Ordering::SeqCst) {
            tracing::warn!("rebuilding HTTP client after an abandoned call");
            *client = build_client(&self.config)?;
        }
        Ok(client.clone())
    }

    /// Send a request, honoring cancellation.
    pub async fn send(
        &self,
        request: RequestBuilder,
        ctx: &CallContext,
    ) -> std::result::Result<Response, ProviderError> {
        ctx.guard(request.send()).await?.map_err(transport_error)
    }

    /// Read a response body as text, honoring cancellation.
    pub async fn text(
        &self,
        response: Response,
        ctx: &CallContext,
    ) -> std::result::Result<String, ProviderError> {
        ctx.guard(response.text()).await?.map_err(transport_error)
    }
}

fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| Error::config(format!("failed to build http client: {}", e)))
}

/// Network failures are transient; malformed requests are not.
pub fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_builder() {
        ProviderError::permanent(format!("invalid request: {}", err))
    } else {
        ProviderError::retryable(format!("request failed: {}", err))
    }
}

/// Non-success upstream status. Server errors and throttling are retryable.
pub fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("HTTP {} - {}", status.as_u16(), body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::retryable(message)
    } else {
        ProviderError::permanent(message)
    }
}

/// Parse a body that must be JSON.
pub fn parse_json(body: &str) -> std::result::Result<Value, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::permanent(format!("Response is not valid JSON: {}", e)))
}

pub fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Render an arbitrary response: JSON bodies parsed, text bodies truncated.
pub fn render_body(status: StatusCode, content_type: &str, body: String, max_chars: usize) -> Value {
    let length = body.chars().count();
    let mut rendered = Map::new();
    rendered.insert("status".to_string(), json!(status.as_u16()));
    rendered.insert("content_type".to_string(), json!(content_type));
    rendered.insert("length".to_string(), json!(length));

    let parsed = if content_type.contains("application/json") {
        serde_json::from_str::<Value>(&body).ok()
    } else {
        None
    };
    match parsed {
        Some(value) => {
            rendered.insert("body".to_string(), value);
            rendered.insert("truncated".to_string(), json!(false));
        }
        None if length > max_chars => {
            rendered.insert("body".to_string(), json!(body.chars().take(max_chars).collect::<String>()));
            rendered.insert("truncated".to_string(), json!(true));
        }
        None => {
            rendered.insert("body".to_string(), json!(body));
            rendered.insert("truncated".to_string(), json!(false));
        }
    }
    Value::Object(rendered)
}
