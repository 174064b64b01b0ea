//! HTTP client toolkit (`webapi` server).

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, SERVER};
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::dispatch::{CallContext, CapabilityProvider, ProviderError, ToolBinding};
use crate::providers::http::{header_str, parse_json, render_body, status_error, HttpGateway};
use crate::tools::{Arguments, ParamKind, ParameterSpec, ToolDescriptor};
use crate::types::{HttpConfig, Result};

#[derive(Debug, Clone, Copy)]
enum WebOp {
    Get,
    Post,
    Put,
    Delete,
    FetchJson,
    CheckStatus,
}

#[derive(Debug)]
struct WebTool {
    gateway: Arc<HttpGateway>,
    op: WebOp,
}

/// Header/param objects are flat string maps.
fn string_pairs(args: &Arguments, name: &str) -> std::result::Result<Vec<(String, String)>, ProviderError> {
    if !args.is_present(name) {
        return Ok(Vec::new());
    }
    args.object(name)?
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key.clone(), s.clone())),
            other => Err(ProviderError::permanent(format!(
                "{}.{} must be a string, got {}",
                name, key, other
            ))),
        })
        .collect()
}

/// Form fields accept any scalar; non-strings are sent in their JSON form.
fn form_pairs(data: &Map<String, Value>) -> Vec<(String, String)> {
    data.iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

impl WebTool {
    async fn generic(&self, method: Method, args: &Arguments, ctx: &CallContext) -> std::result::Result<Value, ProviderError> {
        let url = args.str("url")?;
        let client = self.gateway.client().await?;
        let mut request = client.request(method.clone(), url);
        for (key, value) in string_pairs(args, "headers")? {
            request = request.header(key, value);
        }

        match method {
            Method::GET => {
                request = request.query(&string_pairs(args, "params")?);
            }
            Method::POST | Method::PUT => {
                let data = args.object("data")?;
                request = if args.bool("json_data")? {
                    request.json(data)
                } else {
                    request.form(&form_pairs(data))
                };
            }
            _ => {}
        }

        let response = self.gateway.send(request, ctx).await?;
        let status = response.status();
        let content_type = header_str(&response, CONTENT_TYPE).unwrap_or_default();
        let body = self.gateway.text(response, ctx).await?;
        tracing::debug!(%url, status = status.as_u16(), "http request complete");
        Ok(render_body(status, &content_type, body, self.gateway.config().max_body_chars))
    }

    async fn fetch_json(&self, args: &Arguments, ctx: &CallContext) -> std::result::Result<Value, ProviderError> {
        let client = self.gateway.client().await?;
        let mut request = client.get(args.str("url")?);
        for (key, value) in string_pairs(args, "headers")? {
            request = request.header(key, value);
        }
        let response = self.gateway.send(request, ctx).await?;
        let status = response.status();
        let body = self.gateway.text(response, ctx).await?;
        if status != StatusCode::OK {
            return Err(status_error(status, &body));
        }
        parse_json(&body)
    }

    async fn check_status(&self, args: &Arguments, ctx: &CallContext) -> std::result::Result<Value, ProviderError> {
        let url = args.str("url")?;
        let client = self.gateway.client().await?;
        let response = self.gateway.send(client.head(url), ctx).await?;
        let status = response.status();
        Ok(json!({
            "url": url,
            "status": status.as_u16(),
            "status_text": status.canonical_reason().unwrap_or(""),
            "server": header_str(&response, SERVER),
            "content_type": header_str(&response, CONTENT_TYPE),
            "content_length": header_str(&response, CONTENT_LENGTH),
        }))
    }
}

#[async_trait]
impl CapabilityProvider for WebTool {
    async fn invoke(&self, args: Arguments, ctx: CallContext) -> std::result::Result<Value, ProviderError> {
        if args.str("url")?.trim().is_empty() {
            return Err(ProviderError::permanent("URL is required"));
        }
        match self.op {
            WebOp::Get => self.generic(Method::GET, &args, &ctx).await,
            WebOp::Post => self.generic(Method::POST, &args, &ctx).await,
            WebOp::Put => self.generic(Method::PUT, &args, &ctx).await,
            WebOp::Delete => self.generic(Method::DELETE, &args, &ctx).await,
            WebOp::FetchJson => self.fetch_json(&args, &ctx).await,
            WebOp::CheckStatus => self.check_status(&args, &ctx).await,
        }
    }

    fn mark_suspect(&self) {
        self.gateway.mark_suspect();
    }
}

fn url_param(description: &str) -> ParameterSpec {
    ParameterSpec::required("url", ParamKind::String, description)
}

fn headers_param() -> ParameterSpec {
    ParameterSpec::optional("headers", ParamKind::Object, "Optional headers to include in the request")
        .with_default(json!({}))
}

fn body_params(descriptor: ToolDescriptor) -> ToolDescriptor {
    descriptor
        .param(
            ParameterSpec::optional("data", ParamKind::Object, "Data to send in the request body")
                .with_default(json!({})),
        )
        .param(headers_param())
        .param(
            ParameterSpec::optional("json_data", ParamKind::Boolean, "Send data as JSON (true) or form data (false)")
                .with_default(json!(true)),
        )
}

/// Tool bindings for generic HTTP access.
pub fn toolkit(config: HttpConfig) -> Result<Vec<ToolBinding>> {
    let gateway = Arc::new(HttpGateway::new(config)?);
    let tool = |op| -> Arc<dyn CapabilityProvider> {
        Arc::new(WebTool {
            gateway: gateway.clone(),
            op,
        })
    };

    Ok(vec![
        ToolBinding::new(
            ToolDescriptor::new("get_request", "Make a GET request to a URL")
                .param(url_param("The URL to send the GET request to"))
                .param(headers_param())
                .param(
                    ParameterSpec::optional("params", ParamKind::Object, "Optional query parameters")
                        .with_default(json!({})),
                ),
            tool(WebOp::Get),
        ),
        ToolBinding::new(
            body_params(
                ToolDescriptor::new("post_request", "Make a POST request to a URL")
                    .param(url_param("The URL to send the POST request to")),
            ),
            tool(WebOp::Post),
        ),
        ToolBinding::new(
            body_params(
                ToolDescriptor::new("put_request", "Make a PUT request to a URL")
                    .param(url_param("The URL to send the PUT request to")),
            ),
            tool(WebOp::Put),
        ),
        ToolBinding::new(
            ToolDescriptor::new("delete_request", "Make a DELETE request to a URL")
                .param(url_param("The URL to send the DELETE request to"))
                .param(headers_param()),
            tool(WebOp::Delete),
        ),
        ToolBinding::new(
            ToolDescriptor::new("fetch_json", "Fetch and parse JSON data from a URL")
                .param(url_param("The URL to fetch JSON from"))
                .param(headers_param()),
            tool(WebOp::FetchJson),
        ),
        ToolBinding::new(
            ToolDescriptor::new("check_status", "Check the HTTP status of a URL").param(url_param("The URL to check")),
            tool(WebOp::CheckStatus),
        ),
    ])
}
