//! `http_request`: call an HTTP endpoint and return status, headers and body.

use std::collections::BTreeMap;
use std::time::Duration;

use aiq_core::error::ToolError;
use aiq_core::tool::{Tool, names};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn failed(reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: names::HTTP_REQUEST.into(),
            reason,
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_method(raw: Option<&str>) -> Result<Method, ToolError> {
    match raw.map(str::to_uppercase).as_deref() {
        None | Some("") | Some("GET") => Ok(Method::GET),
        Some("POST") => Ok(Method::POST),
        Some("PUT") => Ok(Method::PUT),
        Some("DELETE") => Ok(Method::DELETE),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "unsupported HTTP method: {other}. Must be GET, POST, PUT or DELETE"
        ))),
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        names::HTTP_REQUEST
    }

    fn description(&self) -> &str {
        "Make HTTP requests (GET, POST, PUT, DELETE). Use this to fetch data from APIs or send data to endpoints."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "DELETE"],
                    "description": "HTTP method",
                    "default": "GET"
                },
                "url": {
                    "type": "string",
                    "description": "URL to request"
                },
                "headers": {
                    "type": "object",
                    "description": "HTTP headers as key-value pairs",
                    "additionalProperties": { "type": "string" }
                },
                "body": {
                    "type": "string",
                    "description": "Request body (for POST/PUT)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Map<String, Value>, cancel: CancellationToken) -> Result<Value, ToolError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("url is required".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments(
                "URL must start with http:// or https://".into(),
            ));
        }

        let method = parse_method(args.get("method").and_then(Value::as_str))?;
        let timeout = args
            .get("timeout")
            .and_then(Value::as_u64)
            .filter(|&t| t > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(Duration::from_secs(timeout));

        let mut has_content_type = false;
        if let Some(headers) = args.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                let value = value.as_str().map_or_else(|| value.to_string(), String::from);
                has_content_type |= key.eq_ignore_ascii_case("content-type");
                request = request.header(key.as_str(), value);
            }
        }

        let body = args.get("body").and_then(Value::as_str).filter(|b| !b.is_empty());
        if let Some(body) = body
            && (method == Method::POST || method == Method::PUT)
        {
            if !has_content_type {
                request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
            }
            request = request.body(body.to_string());
        }

        debug!(%method, url, "Sending HTTP request");
        let send = async {
            let response = request
                .send()
                .await
                .map_err(|e| Self::failed(format!("request failed: {e}")))?;
            let status = response.status();
            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let body = response
                .text()
                .await
                .map_err(|e| Self::failed(format!("failed to read response body: {e}")))?;
            Ok::<_, ToolError>(json!({
                "status_code": status.as_u16(),
                "status_text": status.to_string(),
                "headers": headers,
                "body": body,
            }))
        };

        tokio::select! {
            result = send => result,
            _ = cancel.cancelled() => Err(ToolError::Cancelled("HTTP request cancelled".into())),
        }
    }
}
