// The outbound call boundary: one HTTP request in, one classified result out
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::client::context::Labels;
use crate::client::token::TokenProvider;
use crate::config::ApiConfig;
use crate::error::{ApiError, ConfigError, RateLimitHint};

/// One API call as handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the API root, e.g. `/my/ships/ALPHA-1/orbit`
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// Performs a single API call. The dispatcher is generic over this so it can
/// be driven by a fake in tests.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: &ApiRequest, labels: &Labels) -> Result<Value, ApiError>;
}

/// reqwest-backed executor talking to the live API.
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpExecutor {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn from_config(api: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ConfigError> {
        Self::new(&api.base_url, tokens, api.request_timeout())
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, request: &ApiRequest, labels: &Labels) -> Result<Value, ApiError> {
        let token = self.tokens.token().map_err(|e| ApiError::Terminal {
            status: 401,
            code: None,
            message: format!("agent token unavailable: {}", e),
            data: None,
        })?;

        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .bearer_auth(token);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, path = %request.path, ?labels, "sending API request");
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transient(format!("failed to read response body: {}", e)))?;

        if status >= 300 {
            debug!(status, path = %request.path, body = %truncate(&body, 200), "API error response");
        }
        classify_response(status, &headers, &body)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    code: Option<u32>,
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RateLimitData {
    retry_after: Option<f64>,
    limit_per_second: Option<f64>,
    limit_burst: Option<u32>,
    remaining: Option<u32>,
    reset: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    limit_type: Option<String>,
}

impl From<RateLimitData> for RateLimitHint {
    fn from(data: RateLimitData) -> Self {
        RateLimitHint {
            retry_after: data.retry_after.and_then(|s| Duration::try_from_secs_f64(s).ok()),
            reset: data.reset,
            limit_per_second: data.limit_per_second,
            limit_burst: data.limit_burst,
            remaining: data.remaining,
            limit_type: data.limit_type,
        }
    }
}

/// Turns a raw HTTP response into the dispatcher's success/error taxonomy.
pub fn classify_response(status: u16, headers: &HeaderMap, body: &str) -> Result<Value, ApiError> {
    if (200..300).contains(&status) {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(body).map_err(ApiError::decode);
    }

    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();

    if status == 429 {
        let from_body = envelope
            .as_ref()
            .and_then(|e| e.error.data.clone())
            .and_then(|data| serde_json::from_value::<RateLimitData>(data).ok())
            .map(RateLimitHint::from)
            .unwrap_or_default();
        return Err(ApiError::RateLimited(from_body.or(hint_from_headers(headers))));
    }

    match envelope {
        None if matches!(status, 502..=504) => Err(ApiError::transient(format!(
            "gateway returned {} without an API error body",
            status
        ))),
        Some(envelope) => Err(ApiError::Terminal {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
            data: envelope.error.data,
        }),
        None => Err(ApiError::Terminal {
            status,
            code: None,
            message: if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                truncate(body, 200).to_string()
            },
            data: None,
        }),
    }
}

fn hint_from_headers(headers: &HeaderMap) -> RateLimitHint {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    RateLimitHint {
        retry_after: headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .and_then(|s| Duration::try_from_secs_f64(s).ok()),
        reset: header("x-ratelimit-reset")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|reset| reset.with_timezone(&Utc)),
        limit_per_second: header("x-ratelimit-limit-per-second").and_then(|v| v.parse().ok()),
        limit_burst: header("x-ratelimit-limit-burst").and_then(|v| v.parse().ok()),
        remaining: header("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
        limit_type: header("x-ratelimit-type").map(str::to_string),
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_success_body_is_null() {
        assert_eq!(classify_response(204, &HeaderMap::new(), "").unwrap(), Value::Null);
    }

    #[test]
    fn rate_limit_body_is_decoded_into_hint() {
        let body = json!({
            "error": {
                "message": "You have reached your API limit.",
                "code": 429,
                "data": {
                    "type": "IP-based rate limit",
                    "retryAfter": 1.25,
                    "limitBurst": 30,
                    "limitPerSecond": 2,
                    "remaining": 0,
                    "reset": "2026-10-17T12:00:01.000Z"
                }
            }
        })
        .to_string();

        let err = classify_response(429, &HeaderMap::new(), &body).unwrap_err();
        let hint = err.rate_limit_hint().unwrap();
        assert_eq!(hint.retry_after, Some(Duration::from_millis(1250)));
        assert_eq!(hint.limit_burst, Some(30));
        assert_eq!(hint.limit_per_second, Some(2.0));
        assert_eq!(hint.remaining, Some(0));
        assert_eq!(hint.limit_type.as_deref(), Some("IP-based rate limit"));
        assert!(hint.reset.is_some());
    }

    #[test]
    fn rate_limit_headers_fill_missing_fields() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        headers.insert("x-ratelimit-limit-burst", HeaderValue::from_static("10"));

        let err = classify_response(429, &headers, "rate limited").unwrap_err();
        let hint = err.rate_limit_hint().unwrap();
        assert_eq!(hint.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(hint.limit_burst, Some(10));
        assert_eq!(hint.limit_per_second, None);
    }

    #[test]
    fn gateway_failures_without_api_body_are_transient() {
        let err = classify_response(503, &HeaderMap::new(), "<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, ApiError::Transient { .. }));
    }

    #[test]
    fn structured_errors_are_terminal() {
        let body = json!({
            "error": {"message": "Ship is not currently in orbit.", "code": 4236, "data": {"shipSymbol": "ALPHA-1"}}
        })
        .to_string();
        match classify_response(400, &HeaderMap::new(), &body) {
            Err(ApiError::Terminal { status, code, message, data }) => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(4236));
                assert_eq!(message, "Ship is not currently in orbit.");
                assert_eq!(data, Some(json!({"shipSymbol": "ALPHA-1"})));
            }
            other => panic!("expected terminal error, got {:?}", other),
        }
    }
}
