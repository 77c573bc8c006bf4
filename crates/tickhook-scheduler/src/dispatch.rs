//! Webhook dispatch — performs the one HTTP call a due task asks for.
//!
//! A dispatch never returns an error: transport faults (DNS, refused
//! connection, reset, timeout) are folded into a failed [`DispatchResult`]
//! carrying [`TRANSPORT_FAILURE_STATUS`], so the sweep can classify them like
//! any other failed attempt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::tls;
use tickhook_core::config::DispatchConfig;
use tickhook_core::{Result, TickhookError};

use crate::tasks::{HttpVerb, ScheduledTask};

/// Status reported when no HTTP response was received.
pub const TRANSPORT_FAILURE_STATUS: u16 = 500;

/// Response bodies are kept only for diagnostics; cap what we hold on to.
const MAX_DIAGNOSTIC_BODY: usize = 2048;

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// `status < 400`.
    pub success: bool,
    pub status: u16,
    /// Response body (truncated), for logs.
    pub body: String,
    /// Transport-level diagnostic when no response was received.
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            success: status < 400,
            status,
            body: body.into(),
            error: None,
        }
    }

    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: TRANSPORT_FAILURE_STATUS,
            body: String::new(),
            error: Some(message.into()),
        }
    }
}

/// Performs the HTTP call for one task.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, task: &ScheduledTask) -> DispatchResult;
}

/// Production dispatcher backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .min_tls_version(parse_tls_version(&config.min_tls_version)?);

        if config.accept_invalid_certs {
            tracing::warn!(
                "TLS certificate validation is DISABLED for outbound webhooks (dispatch.accept_invalid_certs = true)"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let client = builder
            .build()
            .map_err(|e| TickhookError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn parse_tls_version(s: &str) -> Result<tls::Version> {
    match s.trim() {
        "1.0" => Ok(tls::Version::TLS_1_0),
        "1.1" => Ok(tls::Version::TLS_1_1),
        "1.2" => Ok(tls::Version::TLS_1_2),
        "1.3" => Ok(tls::Version::TLS_1_3),
        other => Err(TickhookError::Config(format!(
            "dispatch.min_tls_version must be one of 1.0, 1.1, 1.2, 1.3 (got '{other}')"
        ))),
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, task: &ScheduledTask) -> DispatchResult {
        let mut req = match task.verb {
            HttpVerb::Get => self.client.get(&task.url),
            HttpVerb::Delete => self.client.delete(&task.url),
            HttpVerb::Post => self.client.post(&task.url),
            HttpVerb::Put => self.client.put(&task.url),
        };

        let mut headers = HeaderMap::with_capacity(task.headers.len() + 1);
        for (key, value) in &task.headers {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.append(name, val);
                }
                _ => tracing::warn!(url = %task.url, header = %key, "Skipping invalid header"),
            }
        }

        if task.verb.requires_body() {
            // A caller-supplied Content-Type wins over the JSON default.
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            let body = task.body.clone().unwrap_or_default();
            req = req.body(serde_json::Value::Object(body).to_string());
        }
        req = req.headers(headers);

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                let message = describe_transport_error(&task.url, &e);
                tracing::warn!(url = %task.url, verb = %task.verb, "Webhook transport failure: {message}");
                return DispatchResult::transport_failure(message);
            }
        };

        let status = resp.status().as_u16();
        let mut body = resp.text().await.unwrap_or_default();
        truncate_at_char_boundary(&mut body, MAX_DIAGNOSTIC_BODY);

        let result = DispatchResult::from_status(status, body);
        if result.success {
            tracing::debug!(url = %task.url, verb = %task.verb, status, "Webhook delivered");
        } else {
            tracing::warn!(
                url = %task.url,
                verb = %task.verb,
                status,
                response = %result.body,
                "Webhook returned failure status"
            );
        }
        result
    }
}

fn describe_transport_error(url: &str, e: &reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else {
        "transport"
    };
    let mut message = format!("{kind} error calling {url}: {e}");
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        message.push_str(&format!(": {inner}"));
        source = inner.source();
    }
    message
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
