//! Task definitions — the persisted record for one deferred webhook.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `retryCount` value meaning "retry forever".
pub const UNLIMITED_RETRIES: i64 = -1;

/// HTTP verb a task is fired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpVerb {
    /// Parse the exact upper-case verb names accepted by the API.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// POST and PUT carry a JSON body; GET and DELETE must not.
    pub fn requires_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled webhook call. The target URL is the identity key: there is at
/// most one task per URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub url: String,
    pub verb: HttpVerb,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON object payload, present only for POST/PUT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Map<String, Value>>,
    /// Maximum number of reschedules, or [`UNLIMITED_RETRIES`].
    pub retry_count: i64,
    /// Reschedules consumed so far.
    #[serde(default)]
    pub retried_count: i64,
    #[serde(default = "default_cancel_retry_on_success")]
    pub cancel_retry_on_success: bool,
    /// Status codes that delete the task whatever else happened.
    #[serde(default)]
    pub cancel_on_return_codes: BTreeSet<i64>,
    pub retry_in_seconds: i64,
    /// Epoch seconds at or after which the task is due.
    #[serde(default)]
    pub scheduled_to_time: i64,
}

fn default_cancel_retry_on_success() -> bool {
    true
}

impl ScheduledTask {
    /// Percent-encoded URL used as the store key.
    pub fn storage_key(&self) -> String {
        storage_key(&self.url)
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.scheduled_to_time <= now
    }

    /// Whether one more reschedule fits in the retry budget.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count == UNLIMITED_RETRIES || self.retried_count + 1 <= self.retry_count
    }

    pub fn cancels_on(&self, status: u16) -> bool {
        self.cancel_on_return_codes.contains(&i64::from(status))
    }

    /// Consume one retry and push the due time out by `retry_in_seconds` from `now`.
    pub fn reschedule(&mut self, now: i64) {
        self.retried_count += 1;
        self.scheduled_to_time = now.saturating_add(self.retry_in_seconds);
    }
}

/// Store key for a URL.
pub fn storage_key(url: &str) -> String {
    urlencoding::encode(url).into_owned()
}
