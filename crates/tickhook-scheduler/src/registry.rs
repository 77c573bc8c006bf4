//! Task registry — validates schedule/unschedule requests and writes them to the store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tickhook_core::{Result, TickhookError};

use crate::clock::Clock;
use crate::store::TaskStore;
use crate::tasks::{HttpVerb, ScheduledTask, UNLIMITED_RETRIES};

/// A validated schedule request.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub url: String,
    pub verb: HttpVerb,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Map<String, Value>>,
    pub retry_count: i64,
    pub cancel_retry_on_success: bool,
    pub cancel_on_return_codes: BTreeSet<i64>,
    pub retry_in_seconds: i64,
}

impl ScheduleRequest {
    /// Build the stored record, due `retry_in_seconds` after `now`.
    pub fn into_task(self, now: i64) -> ScheduledTask {
        ScheduledTask {
            scheduled_to_time: now.saturating_add(self.retry_in_seconds),
            url: self.url,
            verb: self.verb,
            headers: self.headers,
            body: self.body,
            retry_count: self.retry_count,
            retried_count: 0,
            cancel_retry_on_success: self.cancel_retry_on_success,
            cancel_on_return_codes: self.cancel_on_return_codes,
            retry_in_seconds: self.retry_in_seconds,
        }
    }
}

/// Parse and validate a schedule request document.
pub fn parse_schedule_request(doc: &Value) -> Result<ScheduleRequest> {
    let obj = doc
        .as_object()
        .ok_or_else(|| TickhookError::validation("request must be a JSON object"))?;

    let url = required_str(obj, "url")?;
    validate_url(url)?;

    let verb_name = required_str(obj, "verb")?;
    let verb = HttpVerb::parse(verb_name).ok_or_else(|| {
        TickhookError::validation(format!(
            "field verb must be one of GET, POST, PUT, DELETE (got '{verb_name}')"
        ))
    })?;

    let headers = match obj.get("headers") {
        None => BTreeMap::new(),
        Some(Value::Object(map)) => parse_headers(map)?,
        Some(_) => return Err(TickhookError::validation("field headers must be an object")),
    };

    let body = match obj.get("body") {
        None => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err(TickhookError::validation("field body must be an object")),
    };
    match (verb.requires_body(), body.is_some()) {
        (true, false) => {
            return Err(TickhookError::validation(format!("{verb} requests must contain field body")));
        }
        (false, true) => {
            return Err(TickhookError::validation(format!("{verb} requests cannot contain field body")));
        }
        _ => {}
    }

    let retry_count = required_int(obj, "retryCount")?;
    if retry_count < UNLIMITED_RETRIES {
        return Err(TickhookError::validation(
            "field retryCount must be greater than or equal to -1",
        ));
    }

    let cancel_retry_on_success = match obj.get("cancelRetryOnSuccess") {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(TickhookError::validation("field cancelRetryOnSuccess must be a boolean"));
        }
    };

    let cancel_on_return_codes: BTreeSet<i64> = match obj.get("cancelOnReturnCodes") {
        None => BTreeSet::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64().ok_or_else(|| {
                    TickhookError::validation("all elements of cancelOnReturnCodes must be integers")
                })
            })
            .collect::<Result<_>>()?,
        Some(_) => {
            return Err(TickhookError::validation("field cancelOnReturnCodes must be an array"));
        }
    };

    let retry_in_seconds = required_int(obj, "retryInSeconds")?;
    if retry_in_seconds < 0 {
        return Err(TickhookError::validation(
            "field retryInSeconds must be greater than or equal to 0",
        ));
    }

    Ok(ScheduleRequest {
        url: url.to_string(),
        verb,
        headers,
        body,
        retry_count,
        cancel_retry_on_success,
        cancel_on_return_codes,
        retry_in_seconds,
    })
}

/// Pull the `url` out of an unschedule request and validate it.
pub fn parse_unschedule_request(doc: &Value) -> Result<String> {
    let obj = doc
        .as_object()
        .ok_or_else(|| TickhookError::validation("request must be a JSON object"))?;
    let url = required_str(obj, "url")?;
    validate_url(url)?;
    Ok(url.to_string())
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(TickhookError::validation(format!("field {field} must be a string"))),
        None => Err(TickhookError::validation(format!("missing required field {field}"))),
    }
}

fn required_int(obj: &Map<String, Value>, field: &str) -> Result<i64> {
    match obj.get(field) {
        // as_i64 is None for floats and for integers beyond i64.
        Some(v) => v
            .as_i64()
            .ok_or_else(|| TickhookError::validation(format!("field {field} must be an integer"))),
        None => Err(TickhookError::validation(format!("missing required field {field}"))),
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| TickhookError::validation(format!("field url is invalid: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(TickhookError::validation(format!(
            "field url must be an absolute http or https URL (got '{url}')"
        )));
    }
    Ok(())
}

fn parse_headers(map: &Map<String, Value>) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(TickhookError::validation(format!(
                        "header {name} must be a string"
                    )));
                }
            };
            Ok((name.clone(), value))
        })
        .collect()
}

/// Entry point for schedule and unschedule calls.
#[derive(Clone)]
pub struct TaskRegistry {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Store the task, replacing any earlier task for the same URL.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledTask> {
        let task = request.into_task(self.clock.epoch_secs());
        self.store.upsert(&task).map_err(into_store_error)?;
        tracing::info!(
            url = %task.url,
            verb = %task.verb,
            due = task.scheduled_to_time,
            retry_count = task.retry_count,
            "Task scheduled"
        );
        Ok(task)
    }

    /// Remove the task for `url`. Unknown URLs are not an error.
    pub fn unschedule(&self, url: &str) -> Result<()> {
        validate_url(url)?;
        self.store.delete(url).map_err(into_store_error)?;
        tracing::info!(url = %url, "Task unscheduled");
        Ok(())
    }

    /// Every stored task, soonest due first.
    pub fn list(&self) -> Result<Vec<ScheduledTask>> {
        let mut tasks = self.store.scan().map_err(into_store_error)?;
        tasks.sort_by(|a, b| {
            a.scheduled_to_time
                .cmp(&b.scheduled_to_time)
                .then_with(|| a.url.cmp(&b.url))
        });
        Ok(tasks)
    }
}

/// Any failure below the registry surfaces to callers as a store failure.
fn into_store_error(e: TickhookError) -> TickhookError {
    match e {
        TickhookError::StoreUnavailable(_) => e,
        other => TickhookError::store(other.to_string()),
    }
}
