//! JSON request decoding and reply envelopes.
//!
//! Every reply carries the serving function's name and a wall-clock
//! timestamp (float seconds). Exactly one of `result` / `error` is present.

use serde::Serialize;
use serde_json::Value;

use crate::registry::{Kwargs, ServiceMetadata};
use crate::types::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Outcome {
    Result(Value),
    Error(String),
}

#[derive(Debug, Serialize)]
struct Reply<'a> {
    #[serde(flatten)]
    outcome: Outcome,
    service: &'a str,
    timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_id: Option<Value>,
}

/// Current time as float seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

fn encode(outcome: Outcome, service: &str, response_id: Option<Value>) -> Vec<u8> {
    let reply = Reply {
        outcome,
        service,
        timestamp: now_timestamp(),
        response_id,
    };
    serde_json::to_vec(&reply).unwrap_or_else(|e| {
        format!(r#"{{"error":"reply encoding failed: {}","service":"{}"}}"#, e, service).into_bytes()
    })
}

/// Decode a request payload into keyword arguments.
///
/// `null` is treated as no arguments; any other non-object is rejected.
pub fn decode_kwargs(payload: &[u8]) -> Result<Kwargs> {
    let value: Value = serde_json::from_slice(payload).map_err(|_| Error::decode("Invalid JSON format"))?;
    kwargs_from_value(value)
}

fn kwargs_from_value(value: Value) -> Result<Kwargs> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Kwargs::new()),
        _ => Err(Error::decode("request payload must be a JSON object")),
    }
}

fn outcome_of(service: &ServiceMetadata, result: Result<Value>) -> Outcome {
    match result {
        Ok(value) => Outcome::Result(value),
        Err(err) => {
            tracing::warn!(service = %service.name, error = %err, "handler failed");
            Outcome::Error(err.reply_message())
        }
    }
}

/// Decode, invoke, and encode one request/reply exchange.
pub fn handle_request(service: &ServiceMetadata, payload: &[u8]) -> Vec<u8> {
    let outcome = match decode_kwargs(payload) {
        Ok(args) => outcome_of(service, service.function.invoke(args)),
        Err(err) => {
            tracing::debug!(service = %service.name, error = %err, "rejected request");
            Outcome::Error(err.reply_message())
        }
    };
    encode(outcome, &service.name, None)
}

/// Invoke with no arguments and encode the result for publication.
pub fn handle_publish(service: &ServiceMetadata) -> Vec<u8> {
    let outcome = outcome_of(service, service.function.invoke(Kwargs::new()));
    encode(outcome, &service.name, None)
}

/// Handle a push/pull envelope `{"data": {...}, "response_id": ...}`.
///
/// Successful replies always carry `response_id` (null when the sender gave
/// none); error replies carry it whenever it could be read.
pub fn handle_push(service: &ServiceMetadata, payload: &[u8]) -> Vec<u8> {
    let envelope = match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(envelope)) => envelope,
        Ok(_) => {
            let err = Error::decode("request payload must be a JSON object");
            return encode(Outcome::Error(err.reply_message()), &service.name, None);
        }
        Err(_) => {
            return encode(Outcome::Error("Invalid JSON format".to_string()), &service.name, None);
        }
    };

    let response_id = envelope.get("response_id").cloned().unwrap_or(Value::Null);
    let data = envelope.get("data").cloned().unwrap_or(Value::Null);
    let outcome = match kwargs_from_value(data) {
        Ok(args) => outcome_of(service, service.function.invoke(args)),
        Err(err) => Outcome::Error(err.reply_message()),
    };
    encode(outcome, &service.name, Some(response_id))
}
