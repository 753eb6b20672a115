//! JSON-RPC 2.0 message envelope.
//!
//! The transport layer hands the engine fully deframed, JSON-decoded
//! [`Message`] values; this module only classifies them and builds outbound
//! payloads. Requests carry an `id` and expect exactly one reply;
//! notifications carry none and are never answered.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code used for failures reported inline in a reply.
pub const INTERNAL_ERROR: i64 = -32603;

/// A single inbound JSON-RPC message.
///
/// Client-originated replies (e.g. the answer to a `showMessageRequest`)
/// carry neither `method` nor `params`; the engine drops those on the floor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "preserve_explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Message {
    pub fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }

    pub fn params(&self) -> Value {
        self.params.clone().unwrap_or(Value::Null)
    }
}

/// Keep a `result` member that is present-but-`null` distinguishable from
/// an absent one, as JSON-RPC requires for replies.
fn preserve_explicit_null<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Build a successful reply to the request with the given id.
pub fn response(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Build an error reply to the request with the given id.
pub fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// Build a server-originated notification.
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}
