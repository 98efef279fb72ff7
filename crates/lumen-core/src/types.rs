//! JSON-RPC protocol types shared across the proxy.
//!
//! The proxy forwards request and response bodies verbatim, so these types
//! are only used at the edges: request validation on the way in and error
//! analysis on the way out. The `jsonrpc` field uses `Cow<'static, str>` so
//! constructing protocol objects never allocates for the version string, and
//! request ids are `Arc<serde_json::Value>` so they can be echoed into error
//! responses with a cheap clone.

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc};

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the protocol version.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// JSON-RPC 2.0 request object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default = "default_id")]
    pub id: Arc<serde_json::Value>,
}

fn default_id() -> Arc<serde_json::Value> {
    Arc::new(serde_json::Value::Null)
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }

    /// Whether the request declares the supported protocol version.
    #[must_use]
    pub fn is_version_valid(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }
}

/// JSON-RPC 2.0 response object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn error(code: i32, message: impl Into<String>, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Service class attached to an API token.
///
/// The class is resolved by the host's auth layer and passed through as a
/// routing hint: `Speed` prefers low-latency targets, `Reliable` prefers
/// low-error targets, `FirstEndpoint` and `Default` take the plain weighted
/// draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenClass {
    #[default]
    Default,
    Speed,
    Reliable,
    FirstEndpoint,
}

impl TokenClass {
    #[must_use]
    pub fn prefers_speed(self) -> bool {
        self == TokenClass::Speed
    }

    #[must_use]
    pub fn prefers_reliability(self) -> bool {
        self == TokenClass::Reliable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_version_check() {
        let req = JsonRpcRequest::new("getSlot", None, json!(1));
        assert!(req.is_version_valid());

        let bad: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "1.0", "method": "getSlot", "id": 1}))
                .unwrap();
        assert!(!bad.is_version_valid());
    }

    #[test]
    fn request_without_id_defaults_to_null() {
        let req: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "getHealth"})).unwrap();
        assert!(req.id.is_null());
    }

    #[test]
    fn error_response_echoes_id() {
        let resp = JsonRpcResponse::error(-32601, "Method not found", Arc::new(json!(7)));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["id"], json!(7));
        assert_eq!(v["error"]["code"], json!(-32601));
        assert!(v.get("result").is_none());
    }

    #[test]
    fn token_class_hints() {
        assert!(TokenClass::Speed.prefers_speed());
        assert!(TokenClass::Reliable.prefers_reliability());
        assert!(!TokenClass::Default.prefers_speed());
        assert_eq!(TokenClass::default(), TokenClass::Default);
    }
}
