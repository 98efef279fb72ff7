//! Request body preparation and JSON-RPC validation.
//!
//! Runs before dispatch: trims the raw body, parses the single request or
//! batch, enforces the protocol version and the chain's method list, and
//! extracts the smallest referenced block for block-addressed methods.
//! Validation failures are returned as ready-to-serialize JSON-RPC error
//! responses (served with HTTP 200, as upstream nodes do).

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

use lumen_core::{
    chain::solana::{self, INVALID_PARAMS_ERR_CODE, METHOD_NOT_FOUND_ERR_CODE, PARSE_ERR_CODE},
    types::{JsonRpcRequest, JsonRpcResponse},
};

const INVALID_REQUEST_ERR_CODE: i32 = solana::INVALID_REQUEST_ERR_CODE;
const BLOCK_PARAMS_MESSAGE: &str = "`params` should have at least 1 argument(s)";

/// A validated request ready for dispatch.
#[derive(Debug)]
pub struct PreparedRequest {
    /// Trimmed body, forwarded to upstreams verbatim.
    pub body: Bytes,
    /// Method of each request in the batch, in order.
    pub methods: Vec<String>,
    /// Smallest block referenced by block-addressed methods; 0 when none.
    pub min_block: i64,
    pub array_requested: bool,
}

fn parse_error() -> JsonRpcResponse {
    JsonRpcResponse::error(PARSE_ERR_CODE, "Parse error", Arc::new(Value::Null))
}

/// Validates the raw body against the chain's method list.
///
/// # Errors
///
/// Returns the JSON-RPC error response to serve (with HTTP 200) when the
/// body fails parsing or validation.
pub fn prepare_body(
    raw: &[u8],
    is_known_method: impl Fn(&str) -> bool,
) -> Result<PreparedRequest, Box<JsonRpcResponse>> {
    let trimmed = trim_whitespace(raw);
    let Some(first) = trimmed.first() else {
        return Err(Box::new(parse_error()));
    };

    let (requests, array_requested) = match *first {
        b'{' => match serde_json::from_slice::<JsonRpcRequest>(&trimmed) {
            Ok(req) => (vec![req], false),
            Err(_) => return Err(Box::new(parse_error())),
        },
        b'[' => match serde_json::from_slice::<Vec<JsonRpcRequest>>(&trimmed) {
            Ok(reqs) => (reqs, true),
            Err(_) => return Err(Box::new(parse_error())),
        },
        _ => return Err(Box::new(parse_error())),
    };

    let mut min_block = 0i64;
    for request in &requests {
        if !request.is_version_valid() {
            return Err(Box::new(JsonRpcResponse::error(
                INVALID_REQUEST_ERR_CODE,
                "Invalid Request",
                Arc::clone(&request.id),
            )));
        }
        if !is_known_method(&request.method) {
            return Err(Box::new(JsonRpcResponse::error(
                METHOD_NOT_FOUND_ERR_CODE,
                "Method not found",
                Arc::clone(&request.id),
            )));
        }
        if solana::is_block_related(&request.method) {
            let block = extract_block_param(request)?;
            if min_block == 0 || block < min_block {
                min_block = block;
            }
        }
    }

    Ok(PreparedRequest {
        body: Bytes::from(trimmed),
        methods: requests.iter().map(|r| r.method.clone()).collect(),
        min_block,
        array_requested,
    })
}

/// Block-addressed methods must carry the slot as their first parameter.
fn extract_block_param(request: &JsonRpcRequest) -> Result<i64, Box<JsonRpcResponse>> {
    let invalid = || {
        Box::new(JsonRpcResponse::error(
            INVALID_PARAMS_ERR_CODE,
            BLOCK_PARAMS_MESSAGE,
            Arc::clone(&request.id),
        ))
    };

    let Some(Value::Array(params)) = &request.params else {
        return Err(invalid());
    };
    let Some(first) = params.first() else {
        return Err(invalid());
    };
    first.as_i64().ok_or_else(invalid)
}

/// Strips leading and trailing whitespace from the raw body.
fn trim_whitespace(raw: &[u8]) -> Vec<u8> {
    let start = raw.iter().position(|b| !b.is_ascii_whitespace());
    let end = raw.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => raw[s..=e].to_vec(),
        _ => Vec::new(),
    }
}

/// Whether the content type declares JSON, ignoring charset parameters.
#[must_use]
pub fn is_content_type_valid(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|mime| mime.eq_ignore_ascii_case("application/json"))
}
