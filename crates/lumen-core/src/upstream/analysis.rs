//! Upstream response classification.
//!
//! After every upstream exchange the body is decoded (a single JSON-RPC
//! object or a batch array) and any embedded RPC errors are sorted into the
//! failure taxonomy:
//!
//! - **user errors**: the request itself was bad; the node is not
//!   penalized and the body is returned to the client verbatim;
//! - **method unavailable**: the node proved it cannot serve a method;
//!   the method is marked unavailable on that target and the request is
//!   retried elsewhere;
//! - **block cleaned up**: carries the node's first available slot, fed
//!   back into the target's history estimate; retryable;
//! - everything else is a transient node fault: retryable and counted
//!   against the target's health.

use ahash::AHashSet;
use serde_json::Value;

use crate::chain::solana::{self, GET_BLOCK};

/// Aggregated verdict over one upstream response body.
#[derive(Debug, Default)]
pub struct ResponseAnalysis {
    /// First available slot parsed from a `BlockCleanedUp` message.
    pub first_slot_on_node: Option<u64>,
    /// The failure belongs to the caller; return the body as-is.
    pub user_error: bool,
    /// Methods this node proved it cannot serve.
    pub unavailable_methods: AHashSet<String>,
    /// Node-fault descriptions, kept for logging.
    pub transient_errors: Vec<String>,
    /// Every embedded RPC error code, in encounter order.
    pub error_codes: Vec<i32>,
}

impl ResponseAnalysis {
    /// Whether the exchange leaves the node looking healthy.
    #[must_use]
    pub fn node_healthy(&self) -> bool {
        self.transient_errors.is_empty() && self.unavailable_methods.is_empty()
    }

    /// Whether the dispatcher should try another target.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        !self.user_error && !self.node_healthy()
    }

    fn push_transient(&mut self, description: String) {
        self.transient_errors.push(description);
    }
}

/// Error codes whose failures belong to the caller rather than the node.
fn is_user_error_code(code: i32) -> bool {
    matches!(
        code,
        solana::SEND_TRANSACTION_PREFLIGHT_FAILURE_ERR_CODE
            | solana::TRANSACTION_SIGNATURE_VERIFICATION_FAILURE_ERR_CODE
            | solana::TRANSACTION_PRECOMPILE_VERIFICATION_FAILURE_ERR_CODE
            | solana::TRANSACTION_SIGNATURE_LEN_MISMATCH_ERR_CODE
            | solana::UNSUPPORTED_TRANSACTION_VERSION_ERR_CODE
            | solana::PARSE_ERR_CODE
            | solana::INVALID_REQUEST_ERR_CODE
            | solana::INVALID_PARAMS_ERR_CODE
            | solana::SLOT_SKIPPED_ERR_CODE
            | solana::LONG_TERM_STORAGE_SLOT_SKIPPED_ERR_CODE
            | solana::BLOCK_NOT_AVAILABLE_ERR_CODE
            | solana::BLOCK_STATUS_NOT_AVAILABLE_YET_ERR_CODE
    )
}

/// `InvalidParams` replies that actually signal node-side capacity problems.
fn is_node_capacity_message(message: &str) -> bool {
    message.contains("BigTable query failed (maybe timeout due to too large range")
        || message.contains("blockstore error")
}

fn is_method_unavailable_code(code: i32) -> bool {
    code == solana::METHOD_NOT_FOUND_ERR_CODE
        || code == solana::TRANSACTION_HISTORY_NOT_AVAILABLE_ERR_CODE
}

/// Classifies one upstream response body against the request's methods.
///
/// `methods` carries the batch's request methods in order; for array bodies
/// the n-th element is checked against the n-th method.
#[must_use]
pub fn analyze_response(body: &[u8], methods: &[String]) -> ResponseAnalysis {
    let mut analysis = ResponseAnalysis::default();

    let Some(first) = body.first() else {
        analysis.push_transient("empty body".to_string());
        return analysis;
    };

    match *first {
        b'{' => match serde_json::from_slice::<Value>(body) {
            Ok(object) => {
                let method = methods.first().map(String::as_str).unwrap_or_default();
                check_rpc_object(&object, method, &mut analysis);
            }
            Err(e) => analysis.push_transient(format!("invalid json object: {e}")),
        },
        b'[' => match serde_json::from_slice::<Vec<Value>>(body) {
            Ok(array) => {
                for (idx, object) in array.iter().enumerate() {
                    let Some(method) = methods.get(idx) else {
                        analysis.push_transient(format!(
                            "batch index {idx} exceeds requested methods ({})",
                            methods.len()
                        ));
                        continue;
                    };
                    check_rpc_object(object, method, &mut analysis);
                }
            }
            Err(e) => analysis.push_transient(format!("invalid json array: {e}")),
        },
        other => {
            analysis.push_transient(format!("invalid json first byte: {}", other as char));
        }
    }

    analysis
}

/// Checks one response object and folds its verdict into `analysis`.
fn check_rpc_object(object: &Value, method: &str, analysis: &mut ResponseAnalysis) {
    if object.get("jsonrpc").is_none() {
        analysis.push_transient("empty response body".to_string());
        return;
    }

    if let Some(error) = object.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0) as i32;
        if code != 0 {
            let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
            analysis.error_codes.push(code);
            classify_rpc_failure(code, message, method, analysis);
            return;
        }
    }

    // An explicit null block is a miss the client should not see; retry.
    if method == GET_BLOCK && matches!(object.get("result"), Some(Value::Null)) {
        analysis.push_transient("empty result field".to_string());
    }
}

fn classify_rpc_failure(code: i32, message: &str, method: &str, analysis: &mut ResponseAnalysis) {
    if code == solana::BLOCK_CLEANED_UP_ERR_CODE {
        if let Some(slot) = solana::first_available_slot(message) {
            analysis.first_slot_on_node = Some(slot);
        }
        analysis.push_transient(format!("rpc error: code {code} {message}"));
        return;
    }

    if is_user_error_code(code) {
        if code == solana::INVALID_PARAMS_ERR_CODE && is_node_capacity_message(message) {
            analysis.push_transient(format!("rpc error: code {code} {message}"));
        } else {
            analysis.user_error = true;
        }
        return;
    }

    if is_method_unavailable_code(code) {
        analysis.unavailable_methods.insert(method.to_string());
        return;
    }

    analysis.push_transient(format!("rpc error: code {code} {message}"));
}
