//! Per-request state threaded through the dispatch engine.
//!
//! The front-end parses and validates the JSON-RPC body, then hands the core
//! a [`RequestContext`]: the raw body, the batch's methods, the smallest
//! referenced block for block-addressed methods, the token class hint, a
//! deadline, and a cancellation token. The core writes observability fields
//! back into it as the request progresses.

use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::{types::TokenClass, upstream::http_client::ForwardedHeaders};

/// Method label reported when a batch carries several methods.
pub const MULTIPLE_VALUES_LABEL: &str = "multiple_values";

#[derive(Debug)]
pub struct RequestContext {
    pub chain: String,
    pub request_id: String,
    pub token_class: TokenClass,
    /// Methods of the batch, in request order; never empty after preparation.
    pub methods: Vec<String>,
    /// Smallest block referenced by block-addressed methods; 0 when none.
    pub requested_block: i64,
    pub body: Bytes,
    pub forwarded: ForwardedHeaders,

    deadline: Instant,
    cancel: CancellationToken,

    // Written back by the core for the host's observability.
    provider: Option<String>,
    target_type: Option<&'static str>,
    attempts: usize,
    response_time_ms: i64,
    user_error: bool,
    has_error: bool,
    rpc_errors: Vec<i32>,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        chain: impl Into<String>,
        request_id: impl Into<String>,
        body: Bytes,
        methods: Vec<String>,
        requested_block: i64,
        token_class: TokenClass,
        timeout: Duration,
    ) -> Self {
        Self {
            chain: chain.into(),
            request_id: request_id.into(),
            token_class,
            methods,
            requested_block,
            body,
            forwarded: ForwardedHeaders::default(),
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
            provider: None,
            target_type: None,
            attempts: 0,
            response_time_ms: 0,
            user_error: false,
            has_error: false,
            rpc_errors: Vec::new(),
        }
    }

    /// First method of the batch.
    #[must_use]
    pub fn primary_method(&self) -> &str {
        self.methods.first().map(String::as_str).unwrap_or_default()
    }

    /// Single method name, or a sentinel for multi-method batches. Used as
    /// a metrics label.
    #[must_use]
    pub fn method_label(&self) -> &str {
        match self.methods.len() {
            0 => "",
            1 => &self.methods[0],
            _ => MULTIPLE_VALUES_LABEL,
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancelled by the client or past its deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline_expired()
    }

    #[must_use]
    pub fn deadline_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left until the deadline; zero once expired.
    #[must_use]
    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn set_provider(&mut self, provider: impl Into<String>) {
        self.provider = Some(provider.into());
    }

    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn set_target_type(&mut self, target_type: &'static str) {
        self.target_type = Some(target_type);
    }

    #[must_use]
    pub fn target_type(&self) -> Option<&'static str> {
        self.target_type
    }

    pub fn set_attempts(&mut self, attempts: usize) {
        self.attempts = attempts;
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn set_response_time_ms(&mut self, ms: i64) {
        self.response_time_ms = ms;
    }

    #[must_use]
    pub fn response_time_ms(&self) -> i64 {
        self.response_time_ms
    }

    pub fn set_user_error(&mut self, v: bool) {
        self.user_error = v;
    }

    #[must_use]
    pub fn user_error(&self) -> bool {
        self.user_error
    }

    pub fn set_has_error(&mut self, v: bool) {
        self.has_error = v;
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn record_rpc_errors(&mut self, codes: &[i32]) {
        self.rpc_errors.extend_from_slice(codes);
    }

    /// RPC error codes collected across all attempts.
    #[must_use]
    pub fn rpc_errors(&self) -> &[i32] {
        &self.rpc_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(methods: &[&str]) -> RequestContext {
        RequestContext::new(
            "solana",
            "req-1",
            Bytes::from_static(b"{}"),
            methods.iter().map(|s| (*s).to_string()).collect(),
            0,
            TokenClass::Default,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn method_labels() {
        assert_eq!(ctx(&["getSlot"]).method_label(), "getSlot");
        assert_eq!(ctx(&["getSlot", "getBalance"]).method_label(), MULTIPLE_VALUES_LABEL);
        assert_eq!(ctx(&["getSlot"]).primary_method(), "getSlot");
    }

    #[test]
    fn cancellation_via_token_and_deadline() {
        let c = ctx(&["getSlot"]);
        assert!(!c.is_cancelled());
        c.cancellation_token().cancel();
        assert!(c.is_cancelled());

        let mut expired = ctx(&["getSlot"]);
        expired.deadline = Instant::now() - Duration::from_secs(1);
        assert!(expired.deadline_expired());
        assert!(expired.is_cancelled());
        assert_eq!(expired.remaining_time(), Duration::ZERO);
    }

    #[test]
    fn rpc_errors_accumulate_across_attempts() {
        let mut c = ctx(&["getSlot"]);
        c.record_rpc_errors(&[-32603]);
        c.record_rpc_errors(&[-32001, -32602]);
        assert_eq!(c.rpc_errors(), &[-32603, -32001, -32602]);
    }
}
