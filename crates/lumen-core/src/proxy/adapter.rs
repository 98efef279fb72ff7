//! Chain adapter: binds hostnames to a compiled router, a dispatcher, and an
//! optional WebSocket pool, and sanitizes every error before it leaves the
//! core.

use bytes::Bytes;
use std::sync::Arc;
use url::Url;

use crate::{
    chain::solana,
    config::ChainConfig,
    metrics,
    proxy::{
        context::RequestContext,
        errors::ProxyError,
        ws::{self, WsProxy},
    },
    upstream::{
        dispatcher::Dispatcher,
        http_client::HttpClient,
        router::{MethodRouter, RouterError},
        slots::SlotTracker,
    },
};

/// One chain (e.g. `solana`, `eclipse`) bound to its routing machinery.
pub struct ChainAdapter {
    name: String,
    hostnames: Vec<String>,
    router: Arc<MethodRouter>,
    dispatcher: Dispatcher,
    ws_proxy: Option<WsProxy>,
}

impl ChainAdapter {
    /// Compiles the chain's routing table and wires the dispatcher.
    ///
    /// # Errors
    ///
    /// Propagates router compilation failures.
    pub fn new(
        chain: &ChainConfig,
        http_client: Arc<HttpClient>,
        slots: Arc<SlotTracker>,
    ) -> Result<Self, RouterError> {
        let router = Arc::new(MethodRouter::compile(&chain.routing)?);
        let ws_proxy = if router.ws_targets().is_empty() {
            None
        } else {
            Some(WsProxy::new(router.ws_targets().to_vec()))
        };
        let dispatcher = Dispatcher::new(Arc::clone(&router), http_client, slots);

        Ok(Self {
            name: chain.name.clone(),
            hostnames: chain.hostnames.clone(),
            router,
            dispatcher,
            ws_proxy,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    #[must_use]
    pub fn router(&self) -> &Arc<MethodRouter> {
        &self.router
    }

    /// Unit cost of a method, for the host's usage accounting.
    #[must_use]
    pub fn method_cost(&self, method: &str) -> Option<u32> {
        solana::METHOD_COSTS.get(method).copied()
    }

    #[must_use]
    pub fn is_method_known(&self, method: &str) -> bool {
        solana::is_known_method(method)
    }

    fn can_handle(&self, methods: &[String]) -> bool {
        !methods.is_empty() && methods.iter().all(|m| self.router.is_method_supported(m))
    }

    /// Proxies one prepared POST request.
    ///
    /// # Errors
    ///
    /// Returns a sanitized [`ProxyError`]; internal detail never crosses
    /// this boundary.
    pub async fn proxy_post(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<(Bytes, u16), ProxyError> {
        if !self.can_handle(&ctx.methods) || !self.router.is_available() {
            metrics::record_client_request(&self.name, ctx.method_label(), 503);
            return Err(ProxyError::NoAvailableTargets);
        }

        let result = self
            .dispatcher
            .send_request(ctx)
            .await
            .map_err(|e| sanitize_error(e, &ctx.request_id));

        let status = match &result {
            Ok((_, status)) => *status,
            Err(e) => e.status_code(),
        };
        metrics::record_client_request(&self.name, ctx.method_label(), status);
        result
    }

    #[must_use]
    pub fn ws_available(&self) -> bool {
        self.ws_proxy.as_ref().is_some_and(WsProxy::is_available)
    }

    /// Picks a WS target and rewrites its URL with the incoming path suffix
    /// and query string. Returns the ws(s) URL and the provider label.
    ///
    /// # Errors
    ///
    /// Returns a sanitized error when no WS target is available or the
    /// target URL fails to parse.
    pub fn select_ws_target(
        &self,
        request_id: &str,
        request_path: &str,
        request_query: Option<&str>,
    ) -> Result<(Url, String), ProxyError> {
        let pool = self.ws_proxy.as_ref().ok_or(ProxyError::NoAvailableTargets)?;
        let target = pool.select_target()?;
        let base = Url::parse(target.url())
            .map_err(|e| ProxyError::Internal(format!("ws target url: {e}")))
            .map_err(|e| sanitize_error(e, request_id))?;

        let rewritten = ws::rewrite_target_url(&base, request_path, request_query);
        metrics::inc_ws_connections(&self.name);
        Ok((ws::to_ws_url(&rewritten), target.provider().to_string()))
    }
}

/// Logs the original error with the request id and returns the client-safe
/// form: context errors keep their status, 4xx pass through, everything with
/// internal detail collapses to a generic 500.
#[must_use]
pub fn sanitize_error(err: ProxyError, request_id: &str) -> ProxyError {
    match &err {
        ProxyError::Cancelled => {
            tracing::warn!(request_id, "request cancelled by client");
            err
        }
        ProxyError::DeadlineExceeded => {
            tracing::warn!(request_id, "request deadline exceeded");
            err
        }
        ProxyError::Internal(detail) => {
            tracing::error!(request_id, error = %detail, "internal proxy error");
            ProxyError::Internal("Internal server error".to_string())
        }
        _ => err,
    }
}
