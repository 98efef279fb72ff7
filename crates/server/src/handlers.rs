//! HTTP handlers: host-header dispatch, POST proxying, WS upgrades.

use ahash::AHashMap;
use axum::{
    body::{Body, Bytes},
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};

use lumen_core::{
    chain::solana,
    proxy::{ChainAdapter, RequestContext},
    types::{JsonRpcResponse, TokenClass},
    upstream::ForwardedHeaders,
};

use crate::{prepare, ws};

pub const HEADER_NODE_REQ_ATTEMPTS: &str = "x-node-req-attempts";
pub const HEADER_NODE_RESPONSE_TIME: &str = "x-node-response-time";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub adapters_by_host: Arc<AHashMap<String, Arc<ChainAdapter>>>,
    pub request_timeout: Duration,
}

/// JSON-RPC POST entry point for `/` and `/:token`.
pub async fn handle_rpc(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let Some(adapter) = lookup_adapter(&state, &headers) else {
        return message_response(StatusCode::BAD_REQUEST, "chain not supported", &request_id);
    };

    let content_type =
        headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default();
    if !prepare::is_content_type_valid(content_type) {
        return message_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "supplied content type is not allowed. Content-Type: application/json is required",
            &request_id,
        );
    }

    let prepared = match prepare::prepare_body(&body, |m| adapter.is_method_known(m)) {
        Ok(prepared) => prepared,
        Err(response) => return rpc_error_response(*response, &request_id),
    };
    if prepared.methods.is_empty() {
        return StatusCode::OK.into_response();
    }
    // Program-account scans are too heavy to multiply through batches.
    if prepared.array_requested
        && prepared.methods.iter().any(|m| m == solana::GET_PROGRAM_ACCOUNTS)
    {
        return message_response(
            StatusCode::BAD_REQUEST,
            "getProgramAccounts is not allowed in batch requests",
            &request_id,
        );
    }

    let mut ctx = RequestContext::new(
        adapter.name(),
        request_id.clone(),
        prepared.body,
        prepared.methods,
        prepared.min_block,
        TokenClass::Default,
        state.request_timeout,
    );
    ctx.forwarded = forwarded_headers(&headers, peer);

    match adapter.proxy_post(&mut ctx).await {
        Ok((bytes, status)) => proxied_response(status, bytes, &ctx, &request_id),
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            message_response(status, &e.client_message(), &request_id)
        }
    }
}

/// GET entry point: WebSocket upgrades only.
pub async fn handle_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let Some(adapter) = lookup_adapter(&state, &headers) else {
        return message_response(StatusCode::BAD_REQUEST, "chain not supported", &request_id);
    };
    let Some(upgrade) = upgrade else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };

    match adapter.select_ws_target(&request_id, "", uri.query()) {
        Ok((target_url, provider)) => {
            tracing::info!(
                request_id,
                chain = adapter.name(),
                provider,
                "proxying websocket connection"
            );
            upgrade
                .on_upgrade(move |socket| ws::splice(socket, target_url, request_id))
                .into_response()
        }
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            message_response(status, &e.client_message(), &request_id)
        }
    }
}

pub async fn service_status() -> impl IntoResponse {
    Json(json!({"service": "lumen-proxy", "status": "operational"}))
}

fn lookup_adapter(state: &AppState, headers: &HeaderMap) -> Option<Arc<ChainAdapter>> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    state.adapters_by_host.get(host).cloned()
}

fn forwarded_headers(headers: &HeaderMap, peer: SocketAddr) -> ForwardedHeaders {
    let get = |name: &str| {
        headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
    };
    ForwardedHeaders {
        real_ip: get("x-real-ip").or_else(|| Some(peer.ip().to_string())),
        forwarded_for: get("x-forwarded-for"),
        proto: get("x-forwarded-proto").or_else(|| Some("http".to_string())),
    }
}

/// Upstream body passed through with the service headers attached.
fn proxied_response(
    status: u16,
    bytes: Bytes,
    ctx: &RequestContext,
    request_id: &str,
) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, "application/json")
        .header(HEADER_NODE_REQ_ATTEMPTS, ctx.attempts().to_string())
        .header(HEADER_NODE_RESPONSE_TIME, format!("{}ms", ctx.response_time_ms()))
        .header(HEADER_REQUEST_ID, request_id)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Validation failures are served as JSON-RPC error bodies with HTTP 200,
/// the way upstream nodes report them.
fn rpc_error_response(response: JsonRpcResponse, request_id: &str) -> Response {
    (
        StatusCode::OK,
        [(HEADER_REQUEST_ID, request_id.to_string())],
        Json(response),
    )
        .into_response()
}

fn message_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    (
        status,
        [(HEADER_REQUEST_ID, request_id.to_string())],
        Json(json!({"message": message})),
    )
        .into_response()
}
