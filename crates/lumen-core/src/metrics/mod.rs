//! Thin helpers over the `metrics` macros.
//!
//! The core records a small, fixed signal set; exporter wiring (Prometheus
//! or otherwise) is installed by the host process. Calls are cheap no-ops
//! when no recorder is installed, which keeps tests quiet.

use metrics::{counter, histogram};
use std::time::Duration;

/// Records one use of a partner provider and whether it served successfully.
pub fn record_provider_usage(provider: &str, success: bool) {
    if provider.is_empty() {
        return;
    }
    counter!(
        "lumen_provider_requests_total",
        "provider" => provider.to_string(),
        "success" => if success { "true" } else { "false" }
    )
    .increment(1);
}

/// Observes one upstream exchange.
pub fn observe_upstream_request(chain: &str, method: &str, success: bool, elapsed: Duration) {
    counter!(
        "lumen_upstream_requests_total",
        "chain" => chain.to_string(),
        "method" => method.to_string(),
        "success" => if success { "true" } else { "false" }
    )
    .increment(1);
    histogram!(
        "lumen_upstream_request_seconds",
        "chain" => chain.to_string(),
        "method" => method.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Counts a finished client request by terminal status.
pub fn record_client_request(chain: &str, method: &str, status: u16) {
    counter!(
        "lumen_client_requests_total",
        "chain" => chain.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Counts an accepted WebSocket upgrade.
pub fn inc_ws_connections(chain: &str) {
    counter!("lumen_websocket_connections_total", "chain" => chain.to_string()).increment(1);
}
