//! WebSocket pass-through: target selection and URL rewriting.
//!
//! On an upgrade request the proxy picks a WS-capable target in round-robin
//! order and rewrites the target URL with the incoming path suffix and query
//! string. The actual frame splice lives in the server crate; the proxy does
//! not interpret frames.

use std::sync::Arc;
use url::Url;

use crate::{
    proxy::errors::ProxyError,
    upstream::{
        selector::{RoundRobinSelector, Selector},
        target::Target,
    },
};

/// Round-robin pool of WebSocket-capable targets.
pub struct WsProxy {
    targets: RoundRobinSelector<Target>,
}

impl WsProxy {
    #[must_use]
    pub fn new(targets: Vec<Arc<Target>>) -> Self {
        Self { targets: RoundRobinSelector::new(targets) }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.targets.is_available()
    }

    /// Picks the next WS target.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NoAvailableTargets`] when the pool is empty.
    pub fn select_target(&self) -> Result<Arc<Target>, ProxyError> {
        self.targets
            .get_next(&[])
            .map(|(target, _)| target)
            .map_err(|_| ProxyError::NoAvailableTargets)
    }
}

/// Joins the target URL with the incoming request's path suffix and query.
///
/// The result keeps the target's scheme, host and base path; the incoming
/// path is appended with exactly one slash between the segments, and query
/// strings are merged as `target_query & request_query`.
#[must_use]
pub fn rewrite_target_url(target: &Url, request_path: &str, request_query: Option<&str>) -> Url {
    let mut rewritten = target.clone();
    rewritten.set_path(&join_paths(target.path(), request_path));

    let merged = match (target.query(), request_query) {
        (Some(t), Some(r)) if !t.is_empty() && !r.is_empty() => Some(format!("{t}&{r}")),
        (Some(t), _) if !t.is_empty() => Some(t.to_string()),
        (_, Some(r)) if !r.is_empty() => Some(r.to_string()),
        _ => None,
    };
    rewritten.set_query(merged.as_deref());
    rewritten
}

/// Converts an http(s) target URL to its ws(s) equivalent. WebSocket URLs
/// pass through unchanged.
#[must_use]
pub fn to_ws_url(url: &Url) -> Url {
    let replaced = match url.scheme() {
        "http" => url.as_str().replacen("http", "ws", 1),
        "https" => url.as_str().replacen("https", "wss", 1),
        _ => return url.clone(),
    };
    Url::parse(&replaced).unwrap_or_else(|_| url.clone())
}

fn join_paths(base: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return base.to_string();
    }
    let base_slash = base.ends_with('/');
    let suffix_slash = suffix.starts_with('/');
    match (base_slash, suffix_slash) {
        (true, true) => format!("{base}{}", &suffix[1..]),
        (false, false) => format!("{base}/{suffix}"),
        _ => format!("{base}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::solana::NodeType;

    fn target(url: &str, provider: &str) -> Arc<Target> {
        Arc::new(Target::new(url, provider, NodeType::default(), 0))
    }

    #[test]
    fn ws_pool_rotates_over_targets() {
        let proxy = WsProxy::new(vec![
            target("https://ws-a.example", "a"),
            target("https://ws-b.example", "b"),
        ]);
        assert!(proxy.is_available());

        let providers: Vec<String> = (0..4)
            .map(|_| proxy.select_target().unwrap().provider().to_string())
            .collect();
        assert_eq!(providers, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn empty_pool_is_unavailable() {
        let proxy = WsProxy::new(vec![]);
        assert!(!proxy.is_available());
        assert!(matches!(proxy.select_target(), Err(ProxyError::NoAvailableTargets)));
    }

    #[test]
    fn rewrite_joins_paths_with_single_slash() {
        let base = Url::parse("https://node.example/rpc").unwrap();

        let joined = rewrite_target_url(&base, "/stream", None);
        assert_eq!(joined.as_str(), "https://node.example/rpc/stream");

        let both_slashed = rewrite_target_url(
            &Url::parse("https://node.example/rpc/").unwrap(),
            "/stream",
            None,
        );
        assert_eq!(both_slashed.as_str(), "https://node.example/rpc/stream");

        let no_suffix = rewrite_target_url(&base, "", None);
        assert_eq!(no_suffix.as_str(), "https://node.example/rpc");
    }

    #[test]
    fn rewrite_merges_queries_with_ampersand() {
        let base = Url::parse("https://node.example/rpc?api-key=abc").unwrap();

        let merged = rewrite_target_url(&base, "", Some("commitment=finalized"));
        assert_eq!(merged.query(), Some("api-key=abc&commitment=finalized"));

        let target_only = rewrite_target_url(&base, "", None);
        assert_eq!(target_only.query(), Some("api-key=abc"));

        let request_only = rewrite_target_url(
            &Url::parse("https://node.example/rpc").unwrap(),
            "",
            Some("commitment=finalized"),
        );
        assert_eq!(request_only.query(), Some("commitment=finalized"));
    }

    #[test]
    fn ws_scheme_conversion() {
        let https = Url::parse("https://node.example/rpc?k=1").unwrap();
        assert_eq!(to_ws_url(&https).as_str(), "wss://node.example/rpc?k=1");

        let http = Url::parse("http://node.example/").unwrap();
        assert_eq!(to_ws_url(&http).scheme(), "ws");

        let already = Url::parse("wss://node.example/").unwrap();
        assert_eq!(to_ws_url(&already).scheme(), "wss");
    }
}
