//! Method-aware routing table, compiled from declarative configuration.
//!
//! The compiler walks every provider endpoint, expands its method groups,
//! and appends the endpoint's [`Target`] to a per-method list. After the
//! walk each populated list gets a [`WeightedSelector`]. Legacy node lists
//! (DAS API, basic-route, WS-host) are translated into the same structures.
//!
//! Routing policy: a method that appears explicitly on any endpoint is
//! served only by its own selector; the `handleOther` pool serves methods
//! that no endpoint claimed. Redundancy therefore requires explicit
//! listing: a jailed explicit target is never backfilled from the default
//! pool.

use ahash::{AHashMap, AHashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::{
    chain::solana::DAS_METHODS,
    config::{ChainRoutingConfig, NodeEntry},
    upstream::{
        selector::{Selector, SelectorError, WeightedSelector},
        target::{hourly_to_window_limit, Target},
    },
};

/// Weight assumed when an endpoint declares none (or a non-positive one).
pub const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("creating selector for method {method}: {source}")]
    MethodSelector { method: String, source: SelectorError },

    #[error("creating selector for default routing: {0}")]
    DefaultSelector(#[source] SelectorError),
}

/// The targets serving one method, with their compiled selector.
pub struct MethodTargetInfo {
    targets: Vec<Arc<Target>>,
    weights: Vec<f64>,
    selector: WeightedSelector<Target>,
}

impl MethodTargetInfo {
    fn build(targets: Vec<Arc<Target>>, weights: Vec<f64>) -> Result<Self, SelectorError> {
        let selector = WeightedSelector::new(targets.clone(), weights.clone())?;
        Ok(Self { targets, weights, selector })
    }

    /// Draws the next target, skipping excluded indices.
    ///
    /// # Errors
    ///
    /// Propagates the selector's exhaustion errors.
    pub fn get_next(&self, exclude: &[usize]) -> Result<(Arc<Target>, usize), SelectorError> {
        self.selector.get_next(exclude)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.selector.is_available()
    }

    #[must_use]
    pub fn targets_count(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

#[derive(Default)]
struct PendingInfo {
    targets: Vec<Arc<Target>>,
    weights: Vec<f64>,
}

impl PendingInfo {
    fn push(&mut self, target: Arc<Target>, weight: f64) {
        self.targets.push(target);
        self.weights.push(weight);
    }
}

/// Compiled routing table for one chain.
pub struct MethodRouter {
    method_map: AHashMap<String, MethodTargetInfo>,
    default_info: Option<MethodTargetInfo>,
    ws_targets: Vec<Arc<Target>>,
    supported_methods: AHashSet<String>,
    method_groups: AHashMap<String, Vec<String>>,
    providers: AHashMap<String, Vec<Arc<Target>>>,
}

impl MethodRouter {
    /// Compiles the routing table. Pure with respect to the configuration
    /// value: no I/O, so tests can drive it directly.
    ///
    /// # Errors
    ///
    /// Fails when a populated method list cannot produce a selector.
    pub fn compile(cfg: &ChainRoutingConfig) -> Result<Self, RouterError> {
        let mut method_groups: AHashMap<String, Vec<String>> = AHashMap::new();
        for group in &cfg.method_groups {
            method_groups.insert(group.name.clone(), group.methods.clone());
        }

        let mut pending_methods: AHashMap<String, PendingInfo> = AHashMap::new();
        let mut pending_default = PendingInfo::default();
        let mut ws_targets: Vec<Arc<Target>> = Vec::new();
        let mut supported_methods: AHashSet<String> = AHashSet::new();
        let mut providers: AHashMap<String, Vec<Arc<Target>>> = AHashMap::new();

        for provider in &cfg.providers {
            for endpoint in &provider.endpoints {
                let target = Arc::new(Target::new(
                    endpoint.url.clone(),
                    provider.name.clone(),
                    endpoint.node_type,
                    hourly_to_window_limit(endpoint.req_limit_hourly),
                ));
                providers.entry(provider.name.clone()).or_default().push(Arc::clone(&target));

                let weight =
                    if endpoint.weight > 0.0 { endpoint.weight } else { DEFAULT_WEIGHT };

                let mut expanded: Vec<&str> = Vec::new();
                let mut seen: AHashSet<&str> = AHashSet::new();
                for group_name in &endpoint.method_groups {
                    if let Some(methods) = method_groups.get(group_name) {
                        for method in methods {
                            if seen.insert(method.as_str()) {
                                expanded.push(method.as_str());
                            }
                        }
                    } else {
                        tracing::warn!(
                            group = %group_name,
                            endpoint = %endpoint.url,
                            "method group referenced but not defined"
                        );
                    }
                }
                for method in &endpoint.methods {
                    if seen.insert(method.as_str()) {
                        expanded.push(method.as_str());
                    }
                }

                for method in expanded {
                    if endpoint.exclude_methods.iter().any(|m| m == method) {
                        continue;
                    }
                    pending_methods
                        .entry(method.to_string())
                        .or_default()
                        .push(Arc::clone(&target), weight);
                    supported_methods.insert(method.to_string());
                }

                if endpoint.handle_other {
                    pending_default.push(Arc::clone(&target), weight);
                }
                if endpoint.handle_web_socket {
                    ws_targets.push(Arc::clone(&target));
                }
            }
        }

        Self::translate_legacy(
            cfg,
            &mut pending_methods,
            &mut pending_default,
            &mut ws_targets,
            &mut supported_methods,
            &mut providers,
        );

        let mut method_map = AHashMap::with_capacity(pending_methods.len());
        for (method, pending) in pending_methods {
            let info =
                MethodTargetInfo::build(pending.targets, pending.weights).map_err(|source| {
                    RouterError::MethodSelector { method: method.clone(), source }
                })?;
            method_map.insert(method, info);
        }

        let default_info = if pending_default.targets.is_empty() {
            None
        } else {
            Some(
                MethodTargetInfo::build(pending_default.targets, pending_default.weights)
                    .map_err(RouterError::DefaultSelector)?,
            )
        };

        Ok(Self {
            method_map,
            default_info,
            ws_targets,
            supported_methods,
            method_groups,
            providers,
        })
    }

    fn translate_legacy(
        cfg: &ChainRoutingConfig,
        pending_methods: &mut AHashMap<String, PendingInfo>,
        pending_default: &mut PendingInfo,
        ws_targets: &mut Vec<Arc<Target>>,
        supported_methods: &mut AHashSet<String>,
        providers: &mut AHashMap<String, Vec<Arc<Target>>>,
    ) {
        fn make_target(
            node: &NodeEntry,
            providers: &mut AHashMap<String, Vec<Arc<Target>>>,
        ) -> Arc<Target> {
            let target = Arc::new(Target::new(
                node.url.clone(),
                node.provider.clone(),
                node.node_type,
                0,
            ));
            providers.entry(node.provider.clone()).or_default().push(Arc::clone(&target));
            target
        }

        for node in &cfg.das_api_nodes {
            let target = make_target(node, providers);
            for method in DAS_METHODS {
                pending_methods
                    .entry((*method).to_string())
                    .or_default()
                    .push(Arc::clone(&target), DEFAULT_WEIGHT);
                supported_methods.insert((*method).to_string());
            }
        }

        for node in &cfg.ws_host_nodes {
            ws_targets.push(make_target(node, providers));
        }

        for node in &cfg.basic_route_nodes {
            let target = make_target(node, providers);
            pending_default.push(target, DEFAULT_WEIGHT);
        }
    }

    /// Selector serving `method`.
    ///
    /// An explicitly-mapped method always routes to its own selector; only
    /// unmapped methods fall through to the `handleOther` pool.
    #[must_use]
    pub fn selector_for_method(&self, method: &str) -> Option<&MethodTargetInfo> {
        if let Some(info) = self.method_map.get(method) {
            return Some(info);
        }
        self.default_info.as_ref()
    }

    #[must_use]
    pub fn is_method_supported(&self, method: &str) -> bool {
        if self.supported_methods.contains(method) {
            return true;
        }
        self.default_info.as_ref().is_some_and(MethodTargetInfo::is_available)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.ws_targets.is_empty()
            || self.method_map.values().any(MethodTargetInfo::is_available)
            || self.default_info.as_ref().is_some_and(MethodTargetInfo::is_available)
    }

    /// Targets eligible for WebSocket upgrades.
    #[must_use]
    pub fn ws_targets(&self) -> &[Arc<Target>] {
        &self.ws_targets
    }

    #[must_use]
    pub fn supported_methods(&self) -> &AHashSet<String> {
        &self.supported_methods
    }

    #[must_use]
    pub fn method_groups(&self) -> &AHashMap<String, Vec<String>> {
        &self.method_groups
    }

    /// Reverse index from provider name to its targets, for observability.
    #[must_use]
    pub fn providers(&self) -> &AHashMap<String, Vec<Arc<Target>>> {
        &self.providers
    }

    /// Folds one request outcome into the target's health state.
    pub fn update_target_stats(
        &self,
        target: &Target,
        success: bool,
        methods: &[String],
        response_time_ms: i64,
        slot_reading: i64,
        unavailable_methods: Option<&AHashSet<String>>,
    ) {
        target.update_stats(success, methods, response_time_ms, slot_reading, unavailable_methods);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, MethodGroupConfig, ProviderConfig};

    fn endpoint(url: &str) -> EndpointConfig {
        EndpointConfig { url: url.to_string(), ..EndpointConfig::default() }
    }

    fn single_provider(endpoints: Vec<EndpointConfig>) -> ChainRoutingConfig {
        ChainRoutingConfig {
            providers: vec![ProviderConfig { name: "prov".into(), endpoints }],
            ..ChainRoutingConfig::default()
        }
    }

    /// Multiset of (url, weight) pairs for one method, order-insensitive.
    fn pairs_for(router: &MethodRouter, method: &str) -> Vec<(String, String)> {
        let info = router.selector_for_method(method).expect("method should route");
        let mut pairs: Vec<(String, String)> = info
            .targets()
            .iter()
            .zip(info.weights())
            .map(|(t, w)| (t.url().to_string(), format!("{w:.6}")))
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn compiles_explicit_methods() {
        let mut ep = endpoint("https://a.example");
        ep.methods = vec!["getBalance".into(), "getSlot".into()];
        let router = MethodRouter::compile(&single_provider(vec![ep])).unwrap();

        assert!(router.supported_methods().contains("getBalance"));
        assert!(router.is_method_supported("getSlot"));
        assert!(!router.is_method_supported("getBlock"));
        assert!(router.is_available());

        let info = router.selector_for_method("getBalance").unwrap();
        assert_eq!(info.targets_count(), 1);
        assert_eq!(info.targets()[0].provider(), "prov");
    }

    #[test]
    fn expands_groups_and_subtracts_exclusions() {
        let mut ep = endpoint("https://a.example");
        ep.method_groups = vec!["accounts".into()];
        ep.methods = vec!["getSlot".into()];
        ep.exclude_methods = vec!["getAccountInfo".into()];

        let cfg = ChainRoutingConfig {
            method_groups: vec![MethodGroupConfig {
                name: "accounts".into(),
                methods: vec!["getBalance".into(), "getAccountInfo".into()],
            }],
            providers: vec![ProviderConfig { name: "prov".into(), endpoints: vec![ep] }],
            ..ChainRoutingConfig::default()
        };
        let router = MethodRouter::compile(&cfg).unwrap();

        assert!(router.supported_methods().contains("getBalance"));
        assert!(router.supported_methods().contains("getSlot"));
        assert!(!router.supported_methods().contains("getAccountInfo"));
    }

    #[test]
    fn unresolved_group_reference_is_ignored() {
        let mut ep = endpoint("https://a.example");
        ep.method_groups = vec!["missing".into()];
        ep.methods = vec!["getSlot".into()];
        let router = MethodRouter::compile(&single_provider(vec![ep])).unwrap();
        assert_eq!(router.supported_methods().len(), 1);
    }

    #[test]
    fn non_positive_weights_default() {
        let mut a = endpoint("https://a.example");
        a.methods = vec!["getSlot".into()];
        a.weight = -3.0;
        let mut b = endpoint("https://b.example");
        b.methods = vec!["getSlot".into()];
        b.weight = 0.0;

        let router = MethodRouter::compile(&single_provider(vec![a, b])).unwrap();
        let info = router.selector_for_method("getSlot").unwrap();
        assert_eq!(info.weights(), &[DEFAULT_WEIGHT, DEFAULT_WEIGHT]);
    }

    #[test]
    fn explicit_method_never_falls_back_to_default_pool() {
        let mut explicit = endpoint("https://explicit.example");
        explicit.methods = vec!["getAccountInfo".into()];
        let mut fallback = endpoint("https://fallback.example");
        fallback.handle_other = true;

        let router =
            MethodRouter::compile(&single_provider(vec![explicit, fallback])).unwrap();

        let info = router.selector_for_method("getAccountInfo").unwrap();
        assert_eq!(info.targets_count(), 1);
        assert_eq!(info.targets()[0].url(), "https://explicit.example");

        // Unmapped methods go to the default pool.
        let other = router.selector_for_method("getHealth").unwrap();
        assert_eq!(other.targets()[0].url(), "https://fallback.example");
    }

    #[test]
    fn handle_other_absence_leaves_unmapped_methods_unrouted() {
        let mut ep = endpoint("https://a.example");
        ep.methods = vec!["getBalance".into()];
        let router = MethodRouter::compile(&single_provider(vec![ep])).unwrap();
        assert!(router.selector_for_method("getHealth").is_none());
        assert!(!router.is_method_supported("getHealth"));
    }

    #[test]
    fn legacy_das_nodes_cover_das_methods() {
        let cfg = ChainRoutingConfig {
            das_api_nodes: vec![NodeEntry {
                url: "https://das.example".into(),
                provider: "das-prov".into(),
                node_type: Default::default(),
            }],
            ..ChainRoutingConfig::default()
        };
        let router = MethodRouter::compile(&cfg).unwrap();

        for method in DAS_METHODS {
            let info = router.selector_for_method(method).unwrap();
            assert_eq!(info.targets()[0].url(), "https://das.example", "method {method}");
        }
        assert!(router.providers().contains_key("das-prov"));
    }

    #[test]
    fn legacy_ws_and_basic_route_nodes() {
        let cfg = ChainRoutingConfig {
            ws_host_nodes: vec![NodeEntry {
                url: "https://ws.example".into(),
                provider: "ws-prov".into(),
                node_type: Default::default(),
            }],
            basic_route_nodes: vec![NodeEntry {
                url: "https://basic.example".into(),
                provider: "basic-prov".into(),
                node_type: Default::default(),
            }],
            ..ChainRoutingConfig::default()
        };
        let router = MethodRouter::compile(&cfg).unwrap();

        assert_eq!(router.ws_targets().len(), 1);
        assert_eq!(router.ws_targets()[0].url(), "https://ws.example");

        let default = router.selector_for_method("anything").unwrap();
        assert_eq!(default.targets()[0].url(), "https://basic.example");
        assert!(router.is_available());
    }

    #[test]
    fn handle_web_socket_endpoints_join_ws_pool() {
        let mut ep = endpoint("https://a.example");
        ep.handle_web_socket = true;
        let router = MethodRouter::compile(&single_provider(vec![ep])).unwrap();
        assert_eq!(router.ws_targets().len(), 1);
    }

    #[test]
    fn empty_config_routes_nothing() {
        let router = MethodRouter::compile(&ChainRoutingConfig::default()).unwrap();
        assert!(!router.is_available());
        assert!(router.selector_for_method("getSlot").is_none());
    }

    #[test]
    fn compilation_is_order_independent() {
        let mut a = endpoint("https://a.example");
        a.methods = vec!["getSlot".into(), "getBalance".into()];
        a.weight = 3.0;
        let mut b = endpoint("https://b.example");
        b.methods = vec!["getSlot".into()];
        b.weight = 1.0;

        let forward = MethodRouter::compile(&single_provider(vec![a.clone(), b.clone()])).unwrap();
        let reverse = MethodRouter::compile(&single_provider(vec![b, a])).unwrap();

        assert_eq!(forward.supported_methods(), reverse.supported_methods());
        for method in ["getSlot", "getBalance"] {
            assert_eq!(pairs_for(&forward, method), pairs_for(&reverse, method));
        }
    }

    #[test]
    fn serde_round_trip_is_behaviorally_identical() {
        let mut ep = endpoint("https://a.example");
        ep.methods = vec!["getSlot".into()];
        ep.weight = 2.0;
        ep.handle_other = true;
        let cfg = single_provider(vec![ep]);

        let decoded: ChainRoutingConfig =
            serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();

        let original = MethodRouter::compile(&cfg).unwrap();
        let round_tripped = MethodRouter::compile(&decoded).unwrap();

        assert_eq!(original.supported_methods(), round_tripped.supported_methods());
        assert_eq!(pairs_for(&original, "getSlot"), pairs_for(&round_tripped, "getSlot"));
        assert_eq!(
            original.default_info.is_some(),
            round_tripped.default_info.is_some()
        );
    }

    #[test]
    fn duplicate_method_in_group_and_explicit_list_is_added_once() {
        let mut ep = endpoint("https://a.example");
        ep.method_groups = vec!["g".into()];
        ep.methods = vec!["getSlot".into()];
        let cfg = ChainRoutingConfig {
            method_groups: vec![MethodGroupConfig {
                name: "g".into(),
                methods: vec!["getSlot".into()],
            }],
            providers: vec![ProviderConfig { name: "prov".into(), endpoints: vec![ep] }],
            ..ChainRoutingConfig::default()
        };
        let router = MethodRouter::compile(&cfg).unwrap();
        assert_eq!(router.selector_for_method("getSlot").unwrap().targets_count(), 1);
    }
}
