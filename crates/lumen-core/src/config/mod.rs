//! Application configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. Compiled defaults from the struct `Default` implementations.
//! 2. TOML file passed to [`AppConfig::load`] (typically from `LUMEN_CONFIG`).
//! 3. `LUMEN_`-prefixed environment variables with `__` separators.
//!
//! Routing configuration is declarative: named method groups, providers with
//! endpoints, and legacy node lists that are translated at router-compile
//! time. Validation runs at load time so a bad endpoint URL fails startup
//! instead of a request.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;
use url::Url;

use crate::chain::solana::NodeType;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error(transparent)]
    Source(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A named set of methods expanded by reference from endpoint definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodGroupConfig {
    pub name: String,
    pub methods: Vec<String>,
}

/// One upstream endpoint of a provider.
///
/// Field aliases keep the original camelCase JSON spellings working when a
/// routing blob is supplied as JSON rather than TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    /// Load-balancing weight; non-positive values fall back to 1.0.
    pub weight: f64,
    #[serde(alias = "nodeType")]
    pub node_type: NodeType,
    /// Methods this endpoint handles explicitly.
    pub methods: Vec<String>,
    /// Methods subtracted after group expansion.
    #[serde(alias = "excludeMethods")]
    pub exclude_methods: Vec<String>,
    /// Named method groups to expand.
    #[serde(alias = "methodGroups")]
    pub method_groups: Vec<String>,
    /// Serve methods no endpoint lists explicitly.
    #[serde(alias = "handleOther")]
    pub handle_other: bool,
    /// Eligible for WebSocket upgrades.
    #[serde(alias = "handleWebSocket")]
    pub handle_web_socket: bool,
    /// Hourly request budget; 0 disables the limit.
    #[serde(alias = "reqLimitHourly")]
    pub req_limit_hourly: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoints: Vec<EndpointConfig>,
}

/// Legacy node entry used by the pre-provider configuration lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub url: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default, alias = "nodeType")]
    pub node_type: NodeType,
}

/// Declarative routing table for one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChainRoutingConfig {
    #[serde(alias = "methodGroups")]
    pub method_groups: Vec<MethodGroupConfig>,
    pub providers: Vec<ProviderConfig>,

    // Legacy lists kept for backward compatibility; translated by the
    // router compiler.
    #[serde(alias = "dasAPINodes")]
    pub das_api_nodes: Vec<NodeEntry>,
    #[serde(alias = "basicRouteNodes")]
    pub basic_route_nodes: Vec<NodeEntry>,
    #[serde(alias = "WSHostNodes")]
    pub ws_host_nodes: Vec<NodeEntry>,
}

impl ChainRoutingConfig {
    /// A chain activates only when it has at least one endpoint.
    #[must_use]
    pub fn has_endpoints(&self) -> bool {
        self.providers.iter().any(|p| !p.endpoints.is_empty())
            || !self.das_api_nodes.is_empty()
            || !self.basic_route_nodes.is_empty()
            || !self.ws_host_nodes.is_empty()
    }

    fn endpoint_urls(&self) -> impl Iterator<Item = &str> {
        self.providers
            .iter()
            .flat_map(|p| p.endpoints.iter().map(|e| e.url.as_str()))
            .chain(self.das_api_nodes.iter().map(|n| n.url.as_str()))
            .chain(self.basic_route_nodes.iter().map(|n| n.url.as_str()))
            .chain(self.ws_host_nodes.iter().map(|n| n.url.as_str()))
    }
}

/// One chain binding: its name, the hostnames the front-end dispatches on,
/// and its routing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub routing: ChainRoutingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Must be provided; 0 fails validation.
    pub bind_port: u16,
    pub max_concurrent_requests: usize,
    pub request_timeout_seconds: u64,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 0,
            max_concurrent_requests: 1024,
            request_timeout_seconds: 30,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Chain-tip probing for the archive-age gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotSyncConfig {
    /// RPC URLs probed round-robin with `getSlot`; empty disables syncing.
    pub probe_urls: Vec<String>,
    pub interval_seconds: u64,
    /// Seed for the tracker until the first probe lands.
    pub initial_slot: i64,
}

impl Default for SlotSyncConfig {
    fn default() -> Self {
        Self { probe_urls: Vec::new(), interval_seconds: 30, initial_slot: 0 }
    }
}

/// Root application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub slot_sync: SlotSyncConfig,
    pub chains: Vec<ChainConfig>,
}

impl AppConfig {
    /// Loads configuration from an optional TOML file plus `LUMEN_*`
    /// environment overrides, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error when the sources fail to parse or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("LUMEN").separator("__"));

        let app: AppConfig = builder.build()?.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// # Errors
    ///
    /// Returns [`ConfigLoadError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.bind_port == 0 {
            return Err(ConfigLoadError::Invalid("server.bind_port must be provided".into()));
        }

        for chain in &self.chains {
            if chain.name.is_empty() {
                return Err(ConfigLoadError::Invalid("chain name must not be empty".into()));
            }
            if chain.hostnames.is_empty() {
                return Err(ConfigLoadError::Invalid(format!(
                    "chain {} declares no hostnames",
                    chain.name
                )));
            }
            for url in chain.routing.endpoint_urls() {
                validate_endpoint_url(&chain.name, url)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }
}

fn validate_endpoint_url(chain: &str, raw: &str) -> Result<(), ConfigLoadError> {
    let parsed = Url::parse(raw).map_err(|e| {
        ConfigLoadError::Invalid(format!("chain {chain}: endpoint url {raw:?}: {e}"))
    })?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ConfigLoadError::Invalid(format!(
            "chain {chain}: endpoint url {raw:?} has no host"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::solana::NodeKind;

    fn minimal_app(chains: Vec<ChainConfig>) -> AppConfig {
        AppConfig {
            server: ServerConfig { bind_port: 2011, ..ServerConfig::default() },
            chains,
            ..AppConfig::default()
        }
    }

    #[test]
    fn routing_config_parses_original_field_names() {
        let raw = r#"{
            "methodGroups": [{"name": "accounts", "methods": ["getBalance", "getAccountInfo"]}],
            "providers": [{
                "name": "fast-one",
                "endpoints": [{
                    "url": "https://rpc.fast.example",
                    "weight": 2.5,
                    "nodeType": {"name": "archive_node", "availableSlotsHistory": 0},
                    "methodGroups": ["accounts"],
                    "methods": ["getSlot"],
                    "excludeMethods": ["getAccountInfo"],
                    "handleOther": true,
                    "handleWebSocket": true
                }]
            }],
            "dasAPINodes": [{"url": "https://das.example", "provider": "das-one"}],
            "basicRouteNodes": [],
            "WSHostNodes": [{"url": "https://ws.example", "provider": "ws-one"}]
        }"#;

        let cfg: ChainRoutingConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.method_groups[0].methods.len(), 2);
        let ep = &cfg.providers[0].endpoints[0];
        assert_eq!(ep.weight, 2.5);
        assert_eq!(ep.node_type.name, NodeKind::Archive);
        assert!(ep.handle_other);
        assert!(ep.handle_web_socket);
        assert_eq!(ep.exclude_methods, vec!["getAccountInfo"]);
        assert_eq!(cfg.das_api_nodes[0].provider, "das-one");
        assert_eq!(cfg.ws_host_nodes[0].url, "https://ws.example");
        assert!(cfg.has_endpoints());
    }

    #[test]
    fn endpoint_defaults() {
        let ep: EndpointConfig = serde_json::from_str(r#"{"url": "https://a.example"}"#).unwrap();
        assert_eq!(ep.weight, 0.0);
        assert_eq!(ep.node_type.name, NodeKind::Basic);
        assert!(!ep.handle_other);
        assert_eq!(ep.req_limit_hourly, 0);
    }

    #[test]
    fn empty_routing_has_no_endpoints() {
        assert!(!ChainRoutingConfig::default().has_endpoints());
    }

    #[test]
    fn validate_requires_bind_port() {
        let app = AppConfig::default();
        let err = app.validate().unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(m) if m.contains("bind_port")));
    }

    #[test]
    fn validate_rejects_hostless_endpoint_url() {
        let chain = ChainConfig {
            name: "solana".into(),
            hostnames: vec!["rpc.example:2011".into()],
            routing: ChainRoutingConfig {
                providers: vec![ProviderConfig {
                    name: "p".into(),
                    endpoints: vec![EndpointConfig {
                        url: "unix:/tmp/sock".into(),
                        ..EndpointConfig::default()
                    }],
                }],
                ..ChainRoutingConfig::default()
            },
        };
        let err = minimal_app(vec![chain]).validate().unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(m) if m.contains("no host")));
    }

    #[test]
    fn validate_requires_hostnames() {
        let chain = ChainConfig {
            name: "solana".into(),
            hostnames: vec![],
            routing: ChainRoutingConfig::default(),
        };
        let err = minimal_app(vec![chain]).validate().unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(m) if m.contains("hostnames")));
    }

    #[test]
    fn valid_app_passes() {
        let chain = ChainConfig {
            name: "solana".into(),
            hostnames: vec!["rpc.example:2011".into()],
            routing: ChainRoutingConfig {
                providers: vec![ProviderConfig {
                    name: "p".into(),
                    endpoints: vec![EndpointConfig {
                        url: "https://rpc.fast.example/v1".into(),
                        ..EndpointConfig::default()
                    }],
                }],
                ..ChainRoutingConfig::default()
            },
        };
        minimal_app(vec![chain]).validate().unwrap();
    }

    #[test]
    fn serde_round_trip_preserves_routing() {
        let chain = ChainConfig {
            name: "solana".into(),
            hostnames: vec!["rpc.example:2011".into()],
            routing: ChainRoutingConfig {
                method_groups: vec![MethodGroupConfig {
                    name: "g".into(),
                    methods: vec!["getSlot".into()],
                }],
                providers: vec![ProviderConfig {
                    name: "p".into(),
                    endpoints: vec![EndpointConfig {
                        url: "https://rpc.fast.example".into(),
                        weight: 3.0,
                        handle_other: true,
                        ..EndpointConfig::default()
                    }],
                }],
                ..ChainRoutingConfig::default()
            },
        };
        let app = minimal_app(vec![chain]);
        let encoded = serde_json::to_string(&app).unwrap();
        let decoded: AppConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(app, decoded);
    }
}
