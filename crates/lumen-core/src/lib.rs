//! # Lumen Core
//!
//! Core library for the Lumen JSON-RPC reverse proxy for Solana-family
//! chains.
//!
//! - **[`upstream`]**: per-endpoint health state, weighted and round-robin
//!   selectors, the method router compiled from declarative configuration,
//!   response classification, and the bounded-retry dispatcher.
//!
//! - **[`proxy`]**: chain adapters binding hostnames to routing machinery,
//!   request contexts, the error taxonomy, and WebSocket target selection.
//!
//! - **[`chain`]**: Solana method tables, node capability tiers, and
//!   upstream error codes shared by the Solana and Eclipse chains.
//!
//! - **[`config`]**: layered configuration loading and validation.
//!
//! - **[`metrics`]**: counter/histogram helpers recorded along the request
//!   path; exporter wiring belongs to the host process.
//!
//! ## Request flow
//!
//! ```text
//! Client POST ──► ChainAdapter (host-header binding)
//!                     │
//!                     ▼
//!                Dispatcher ──► MethodRouter ──► method → WeightedSelector
//!                     │                               (handleOther pool for
//!                     │                                unclaimed methods)
//!            ┌────────┴─────────┐
//!            ▼                  ▼
//!      Target draw +      HTTP exchange ──► response analysis
//!      eligibility gate         │            (user error / method
//!      (jail, limits,           │             unavailable / transient)
//!       capability,             ▼
//!       archive age)      Target::update_stats
//! ```

pub mod chain;
pub mod config;
pub mod metrics;
pub mod proxy;
pub mod types;
pub mod upstream;
