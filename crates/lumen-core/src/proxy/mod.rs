//! Request-facing surface of the core: adapters, contexts, errors, WS.

pub mod adapter;
pub mod context;
pub mod errors;
pub mod ws;

pub use adapter::{sanitize_error, ChainAdapter};
pub use context::{RequestContext, MULTIPLE_VALUES_LABEL};
pub use errors::{ProxyError, STATUS_CLIENT_CLOSED_REQUEST};
pub use ws::WsProxy;
