//! Proxy subsystem.
//!
//! # Data Flow
//! ```text
//! http handler
//!     → context.rs (request id, session, caller identity)
//!     → dispatcher.rs (breaker → balancer → upstream, retry loop)
//!     → upstream.rs (build forwarded request, send, classify)
//!     → response or GatewayError back to the handler
//! ```

pub mod context;
pub mod dispatcher;
pub mod upstream;

pub use context::{CallerIdentity, ProxyRequestContext};
pub use dispatcher::Dispatcher;
pub use upstream::UpstreamClient;
