//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID, caller identity)
//!     → status.rs (gateway health/metrics)  |  proxy.rs (route lookup)
//!     → proxy::Dispatcher (breaker, balancer, retries)
//!     → response.rs (error mapping, gateway headers)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use response::ErrorResponse;
pub use server::{AppState, GatewayServer};
