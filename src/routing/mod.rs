//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, query)
//!     → router.rs (route lookup)
//!     → matcher.rs (prefix match + rewrite)
//!     → Return: RouteMatch or NoMatch
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → One matcher per path_rewrite prefix
//!     → Sort by prefix length
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{Route, RouteMatch, RouteTable};
