//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → /health reports 503 → Stop accepting → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! Health probe tasks, the config watcher loop and the HTTP server all
//! subscribe to the same broadcast and stop on it.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
