//! Network module.
//!
//! Contains the Gateway (WebSocket listener) and the per-connection session.

mod gateway;
pub mod session;

pub use gateway::Gateway;
pub use session::SessionContext;
