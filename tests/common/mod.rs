//! Integration test common infrastructure.
//!
//! Provides an in-process test server, a WebSocket test client, a token
//! signer and a client-side CRDT document.

pub mod client;
pub mod doc;
pub mod server;
pub mod token;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use doc::ClientDoc;
#[allow(unused_imports)]
pub use server::TestServer;
