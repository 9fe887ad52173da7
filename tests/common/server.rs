//! In-process test server.
//!
//! Runs collabd on an ephemeral port with an injected store, so tests can
//! seed documents and inspect persisted snapshots directly.

#![allow(dead_code)]

use super::token::SECRET;
use collab_proto::DocumentId;
use collabd::config::Config;
use collabd::persistence::{DocumentStore, MemoryStore};
use collabd::{Server, ServerHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A running test server.
pub struct TestServer {
    handle: ServerHandle,
    addr: SocketAddr,
    pub store: Arc<MemoryStore>,
}

/// Minimal configuration: loopback, port 0, fast debounce, no HTTP endpoint.
pub fn test_config() -> Config {
    let toml_str = format!(
        r#"
[server]
name = "collabd-test"
http_port = 0

[listen]
address = "127.0.0.1:0"

[auth]
jwt_secret = "{SECRET}"
handshake_timeout_ms = 2000

[persistence]
backend = "memory"
debounce_ms = 100
max_attempts = 3
backoff_initial_ms = 10
backoff_max_ms = 50

[limits]
sync_timeout_ms = 5000
"#
    );
    toml::from_str(&toml_str).expect("test config parses")
}

impl TestServer {
    /// Spawn with an empty in-memory store holding document `d1`.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn after letting the test adjust the configuration.
    pub async fn spawn_with(configure: impl FnOnce(&mut Config)) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert("d1");
        Self::spawn_on(store, configure).await
    }

    /// Spawn on a caller-provided memory store.
    pub async fn spawn_on(store: Arc<MemoryStore>, configure: impl FnOnce(&mut Config)) -> Self {
        let handle = Self::start(store.clone(), configure).await;
        let addr = handle.local_addr();
        Self {
            handle,
            addr,
            store,
        }
    }

    /// Start a server on any store, returning the raw handle.
    pub async fn start(
        store: Arc<dyn DocumentStore>,
        configure: impl FnOnce(&mut Config),
    ) -> ServerHandle {
        let mut config = test_config();
        configure(&mut config);
        Server::new(config)
            .with_store(store)
            .start()
            .await
            .expect("test server starts")
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// WebSocket URL without credentials.
    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// WebSocket URL carrying `token` as a query parameter.
    pub fn url_with_token(&self, token: &str) -> String {
        format!("ws://{}/?token={}", self.addr, token)
    }

    /// Whether a live room exists for `id`.
    pub fn has_room(&self, id: &str) -> bool {
        self.handle.registry().contains(&DocumentId::from(id))
    }

    /// Persisted snapshot of `id`, waiting up to `timeout` for `accept` to hold.
    pub async fn wait_for_snapshot(
        &self,
        id: &str,
        timeout: Duration,
        accept: impl Fn(&[u8]) -> bool,
    ) -> Option<Vec<u8>> {
        let id = DocumentId::from(id);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(snapshot) = self.store.snapshot(&id)
                && accept(&snapshot)
            {
                return Some(snapshot);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Graceful shutdown; returns once every room has flushed.
    pub async fn shutdown(self) {
        self.handle.shutdown().await.expect("clean shutdown");
    }
}
