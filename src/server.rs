//! Process wiring.
//!
//! [`Server`] assembles the store, room registry, gatekeeper and gateway from
//! a [`Config`]; [`ServerHandle`] drives the ordered shutdown: stop
//! accepting, close sessions, then flush and stop every room.

use crate::auth::{CredentialValidator, Gatekeeper};
use crate::config::Config;
use crate::network::{Gateway, SessionContext};
use crate::persistence::{self, DocumentStore};
use crate::state::{RoomRegistry, RoomSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Server {
    config: Config,
    store: Option<Arc<dyn DocumentStore>>,
    validator: Option<Arc<dyn CredentialValidator>>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            validator: None,
        }
    }

    /// Use `store` instead of opening the configured backend.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `validator` instead of the configured JWT verifier.
    pub fn with_validator(mut self, validator: Arc<dyn CredentialValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Bind the listener and start accepting connections.
    pub async fn start(self) -> anyhow::Result<ServerHandle> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => persistence::open(&config.persistence).await?,
        };

        let registry = RoomRegistry::new(
            store,
            RoomSettings::from_config(&config),
            config.persistence.create_missing,
        );

        let gatekeeper = match self.validator {
            Some(validator) => Gatekeeper::new(
                validator,
                Duration::from_millis(config.auth.handshake_timeout_ms),
            ),
            None => Gatekeeper::from_config(&config.auth),
        };

        let shutdown = CancellationToken::new();
        let ctx = Arc::new(SessionContext::new(
            Arc::clone(&registry),
            gatekeeper,
            config.limits.clone(),
            shutdown.clone(),
        ));

        let gateway = Gateway::bind(&config.listen, ctx).await?;
        let local_addr = gateway.local_addr()?;
        let gateway = tokio::spawn(gateway.run());

        info!(address = %local_addr, server = %config.server.name, "Server started");

        Ok(ServerHandle {
            local_addr,
            shutdown,
            gateway,
            registry,
        })
    }
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    gateway: JoinHandle<anyhow::Result<()>>,
    registry: Arc<RoomRegistry>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Graceful shutdown. Returns once every room has flushed and exited.
    ///
    /// Sessions get `limits.shutdown_grace_ms` to close; rooms are flushed
    /// whether or not they all did.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        info!("Shutting down");
        self.shutdown.cancel();

        let gateway = self.gateway.await;
        self.registry.shutdown().await;

        match gateway {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Gateway task failed");
                Err(e.into())
            }
        }
    }
}
