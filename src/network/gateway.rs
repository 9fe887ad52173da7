//! Gateway - WebSocket listener that accepts incoming connections.
//!
//! The Gateway binds a TCP socket, performs the HTTP upgrade (checking the
//! `Origin` header and capturing any credential on the request), and spawns
//! a session task per connection.

use crate::auth::token_from_request;
use crate::config::ListenConfig;
use crate::metrics;
use crate::network::session::{self, SessionContext};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// The Gateway accepts incoming WebSocket connections and spawns sessions.
pub struct Gateway {
    listener: TcpListener,
    allow_origins: Arc<Vec<String>>,
    ws_config: WebSocketConfig,
    ctx: Arc<SessionContext>,
    sessions: TaskTracker,
}

impl Gateway {
    /// Bind the gateway to the configured address.
    pub async fn bind(config: &ListenConfig, ctx: Arc<SessionContext>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.address).await?;
        info!(address = %listener.local_addr()?, "WebSocket listener bound");

        let ws_config = WebSocketConfig {
            max_message_size: Some(config.max_message_bytes),
            max_frame_size: Some(config.max_message_bytes),
            ..Default::default()
        };

        Ok(Self {
            listener,
            allow_origins: Arc::new(config.allow_origins.clone()),
            ws_config,
            ctx,
            sessions: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown, then wait up to
    /// `limits.shutdown_grace_ms` for the sessions to end.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = self.ctx.shutdown.clone();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "WebSocket connection attempt");
                    let ctx = Arc::clone(&self.ctx);
                    let allowed = Arc::clone(&self.allow_origins);
                    let ws_config = self.ws_config;
                    self.sessions
                        .spawn(accept(stream, addr, allowed, ws_config, ctx));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept WebSocket connection");
                }
            }
        }

        drop(self.listener);
        self.sessions.close();
        info!(sessions = self.sessions.len(), "Listener closed, waiting for sessions");

        let grace = Duration::from_millis(self.ctx.limits.shutdown_grace_ms);
        if tokio::time::timeout(grace, self.sessions.wait()).await.is_err() {
            warn!(
                sessions = self.sessions.len(),
                grace_ms = self.ctx.limits.shutdown_grace_ms,
                "Sessions still open after the shutdown grace period, abandoning them"
            );
        }
        Ok(())
    }
}

/// Perform the upgrade and hand the socket to a session.
async fn accept(
    stream: TcpStream,
    addr: SocketAddr,
    allowed: Arc<Vec<String>>,
    ws_config: WebSocketConfig,
    ctx: Arc<SessionContext>,
) {
    let mut upgrade_token = None;

    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if !origin_allowed(&allowed, req) {
            let origin = req
                .headers()
                .get(http::header::ORIGIN)
                .and_then(|o| o.to_str().ok())
                .unwrap_or("<none>");
            warn!(%addr, %origin, "WebSocket CORS rejected");
            let mut denied = ErrorResponse::new(Some("CORS origin not allowed".to_string()));
            *denied.status_mut() = http::StatusCode::FORBIDDEN;
            return Err(denied);
        }
        upgrade_token = token_from_request(req.uri().query(), req.headers());
        Ok(response)
    };

    let handshake = accept_hdr_async_with_config(stream, callback, Some(ws_config));
    let ws = match tokio::time::timeout(ctx.gatekeeper.handshake_timeout(), handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            metrics::record_rejected("upgrade");
            warn!(%addr, error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            metrics::record_rejected("upgrade_timeout");
            warn!(%addr, "WebSocket handshake timed out");
            return;
        }
    };

    debug!(%addr, "WebSocket handshake successful");
    session::serve(ws, upgrade_token, addr, ctx).await;
}

/// An empty allow-list admits every origin, as does a `*` entry.
fn origin_allowed(allowed: &[String], req: &Request) -> bool {
    if allowed.is_empty() {
        return true;
    }
    req.headers()
        .get(http::header::ORIGIN)
        .and_then(|o| o.to_str().ok())
        .is_some_and(|origin| allowed.iter().any(|a| a == origin || a == "*"))
}
