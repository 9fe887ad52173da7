//! Test WebSocket client.
//!
//! Speaks the JSON wire protocol and exposes helpers to assert on received
//! frames and close codes.

#![allow(dead_code)]

use super::doc::ClientDoc;
use super::server::TestServer;
use super::token::token_for;
use anyhow::{anyhow, bail};
use collab_proto::{ClientMessage, DocumentId, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the server did next.
#[derive(Debug)]
pub enum Received {
    Frame(ServerMessage),
    Closed(Option<u16>),
}

/// A test client.
pub struct TestClient {
    ws: Ws,
    pub connection_id: u64,
}

impl TestClient {
    /// Open a socket without authenticating.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(url).await?;
        Ok(Self {
            ws,
            connection_id: 0,
        })
    }

    /// Open a socket with extra request headers.
    pub async fn connect_with_headers(
        url: &str,
        headers: &[(http::HeaderName, &str)],
    ) -> anyhow::Result<Self> {
        let mut request = url.into_client_request()?;
        for (name, value) in headers {
            request.headers_mut().insert(name.clone(), value.parse()?);
        }
        let (ws, _) = connect_async(request).await?;
        Ok(Self {
            ws,
            connection_id: 0,
        })
    }

    /// Connect as `user` with a valid token and wait for `authenticated`.
    pub async fn login(server: &TestServer, user: &str) -> anyhow::Result<Self> {
        let mut client = Self::connect(&server.url_with_token(&token_for(user))).await?;
        client.expect_authenticated().await?;
        Ok(client)
    }

    pub async fn expect_authenticated(&mut self) -> anyhow::Result<()> {
        match self.recv().await? {
            ServerMessage::Authenticated { connection_id, .. } => {
                self.connection_id = connection_id;
                Ok(())
            }
            other => bail!("expected authenticated, got {other:?}"),
        }
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> anyhow::Result<()> {
        self.send_raw(&msg.to_json()?).await
    }

    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Next frame or close, within `dur`.
    pub async fn next_event(&mut self, dur: Duration) -> anyhow::Result<Received> {
        timeout(dur, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Received::Frame(ServerMessage::from_json(&text)?));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(Received::Closed(frame.map(|f| u16::from(f.code))));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(Received::Closed(None)),
                }
            }
        })
        .await
        .map_err(|_| anyhow!("timed out after {dur:?}"))?
    }

    pub async fn recv(&mut self) -> anyhow::Result<ServerMessage> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<ServerMessage> {
        match self.next_event(dur).await? {
            Received::Frame(msg) => Ok(msg),
            Received::Closed(code) => bail!("connection closed ({code:?})"),
        }
    }

    /// Skip frames until one matches.
    pub async fn recv_until(
        &mut self,
        mut pred: impl FnMut(&ServerMessage) -> bool,
    ) -> anyhow::Result<ServerMessage> {
        loop {
            let msg = self.recv().await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Skip frames until the server closes; returns the close code.
    pub async fn expect_close(&mut self) -> anyhow::Result<u16> {
        loop {
            match self.next_event(Duration::from_secs(5)).await? {
                Received::Frame(_) => continue,
                Received::Closed(Some(code)) => return Ok(code),
                Received::Closed(None) => bail!("closed without a close frame"),
            }
        }
    }

    /// Frames received during `dur`; fails if the connection closes.
    pub async fn collect_for(&mut self, dur: Duration) -> anyhow::Result<Vec<ServerMessage>> {
        let deadline = tokio::time::Instant::now() + dur;
        let mut out = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return Ok(out);
            }
            match self.next_event(left).await {
                Ok(Received::Frame(msg)) => out.push(msg),
                Ok(Received::Closed(code)) => bail!("connection closed ({code:?})"),
                Err(_) => return Ok(out),
            }
        }
    }

    /// Join `id` and run the two-step initial sync against `local`.
    ///
    /// Applies everything the server sends until `synced`, and uploads what
    /// the server is missing.
    pub async fn join_and_sync(&mut self, id: &str, local: &ClientDoc) -> anyhow::Result<()> {
        let document_id = DocumentId::from(id);
        self.send(&ClientMessage::Join {
            document_id: document_id.clone(),
        })
        .await?;

        let server_sv = match self.recv().await? {
            ServerMessage::SyncStep1 { state_vector, .. } => state_vector,
            other => bail!("expected sync-step-1, got {other:?}"),
        };

        self.send(&ClientMessage::SyncStep2 {
            document_id: document_id.clone(),
            state_vector: local.state_vector(),
        })
        .await?;

        if !local.is_empty() {
            self.send(&ClientMessage::Update {
                document_id,
                update: local.diff(&server_sv),
            })
            .await?;
        }

        loop {
            match self.recv().await? {
                ServerMessage::Update { update, .. } => local.apply(&update),
                ServerMessage::Synced { .. } => return Ok(()),
                ServerMessage::Error { code, message, .. } => bail!("{code}: {message}"),
                _ => {}
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
