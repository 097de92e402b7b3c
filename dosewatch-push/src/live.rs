//! Live WebSocket gateway for real-time notification delivery.
//!
//! Browsers connect, authenticate with their first frame, and then receive
//! notification payloads pushed through [`LiveGateway::send_to_user`].

use crate::error::{PushError, PushResult};
use async_trait::async_trait;
use dashmap::DashMap;
use dosewatch_metrics::Metrics;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Negotiated WebSocket subprotocol.
pub const SUBPROTOCOL: &str = "dosewatch.v1";

/// Close code for a missing, invalid, or late auth token.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
/// Close code for a frame the gateway cannot parse.
pub const CLOSE_MALFORMED: u16 = 4400;
/// Close code for a frame above `max_frame_bytes`.
pub const CLOSE_OVERSIZED: u16 = 4413;
/// Close code for an idle connection.
pub const CLOSE_IDLE: u16 = 4408;
/// Standard close code for internal gateway errors.
pub const CLOSE_INTERNAL: u16 = 1011;

/// Validates auth tokens presented in the first frame.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Resolve a token to a user id, or `None` when the token is invalid.
    async fn validate(&self, token: &str) -> PushResult<Option<String>>;
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Allowed `Origin` header values; empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// How long a connection may wait before presenting its auth frame.
    pub auth_timeout: Duration,
    /// Close connections idle longer than this.
    pub idle_timeout: Duration,
    /// Largest accepted frame.
    pub max_frame_bytes: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9443".parse().unwrap_or_else(|_| {
                SocketAddr::from(([0, 0, 0, 0], 9443))
            }),
            allowed_origins: Vec::new(),
            auth_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            max_frame_bytes: 16 * 1024,
        }
    }
}

impl LiveConfig {
    /// Set the bind address.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Restrict accepted `Origin` values.
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Set the auth deadline.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the frame size limit.
    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }
}

type ConnectionMap = DashMap<String, HashMap<Uuid, mpsc::UnboundedSender<Message>>>;

struct Inner {
    config: LiveConfig,
    validator: Arc<dyn TokenValidator>,
    connections: ConnectionMap,
    metrics: Metrics,
}

/// Live notification gateway. Cloneable; clones share the registry.
#[derive(Clone)]
pub struct LiveGateway {
    inner: Arc<Inner>,
}

impl LiveGateway {
    /// Create a gateway.
    pub fn new(config: LiveConfig, validator: Arc<dyn TokenValidator>, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                validator,
                connections: DashMap::new(),
                metrics,
            }),
        }
    }

    /// Bind the configured address and accept connections until the task
    /// is dropped.
    pub async fn run(&self) -> PushResult<()> {
        let listener = TcpListener::bind(self.inner.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> PushResult<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "live gateway listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let gateway = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = gateway.handle_connection(stream, peer).await {
                            debug!(peer = %peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    /// Deliver a payload to every live connection of one user. Returns the
    /// number of connections reached.
    pub fn send_to_user(&self, user_id: &str, payload: &serde_json::Value) -> usize {
        let Some(conns) = self.inner.connections.get(user_id) else {
            return 0;
        };
        let text = payload.to_string();
        let mut delivered = 0;
        for tx in conns.values() {
            if tx.send(Message::text(text.clone())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// True while the user has at least one live connection.
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.inner
            .connections
            .get(user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Total live connections.
    pub fn connection_count(&self) -> usize {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> PushResult<()> {
        let origins = self.inner.config.allowed_origins.clone();
        let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            if !origins.is_empty() {
                let allowed = req
                    .headers()
                    .get("Origin")
                    .and_then(|v| v.to_str().ok())
                    .map(|origin| origins.iter().any(|a| a == origin))
                    .unwrap_or(false);
                if !allowed {
                    let mut response = ErrorResponse::new(Some("origin not allowed".to_string()));
                    *response.status_mut() = StatusCode::FORBIDDEN;
                    return Err(response);
                }
            }

            if let Some(offered) = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
            {
                if offered.split(',').map(str::trim).any(|p| p == SUBPROTOCOL) {
                    resp.headers_mut().insert(
                        "Sec-WebSocket-Protocol",
                        HeaderValue::from_static(SUBPROTOCOL),
                    );
                } else {
                    let mut response =
                        ErrorResponse::new(Some("unsupported subprotocol".to_string()));
                    *response.status_mut() = StatusCode::BAD_REQUEST;
                    return Err(response);
                }
            }

            Ok(resp)
        };

        let ws = accept_hdr_async(stream, callback).await?;
        let (mut write, mut read) = ws.split();
        debug!(peer = %peer, "websocket handshake complete");

        // First frame carries the auth token, on a deadline.
        let first = tokio::time::timeout(self.inner.config.auth_timeout, read.next()).await;
        let user_id = match first {
            Err(_) => {
                close(&mut write, CLOSE_UNAUTHORIZED, "authentication timeout").await;
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(msg))) => {
                match inspect_auth_frame(&msg, self.inner.config.max_frame_bytes) {
                    FrameVerdict::Oversized => {
                        close(&mut write, CLOSE_OVERSIZED, "frame too large").await;
                        return Ok(());
                    }
                    FrameVerdict::Malformed => {
                        close(&mut write, CLOSE_MALFORMED, "expected auth frame").await;
                        return Ok(());
                    }
                    FrameVerdict::Auth(token) => {
                        match self.inner.validator.validate(&token).await {
                            Ok(Some(user_id)) => user_id,
                            Ok(None) => {
                                close(&mut write, CLOSE_UNAUTHORIZED, "invalid token").await;
                                return Ok(());
                            }
                            Err(e) => {
                                warn!(peer = %peer, error = %e, "token validation failed");
                                close(&mut write, CLOSE_INTERNAL, "internal error").await;
                                return Ok(());
                            }
                        }
                    }
                }
            }
        };

        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.inner
            .connections
            .entry(user_id.clone())
            .or_default()
            .insert(conn_id, tx);
        self.inner
            .metrics
            .set_gauge("live.connections", self.connection_count() as f64);
        info!(user_id = %user_id, conn_id = %conn_id, "live connection authenticated");

        let ready = json!({ "type": "ready" }).to_string();
        if write.send(Message::text(ready)).await.is_err() {
            self.unregister(&user_id, conn_id);
            return Ok(());
        }

        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(msg) => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                incoming = tokio::time::timeout(self.inner.config.idle_timeout, read.next()) => {
                    match incoming {
                        Err(_) => {
                            close(&mut write, CLOSE_IDLE, "idle timeout").await;
                            break;
                        }
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            debug!(conn_id = %conn_id, error = %e, "read error");
                            break;
                        }
                        Ok(Some(Ok(msg))) => {
                            if msg.len() > self.inner.config.max_frame_bytes {
                                close(&mut write, CLOSE_OVERSIZED, "frame too large").await;
                                break;
                            }
                            if msg.is_close() {
                                break;
                            }
                            // Client frames after auth are keepalives; nothing to do.
                        }
                    }
                }
            }
        }

        self.unregister(&user_id, conn_id);
        debug!(user_id = %user_id, conn_id = %conn_id, "live connection closed");
        Ok(())
    }

    fn unregister(&self, user_id: &str, conn_id: Uuid) {
        if let Some(mut conns) = self.inner.connections.get_mut(user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                drop(conns);
                self.inner.connections.remove(user_id);
            }
        }
        self.inner
            .metrics
            .set_gauge("live.connections", self.connection_count() as f64);
    }
}

impl std::fmt::Debug for LiveGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveGateway")
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, PartialEq)]
enum FrameVerdict {
    Auth(String),
    Malformed,
    Oversized,
}

fn inspect_auth_frame(msg: &Message, max_frame_bytes: usize) -> FrameVerdict {
    if msg.len() > max_frame_bytes {
        return FrameVerdict::Oversized;
    }
    let Message::Text(text) = msg else {
        return FrameVerdict::Malformed;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text.as_str()) else {
        return FrameVerdict::Malformed;
    };
    if value.get("type").and_then(|v| v.as_str()) != Some("auth") {
        return FrameVerdict::Malformed;
    }
    match value.get("token").and_then(|v| v.as_str()) {
        Some(token) if !token.is_empty() => FrameVerdict::Auth(token.to_string()),
        _ => FrameVerdict::Malformed,
    }
}

async fn close<S>(write: &mut S, code: u16, reason: &'static str)
where
    S: SinkExt<Message> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Library(code),
        reason: reason.into(),
    };
    let _ = write.send(Message::Close(Some(frame))).await;
}
