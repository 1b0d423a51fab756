//! # Backend Transport
//!
//! One persistent duplex connection to the voice backend.
//!
//! ## Key Components:
//! - **Transport trait**: connect / send / close, the seam the session talks to
//! - **WsTransport**: tokio-tungstenite implementation (see `ws.rs`)
//! - **Protocol**: JSON framing for outbound audio and inbound server content
//!
//! Connection completion, inbound frames, errors and closes are reported through
//! a `TransportNotifier` tagged with the `ConnectionId` returned by `connect`, so
//! the session can discard events from a connection it has already replaced.

pub mod protocol;
pub mod ws;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use protocol::InboundFrame;

/// Identifies one `connect` call. Ids increase monotonically per transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle events reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is open and frames can be sent
    Opened,
    /// A data frame arrived
    Message(InboundFrame),
    /// Connection or protocol failure; a `Closed` event follows
    Error(String),
    /// The connection is gone
    Closed {
        code: Option<u16>,
        reason: String,
        clean: bool,
    },
}

/// Callback used by transports to report events. Called from the connection
/// task, so it must be cheap and thread-safe (typically an actor `do_send`).
pub type TransportNotifier = Arc<dyn Fn(ConnectionId, TransportEvent) + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection is not open")]
    NotOpen,

    #[error("invalid endpoint URL '{0}': expected ws://, wss://, http:// or https://")]
    InvalidUrl(String),

    #[error("failed to start connection: {0}")]
    Connect(String),

    #[error("outbound queue is full, frame dropped")]
    Congested,
}

/// Duplex message transport to the voice backend.
pub trait Transport {
    /// Begin opening a connection. Completion is reported as `TransportEvent::Opened`.
    /// An existing connection is closed first.
    fn connect(&mut self, endpoint_url: &str) -> Result<ConnectionId, TransportError>;

    /// Queue a text frame. Fails with `NotOpen` unless the connection is open,
    /// and with `Congested` if the backend is not keeping up.
    fn send_text(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection. Safe to call repeatedly or when never connected.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Normalize a backend endpoint to a WebSocket URL.
///
/// `http://` and `https://` are rewritten to `ws://` and `wss://` so the same
/// deployment URL can be used for the page and the socket.
pub fn normalize_endpoint(url: &str) -> Result<String, TransportError> {
    let url = url.trim();

    let normalized = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        return Err(TransportError::InvalidUrl(url.to_string()));
    };

    // Scheme alone is not an endpoint
    if normalized.ends_with("://") {
        return Err(TransportError::InvalidUrl(url.to_string()));
    }

    Ok(normalized)
}
