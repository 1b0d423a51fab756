//! WebSocket transport built on tokio-tungstenite.
//!
//! Each `connect` spawns one connection task that owns the socket. Outbound
//! frames reach it through a bounded channel, so `send_text` never blocks the
//! caller and frames leave in the order they were queued. When the backend
//! stops reading and the channel fills up, new frames are dropped. The task
//! reports inbound frames and lifecycle changes through the notifier.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::protocol::InboundFrame;
use super::{ConnectionId, Transport, TransportError, TransportEvent, TransportNotifier};

/// How long the WebSocket handshake may take before the attempt fails.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound frames buffered per connection, about 8 s of 16 kHz audio.
const OUTBOUND_CAPACITY: usize = 32;

/// Mirrors the WebSocket `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new() -> Self {
        Self(AtomicU8::new(ReadyState::Connecting as u8))
    }

    fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Message>,
    state: Arc<SharedState>,
    task: JoinHandle<()>,
}

/// tokio-tungstenite client transport. Must be used from within a tokio runtime.
pub struct WsTransport {
    notify: TransportNotifier,
    connect_timeout: Duration,
    next_id: u64,
    current: Option<Connection>,
}

impl WsTransport {
    pub fn new(notify: TransportNotifier) -> Self {
        Self {
            notify,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            next_id: 1,
            current: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn ready_state(&self) -> ReadyState {
        self.current
            .as_ref()
            .map(|conn| conn.state.get())
            .unwrap_or(ReadyState::Closed)
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, endpoint_url: &str) -> Result<ConnectionId, TransportError> {
        self.close();

        let url = super::normalize_endpoint(endpoint_url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let state = Arc::new(SharedState::new());

        info!(connection = %id, url = %url, "Opening backend connection");
        let task = runtime.spawn(run_connection(
            id,
            url,
            self.connect_timeout,
            outbound_rx,
            state.clone(),
            self.notify.clone(),
        ));

        self.current = Some(Connection {
            id,
            outbound,
            state,
            task,
        });
        Ok(id)
    }

    fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        let conn = self.current.as_ref().ok_or(TransportError::NotOpen)?;
        if conn.state.get() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        conn.outbound.try_send(Message::Text(frame)).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Congested,
            TrySendError::Closed(_) => TransportError::NotOpen,
        })
    }

    fn close(&mut self) {
        let Some(conn) = self.current.take() else {
            return;
        };

        match conn.state.get() {
            ReadyState::Connecting => {
                // Handshake still pending: nothing to say goodbye to
                debug!(connection = %conn.id, "Aborting pending connection");
                conn.task.abort();
                conn.state.set(ReadyState::Closed);
            }
            ReadyState::Open => {
                debug!(connection = %conn.id, "Closing connection");
                conn.state.set(ReadyState::Closing);
                // If the queue is full the close frame is lost, but dropping the
                // sender still ends the task with a close handshake
                let _ = conn.outbound.try_send(Message::Close(None));
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
    }

    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn report_connect_failure(id: ConnectionId, state: &SharedState, notify: &TransportNotifier, reason: String) {
    error!(connection = %id, error = %reason, "Failed to connect to backend");
    state.set(ReadyState::Closed);
    notify(id, TransportEvent::Error(reason.clone()));
    notify(
        id,
        TransportEvent::Closed {
            code: None,
            reason,
            clean: false,
        },
    );
}

async fn run_connection(
    id: ConnectionId,
    url: String,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::Receiver<Message>,
    state: Arc<SharedState>,
    notify: TransportNotifier,
) {
    let socket = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((socket, response))) => {
            debug!(connection = %id, status = %response.status(), "Handshake complete");
            socket
        }
        Ok(Err(err)) => {
            report_connect_failure(id, &state, &notify, err.to_string());
            return;
        }
        Err(_) => {
            let reason = format!("handshake timed out after {} ms", connect_timeout.as_millis());
            report_connect_failure(id, &state, &notify, reason);
            return;
        }
    };

    // close() may have run while the handshake was in flight
    if state.get() != ReadyState::Connecting {
        return;
    }
    state.set(ReadyState::Open);
    info!(connection = %id, "Backend connection open");
    notify(id, TransportEvent::Opened);

    let (mut sink, mut stream) = socket.split();
    let mut close_code = None;
    let mut close_reason = String::new();
    let mut clean = true;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(err) = sink.send(message).await {
                        warn!(connection = %id, error = %err, "Failed to send frame");
                        notify(id, TransportEvent::Error(err.to_string()));
                        clean = false;
                        break;
                    }
                    if closing {
                        state.set(ReadyState::Closing);
                    }
                }
                None => {
                    // Transport dropped without a close frame
                    let _ = sink.close().await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => notify(id, TransportEvent::Message(InboundFrame::Text(text))),
                Some(Ok(Message::Binary(bytes))) => notify(id, TransportEvent::Message(InboundFrame::Binary(bytes))),
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        close_code = Some(u16::from(frame.code));
                        close_reason = frame.reason.into_owned();
                    }
                    break;
                }
                // Ping/pong is answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(connection = %id, error = %err, "Backend connection error");
                    notify(id, TransportEvent::Error(err.to_string()));
                    clean = false;
                    break;
                }
                None => break,
            },
        }
    }

    let _ = sink.close().await;
    state.set(ReadyState::Closed);
    info!(connection = %id, code = ?close_code, reason = %close_reason, clean, "Backend connection closed");
    notify(
        id,
        TransportEvent::Closed {
            code: close_code,
            reason: close_reason,
            clean,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_notifier() -> (TransportNotifier, Arc<Mutex<Vec<(ConnectionId, TransportEvent)>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let notify: TransportNotifier = Arc::new(move |id, event| sink.lock().unwrap().push((id, event)));
        (notify, events)
    }

    #[tokio::test]
    async fn test_send_before_open_is_rejected() {
        let (notify, _events) = recording_notifier();
        let mut transport = WsTransport::new(notify);

        assert_eq!(transport.send_text("{}".into()), Err(TransportError::NotOpen));
        assert_eq!(transport.ready_state(), ReadyState::Closed);

        // Nothing listens on the discard port, so this connection never opens
        let id = transport.connect("ws://127.0.0.1:9/").unwrap();
        assert_eq!(id, ConnectionId(1));
        assert_eq!(transport.send_text("{}".into()), Err(TransportError::NotOpen));

        transport.close();
        transport.close();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_invalid_url_does_not_spawn() {
        let (notify, events) = recording_notifier();
        let mut transport = WsTransport::new(notify);

        assert!(matches!(transport.connect("mailto:me"), Err(TransportError::InvalidUrl(_))));
        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_reports_error_then_close() {
        let (notify, events) = recording_notifier();
        let mut transport = WsTransport::new(notify);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let id = transport.connect(&format!("ws://127.0.0.1:{}/", port)).unwrap();

        for _ in 0..200 {
            if events.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], (cid, TransportEvent::Error(_)) if cid == id));
        assert!(matches!(events[1], (cid, TransportEvent::Closed { clean: false, .. }) if cid == id));
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let (notify, events) = recording_notifier();
        let mut transport = WsTransport::new(notify).with_connect_timeout(Duration::from_millis(100));

        // The kernel completes the TCP handshake, but nobody ever answers the upgrade
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let id = transport.connect(&format!("ws://127.0.0.1:{}/", port)).unwrap();

        for _ in 0..200 {
            if events.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(listener);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], (cid, TransportEvent::Error(reason)) if *cid == id && reason.contains("timed out")));
        assert!(matches!(events[1], (cid, TransportEvent::Closed { clean: false, .. }) if cid == id));
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let (notify, events) = recording_notifier();
        let mut transport = WsTransport::new(notify);

        assert!(matches!(transport.connect("ws://127.0.0.1:9/"), Err(TransportError::Connect(_))));
        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_frames() {
        let (notify, _events) = recording_notifier();
        let mut transport = WsTransport::new(notify);

        let (outbound, mut outbound_rx) = mpsc::channel(2);
        let state = Arc::new(SharedState::new());
        state.set(ReadyState::Open);
        transport.current = Some(Connection {
            id: ConnectionId(1),
            outbound,
            state,
            task: tokio::spawn(async {}),
        });

        assert_eq!(transport.send_text("a".into()), Ok(()));
        assert_eq!(transport.send_text("b".into()), Ok(()));
        assert_eq!(transport.send_text("c".into()), Err(TransportError::Congested));

        // Queued frames keep their order; the dropped one never appears
        assert_eq!(outbound_rx.recv().await, Some(Message::Text("a".into())));
        assert_eq!(transport.send_text("d".into()), Ok(()));
        assert_eq!(outbound_rx.recv().await, Some(Message::Text("b".into())));
        assert_eq!(outbound_rx.recv().await, Some(Message::Text("d".into())));

        outbound_rx.close();
        assert_eq!(transport.send_text("e".into()), Err(TransportError::NotOpen));
    }
}
