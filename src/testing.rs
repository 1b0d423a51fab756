//! In-memory transport, microphone and audio output used by unit tests.
//!
//! All three write into one shared `IoLog`, so a test can assert on the exact
//! interleaving of I/O calls (for example that playback was stopped before a
//! frame was sent).

use std::cell::RefCell;
use std::rc::Rc;

use actix::Addr;
use tokio::sync::watch;

use crate::audio::{AudioOutput, BlockSink, CaptureError, Microphone, NodeId, PlaybackError, PlaybackNode};
use crate::session::actor::{launch, SessionActor, SessionNotifiers};
use crate::session::signals::{signals_channel, SessionSignals};
use crate::session::{SessionConfig, SessionIo};
use crate::transport::{ConnectionId, Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub enum IoEvent {
    Connect(String),
    Send(String),
    TransportClosed,
    MicStarted,
    MicStopped,
    NodeStarted(NodeId, usize),
    NodeStopped(NodeId),
}

#[derive(Default)]
struct LogInner {
    events: Vec<IoEvent>,
    transport_open: bool,
    fail_next_start: bool,
    mic_error: Option<CaptureError>,
    last_sample_rate: Option<u32>,
}

#[derive(Clone, Default)]
pub struct IoLog(Rc<RefCell<LogInner>>);

impl IoLog {
    fn push(&self, event: IoEvent) {
        self.0.borrow_mut().events.push(event);
    }

    pub fn events(&self) -> Vec<IoEvent> {
        self.0.borrow().events.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().events.clear();
    }

    pub fn count(&self, matcher: impl Fn(&IoEvent) -> bool) -> usize {
        self.0.borrow().events.iter().filter(|e| matcher(e)).count()
    }

    pub fn sent_frames(&self) -> Vec<String> {
        self.0
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                IoEvent::Send(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn samples_of(&self, id: NodeId) -> Option<usize> {
        self.0.borrow().events.iter().find_map(|e| match e {
            IoEvent::NodeStarted(started, len) if *started == id => Some(*len),
            _ => None,
        })
    }

    pub fn started_lengths(&self) -> Vec<usize> {
        self.0
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                IoEvent::NodeStarted(_, len) => Some(*len),
                _ => None,
            })
            .collect()
    }

    /// Let the mock transport accept frames, as if the handshake completed.
    pub fn set_transport_open(&self, open: bool) {
        self.0.borrow_mut().transport_open = open;
    }

    pub fn fail_next_start(&self) {
        self.0.borrow_mut().fail_next_start = true;
    }

    pub fn fail_microphone(&self, error: CaptureError) {
        self.0.borrow_mut().mic_error = Some(error);
    }

    /// Sample rate passed to the most recent successful `AudioOutput::start`.
    pub fn last_sample_rate(&self) -> Option<u32> {
        self.0.borrow().last_sample_rate
    }
}

pub struct MockTransport {
    log: IoLog,
    next_id: u64,
    connected: bool,
}

impl MockTransport {
    pub fn new(log: IoLog) -> Self {
        Self {
            log,
            next_id: 1,
            connected: false,
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, endpoint_url: &str) -> Result<ConnectionId, TransportError> {
        let url = crate::transport::normalize_endpoint(endpoint_url)?;
        self.log.push(IoEvent::Connect(url));
        self.connected = true;
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        Ok(id)
    }

    fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.log.push(IoEvent::Send(frame));
        Ok(())
    }

    fn close(&mut self) {
        if self.connected {
            self.connected = false;
            self.log.set_transport_open(false);
            self.log.push(IoEvent::TransportClosed);
        }
    }

    fn is_open(&self) -> bool {
        self.connected && self.log.0.borrow().transport_open
    }
}

pub struct MockMicrophone {
    log: IoLog,
    running: bool,
}

impl MockMicrophone {
    pub fn new(log: IoLog) -> Self {
        Self { log, running: false }
    }
}

impl Microphone for MockMicrophone {
    fn start(&mut self, _sink: BlockSink) -> Result<(), CaptureError> {
        if let Some(err) = self.log.0.borrow_mut().mic_error.take() {
            return Err(err);
        }
        self.running = true;
        self.log.push(IoEvent::MicStarted);
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.log.push(IoEvent::MicStopped);
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

pub struct MockOutput {
    log: IoLog,
}

impl MockOutput {
    pub fn new(log: IoLog) -> Self {
        Self { log }
    }
}

struct MockNode {
    id: NodeId,
    log: IoLog,
    stopped: bool,
}

impl PlaybackNode for MockNode {
    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.log.push(IoEvent::NodeStopped(self.id));
        }
    }
}

impl AudioOutput for MockOutput {
    fn start(
        &mut self,
        id: NodeId,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<Box<dyn PlaybackNode>, PlaybackError> {
        let fail = std::mem::take(&mut self.log.0.borrow_mut().fail_next_start);
        if fail {
            return Err(PlaybackError::OutputUnavailable("mock output failure".into()));
        }

        self.log.0.borrow_mut().last_sample_rate = Some(sample_rate);
        self.log.push(IoEvent::NodeStarted(id, samples.len()));
        Ok(Box::new(MockNode {
            id,
            log: self.log.clone(),
            stopped: false,
        }))
    }
}

/// A session actor wired to the mocks, plus the notifiers its backends would use.
pub struct MockSession {
    pub addr: Addr<SessionActor>,
    pub log: IoLog,
    pub notifiers: SessionNotifiers,
    pub signals: watch::Receiver<SessionSignals>,
}

/// Launch a session actor on the current actix system with mock I/O.
pub fn launch_mock_session(config: SessionConfig) -> MockSession {
    let log = IoLog::default();
    let stash: Rc<RefCell<Option<SessionNotifiers>>> = Rc::new(RefCell::new(None));
    let (tx, rx) = signals_channel();

    let io_log = log.clone();
    let io_stash = stash.clone();
    let addr = launch(
        config,
        move |notifiers| {
            *io_stash.borrow_mut() = Some(notifiers);
            SessionIo {
                transport: Box::new(MockTransport::new(io_log.clone())),
                microphone: Box::new(MockMicrophone::new(io_log.clone())),
                output: Box::new(MockOutput::new(io_log)),
            }
        },
        tx,
    );

    let notifiers = stash
        .borrow_mut()
        .take()
        .expect("launch builds the session I/O synchronously");
    MockSession {
        addr,
        log,
        notifiers,
        signals: rx,
    }
}

pub fn mock_session_config() -> SessionConfig {
    SessionConfig {
        endpoint_url: "ws://backend.test/ws".into(),
        ..SessionConfig::default()
    }
}
