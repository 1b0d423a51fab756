//! # Session State Machine
//!
//! `VoiceSession` is the sans-IO heart of the client. It never blocks and never
//! spawns: every method is a synchronous reaction to one named event, and all
//! side effects go through the `Transport`, `Microphone` and `AudioOutput` seams.
//!
//! ## Events:
//! - **UI actions**: `start`, `end`, `toggle_microphone`
//! - **Transport**: `on_transport_event` (open, message, error, close)
//! - **Microphone**: `on_captured_block`, one 4096-sample block at 16 kHz
//! - **Playback**: `on_playback_ended`, a node finished on its own
//!
//! ## Interruption:
//! `interrupt` is the single cancellation routine. Local voice activity and the
//! server's `interrupted` flag both end up there, and it always flushes the
//! queue and stops the active node in one step.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::signals::{SessionSignals, Status};
use super::{
    InterruptionSource, SessionConfig, SessionError, SessionMetrics, SessionPhase, SessionSnapshot,
    StartOutcome, ToggleOutcome,
};
use crate::audio::capture::VoiceActivityDetector;
use crate::audio::playback::{PlaybackScheduler, StopSummary};
use crate::audio::{AudioOutput, BlockSink, CaptureError, Microphone, NodeId};
use crate::transport::protocol::{decode_frame, encode_audio_frame, InboundFrame};
use crate::transport::{normalize_endpoint, ConnectionId, Transport, TransportEvent};

/// The three I/O seams a session drives.
pub struct SessionIo {
    pub transport: Box<dyn Transport>,
    pub microphone: Box<dyn Microphone>,
    pub output: Box<dyn AudioOutput>,
}

pub struct VoiceSession {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    microphone: Box<dyn Microphone>,
    playback: PlaybackScheduler,
    vad: VoiceActivityDetector,
    /// Handed to the microphone on every start
    block_sink: BlockSink,
    /// Reused PCM buffer for outbound frames
    scratch: Vec<u8>,

    phase: SessionPhase,
    connection: Option<ConnectionId>,
    endpoint_url: Option<String>,
    recording: bool,
    user_speaking: bool,
    /// Push-to-talk turn ended, no reply audio yet
    awaiting_reply: bool,
    mic_error: Option<Status>,

    session_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    metrics: SessionMetrics,
}

fn capture_status(err: &CaptureError) -> Status {
    match err {
        CaptureError::PermissionDenied(_) => Status::MicrophoneDenied,
        CaptureError::DeviceUnavailable(_) => Status::NoMicrophone,
        CaptureError::Stream(_) => Status::MicrophoneError,
    }
}

impl VoiceSession {
    pub fn new(config: SessionConfig, io: SessionIo, block_sink: BlockSink) -> Self {
        Self {
            vad: VoiceActivityDetector::new(config.vad_threshold),
            playback: PlaybackScheduler::new(io.output, config.playback_sample_rate),
            transport: io.transport,
            microphone: io.microphone,
            config,
            block_sink,
            scratch: Vec::new(),
            phase: SessionPhase::Idle,
            connection: None,
            endpoint_url: None,
            recording: false,
            user_speaking: false,
            awaiting_reply: false,
            mic_error: None,
            session_id: None,
            started_at: None,
            metrics: SessionMetrics::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the behaviour settings. Only allowed while no session is active;
    /// returns whether the new settings were applied.
    pub fn reconfigure(&mut self, config: SessionConfig) -> bool {
        if self.phase.is_active() {
            return false;
        }
        self.vad = VoiceActivityDetector::new(config.vad_threshold);
        if config.playback_sample_rate != self.config.playback_sample_rate {
            debug!(sample_rate = config.playback_sample_rate, "Playback sample rate changed");
            self.playback.set_sample_rate(config.playback_sample_rate);
        }
        self.config = config;
        true
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn is_user_speaking(&self) -> bool {
        self.user_speaking
    }

    pub fn queued_chunks(&self) -> usize {
        self.playback.queued()
    }

    pub fn active_node(&self) -> Option<NodeId> {
        self.playback.active_node()
    }

    pub fn metrics(&self) -> SessionMetrics {
        let stats = self.playback.stats();
        SessionMetrics {
            chunks_played: stats.chunks_played,
            chunks_flushed: stats.chunks_flushed,
            ..self.metrics
        }
    }

    /// Open a connection to `endpoint_override` or the configured endpoint.
    /// Starting while a session is connecting or connected changes nothing.
    pub fn start(&mut self, endpoint_override: Option<&str>) -> Result<StartOutcome, SessionError> {
        if self.phase.is_active() {
            debug!(session_id = ?self.session_id, "Start requested while a session is active");
            return Ok(StartOutcome::AlreadyActive);
        }

        let requested = endpoint_override.unwrap_or(self.config.endpoint_url.as_str());
        let endpoint = match normalize_endpoint(requested) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                error!(endpoint = %requested, error = %err, "Rejected backend endpoint");
                self.phase = SessionPhase::ConnectFailed;
                return Err(err.into());
            }
        };

        self.metrics = SessionMetrics::default();
        self.playback.reset_stats();
        self.mic_error = None;
        self.awaiting_reply = false;
        self.session_id = Some(Uuid::new_v4());
        self.started_at = Some(Utc::now());

        match self.transport.connect(&endpoint) {
            Ok(connection) => {
                info!(
                    session_id = ?self.session_id,
                    connection = %connection,
                    endpoint = %endpoint,
                    mode = %self.config.interruption_mode,
                    vad_threshold = self.vad.threshold(),
                    always_listening = self.config.always_listening,
                    "Voice session starting"
                );
                self.connection = Some(connection);
                self.endpoint_url = Some(endpoint);
                self.phase = SessionPhase::Connecting;
                Ok(StartOutcome::Connecting)
            }
            Err(err) => {
                error!(endpoint = %endpoint, error = %err, "Failed to start voice session");
                self.phase = SessionPhase::ConnectFailed;
                Err(err.into())
            }
        }
    }

    /// Stop everything and return to idle: microphone, transport, playback.
    pub fn end(&mut self) {
        if self.phase != SessionPhase::Idle {
            info!(session_id = ?self.session_id, metrics = ?self.metrics(), "Voice session ended");
        }
        self.teardown();
        self.phase = SessionPhase::Idle;
        self.mic_error = None;
        self.session_id = None;
        self.started_at = None;
        self.endpoint_url = None;
    }

    /// Push-to-talk toggle. Ignored while the AI is speaking.
    pub fn toggle_microphone(&mut self) -> Result<ToggleOutcome, SessionError> {
        if self.phase != SessionPhase::Ready {
            return Err(SessionError::NotConnected);
        }
        if self.playback.is_playing() {
            debug!("Microphone toggle ignored while AI is speaking");
            return Ok(ToggleOutcome::IgnoredWhileAiSpeaking);
        }

        if self.recording {
            self.stop_recording();
            if !self.config.always_listening {
                self.awaiting_reply = true;
            }
            Ok(ToggleOutcome::Stopped)
        } else {
            self.start_recording()?;
            Ok(ToggleOutcome::Started)
        }
    }

    /// Acquire the microphone. Failures are surfaced on the status line and not retried.
    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        if self.recording {
            return Ok(());
        }
        if self.phase != SessionPhase::Ready {
            return Err(SessionError::NotConnected);
        }

        match self.microphone.start(self.block_sink.clone()) {
            Ok(()) => {
                info!(session_id = ?self.session_id, "Recording started");
                self.recording = true;
                self.mic_error = None;
                self.awaiting_reply = false;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Microphone unavailable");
                self.mic_error = Some(capture_status(&err));
                Err(err.into())
            }
        }
    }

    pub fn stop_recording(&mut self) {
        if !self.recording {
            return;
        }
        self.microphone.stop();
        self.recording = false;
        self.user_speaking = false;
        info!(session_id = ?self.session_id, "Recording stopped");
    }

    /// Flush queued speech and stop the active node.
    pub fn interrupt(&mut self, source: InterruptionSource) -> StopSummary {
        let summary = self.playback.stop_all();
        if summary.is_noop() {
            return summary;
        }

        match source {
            InterruptionSource::LocalVoice => self.metrics.barge_ins_local += 1,
            InterruptionSource::Server => self.metrics.barge_ins_server += 1,
        }
        info!(
            source = source.as_str(),
            flushed = summary.flushed_chunks,
            stopped = ?summary.stopped_node,
            "Playback interrupted"
        );
        summary
    }

    /// One 16 kHz mono block from the microphone.
    ///
    /// Loud input while the AI is talking stops playback before the block is
    /// encoded and sent, so the overlap is at most one block long.
    pub fn on_captured_block(&mut self, block: Vec<f32>) {
        if !self.recording {
            self.metrics.blocks_ignored += 1;
            trace!("Ignoring block captured after recording stopped");
            return;
        }

        let (peak, speech) = self.vad.classify(&block);
        if speech {
            if !self.user_speaking {
                debug!(peak, "User started speaking");
            }
            self.user_speaking = true;
            if self.playback.is_playing() && self.config.interruption_mode.allows_local() {
                self.interrupt(InterruptionSource::LocalVoice);
            }
        } else {
            self.user_speaking = false;
        }

        let frame = match encode_audio_frame(&block, &mut self.scratch) {
            Ok(frame) => frame,
            Err(err) => {
                self.metrics.frames_dropped += 1;
                warn!(error = %err, "Failed to encode audio frame");
                return;
            }
        };

        match self.transport.send_text(frame) {
            Ok(()) => {
                self.metrics.frames_sent += 1;
                trace!(samples = block.len(), peak, "Audio frame sent");
            }
            Err(err) => {
                self.metrics.frames_dropped += 1;
                debug!(error = %err, "Dropping audio frame");
            }
        }
    }

    /// A playback node finished on its own; start the next chunk if there is one.
    pub fn on_playback_ended(&mut self, node: NodeId) {
        if self.playback.on_node_ended(node) && !self.playback.is_playing() {
            debug!("AI finished speaking");
        }
    }

    /// Lifecycle event from the transport. Events for any connection other than
    /// the current one are ignored.
    pub fn on_transport_event(&mut self, connection: ConnectionId, event: TransportEvent) {
        if self.connection != Some(connection) {
            trace!(connection = %connection, "Ignoring event from stale connection");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Message(frame) => self.on_message(&frame),
            TransportEvent::Error(message) => self.on_transport_error(&message),
            TransportEvent::Closed { code, reason, clean } => self.on_closed(code, &reason, clean),
        }
    }

    fn on_open(&mut self) {
        if self.phase != SessionPhase::Connecting {
            return;
        }
        self.phase = SessionPhase::Ready;
        info!(session_id = ?self.session_id, "Connected to voice backend");

        if self.config.always_listening {
            // Failure is already on the status line
            let _ = self.start_recording();
        }
    }

    fn on_message(&mut self, frame: &InboundFrame) {
        let events = match decode_frame(frame) {
            Ok(events) => events,
            Err(err) => {
                self.metrics.malformed_messages += 1;
                warn!(error = %err, bytes = frame.byte_len(), "Dropping malformed server message");
                return;
            }
        };

        if events.is_empty() && events.invalid_parts == 0 {
            trace!(skipped = events.skipped_parts, "Server message carried nothing for the session");
            return;
        }

        if events.invalid_parts > 0 {
            self.metrics.malformed_messages += events.invalid_parts as u64;
            warn!(parts = events.invalid_parts, "Dropping audio parts with invalid base64");
        }
        if events.skipped_parts > 0 {
            trace!(parts = events.skipped_parts, "Skipped non-audio parts");
        }

        if events.interrupted {
            if self.config.interruption_mode.allows_server() {
                self.interrupt(InterruptionSource::Server);
            } else {
                debug!("Server interruption ignored in local-only mode");
            }
        }

        for chunk in events.audio_chunks {
            self.metrics.chunks_received += 1;
            self.awaiting_reply = false;
            self.playback.enqueue(chunk);
        }

        if events.turn_complete {
            self.metrics.turns_completed += 1;
            self.awaiting_reply = false;
            debug!(queued = self.playback.queued(), "Model turn complete");
        }
    }

    fn on_transport_error(&mut self, message: &str) {
        self.phase = if self.phase == SessionPhase::Connecting {
            SessionPhase::ConnectFailed
        } else {
            SessionPhase::Failed
        };
        error!(session_id = ?self.session_id, error = %message, "Voice backend connection failed");
        self.teardown();
    }

    fn on_closed(&mut self, code: Option<u16>, reason: &str, clean: bool) {
        self.phase = if self.phase == SessionPhase::Connecting {
            SessionPhase::ConnectFailed
        } else {
            SessionPhase::Disconnected
        };
        info!(session_id = ?self.session_id, code = ?code, reason = %reason, clean, "Voice backend disconnected");
        self.teardown();
    }

    /// Release the microphone, playback and connection. Leaves `phase` alone.
    fn teardown(&mut self) {
        self.stop_recording();
        self.playback.stop_all();
        self.transport.close();
        self.connection = None;
        self.awaiting_reply = false;
        self.user_speaking = false;
    }

    pub fn status(&self) -> Status {
        match self.phase {
            SessionPhase::Idle => Status::ReadyToConnect,
            SessionPhase::Connecting => Status::Connecting,
            SessionPhase::Disconnected => Status::Disconnected,
            SessionPhase::ConnectFailed => Status::ConnectionFailed,
            SessionPhase::Failed => Status::Error,
            SessionPhase::Ready => {
                if self.playback.is_playing() {
                    Status::AiSpeaking
                } else if let Some(mic_status) = self.mic_error {
                    mic_status
                } else if self.recording {
                    Status::Listening
                } else if self.awaiting_reply {
                    Status::Processing
                } else if self.config.always_listening {
                    Status::ConnectedStartSpeaking
                } else {
                    Status::ReadyClickToTalk
                }
            }
        }
    }

    pub fn signals(&self) -> SessionSignals {
        SessionSignals::new(self.status(), self.playback.is_playing(), self.user_speaking)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            state: self.phase,
            endpoint_url: self.endpoint_url.clone(),
            signals: self.signals(),
            recording: self.recording,
            always_listening: self.config.always_listening,
            interruption_mode: self.config.interruption_mode,
            queued_chunks: self.playback.queued(),
            active_node: self.playback.active_node().map(|id| id.0),
            metrics: self.metrics(),
            started_at: self.started_at,
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InterruptionMode;
    use crate::testing::{IoEvent, IoLog, MockMicrophone, MockOutput, MockTransport};
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    use std::sync::Arc;

    const ENDPOINT: &str = "wss://voice.test/ws";

    fn new_session(config: SessionConfig) -> (VoiceSession, IoLog) {
        let log = IoLog::default();
        let io = SessionIo {
            transport: Box::new(MockTransport::new(log.clone())),
            microphone: Box::new(MockMicrophone::new(log.clone())),
            output: Box::new(MockOutput::new(log.clone())),
        };
        let sink: BlockSink = Arc::new(|_| {});
        let config = SessionConfig {
            endpoint_url: ENDPOINT.to_string(),
            ..config
        };
        (VoiceSession::new(config, io, sink), log)
    }

    fn open(session: &mut VoiceSession, log: &IoLog) -> ConnectionId {
        assert_eq!(session.start(None).unwrap(), StartOutcome::Connecting);
        let connection = session.connection().unwrap();
        log.set_transport_open(true);
        session.on_transport_event(connection, TransportEvent::Opened);
        connection
    }

    fn text(json: String) -> TransportEvent {
        TransportEvent::Message(InboundFrame::Text(json))
    }

    fn model_turn(chunks: &[&[u8]]) -> TransportEvent {
        let parts: Vec<String> = chunks
            .iter()
            .map(|c| format!(r#"{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}"#, B64.encode(c)))
            .collect();
        text(format!(r#"{{"serverContent":{{"modelTurn":{{"parts":[{}]}}}}}}"#, parts.join(",")))
    }

    fn block_with_peak(peak: f32) -> Vec<f32> {
        let mut block = vec![0.0; 4096];
        block[100] = peak;
        block
    }

    const CHUNK_A: &[u8] = &[0x00, 0x10, 0x00, 0x20];
    const CHUNK_B: &[u8] = &[0x00, 0x30, 0x00, 0x40, 0x00, 0x50];

    #[test]
    fn test_end_to_end_conversation() {
        let (mut session, log) = new_session(SessionConfig::default());
        assert_eq!(session.status().as_str(), "Ready to connect...");

        session.start(None).unwrap();
        assert_eq!(session.status().as_str(), "Connecting...");
        let connection = session.connection().unwrap();

        log.set_transport_open(true);
        session.on_transport_event(connection, TransportEvent::Opened);
        assert!(session.is_recording());
        assert_eq!(session.status().as_str(), "Listening...");

        session.on_transport_event(connection, model_turn(&[CHUNK_A, CHUNK_B]));
        assert_eq!(session.active_node(), Some(NodeId(1)));
        assert_eq!(session.queued_chunks(), 1);
        assert!(session.signals().ai_speaking);
        assert_eq!(session.status().as_str(), "AI Speaking...");

        session.on_transport_event(connection, text(r#"{"serverContent":{"interrupted":true}}"#.into()));
        assert_eq!(session.active_node(), None);
        assert_eq!(session.queued_chunks(), 0);
        assert_eq!(session.metrics().barge_ins_server, 1);

        session.end();
        assert_eq!(session.status().as_str(), "Ready to connect...");
        assert!(!session.is_recording());

        assert_eq!(
            log.events(),
            vec![
                IoEvent::Connect(ENDPOINT.to_string()),
                IoEvent::MicStarted,
                IoEvent::NodeStarted(NodeId(1), 2),
                IoEvent::NodeStopped(NodeId(1)),
                IoEvent::MicStopped,
                IoEvent::TransportClosed,
            ]
        );
    }

    #[test]
    fn test_loud_block_stops_playback_before_frame_is_sent() {
        let (mut session, log) = new_session(SessionConfig::default());
        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A, CHUNK_B]));
        log.clear();

        session.on_captured_block(block_with_peak(0.2));

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], IoEvent::NodeStopped(NodeId(1)));
        assert!(matches!(events[1], IoEvent::Send(_)));
        assert!(!session.is_ai_speaking());
        assert_eq!(session.queued_chunks(), 0);
        assert!(session.is_user_speaking());
        assert_eq!(session.metrics().barge_ins_local, 1);
    }

    #[test]
    fn test_quiet_block_does_not_interrupt() {
        let (mut session, log) = new_session(SessionConfig::default());
        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A, CHUNK_B]));
        log.clear();

        session.on_captured_block(block_with_peak(0.05));

        assert_eq!(log.count(|e| matches!(e, IoEvent::NodeStopped(_))), 0);
        assert_eq!(log.sent_frames().len(), 1);
        assert!(session.is_ai_speaking());
        assert_eq!(session.queued_chunks(), 1);
        assert!(!session.is_user_speaking());
    }

    #[test]
    fn test_sent_frame_carries_encoded_block() {
        let (mut session, log) = new_session(SessionConfig::default());
        open(&mut session, &log);

        session.on_captured_block(block_with_peak(-1.0));

        let frames = log.sent_frames();
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        let chunk = &value["realtime_input"]["media_chunks"][0];
        assert_eq!(chunk["mime_type"], "audio/pcm");
        let pcm = B64.decode(chunk["data"].as_str().unwrap()).unwrap();
        assert_eq!(pcm.len(), 4096 * 2);
        assert_eq!(&pcm[200..202], &[0x00, 0x80]);
        assert_eq!(session.metrics().frames_sent, 1);
    }

    #[test]
    fn test_server_only_mode_ignores_local_voice() {
        let config = SessionConfig {
            interruption_mode: InterruptionMode::ServerOnly,
            ..SessionConfig::default()
        };
        let (mut session, log) = new_session(config);
        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A]));

        session.on_captured_block(block_with_peak(0.9));
        assert!(session.is_ai_speaking());
        assert!(session.signals().user_speaking);

        session.on_transport_event(connection, text(r#"{"serverContent":{"interrupted":true}}"#.into()));
        assert!(!session.is_ai_speaking());
    }

    #[test]
    fn test_local_only_mode_ignores_server_interruption() {
        let config = SessionConfig {
            interruption_mode: InterruptionMode::LocalOnly,
            ..SessionConfig::default()
        };
        let (mut session, log) = new_session(config);
        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A]));

        session.on_transport_event(connection, text(r#"{"serverContent":{"interrupted":true}}"#.into()));
        assert!(session.is_ai_speaking());

        session.on_captured_block(block_with_peak(0.9));
        assert!(!session.is_ai_speaking());
    }

    #[test]
    fn test_malformed_messages_change_nothing() {
        let (mut session, log) = new_session(SessionConfig::default());
        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A, CHUNK_B]));
        log.clear();

        session.on_transport_event(connection, text("definitely not json".into()));
        session.on_transport_event(connection, text(r#"{"serverContent":"#.into()));
        session.on_transport_event(connection, TransportEvent::Message(InboundFrame::Binary(vec![0xC3, 0x28])));

        assert!(log.events().is_empty());
        assert_eq!(session.active_node(), Some(NodeId(1)));
        assert_eq!(session.queued_chunks(), 1);
        assert_eq!(session.metrics().malformed_messages, 3);
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[test]
    fn test_interrupt_and_new_audio_in_one_message() {
        let (mut session, log) = new_session(SessionConfig::default());
        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A, CHUNK_B]));

        let json = format!(
            r#"{{"serverContent":{{"interrupted":true,"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm","data":"{}"}}}}]}},"turnComplete":true}}}}"#,
            B64.encode(CHUNK_B)
        );
        session.on_transport_event(connection, text(json));

        assert_eq!(session.active_node(), Some(NodeId(2)));
        assert_eq!(session.queued_chunks(), 0);
        assert_eq!(log.samples_of(NodeId(2)), Some(3));
        assert_eq!(session.metrics().turns_completed, 1);
    }

    #[test]
    fn test_playback_chains_through_completions() {
        let (mut session, log) = new_session(SessionConfig::default());
        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A, CHUNK_B]));
        session.on_transport_event(connection, text(r#"{"serverContent":{"turnComplete":true}}"#.into()));

        // turnComplete does not cut the queue short
        assert_eq!(session.queued_chunks(), 1);

        session.on_playback_ended(NodeId(1));
        assert_eq!(session.active_node(), Some(NodeId(2)));

        // Late duplicate completion of the first node
        session.on_playback_ended(NodeId(1));
        assert_eq!(session.active_node(), Some(NodeId(2)));

        session.on_playback_ended(NodeId(2));
        assert!(!session.is_ai_speaking());
        assert_eq!(session.status().as_str(), "Listening...");
        assert_eq!(session.metrics().chunks_played, 2);
    }

    #[test]
    fn test_push_to_talk_flow() {
        let config = SessionConfig {
            always_listening: false,
            ..SessionConfig::default()
        };
        let (mut session, log) = new_session(config);
        let connection = open(&mut session, &log);
        assert!(!session.is_recording());
        assert_eq!(session.status().as_str(), "Ready. Click to Talk.");

        assert_eq!(session.toggle_microphone().unwrap(), ToggleOutcome::Started);
        assert_eq!(session.status().as_str(), "Listening...");

        assert_eq!(session.toggle_microphone().unwrap(), ToggleOutcome::Stopped);
        assert_eq!(session.status().as_str(), "Processing...");

        session.on_transport_event(connection, model_turn(&[CHUNK_A]));
        assert_eq!(session.status().as_str(), "AI Speaking...");
        assert_eq!(session.toggle_microphone().unwrap(), ToggleOutcome::IgnoredWhileAiSpeaking);

        session.on_playback_ended(NodeId(1));
        assert_eq!(session.status().as_str(), "Ready. Click to Talk.");
    }

    #[test]
    fn test_toggle_requires_connection() {
        let (mut session, _log) = new_session(SessionConfig::default());
        assert!(matches!(session.toggle_microphone(), Err(SessionError::NotConnected)));
    }

    #[test]
    fn test_blocks_after_stop_are_ignored() {
        let config = SessionConfig {
            always_listening: false,
            ..SessionConfig::default()
        };
        let (mut session, log) = new_session(config);
        open(&mut session, &log);
        session.toggle_microphone().unwrap();
        session.toggle_microphone().unwrap();

        session.on_captured_block(block_with_peak(0.5));
        assert!(log.sent_frames().is_empty());
        assert_eq!(session.metrics().blocks_ignored, 1);
    }

    #[test]
    fn test_microphone_denied_keeps_connection() {
        let (mut session, log) = new_session(SessionConfig::default());
        log.fail_microphone(CaptureError::PermissionDenied("user said no".into()));
        open(&mut session, &log);

        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(!session.is_recording());
        assert_eq!(session.status().as_str(), "Microphone access denied");
    }

    #[test]
    fn test_missing_microphone_status() {
        let (mut session, log) = new_session(SessionConfig::default());
        log.fail_microphone(CaptureError::DeviceUnavailable("none".into()));
        open(&mut session, &log);
        assert_eq!(session.status().as_str(), "No microphone found");
    }

    #[test]
    fn test_transport_error_tears_down() {
        let (mut session, log) = new_session(SessionConfig::default());
        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A, CHUNK_B]));

        session.on_transport_event(connection, TransportEvent::Error("reset by peer".into()));
        assert_eq!(session.status().as_str(), "Error");
        assert!(!session.is_recording());
        assert!(!session.is_ai_speaking());
        assert_eq!(session.queued_chunks(), 0);

        // The close that follows belongs to a connection the session already dropped
        session.on_transport_event(
            connection,
            TransportEvent::Closed { code: Some(1006), reason: String::new(), clean: false },
        );
        assert_eq!(session.status().as_str(), "Error");
    }

    #[test]
    fn test_connect_failure_and_remote_close() {
        let (mut session, log) = new_session(SessionConfig::default());
        session.start(None).unwrap();
        let connection = session.connection().unwrap();
        session.on_transport_event(connection, TransportEvent::Error("refused".into()));
        assert_eq!(session.status().as_str(), "Connection failed");

        // A failed session can be started again
        let connection = open(&mut session, &log);
        session.on_transport_event(
            connection,
            TransportEvent::Closed { code: Some(1000), reason: "bye".into(), clean: true },
        );
        assert_eq!(session.status().as_str(), "Disconnected");
        assert!(!session.is_recording());
    }

    #[test]
    fn test_invalid_endpoint_fails_start() {
        let (mut session, _log) = new_session(SessionConfig::default());
        assert!(session.start(Some("ftp://nope")).is_err());
        assert_eq!(session.status().as_str(), "Connection failed");
    }

    #[test]
    fn test_start_while_active_is_noop() {
        let (mut session, log) = new_session(SessionConfig::default());
        open(&mut session, &log);
        let first = session.snapshot().session_id;

        assert_eq!(session.start(Some("wss://other.test")).unwrap(), StartOutcome::AlreadyActive);
        assert_eq!(log.count(|e| matches!(e, IoEvent::Connect(_))), 1);
        assert_eq!(session.snapshot().session_id, first);
    }

    #[test]
    fn test_stale_connection_events_are_ignored() {
        let (mut session, log) = new_session(SessionConfig::default());
        let old = open(&mut session, &log);
        session.end();

        session.start(None).unwrap();
        session.on_transport_event(old, TransportEvent::Opened);
        session.on_transport_event(old, model_turn(&[CHUNK_A]));

        assert_eq!(session.phase(), SessionPhase::Connecting);
        assert!(!session.is_ai_speaking());
    }

    #[test]
    fn test_end_is_idempotent() {
        let (mut session, log) = new_session(SessionConfig::default());
        session.end();
        open(&mut session, &log);
        session.end();
        session.end();

        assert_eq!(log.count(|e| *e == IoEvent::TransportClosed), 1);
        assert_eq!(log.count(|e| *e == IoEvent::MicStopped), 1);
        assert_eq!(session.snapshot().session_id, None);
    }

    #[test]
    fn test_reconfigure_only_when_idle() {
        let (mut session, log) = new_session(SessionConfig::default());
        let quiet = SessionConfig {
            vad_threshold: 0.5,
            ..session.config().clone()
        };
        assert!(session.reconfigure(quiet.clone()));

        open(&mut session, &log);
        assert!(!session.reconfigure(SessionConfig::default()));
        assert_eq!(session.config().vad_threshold, 0.5);
    }

    #[test]
    fn test_reconfigured_playback_rate_reaches_output() {
        let (mut session, log) = new_session(SessionConfig::default());
        let slower = SessionConfig {
            playback_sample_rate: 16_000,
            ..session.config().clone()
        };
        assert!(session.reconfigure(slower));

        let connection = open(&mut session, &log);
        session.on_transport_event(connection, model_turn(&[CHUNK_A]));
        assert_eq!(log.last_sample_rate(), Some(16_000));
    }
}
