//! # Voice Session
//!
//! One realtime voice conversation with the backend: microphone frames out,
//! synthesized speech in, barge-in interruption in between.
//!
//! ## Key Components:
//! - **VoiceSession** (`voice.rs`): single-threaded state machine that owns the
//!   flags, the playback queue and the three I/O seams
//! - **SessionActor** (`actor.rs`): actix actor whose mailbox serialises the four
//!   event sources (mic blocks, transport events, playback completions, UI actions)
//! - **Signals** (`signals.rs`): status line and activity flags for the UI
//!
//! ## Session Lifecycle:
//! `Idle → Connecting → Ready → (Recording ⇄ AI speaking) → Disconnected | Failed`
//!
//! Recording and AI speaking are independent flags, not exclusive states: in
//! always-listening mode the microphone keeps streaming while the AI talks, which
//! is exactly what makes barge-in possible.

pub mod actor;
pub mod signals;
pub mod voice;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::audio::capture::VoiceActivityDetector;
use crate::audio::pcm::PLAYBACK_SAMPLE_RATE;
use crate::audio::CaptureError;
use crate::transport::TransportError;
use signals::SessionSignals;

pub use voice::{SessionIo, VoiceSession};

/// Which signals may cut off AI playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionMode {
    /// Server `interrupted` signals and local voice activity both interrupt
    #[default]
    Hybrid,
    /// Only the server interrupts; local VAD drives the user-speaking flag only
    ServerOnly,
    /// Only local VAD interrupts, for backends that never send `interrupted`
    LocalOnly,
}

impl InterruptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptionMode::Hybrid => "hybrid",
            InterruptionMode::ServerOnly => "server_only",
            InterruptionMode::LocalOnly => "local_only",
        }
    }

    pub fn allows_local(&self) -> bool {
        matches!(self, InterruptionMode::Hybrid | InterruptionMode::LocalOnly)
    }

    pub fn allows_server(&self) -> bool {
        matches!(self, InterruptionMode::Hybrid | InterruptionMode::ServerOnly)
    }
}

impl FromStr for InterruptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "hybrid" => Ok(InterruptionMode::Hybrid),
            "server_only" | "server" => Ok(InterruptionMode::ServerOnly),
            "local_only" | "local" => Ok(InterruptionMode::LocalOnly),
            other => Err(format!("Unknown interruption mode: {}", other)),
        }
    }
}

impl fmt::Display for InterruptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an interruption came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionSource {
    /// The user started talking over the AI
    LocalVoice,
    /// The backend reported `interrupted: true`
    Server,
}

impl InterruptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptionSource::LocalVoice => "local_voice",
            InterruptionSource::Server => "server",
        }
    }
}

/// Per-session behaviour knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Backend WebSocket endpoint (`ws://`, `wss://`; `http(s)://` is rewritten)
    pub endpoint_url: String,
    /// Start the microphone as soon as the connection opens. When false the
    /// session runs push-to-talk and waits for `toggle_microphone`.
    pub always_listening: bool,
    /// Peak amplitude above which a block counts as speech
    pub vad_threshold: f32,
    pub interruption_mode: InterruptionMode,
    /// Sample rate of inbound speech chunks
    pub playback_sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "wss://voigen-backend-1008374989342.asia-south1.run.app".to_string(),
            always_listening: true,
            vad_threshold: VoiceActivityDetector::DEFAULT_THRESHOLD,
            interruption_mode: InterruptionMode::Hybrid,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("no backend connection is open")]
    NotConnected,
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new connection is being opened
    Connecting,
    /// A session was already connecting or connected; nothing changed
    AlreadyActive,
}

/// Result of a push-to-talk toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    Started,
    Stopped,
    /// Toggling is ignored while the AI is speaking
    IgnoredWhileAiSpeaking,
}

/// Connection-level lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Ready,
    Disconnected,
    ConnectFailed,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Ready => "ready",
            SessionPhase::Disconnected => "disconnected",
            SessionPhase::ConnectFailed => "connect_failed",
            SessionPhase::Failed => "failed",
        }
    }

    /// Connecting or connected.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Connecting | SessionPhase::Ready)
    }
}

/// Counters for one session, reset on every start.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionMetrics {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub blocks_ignored: u64,
    pub chunks_received: u64,
    pub chunks_played: u64,
    pub chunks_flushed: u64,
    pub barge_ins_local: u64,
    pub barge_ins_server: u64,
    pub malformed_messages: u64,
    pub turns_completed: u64,
}

/// Everything the control surface reports about the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub state: SessionPhase,
    pub endpoint_url: Option<String>,
    pub signals: SessionSignals,
    pub recording: bool,
    pub always_listening: bool,
    pub interruption_mode: InterruptionMode,
    pub queued_chunks: usize,
    pub active_node: Option<u64>,
    pub metrics: SessionMetrics,
    pub started_at: Option<DateTime<Utc>>,
}
