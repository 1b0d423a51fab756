//! UI-facing session signals: a status line and two activity flags.
//!
//! The session publishes these on a `tokio::sync::watch` channel; the control
//! surface renders them (HTTP snapshot, `/ws/signals` push). Presentation is
//! entirely the receiver's business.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Status line shown next to the talk button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    ReadyToConnect,
    Connecting,
    ConnectedStartSpeaking,
    ReadyClickToTalk,
    Processing,
    Listening,
    AiSpeaking,
    MicrophoneDenied,
    NoMicrophone,
    MicrophoneError,
    ConnectionFailed,
    Error,
    Disconnected,
}

impl Status {
    /// Text shown to the user.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::ReadyToConnect => "Ready to connect...",
            Status::Connecting => "Connecting...",
            Status::ConnectedStartSpeaking => "Connected! Start speaking...",
            Status::ReadyClickToTalk => "Ready. Click to Talk.",
            Status::Processing => "Processing...",
            Status::Listening => "Listening...",
            Status::AiSpeaking => "AI Speaking...",
            Status::MicrophoneDenied => "Microphone access denied",
            Status::NoMicrophone => "No microphone found",
            Status::MicrophoneError => "Microphone error",
            Status::ConnectionFailed => "Connection failed",
            Status::Error => "Error",
            Status::Disconnected => "Disconnected",
        }
    }
}

/// Snapshot of everything the UI renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSignals {
    pub status: String,
    pub status_code: Status,
    pub ai_speaking: bool,
    pub user_speaking: bool,
}

impl SessionSignals {
    pub fn new(status: Status, ai_speaking: bool, user_speaking: bool) -> Self {
        Self {
            status: status.as_str().to_string(),
            status_code: status,
            ai_speaking,
            user_speaking,
        }
    }
}

impl Default for SessionSignals {
    fn default() -> Self {
        Self::new(Status::ReadyToConnect, false, false)
    }
}

/// Create the signal channel, starting at the idle state.
pub fn signals_channel() -> (watch::Sender<SessionSignals>, watch::Receiver<SessionSignals>) {
    watch::channel(SessionSignals::default())
}

/// Publish `signals` if they differ from the current value. Returns whether
/// subscribers were notified.
pub fn publish(sender: &watch::Sender<SessionSignals>, signals: SessionSignals) -> bool {
    sender.send_if_modified(|current| {
        if *current == signals {
            false
        } else {
            *current = signals;
            true
        }
    })
}
