//! # Backend Wire Protocol
//!
//! JSON framing for the realtime voice backend.
//!
//! ## Outbound (client → backend):
//! ```json
//! { "realtime_input": { "media_chunks": [ { "mime_type": "audio/pcm", "data": "<base64>" } ] } }
//! ```
//!
//! ## Inbound (backend → client), any subset of fields:
//! ```json
//! { "serverContent": {
//!     "interrupted": true,
//!     "modelTurn": { "parts": [ { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "<base64>" } } ] },
//!     "turnComplete": true } }
//! ```
//!
//! Unknown fields are ignored. Inbound frames may arrive as text or as binary
//! frames carrying UTF-8 JSON.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::audio::pcm::encode_pcm16_le;

/// Mime type attached to every outbound audio chunk.
pub const OUTBOUND_MIME_TYPE: &str = "audio/pcm";

/// Errors decoding an inbound frame. Each one drops a single message; the
/// session keeps running.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
struct RealtimeInput<'a> {
    media_chunks: [MediaChunk<'a>; 1],
}

#[derive(Debug, Serialize)]
struct MediaChunk<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    // `null` and `false` both mean "not set"
    #[serde(default)]
    interrupted: Option<bool>,
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

/// Everything the session needs from one inbound message.
///
/// The three signals are independent: one message may interrupt the previous
/// turn, carry the first audio of the next one and complete it.
#[derive(Debug, Default, PartialEq)]
pub struct ServerEvents {
    pub interrupted: bool,
    /// Raw 16-bit LE PCM chunks in part order
    pub audio_chunks: Vec<Vec<u8>>,
    pub turn_complete: bool,
    /// Parts skipped because they were not audio
    pub skipped_parts: usize,
    /// Audio parts whose payload was not valid base64
    pub invalid_parts: usize,
}

impl ServerEvents {
    pub fn is_empty(&self) -> bool {
        !self.interrupted && self.audio_chunks.is_empty() && !self.turn_complete
    }
}

/// One inbound WebSocket data frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl InboundFrame {
    /// Payload size in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            InboundFrame::Text(text) => text.len(),
            InboundFrame::Binary(bytes) => bytes.len(),
        }
    }
}

/// Encode one block of float samples as an outbound `realtime_input` message.
///
/// `scratch` holds the intermediate PCM bytes and is reused across calls.
pub fn encode_audio_frame(samples: &[f32], scratch: &mut Vec<u8>) -> Result<String, serde_json::Error> {
    encode_pcm16_le(samples, scratch);
    let data = B64.encode(scratch.as_slice());

    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [MediaChunk {
                mime_type: OUTBOUND_MIME_TYPE,
                data: &data,
            }],
        },
    };

    serde_json::to_string(&message)
}

/// Decode an inbound frame into the events it carries.
pub fn decode_frame(frame: &InboundFrame) -> Result<ServerEvents, ProtocolError> {
    let text = match frame {
        InboundFrame::Text(text) => text.as_str(),
        InboundFrame::Binary(bytes) => std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?,
    };
    parse_server_message(text)
}

/// Parse the JSON text of an inbound message.
pub fn parse_server_message(text: &str) -> Result<ServerEvents, ProtocolError> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut events = ServerEvents::default();

    let Some(content) = message.server_content else {
        return Ok(events);
    };

    events.interrupted = content.interrupted.unwrap_or(false);
    events.turn_complete = content.turn_complete.unwrap_or(false);

    let parts = content.model_turn.and_then(|turn| turn.parts).unwrap_or_default();
    for part in parts {
        let Some(inline) = part.inline_data else {
            // Text or other non-inline parts
            events.skipped_parts += 1;
            continue;
        };

        let mime_type = inline.mime_type.unwrap_or_default();
        if !mime_type.starts_with("audio/") {
            debug!(mime_type = %mime_type, "Skipping non-audio part");
            events.skipped_parts += 1;
            continue;
        }

        match B64.decode(inline.data.unwrap_or_default().as_bytes()) {
            Ok(bytes) => events.audio_chunks.push(bytes),
            Err(err) => {
                debug!(error = %err, "Audio part is not valid base64");
                events.invalid_parts += 1;
            }
        }
    }

    Ok(events)
}
