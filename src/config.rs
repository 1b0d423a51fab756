//! # Configuration Management
//!
//! Loads the client configuration from layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` (or any format the `config` crate recognises)
//! - Environment variables with the `APP_` prefix and `__` between levels
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT` and `VOIGEN_BACKEND_URL` (deployment platforms set these)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_SESSION__VAD_THRESHOLD`, ...)
//! 3. Configuration file (`config.toml`)
//! 4. Default values
//!
//! ## Rust Concepts Used:
//! - **Serde derives**: the same structs round-trip through TOML, env and JSON
//! - **Builder pattern**: `config::Config::builder()` chains the sources
//! - **Partial updates**: `update_from_json` applies only the fields present
//!
//! Session settings are read when a session starts; audio device settings are
//! read once at launch.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::session::{InterruptionMode, SessionConfig};
use crate::transport::normalize_endpoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionSettings,
    pub audio: AudioSettings,
}

/// Control surface bind address.
///
/// - `host = "127.0.0.1"`: local UI only
/// - `host = "0.0.0.0"`: reachable from other machines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Behaviour of the next voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Backend WebSocket endpoint. `http(s)://` is accepted and rewritten.
    pub endpoint_url: String,
    /// `true`: microphone opens with the connection. `false`: push-to-talk.
    pub always_listening: bool,
    /// Peak amplitude (0, 1] above which a captured block counts as speech
    pub vad_threshold: f32,
    /// `hybrid`, `server_only` or `local_only`
    pub interruption_mode: String,
}

/// Audio devices, chosen at launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Samples per outbound frame at 16 kHz
    pub block_size: usize,
    /// Sample rate of the backend's speech
    pub playback_sample_rate: u32,
    /// Stream this WAV file instead of opening a microphone
    pub input_wav: Option<String>,
    /// `device` (speakers, needs the `native-audio` feature) or `silent`
    pub output: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            session: SessionSettings {
                endpoint_url: session.endpoint_url,
                always_listening: session.always_listening,
                vad_threshold: session.vad_threshold,
                interruption_mode: session.interruption_mode.to_string(),
            },
            audio: AudioSettings {
                block_size: crate::audio::pcm::FRAME_SAMPLES,
                playback_sample_rate: session.playback_sample_rate,
                input_wav: None,
                output: "device".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`
    /// - `APP_SESSION__ALWAYS_LISTENING=false`
    /// - `APP_SESSION__INTERRUPTION_MODE=server_only`
    /// - `APP_AUDIO__INPUT_WAV=./fixtures/hello.wav`
    /// - `VOIGEN_BACKEND_URL=wss://voice.example.com`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // "__" between levels so keys like vad_threshold keep their underscores
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(endpoint) = env::var("VOIGEN_BACKEND_URL") {
            settings = settings.set_override("session.endpoint_url", endpoint)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the values make sense before anything is started with them.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        normalize_endpoint(&self.session.endpoint_url)
            .map_err(|_| anyhow!("Endpoint must be a ws://, wss://, http:// or https:// URL: {}", self.session.endpoint_url))?;

        if !(self.session.vad_threshold > 0.0 && self.session.vad_threshold <= 1.0) {
            return Err(anyhow!("VAD threshold must be in (0, 1], got {}", self.session.vad_threshold));
        }

        self.interruption_mode()?;

        if self.audio.block_size == 0 {
            return Err(anyhow!("Audio block size must be greater than 0"));
        }

        if self.audio.playback_sample_rate == 0 {
            return Err(anyhow!("Playback sample rate must be greater than 0"));
        }

        match self.audio.output.as_str() {
            "device" | "silent" => {}
            other => return Err(anyhow!("Audio output must be \"device\" or \"silent\", got \"{}\"", other)),
        }

        Ok(())
    }

    pub fn interruption_mode(&self) -> Result<InterruptionMode> {
        self.session.interruption_mode.parse().map_err(|e: String| anyhow!(e))
    }

    /// Session settings in the form the session consumes.
    pub fn to_session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            endpoint_url: normalize_endpoint(&self.session.endpoint_url)?,
            always_listening: self.session.always_listening,
            vad_threshold: self.session.vad_threshold,
            interruption_mode: self.interruption_mode()?,
            playback_sample_rate: self.audio.playback_sample_rate,
        })
    }

    /// Apply a partial JSON update, e.g. `{"session": {"always_listening": false}}`.
    ///
    /// The update is validated as a whole; on error nothing changes.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;
        let mut updated = self.clone();

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                updated.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                updated.server.port = u16::try_from(port).map_err(|_| anyhow!("Port out of range: {}", port))?;
            }
        }

        if let Some(session) = partial.get("session") {
            if let Some(url) = session.get("endpoint_url").and_then(|v| v.as_str()) {
                updated.session.endpoint_url = url.to_string();
            }
            if let Some(always) = session.get("always_listening").and_then(|v| v.as_bool()) {
                updated.session.always_listening = always;
            }
            if let Some(threshold) = session.get("vad_threshold").and_then(|v| v.as_f64()) {
                updated.session.vad_threshold = threshold as f32;
            }
            if let Some(mode) = session.get("interruption_mode").and_then(|v| v.as_str()) {
                updated.session.interruption_mode = mode.to_string();
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(block_size) = audio.get("block_size").and_then(|v| v.as_u64()) {
                updated.audio.block_size = block_size as usize;
            }
            if let Some(rate) = audio.get("playback_sample_rate").and_then(|v| v.as_u64()) {
                updated.audio.playback_sample_rate = rate as u32;
            }
            match audio.get("input_wav") {
                Some(serde_json::Value::Null) => updated.audio.input_wav = None,
                Some(serde_json::Value::String(path)) => updated.audio.input_wav = Some(path.clone()),
                _ => {}
            }
            if let Some(output) = audio.get("output").and_then(|v| v.as_str()) {
                updated.audio.output = output.to_string();
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
