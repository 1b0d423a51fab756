//! # Voigen Voice Client
//!
//! Realtime voice session client: captures microphone audio, streams it to the
//! Voigen backend over a WebSocket, plays the synthesized speech that comes
//! back, and cuts that speech off when the user talks over it.
//!
//! ## Application Architecture:
//! - **Session actor** (`session/`): owns the one voice session and serialises
//!   every event that touches it
//! - **Transport** (`transport/`): WebSocket connection and wire codec
//! - **Audio** (`audio/`): capture pipeline, playback scheduler and devices
//! - **Control surface** (`handlers/`, `websocket.rs`, `health.rs`): local HTTP
//!   and WebSocket API for a UI to drive the session and render its signals
//!
//! ## Startup:
//! 1. Load `.env`, initialise tracing
//! 2. Load and validate configuration
//! 3. Launch the session actor with the configured audio devices
//! 4. Serve the control surface until Ctrl+C, then end the session

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod session;
mod state;
#[cfg(test)]
mod testing;
mod transport;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::audio::pcm::CAPTURE_SAMPLE_RATE;
use crate::audio::simulated::{SilentOutput, WavMicrophone};
use crate::audio::{AudioOutput, Microphone, NodeEndedNotifier};
use crate::config::{AppConfig, AudioSettings};
use crate::session::actor::{launch, EndSession, SessionNotifiers};
use crate::session::signals::signals_channel;
use crate::session::SessionIo;
use crate::state::AppState;
use crate::transport::ws::WsTransport;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voigen-voice-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        endpoint = %config.session.endpoint_url,
        mode = %config.session.interruption_mode,
        always_listening = config.session.always_listening,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let (signals_tx, signals_rx) = signals_channel();
    let audio_settings = config.audio.clone();
    let session = launch(
        config.to_session_config()?,
        move |notifiers| build_session_io(&audio_settings, notifiers),
        signals_tx,
    );

    let app_state = AppState::new(config.clone(), session.clone(), signals_rx);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(handlers::routes)
            .route("/ws/signals", web::get().to(websocket::signals_websocket))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Release the microphone and close the backend connection before exit
    if let Err(e) = session.send(EndSession).await {
        warn!("Session actor already gone at shutdown: {}", e);
    }

    info!("Client stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voigen_voice_client=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Pick the transport, microphone and output for the session actor.
fn build_session_io(audio: &AudioSettings, notifiers: SessionNotifiers) -> SessionIo {
    let microphone: Box<dyn Microphone> = match &audio.input_wav {
        Some(path) => {
            info!(path = %path, "Using WAV file as microphone input");
            Box::new(WavMicrophone::new(path, CAPTURE_SAMPLE_RATE, audio.block_size))
        }
        None => default_microphone(audio.block_size),
    };

    let output: Box<dyn AudioOutput> = match audio.output.as_str() {
        "silent" => Box::new(SilentOutput::new(notifiers.playback.clone())),
        _ => default_output(notifiers.playback.clone()),
    };

    SessionIo {
        transport: Box::new(WsTransport::new(notifiers.transport)),
        microphone,
        output,
    }
}

#[cfg(feature = "native-audio")]
fn default_microphone(block_size: usize) -> Box<dyn Microphone> {
    Box::new(audio::devices::CpalMicrophone::new(CAPTURE_SAMPLE_RATE, block_size))
}

#[cfg(not(feature = "native-audio"))]
fn default_microphone(_block_size: usize) -> Box<dyn Microphone> {
    warn!("Built without the native-audio feature; set audio.input_wav to supply input");
    Box::new(audio::simulated::NullMicrophone::new(
        "built without the native-audio feature",
    ))
}

#[cfg(feature = "native-audio")]
fn default_output(notify: NodeEndedNotifier) -> Box<dyn AudioOutput> {
    Box::new(audio::devices::RodioOutput::new(notify))
}

#[cfg(not(feature = "native-audio"))]
fn default_output(notify: NodeEndedNotifier) -> Box<dyn AudioOutput> {
    warn!("Built without the native-audio feature; AI speech will not be audible");
    Box::new(SilentOutput::new(notify))
}
