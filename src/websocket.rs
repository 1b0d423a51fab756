//! # Session Signals WebSocket
//!
//! `/ws/signals` pushes the session's UI signals to a browser or other front
//! end and accepts the same controls as the HTTP routes.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the current signals are sent immediately
//! 2. **Updates**: every change is pushed as `{"type":"signals", ...}`
//! 3. **Controls**: the client may send `start_session`, `end_session` and
//!    `toggle_microphone`; each is answered with a `session` snapshot or an
//!    `error`
//! 4. **Heartbeat**: WebSocket ping every 30 s; no traffic for 60 s closes the
//!    connection
//!
//! The socket only observes and controls the shared session actor. Closing it
//! does not end the voice session.

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::session::actor::{EndSession, StartSession, ToggleMicrophone};
use crate::session::signals::SessionSignals;
use crate::session::{SessionSnapshot, ToggleOutcome};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartSession {
        #[serde(default)]
        endpoint_url: Option<String>,
    },
    EndSession,
    ToggleMicrophone,
}

/// Messages to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Signals {
        #[serde(flatten)]
        signals: SessionSignals,
    },
    Session {
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<ToggleOutcome>,
        session: SessionSnapshot,
    },
    Error {
        code: String,
        message: String,
    },
}

pub struct SignalsWebSocket {
    state: AppState,
    last_heartbeat: Instant,
}

impl SignalsWebSocket {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => warn!(error = %err, "Failed to serialize signals message"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: String) {
        self.send(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message,
            },
        );
    }

    fn handle_client_message(&mut self, message: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let session = self.state.session.clone();

        match message {
            ClientMessage::StartSession { endpoint_url } => {
                let config = match self.state.get_config().to_session_config() {
                    Ok(config) => config,
                    Err(err) => {
                        self.send_error(ctx, "config_error", err.to_string());
                        return;
                    }
                };
                let request = async move {
                    let snapshot = session
                        .send(StartSession {
                            endpoint_url,
                            config: Some(config),
                        })
                        .await??;
                    Ok::<_, AppError>((None, snapshot))
                };
                self.reply_with(request, ctx);
            }
            ClientMessage::EndSession => {
                let request = async move {
                    let snapshot = session.send(EndSession).await?;
                    Ok::<_, AppError>((None, snapshot))
                };
                self.reply_with(request, ctx);
            }
            ClientMessage::ToggleMicrophone => {
                let request = async move {
                    let (outcome, snapshot) = session.send(ToggleMicrophone).await??;
                    Ok::<_, AppError>((Some(outcome), snapshot))
                };
                self.reply_with(request, ctx);
            }
        }
    }

    /// Run a session request and answer with its snapshot or error.
    fn reply_with<F>(&mut self, request: F, ctx: &mut ws::WebsocketContext<Self>)
    where
        F: std::future::Future<Output = Result<(Option<ToggleOutcome>, SessionSnapshot), AppError>> + 'static,
    {
        ctx.spawn(request.into_actor(self).map(|result, act, ctx| match result {
            Ok((outcome, session)) => act.send(ctx, &ServerMessage::Session { outcome, session }),
            Err(err) => act.send_error(ctx, "session_error", err.to_string()),
        }));
    }
}

impl Actor for SignalsWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Signals WebSocket connected");

        ctx.add_stream(WatchStream::new(self.state.signals.clone()));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Signals WebSocket heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Signals WebSocket disconnected");
    }
}

impl StreamHandler<SessionSignals> for SignalsWebSocket {
    fn handle(&mut self, signals: SessionSignals, ctx: &mut Self::Context) {
        self.send(ctx, &ServerMessage::Signals { signals });
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!("Signals channel closed");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SignalsWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => self.handle_client_message(message, ctx),
                    Err(err) => {
                        debug!(error = %err, "Unrecognised signals client message");
                        self.send_error(ctx, "invalid_message", err.to_string());
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "unsupported", "Binary messages are not accepted".to_string());
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(error = %err, "Signals WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// `GET /ws/signals`
pub async fn signals_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    ws::start(SignalsWebSocket::new(state.get_ref().clone()), &req, stream)
}
