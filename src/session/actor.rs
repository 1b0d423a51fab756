//! # Session Actor
//!
//! Wraps `VoiceSession` in an actix actor. The actor's mailbox is the session's
//! only scheduler: microphone blocks, transport events, playback completions and
//! control requests all arrive as messages and are handled one at a time, so the
//! session never sees two events at once.
//!
//! The audio and network backends run on their own threads or tasks. They are
//! built with `SessionNotifiers`, plain callbacks that forward into the mailbox
//! with `do_send`, and never touch session state directly.

use actix::prelude::*;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use super::signals::{publish, SessionSignals};
use super::{SessionConfig, SessionError, SessionIo, SessionSnapshot, ToggleOutcome, VoiceSession};
use crate::audio::{BlockSink, NodeEndedNotifier, NodeId};
use crate::transport::{ConnectionId, TransportEvent, TransportNotifier};

/// Callbacks the I/O backends use to reach the actor.
#[derive(Clone)]
pub struct SessionNotifiers {
    pub blocks: BlockSink,
    pub transport: TransportNotifier,
    pub playback: NodeEndedNotifier,
}

impl SessionNotifiers {
    fn for_actor(addr: Addr<SessionActor>) -> Self {
        let blocks_addr = addr.clone();
        let transport_addr = addr.clone();
        Self {
            blocks: Arc::new(move |block| blocks_addr.do_send(CapturedBlock(block))),
            transport: Arc::new(move |connection, event| {
                transport_addr.do_send(TransportNotice { connection, event })
            }),
            playback: Arc::new(move |node| addr.do_send(PlaybackEnded(node))),
        }
    }
}

pub struct SessionActor {
    session: VoiceSession,
    signals: watch::Sender<SessionSignals>,
}

impl SessionActor {
    fn publish(&self) {
        publish(&self.signals, self.session.signals());
    }
}

/// Start the session actor on the current arbiter.
///
/// `build_io` receives the notifiers bound to the new actor and returns the
/// transport, microphone and output the session will drive.
pub fn launch<F>(config: SessionConfig, build_io: F, signals: watch::Sender<SessionSignals>) -> Addr<SessionActor>
where
    F: FnOnce(SessionNotifiers) -> SessionIo,
{
    SessionActor::create(move |ctx| {
        let notifiers = SessionNotifiers::for_actor(ctx.address());
        let blocks = notifiers.blocks.clone();
        let io = build_io(notifiers);
        SessionActor {
            session: VoiceSession::new(config, io, blocks),
            signals,
        }
    })
}

impl Actor for SessionActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!(endpoint = %self.session.config().endpoint_url, "Session actor started");
        self.publish();
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.end();
        self.publish();
        info!("Session actor stopped");
    }
}

/// One assembled microphone block.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CapturedBlock(pub Vec<f32>);

/// Lifecycle event from a transport connection.
#[derive(Message)]
#[rtype(result = "()")]
pub struct TransportNotice {
    pub connection: ConnectionId,
    pub event: TransportEvent,
}

/// A playback node finished on its own.
#[derive(Message)]
#[rtype(result = "()")]
pub struct PlaybackEnded(pub NodeId);

/// Start a session, optionally with an endpoint override and new settings.
#[derive(Message)]
#[rtype(result = "Result<SessionSnapshot, SessionError>")]
pub struct StartSession {
    pub endpoint_url: Option<String>,
    pub config: Option<SessionConfig>,
}

#[derive(Message)]
#[rtype(result = "SessionSnapshot")]
pub struct EndSession;

#[derive(Message)]
#[rtype(result = "Result<(ToggleOutcome, SessionSnapshot), SessionError>")]
pub struct ToggleMicrophone;

#[derive(Message)]
#[rtype(result = "SessionSnapshot")]
pub struct GetSnapshot;

/// Apply settings for the next session. Returns false while a session is active.
#[derive(Message)]
#[rtype(result = "bool")]
pub struct Reconfigure(pub SessionConfig);

impl Handler<CapturedBlock> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: CapturedBlock, _ctx: &mut Self::Context) {
        self.session.on_captured_block(msg.0);
        self.publish();
    }
}

impl Handler<TransportNotice> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: TransportNotice, _ctx: &mut Self::Context) {
        self.session.on_transport_event(msg.connection, msg.event);
        self.publish();
    }
}

impl Handler<PlaybackEnded> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: PlaybackEnded, _ctx: &mut Self::Context) {
        self.session.on_playback_ended(msg.0);
        self.publish();
    }
}

impl Handler<StartSession> for SessionActor {
    type Result = Result<SessionSnapshot, SessionError>;

    fn handle(&mut self, msg: StartSession, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(config) = msg.config {
            if !self.session.reconfigure(config) {
                debug!("Session active, keeping current settings");
            }
        }
        let result = self.session.start(msg.endpoint_url.as_deref());
        self.publish();
        result.map(|_| self.session.snapshot())
    }
}

impl Handler<EndSession> for SessionActor {
    type Result = MessageResult<EndSession>;

    fn handle(&mut self, _msg: EndSession, _ctx: &mut Self::Context) -> Self::Result {
        self.session.end();
        self.publish();
        MessageResult(self.session.snapshot())
    }
}

impl Handler<ToggleMicrophone> for SessionActor {
    type Result = Result<(ToggleOutcome, SessionSnapshot), SessionError>;

    fn handle(&mut self, _msg: ToggleMicrophone, _ctx: &mut Self::Context) -> Self::Result {
        let result = self.session.toggle_microphone();
        self.publish();
        result.map(|outcome| (outcome, self.session.snapshot()))
    }
}

impl Handler<GetSnapshot> for SessionActor {
    type Result = MessageResult<GetSnapshot>;

    fn handle(&mut self, _msg: GetSnapshot, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.session.snapshot())
    }
}

impl Handler<Reconfigure> for SessionActor {
    type Result = bool;

    fn handle(&mut self, msg: Reconfigure, _ctx: &mut Self::Context) -> bool {
        self.session.reconfigure(msg.0)
    }
}
