//! # Application State
//!
//! Shared state handed to every request handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the current configuration; edits apply to the next session
//! - **session**: address of the session actor, the only owner of session state
//! - **signals**: receiver for the UI signals the actor publishes
//!
//! Handlers never touch the session directly. They send it messages and await
//! the reply, so all session changes go through the actor's mailbox.

use actix::Addr;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::watch;

use crate::config::AppConfig;
use crate::session::actor::SessionActor;
use crate::session::signals::SessionSignals;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,

    pub session: Addr<SessionActor>,

    pub signals: watch::Receiver<SessionSignals>,

    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, session: Addr<SessionActor>, signals: watch::Receiver<SessionSignals>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            session,
            signals,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        // A poisoned lock still holds a validated config
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the configuration if it validates.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        match self.config.write() {
            Ok(mut config) => *config = new_config,
            Err(poisoned) => *poisoned.into_inner() = new_config,
        }
        Ok(())
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
