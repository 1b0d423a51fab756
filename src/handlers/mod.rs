//! HTTP handlers for the control surface.
//!
//! All routes live under `/api/v1`; `routes` registers them so `main.rs` and
//! the handler tests build the same app.

pub mod config;
pub mod session;

pub use self::config::*;
pub use self::session::*;

use actix_web::web;

use crate::health;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/session", web::get().to(get_session))
            .route("/session/start", web::post().to(start_session))
            .route("/session/end", web::post().to(end_session))
            .route("/session/microphone", web::post().to(toggle_microphone))
            .route("/config", web::get().to(get_config))
            .route("/config", web::put().to(update_config)),
    )
    .route("/health", web::get().to(health::health_check));
}
