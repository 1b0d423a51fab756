use crate::error::{AppError, AppResult};
use crate::session::actor::{EndSession, GetSnapshot, StartSession, ToggleMicrophone};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Optional body for `POST /api/v1/session/start`.
#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Overrides the configured endpoint for this session only
    pub endpoint_url: Option<String>,
}

pub async fn start_session(
    state: web::Data<AppState>,
    body: Option<web::Json<StartSessionRequest>>,
) -> AppResult<HttpResponse> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let session_config = state
        .get_config()
        .to_session_config()
        .map_err(|e| AppError::ConfigError(e.to_string()))?;

    info!(endpoint_override = ?request.endpoint_url, "Session start requested");
    let snapshot = state
        .session
        .send(StartSession {
            endpoint_url: request.endpoint_url,
            config: Some(session_config),
        })
        .await??;

    Ok(HttpResponse::Ok().json(snapshot))
}

pub async fn end_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let snapshot = state.session.send(EndSession).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

pub async fn toggle_microphone(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let (outcome, snapshot) = state.session.send(ToggleMicrophone).await??;
    Ok(HttpResponse::Ok().json(json!({
        "outcome": outcome,
        "session": snapshot
    })))
}

pub async fn get_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let snapshot = state.session.send(GetSnapshot).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}
