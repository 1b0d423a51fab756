use crate::session::actor::Reconfigure;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

/// Partial update. Session settings and the playback rate reach the session
/// actor right away if it is idle, otherwise with the next start. The server
/// address and the audio devices are only read at launch.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let previous = state.get_config();
    let mut current_config = previous.clone();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    let session_config = current_config
        .to_session_config()
        .map_err(|e| AppError::ConfigError(e.to_string()))?;
    let applied_now = state.session.send(Reconfigure(session_config)).await?;

    let restart_required = previous.server.host != current_config.server.host
        || previous.server.port != current_config.server.port
        || previous.audio.block_size != current_config.audio.block_size
        || previous.audio.input_wav != current_config.audio.input_wav
        || previous.audio.output != current_config.audio.output;
    info!(applied_now, restart_required, "Configuration updated");

    let applies_to = if restart_required {
        "restart"
    } else if applied_now {
        "current_session"
    } else {
        "next_session"
    };

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "applies_to": applies_to,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": current_config
    })))
}
