use crate::error::AppResult;
use crate::session::actor::GetSnapshot;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness plus a summary of the current voice session.
pub async fn health_check(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let snapshot = state.session.send(GetSnapshot).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "voigen-voice-client",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "session": {
            "state": snapshot.state.as_str(),
            "status": snapshot.signals.status,
            "ai_speaking": snapshot.signals.ai_speaking,
            "recording": snapshot.recording,
            "endpoint_url": snapshot.endpoint_url.unwrap_or(config.session.endpoint_url),
            "interruption_mode": snapshot.interruption_mode.as_str()
        },
        "audio": {
            "input": config.audio.input_wav.as_deref().map(|_| "wav").unwrap_or("device"),
            "output": config.audio.output,
            "native_audio": cfg!(feature = "native-audio")
        }
    })))
}
