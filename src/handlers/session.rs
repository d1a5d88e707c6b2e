use actix_web::{web, Error, HttpResponse};
use log::info;
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::handlers::session_error;
use crate::models::response::{ApiKeyRequest, CreateSessionRequest, SessionResponse};
use crate::services::SessionStore;

/// Liveness check
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Create a chat session. Without a key in the body the server default is used.
pub async fn create_session(
    body: Option<web::Json<CreateSessionRequest>>,
    sessions: web::Data<SessionStore>,
    config: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let api_key = body
        .and_then(|b| b.into_inner().api_key)
        .filter(|k| !k.trim().is_empty())
        .or_else(|| config.default_api_key.clone());

    let session_id = sessions.create(api_key);
    Ok(match describe(&sessions, session_id) {
        Ok(response) => HttpResponse::Created().json(response),
        Err(e) => session_error(e),
    })
}

pub async fn get_session(
    session_id: web::Path<Uuid>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    Ok(match describe(&sessions, session_id.into_inner()) {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => session_error(e),
    })
}

/// Replace the session's model API key
pub async fn set_api_key(
    session_id: web::Path<Uuid>,
    body: web::Json<ApiKeyRequest>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    info!("[Session-{}] Updating API key", session_id);

    let result = sessions
        .set_api_key(session_id, body.into_inner().api_key)
        .and_then(|_| describe(&sessions, session_id));
    Ok(match result {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => session_error(e),
    })
}

fn describe(
    sessions: &SessionStore,
    session_id: Uuid,
) -> Result<SessionResponse, crate::services::session::SessionError> {
    sessions.with_session(session_id, |s| SessionResponse {
        session_id,
        has_api_key: s.api_key.is_some(),
        has_dataset: s.dataset.is_some(),
        turn_count: s.turns.len(),
    })
}
