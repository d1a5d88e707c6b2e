use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpResponse};
use log::info;
use uuid::Uuid;

use crate::handlers::{error_response, session_error};
use crate::models::chat::{HistoryResponse, MessageRequest, MessageResponse};
use crate::services::{ConversationService, ModelClient, SessionStore};

/// Ask a question about the session's dataset
pub async fn post_message<C: ModelClient>(
    session_id: web::Path<Uuid>,
    body: web::Json<MessageRequest>,
    conversation_service: web::Data<ConversationService<C>>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    let message = body.into_inner().message;
    if message.trim().is_empty() {
        return Ok(error_response(StatusCode::BAD_REQUEST, "Message must not be empty"));
    }

    Ok(match conversation_service.ask(session_id, message.trim()).await {
        Ok(outcome) => HttpResponse::Ok().json(MessageResponse {
            session_id,
            turn: outcome.turn,
            attempts: outcome.attempts,
        }),
        Err(e) => session_error(e),
    })
}

/// Full chat history, oldest first
pub async fn get_messages(
    session_id: web::Path<Uuid>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    Ok(match sessions.turns(session_id) {
        Ok(turns) => HttpResponse::Ok().json(HistoryResponse { session_id, turns }),
        Err(e) => session_error(e),
    })
}

pub async fn clear_messages(
    session_id: web::Path<Uuid>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    Ok(match sessions.clear_turns(session_id) {
        Ok(cleared) => {
            info!("[Session-{}] History cleared ({} turns)", session_id, cleared);
            HttpResponse::NoContent().finish()
        }
        Err(e) => session_error(e),
    })
}
