pub mod charts;
pub mod conversation;
pub mod dataset;
pub mod session;
pub mod upload;

pub use charts::*;
pub use conversation::*;
pub use dataset::*;
pub use session::*;
pub use upload::*;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use uuid::Uuid;

use crate::models::response::ErrorResponse;
use crate::services::session::SessionError;

pub(crate) fn error_response(status: StatusCode, error: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error.into(),
        status_code: status.as_u16(),
    })
}

pub(crate) fn session_error(e: SessionError) -> HttpResponse {
    match e {
        SessionError::NotFound(_) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        SessionError::Busy(_) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

pub(crate) fn no_dataset(session_id: Uuid) -> HttpResponse {
    error_response(
        StatusCode::NOT_FOUND,
        format!("No dataset loaded for session {}", session_id),
    )
}
