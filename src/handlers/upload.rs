use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpResponse};
use futures::StreamExt;
use log::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::handlers::{error_response, session_error};
use crate::models::response::DatasetResponse;
use crate::services::{DatasetProcessor, SessionStore};

/// Upload a CSV or spreadsheet and make it the session's dataset.
///
/// The previous dataset stays in place unless the new file parses completely.
pub async fn upload_dataset(
    session_id: web::Path<Uuid>,
    mut payload: Multipart,
    sessions: web::Data<SessionStore>,
    processor: web::Data<DatasetProcessor>,
    config: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    if !sessions.exists(session_id) {
        return Ok(session_error(crate::services::session::SessionError::NotFound(session_id)));
    }

    // Process the multipart form data
    let mut file_content = Vec::new();
    let mut filename = String::new();
    let mut sheet: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let content_disposition = field.content_disposition();
        let name = content_disposition.get_name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                // Get the original filename
                if let Some(fname) = content_disposition.get_filename() {
                    filename = fname.to_string();
                }

                // Read the file data
                while let Some(chunk) = field.next().await {
                    let data = chunk?;
                    if file_content.len() + data.len() > config.max_upload_bytes {
                        warn!("[Session-{}] 🚫 Upload exceeds {} bytes", session_id, config.max_upload_bytes);
                        return Ok(error_response(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            format!("File exceeds the {} byte upload limit", config.max_upload_bytes),
                        ));
                    }
                    file_content.extend_from_slice(&data);
                }
            }
            "sheet" => {
                let mut raw = Vec::new();
                while let Some(chunk) = field.next().await {
                    raw.extend_from_slice(&chunk?);
                }
                let value = String::from_utf8_lossy(&raw).trim().to_string();
                if !value.is_empty() {
                    sheet = Some(value);
                }
            }
            _ => {
                // Drain fields we don't use
                while let Some(chunk) = field.next().await {
                    chunk?;
                }
            }
        }
    }

    // Validate the file
    if filename.is_empty() {
        return Ok(error_response(StatusCode::BAD_REQUEST, "No file uploaded"));
    }

    info!(
        "[Session-{}] 📥 Received {} ({} bytes, sheet: {:?})",
        session_id,
        filename,
        file_content.len(),
        sheet
    );

    let processor = processor.get_ref().clone();
    let file_name = filename.clone();
    let loaded = web::block(move || processor.load(&file_name, &file_content, sheet.as_deref())).await?;

    let dataset = match loaded {
        Ok(dataset) => dataset,
        Err(e) => {
            error!("[Session-{}] ❌ Failed to load {}: {}", session_id, filename, e);
            return Ok(error_response(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    Ok(match sessions.replace_dataset(session_id, dataset) {
        Ok(dataset) => HttpResponse::Ok().json(DatasetResponse {
            session_id,
            dataset: dataset.metadata().clone(),
        }),
        Err(e) => session_error(e),
    })
}
