use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpResponse};
use log::{error, info};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::Config;
use crate::handlers::{error_response, no_dataset, session_error};
use crate::models::response::{CorrelationResponse, DatasetResponse, OutlierResponse, PreviewResponse};
use crate::services::analytics::{correlation_matrix, detect_outliers, OutlierMethod};
use crate::services::SessionStore;

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct OutlierQuery {
    #[serde(default)]
    pub method: OutlierMethod,
    /// Limit the report to one column
    pub column: Option<String>,
}

/// Metadata for the session's current dataset
pub async fn get_dataset(
    session_id: web::Path<Uuid>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    Ok(match sessions.dataset(session_id) {
        Ok(Some(dataset)) => HttpResponse::Ok().json(DatasetResponse {
            session_id,
            dataset: dataset.metadata().clone(),
        }),
        Ok(None) => no_dataset(session_id),
        Err(e) => session_error(e),
    })
}

/// Drop the dataset; chat history is kept
pub async fn reset_dataset(
    session_id: web::Path<Uuid>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    Ok(match sessions.reset_dataset(session_id.into_inner()) {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => session_error(e),
    })
}

/// First rows of the dataset as JSON records
pub async fn preview_dataset(
    session_id: web::Path<Uuid>,
    query: web::Query<PreviewQuery>,
    sessions: web::Data<SessionStore>,
    config: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    let dataset = match sessions.dataset(session_id) {
        Ok(Some(dataset)) => dataset,
        Ok(None) => return Ok(no_dataset(session_id)),
        Err(e) => return Ok(session_error(e)),
    };

    let rows = query.rows.unwrap_or(config.preview_rows);
    Ok(match dataset.preview(rows) {
        Ok(rows) => HttpResponse::Ok().json(PreviewResponse { session_id, rows }),
        Err(e) => {
            error!("[Session-{}] ❌ Failed to build preview: {}", session_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to build preview: {}", e))
        }
    })
}

/// Correlation matrix across every numeric column
pub async fn dataset_correlations(
    session_id: web::Path<Uuid>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    let dataset = match sessions.dataset(session_id) {
        Ok(Some(dataset)) => dataset,
        Ok(None) => return Ok(no_dataset(session_id)),
        Err(e) => return Ok(session_error(e)),
    };

    let meta = dataset.metadata();
    let columns: Vec<String> = meta.numeric_columns().iter().map(|c| c.to_string()).collect();
    let matrix = correlation_matrix(meta, &columns);

    info!(
        "[Session-{}] 🔗 Correlation matrix over {} columns",
        session_id,
        columns.len()
    );
    Ok(HttpResponse::Ok().json(CorrelationResponse {
        session_id,
        columns,
        matrix,
        pairs: meta.correlations.clone(),
    }))
}

/// Outlier report for numeric columns
pub async fn dataset_outliers(
    session_id: web::Path<Uuid>,
    query: web::Query<OutlierQuery>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    let dataset = match sessions.dataset(session_id) {
        Ok(Some(dataset)) => dataset,
        Ok(None) => return Ok(no_dataset(session_id)),
        Err(e) => return Ok(session_error(e)),
    };

    let numeric = dataset.metadata().numeric_columns();
    let columns: Vec<&str> = match &query.column {
        Some(column) if numeric.contains(&column.as_str()) => vec![column.as_str()],
        Some(column) => {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                format!("'{}' is not a numeric column", column),
            ))
        }
        None => numeric,
    };

    let mut report = Vec::new();
    for column in columns {
        let values = match dataset.numeric_values(column) {
            Ok(values) => values,
            Err(e) => return Ok(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        };
        if let Some(outliers) = detect_outliers(column, &values, query.method) {
            report.push(outliers);
        }
    }

    info!(
        "[Session-{}] 🔎 Outlier report ({:?}) over {} columns",
        session_id,
        query.method,
        report.len()
    );
    Ok(HttpResponse::Ok().json(OutlierResponse {
        session_id,
        method: query.method,
        columns: report,
    }))
}
