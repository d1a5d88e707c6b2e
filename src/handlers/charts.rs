use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpResponse};
use log::{info, warn};
use uuid::Uuid;

use crate::handlers::{error_response, no_dataset, session_error};
use crate::models::response::{ChartRequest, ChartResponse};
use crate::services::charts::ChartSpec;
use crate::services::{SessionStore, Visualizer};

/// Render a chart directly, without going through chat
pub async fn create_chart(
    session_id: web::Path<Uuid>,
    body: web::Json<ChartRequest>,
    sessions: web::Data<SessionStore>,
    visualizer: web::Data<Visualizer>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    let dataset = match sessions.dataset(session_id) {
        Ok(Some(dataset)) => dataset,
        Ok(None) => return Ok(no_dataset(session_id)),
        Err(e) => return Ok(session_error(e)),
    };

    let spec = ChartSpec::from(body.into_inner());
    let chart = match visualizer.render(&dataset, &spec) {
        Ok(chart) => chart,
        Err(e) => {
            warn!("[Session-{}] 📉 Chart rejected: {}", session_id, e);
            return Ok(error_response(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    info!("[Session-{}] 📊 Rendered {} chart '{}'", session_id, spec.kind, chart.reference.title);
    let response = ChartResponse {
        session_id,
        chart: chart.reference.clone(),
        data_uri: chart.data_uri(),
    };
    Ok(match sessions.store_chart(session_id, chart) {
        Ok(()) => HttpResponse::Created().json(response),
        Err(e) => session_error(e),
    })
}

/// SVG body of a chart drawn earlier in this session
pub async fn get_chart(
    path: web::Path<(Uuid, Uuid)>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, Error> {
    let (session_id, chart_id) = path.into_inner();
    Ok(match sessions.chart(session_id, chart_id) {
        Ok(Some(chart)) => HttpResponse::Ok()
            .content_type("image/svg+xml")
            .body(chart.svg),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Chart {} not found", chart_id)),
        Err(e) => session_error(e),
    })
}
