pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

use actix_web::web;

use crate::services::ModelClient;

/// Register every route. App data (`SessionStore`, `ConversationService<C>`,
/// `DatasetProcessor`, `Visualizer`, `Config`) is supplied by the caller.
pub fn configure_routes<C: ModelClient>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(web::resource("/sessions").route(web::post().to(handlers::create_session)))
        .service(web::resource("/sessions/{session_id}").route(web::get().to(handlers::get_session)))
        .service(
            web::resource("/sessions/{session_id}/api-key").route(web::put().to(handlers::set_api_key)),
        )
        .service(
            web::resource("/sessions/{session_id}/upload").route(web::post().to(handlers::upload_dataset)),
        )
        .service(
            web::resource("/sessions/{session_id}/dataset")
                .route(web::get().to(handlers::get_dataset))
                .route(web::delete().to(handlers::reset_dataset)),
        )
        .service(
            web::resource("/sessions/{session_id}/dataset/preview")
                .route(web::get().to(handlers::preview_dataset)),
        )
        .service(
            web::resource("/sessions/{session_id}/dataset/correlations")
                .route(web::get().to(handlers::dataset_correlations)),
        )
        .service(
            web::resource("/sessions/{session_id}/dataset/outliers")
                .route(web::get().to(handlers::dataset_outliers)),
        )
        .service(
            web::resource("/sessions/{session_id}/messages")
                .route(web::post().to(handlers::post_message::<C>))
                .route(web::get().to(handlers::get_messages))
                .route(web::delete().to(handlers::clear_messages)),
        )
        .service(
            web::resource("/sessions/{session_id}/charts").route(web::post().to(handlers::create_chart)),
        )
        .service(
            web::resource("/sessions/{session_id}/charts/{chart_id}")
                .route(web::get().to(handlers::get_chart)),
        );
}
