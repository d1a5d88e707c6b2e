use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::sync::Arc;

use g_data_assistant::config::Config;
use g_data_assistant::configure_routes;
use g_data_assistant::services::{ConversationService, DatasetProcessor, OpenAiClient, SessionStore, Visualizer};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting Data Analysis Assistant");

    // Load configuration from environment variables
    let config = Config::from_env().map_err(|e| {
        log::error!("❌ Invalid configuration: {:#}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    if config.default_api_key.is_none() {
        log::warn!("🔑 OPENAI_API_KEY not set; sessions must supply their own key");
    }

    let client = OpenAiClient::new(&config.model).map_err(|e| {
        log::error!("❌ Failed to create model client: {:#}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    // Session state lives in memory for the lifetime of the process
    let sessions = SessionStore::new();
    let conversation_service = web::Data::new(ConversationService::new(
        sessions.clone(),
        Arc::new(client),
        &config,
    ));
    let sessions = web::Data::new(sessions);
    let processor = web::Data::new(DatasetProcessor::new());
    let visualizer = web::Data::new(Visualizer::new());
    let config = web::Data::new(config);

    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    log::info!("🌐 Starting server at http://{}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .app_data(sessions.clone())
            .app_data(conversation_service.clone())
            .app_data(processor.clone())
            .app_data(visualizer.clone())
            .app_data(config.clone())
            .configure(configure_routes::<OpenAiClient>)
    })
    .bind(&bind_addr)
    .map_err(|e| {
        log::error!("❌ Failed to bind to {}: {}", bind_addr, e);
        e
    })?
    .run()
    .await
}
