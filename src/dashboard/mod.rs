//! JSON dashboard over the bot's settings, queue and chat client.
//!
//! Every response carries `ok`; failures come back non-2xx as
//! `{ "ok": false, "error": "..." }`.

pub mod handlers;
pub mod models;

use std::sync::Arc;
use std::time::Instant;

use actix_web::http::StatusCode;
use actix_web::{middleware, web, App, HttpResponse, HttpServer, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::announce::Announcer;
use crate::chat::ChatClient;
use crate::error::{AnnounceError, ChatError, ConfigError, JobError, SettingsError};
use crate::queue::QueueService;
use crate::retry::RetryPolicy;
use crate::settings::SettingsStore;
use crate::shutdown::Shutdown;

/// Shared by every handler.
pub struct AppState {
    pub store: Arc<SettingsStore>,
    pub queue: QueueService,
    pub chat: Arc<dyn ChatClient>,
    pub announcer: Arc<Announcer>,
    pub delivery: RetryPolicy,
    pub started: Instant,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Announce(#[from] AnnounceError),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Config(_) => StatusCode::BAD_REQUEST,
            ApiError::Chat(ChatError::UnknownChat(_)) => StatusCode::BAD_REQUEST,
            ApiError::Chat(ChatError::NotReady(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Announce(AnnounceError::Config(_)) => StatusCode::BAD_REQUEST,
            ApiError::Chat(_) | ApiError::Announce(_) | ApiError::Job(_) => StatusCode::BAD_GATEWAY,
            ApiError::Settings(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "ok": false,
            "error": self.to_string(),
        }))
    }
}

/// Dashboard routes:
/// - GET /health, /status, /destinations
/// - POST /destination, /destination/clear
/// - POST /portal, /portal/clear
/// - POST /auto-mode, /capture-pattern
/// - POST /send-test, /scrape, /maintenance
/// - POST /credentials, /credentials/clear
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .route("/health", web::get().to(handlers::health))
    .route("/status", web::get().to(handlers::status))
    .route("/destinations", web::get().to(handlers::destinations))
    .route("/destination", web::post().to(handlers::set_destination))
    .route("/destination/clear", web::post().to(handlers::clear_destination))
    .route("/portal", web::post().to(handlers::set_portal))
    .route("/portal/clear", web::post().to(handlers::clear_portal))
    .route("/auto-mode", web::post().to(handlers::set_auto_mode))
    .route("/capture-pattern", web::post().to(handlers::set_capture_pattern))
    .route("/send-test", web::post().to(handlers::send_test))
    .route("/scrape", web::post().to(handlers::scrape))
    .route("/maintenance", web::post().to(handlers::schedule_maintenance))
    .route("/credentials", web::post().to(handlers::set_credentials))
    .route("/credentials/clear", web::post().to(handlers::clear_credentials));
}

/// Runs the dashboard until `shutdown` fires.
#[tracing::instrument(skip(state, shutdown))]
pub async fn serve(bind: &str, state: AppState, shutdown: Shutdown) -> std::io::Result<()> {
    let data = web::Data::new(state);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(data.clone())
            .configure(configure_routes)
    })
    .workers(1)
    .disable_signals()
    .bind(bind)?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        shutdown.wait().await;
        handle.stop(true).await;
    });

    tracing::info!(bind, "Dashboard listening");
    server.await?;
    tracing::info!("Dashboard stopped");
    Ok(())
}
