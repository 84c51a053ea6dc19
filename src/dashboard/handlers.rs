use std::path::PathBuf;

use actix_web::{web, HttpResponse};
use serde_json::json;
use sysinfo::{Pid, System};
use teloxide::types::ChatId;

use super::models::{
    AutoModeRequest, CapturePatternRequest, CredentialsRequest, DestinationRequest,
    MaintenanceRequest, PortalRequest, ScrapeRequest, SettingsSummary, StatusResponse,
};
use super::{ApiError, AppState};
use crate::error::ConfigError;
use crate::filter::{compile_pattern, usable_code};
use crate::pipeline::deliver;
use crate::queue::Job;

pub const TEST_MESSAGE: &str = "✅ Test message from the portal report bot.";

type ApiResult = Result<HttpResponse, ApiError>;

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn destination(state: &AppState) -> Result<ChatId, ApiError> {
    Ok(state
        .store
        .read()?
        .destination_chat_id
        .ok_or(ConfigError::MissingDestination)?)
}

fn settings_response(state: &AppState) -> ApiResult {
    let settings = state.store.read()?;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "settings": SettingsSummary::from(&settings),
    })))
}

/// Resident memory of this process in MB.
fn process_memory_mb() -> Option<f64> {
    let mut sys = System::new();
    let pid = Pid::from(std::process::id() as usize);
    if !sys.refresh_process(pid) {
        return None;
    }
    sys.process(pid)
        .map(|process| process.memory() as f64 / (1024.0 * 1024.0))
}

/// GET /health
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "ok": true,
        "ready": state.chat.is_ready(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /status
pub async fn status(state: web::Data<AppState>) -> ApiResult {
    let settings = state.store.read()?;
    Ok(HttpResponse::Ok().json(StatusResponse {
        ok: true,
        ready: state.chat.is_ready(),
        uptime_secs: state.started.elapsed().as_secs(),
        queue: state.queue.snapshot(),
        settings: SettingsSummary::from(&settings),
        memory_mb: process_memory_mb(),
    }))
}

/// GET /destinations
pub async fn destinations(state: web::Data<AppState>) -> ApiResult {
    let current = state.store.read()?.destination_chat_id;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "current": current,
        "destinations": state.chat.known_destinations(),
    })))
}

/// POST /destination
///
/// The chat must be reachable by the client; its display name is saved with
/// the id.
pub async fn set_destination(
    state: web::Data<AppState>,
    body: web::Json<DestinationRequest>,
) -> ApiResult {
    let id = ChatId(body.chat_id);
    let name = state.chat.lookup_destination(id).await?;
    state.store.set_destination(id, &name)?;
    tracing::info!(chat = id.0, name = %name, "Destination saved");
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "destination": { "id": id, "name": name },
    })))
}

/// POST /destination/clear
pub async fn clear_destination(state: web::Data<AppState>) -> ApiResult {
    state.store.clear_destination()?;
    tracing::info!("Destination cleared");
    settings_response(&state)
}

/// POST /portal
pub async fn set_portal(state: web::Data<AppState>, body: web::Json<PortalRequest>) -> ApiResult {
    let host = required(&body.host, "host")?;
    state.store.set_portal_host(host, body.name.as_deref())?;
    tracing::info!(host, "Portal host saved");
    settings_response(&state)
}

/// POST /portal/clear
pub async fn clear_portal(state: web::Data<AppState>) -> ApiResult {
    state.store.clear_portal_host()?;
    settings_response(&state)
}

/// POST /auto-mode
pub async fn set_auto_mode(state: web::Data<AppState>, body: web::Json<AutoModeRequest>) -> ApiResult {
    state.store.set_auto_mode(body.on)?;
    tracing::info!(on = body.on, "Automatic mode changed");
    settings_response(&state)
}

/// POST /capture-pattern
///
/// An empty or missing pattern restores the default; an invalid one is
/// rejected and nothing is saved.
pub async fn set_capture_pattern(
    state: web::Data<AppState>,
    body: web::Json<CapturePatternRequest>,
) -> ApiResult {
    let pattern = body.pattern.as_deref().map(str::trim).filter(|p| !p.is_empty());
    if let Some(pattern) = pattern {
        compile_pattern(pattern)?;
    }
    state.store.set_capture_pattern(pattern)?;
    settings_response(&state)
}

/// POST /send-test
pub async fn send_test(state: web::Data<AppState>) -> ApiResult {
    let to = destination(&state)?;
    state.chat.send_text(to, TEST_MESSAGE).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "sent_to": to })))
}

/// POST /scrape
pub async fn scrape(state: web::Data<AppState>, body: web::Json<ScrapeRequest>) -> ApiResult {
    let to = destination(&state)?;

    if let Some(code) = body.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        if !usable_code(code) {
            return Err(ApiError::BadRequest(format!("invalid supplier code: {code}")));
        }
        let pending = state.queue.enqueue(Job::new(code, to));
        return Ok(HttpResponse::Ok().json(json!({
            "ok": true,
            "queued": code,
            "pending": pending,
        })));
    }

    if let Some(raw) = body.pdf_path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(raw);
        if !path.is_file() {
            return Err(ApiError::BadRequest(format!("PDF not found: {raw}")));
        }
        let caption = path
            .file_stem()
            .map(|stem| format!("📄 Report {}", stem.to_string_lossy()))
            .unwrap_or_else(|| "📄 Report".to_string());
        deliver(state.chat.as_ref(), to, &path, &caption, state.delivery).await?;
        return Ok(HttpResponse::Ok().json(json!({ "ok": true, "sent": raw })));
    }

    Err(ApiError::BadRequest("code or pdf_path is required".to_string()))
}

/// POST /maintenance
pub async fn schedule_maintenance(
    state: web::Data<AppState>,
    body: web::Json<MaintenanceRequest>,
) -> ApiResult {
    let announcement = state
        .announcer
        .schedule(&body.when, body.message.as_deref(), body.exit_after)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "fires_at": announcement.fires_at.to_rfc3339(),
        "message": announcement.message,
        "sent_immediately": announcement.sent_immediately,
        "exit_after": announcement.exit_after_send,
    })))
}

/// POST /credentials
pub async fn set_credentials(
    state: web::Data<AppState>,
    body: web::Json<CredentialsRequest>,
) -> ApiResult {
    let user = required(&body.user, "user")?;
    if body.pass.is_empty() {
        return Err(ApiError::BadRequest("pass is required".to_string()));
    }
    state.store.set_portal_credentials(user, &body.pass)?;
    tracing::info!(user, "Portal credentials saved");
    settings_response(&state)
}

/// POST /credentials/clear
pub async fn clear_credentials(state: web::Data<AppState>) -> ApiResult {
    state.store.clear_portal_credentials()?;
    settings_response(&state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::Announcer;
    use crate::chat::fake::FakeChat;
    use crate::chat::{ChatClient, DestinationInfo};
    use crate::dashboard::configure_routes;
    use crate::error::JobError;
    use crate::queue::{JobHandler, QueueService};
    use crate::retry::RetryPolicy;
    use crate::settings::{SettingsStore, DEFAULT_CAPTURE_PATTERN};
    use crate::shutdown::Shutdown;
    use actix_web::dev::{Service, ServiceResponse};
    use actix_web::{test, App};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const GROUP: ChatId = ChatId(-100555);

    #[derive(Default)]
    struct Collect(Mutex<Vec<Job>>);

    #[async_trait]
    impl JobHandler for Collect {
        async fn process(&self, job: &Job) -> Result<(), JobError> {
            self.0.lock().unwrap().push(job.clone());
            Ok(())
        }

        async fn report_failure(&self, _job: &Job, _error: &JobError) {}
    }

    struct Fixture {
        chat: Arc<FakeChat>,
        store: Arc<SettingsStore>,
        jobs: Arc<Collect>,
        queue: QueueService,
        shutdown: Shutdown,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let chat = Arc::new(FakeChat {
            chats: vec![DestinationInfo {
                id: GROUP,
                name: "Stock room".into(),
            }],
            ..FakeChat::default()
        });
        let jobs = Arc::new(Collect::default());
        Fixture {
            chat,
            store: Arc::new(SettingsStore::new(dir.path().join("settings.json"))),
            queue: QueueService::new(Arc::clone(&jobs) as Arc<dyn JobHandler>),
            jobs,
            shutdown: Shutdown::default(),
            dir,
        }
    }

    impl Fixture {
        fn state(&self) -> web::Data<AppState> {
            let chat = Arc::clone(&self.chat) as Arc<dyn ChatClient>;
            web::Data::new(AppState {
                store: Arc::clone(&self.store),
                queue: self.queue.clone(),
                announcer: Arc::new(Announcer::new(
                    Arc::clone(&chat),
                    Arc::clone(&self.store),
                    self.shutdown.clone(),
                )),
                chat,
                delivery: RetryPolicy::fixed(3, Duration::from_millis(1)),
                started: Instant::now(),
            })
        }
    }

    async fn app(
        fx: &Fixture,
    ) -> impl Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error> {
        test::init_service(App::new().app_data(fx.state()).configure(configure_routes)).await
    }

    async fn post(
        app: &impl Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>,
        uri: &str,
        body: Value,
    ) -> (u16, Value) {
        let req = test::TestRequest::post().uri(uri).set_json(body).to_request();
        let resp = test::call_service(app, req).await;
        let status = resp.status().as_u16();
        (status, test::read_body_json(resp).await)
    }

    #[actix_web::test]
    async fn test_health_reports_readiness() {
        let fx = fixture();
        let app = app(&fx).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["ok"], true);
        assert_eq!(body["ready"], true);
    }

    #[actix_web::test]
    async fn test_destination_is_validated_and_named() {
        let fx = fixture();
        let app = app(&fx).await;

        let (status, body) = post(&app, "/destination", json!({ "chat_id": GROUP.0 })).await;
        assert_eq!(status, 200);
        assert_eq!(body["destination"]["name"], "Stock room");
        assert_eq!(fx.store.read().unwrap().destination_chat_id, Some(GROUP));

        let (status, body) = post(&app, "/destination", json!({ "chat_id": 42 })).await;
        assert_eq!(status, 400);
        assert_eq!(body["ok"], false);
        assert_eq!(fx.store.read().unwrap().destination_chat_id, Some(GROUP));
    }

    #[actix_web::test]
    async fn test_invalid_capture_pattern_is_rejected() {
        let fx = fixture();
        let app = app(&fx).await;

        let (status, body) = post(&app, "/capture-pattern", json!({ "pattern": "([0-9]+" })).await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("([0-9]+"));
        assert_eq!(fx.store.read().unwrap().capture_pattern, DEFAULT_CAPTURE_PATTERN);

        let (status, _) = post(&app, "/capture-pattern", json!({ "pattern": "^[A-Z]\\d+$" })).await;
        assert_eq!(status, 200);
        let (status, body) = post(&app, "/capture-pattern", json!({})).await;
        assert_eq!(status, 200);
        assert_eq!(body["settings"]["capture_pattern"], DEFAULT_CAPTURE_PATTERN);
    }

    #[actix_web::test]
    async fn test_portal_host_keeps_destination() {
        let fx = fixture();
        fx.store.set_destination(GROUP, "Stock room").unwrap();
        let app = app(&fx).await;

        let (status, body) = post(&app, "/portal", json!({ "host": "10.0.0.5", "name": "Loja 5" })).await;

        assert_eq!(status, 200);
        assert_eq!(body["settings"]["portal_host"], "10.0.0.5");
        assert_eq!(body["settings"]["destination_chat_id"], GROUP.0);
    }

    #[actix_web::test]
    async fn test_scrape_queues_for_destination() {
        let fx = fixture();
        let app = app(&fx).await;

        let (status, body) = post(&app, "/scrape", json!({ "code": "12345" })).await;
        assert_eq!(status, 400);
        assert_eq!(body["ok"], false);

        fx.store.set_destination(GROUP, "Stock room").unwrap();
        let (status, body) = post(&app, "/scrape", json!({ "code": " 12345 " })).await;
        assert_eq!(status, 200);
        assert_eq!(body["queued"], "12345");

        fx.queue.wait_idle().await;
        assert_eq!(*fx.jobs.0.lock().unwrap(), vec![Job::new("12345", GROUP)]);
    }

    #[actix_web::test]
    async fn test_scrape_refuses_unsafe_codes() {
        let fx = fixture();
        fx.store.set_destination(GROUP, "Stock room").unwrap();
        let app = app(&fx).await;

        for code in ["--headless", "../../etc/passwd", "123,456", r"a\b"] {
            let (status, body) = post(&app, "/scrape", json!({ "code": code })).await;
            assert_eq!(status, 400, "{code}");
            assert_eq!(body["ok"], false);
        }
        assert_eq!(fx.queue.snapshot().pending, 0);
        assert!(fx.jobs.0.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_scrape_sends_existing_pdf() {
        let fx = fixture();
        fx.store.set_destination(GROUP, "Stock room").unwrap();
        let pdf = fx.dir.path().join("4242.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        let app = app(&fx).await;

        let (status, _) = post(&app, "/scrape", json!({ "pdf_path": pdf.to_string_lossy() })).await;
        assert_eq!(status, 200);
        assert_eq!(fx.chat.documents(), vec![pdf]);

        let (status, _) = post(&app, "/scrape", json!({ "pdf_path": "/nope/missing.pdf" })).await;
        assert_eq!(status, 400);
    }

    #[actix_web::test]
    async fn test_maintenance_validation() {
        let fx = fixture();
        fx.store.set_destination(GROUP, "Stock room").unwrap();
        let app = app(&fx).await;

        let (status, body) = post(&app, "/maintenance", json!({ "when": "whenever" })).await;
        assert_eq!(status, 400);
        assert_eq!(body["ok"], false);

        let (status, body) = post(&app, "/maintenance", json!({ "when": "in 30m" })).await;
        assert_eq!(status, 200);
        assert_eq!(body["sent_immediately"], false);
        assert!(fx.chat.texts().is_empty());
        assert!(!fx.shutdown.is_triggered());
    }

    #[actix_web::test]
    async fn test_status_never_exposes_password() {
        let fx = fixture();
        let app = app(&fx).await;

        let (status, _) = post(&app, "/credentials", json!({ "user": "clerk", "pass": "s3cret" })).await;
        assert_eq!(status, 200);

        let req = test::TestRequest::get().uri("/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["settings"]["has_credentials"], true);
        assert_eq!(body["queue"]["pending"], 0);
        assert!(!body.to_string().contains("s3cret"));

        let (status, body) = post(&app, "/credentials/clear", json!({})).await;
        assert_eq!(status, 200);
        assert_eq!(body["settings"]["has_credentials"], false);
    }

    #[actix_web::test]
    async fn test_malformed_body_uses_error_envelope() {
        let fx = fixture();
        let app = app(&fx).await;

        let (status, body) = post(&app, "/auto-mode", json!({ "on": "yes" })).await;
        assert_eq!(status, 400);
        assert_eq!(body["ok"], false);
    }

    #[actix_web::test]
    async fn test_send_test_requires_destination() {
        let fx = fixture();
        let app = app(&fx).await;

        let (status, _) = post(&app, "/send-test", json!({})).await;
        assert_eq!(status, 400);

        fx.store.set_destination(GROUP, "Stock room").unwrap();
        let (status, _) = post(&app, "/send-test", json!({})).await;
        assert_eq!(status, 200);
        assert_eq!(fx.chat.texts(), vec![TEST_MESSAGE.to_string()]);
    }
}
