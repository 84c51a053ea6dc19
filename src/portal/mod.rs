//! The one-shot portal scraper: log in, filter the product listing by
//! supplier, export the PDF and wait for it on disk.

pub mod download;
pub mod env;
pub mod locate;
pub mod snapshot;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scraper::{Html, Selector};
use serde_json::json;
use tokio::time::Instant;
use tracing::instrument;
use url::Url;

use crate::error::{ScrapeError, WebDriverError};
use crate::webdriver::{By, ChromeOptions, WebDriver};
use env::{PortalAccess, ScraperConfig};
use locate::wait_any;

const LISTING_HASH_ROUTE: &str = "/vue/#/core/op/produto";
const LISTING_PLAIN_ROUTE: &str = "/vue/core/op/produto";
const PDF_XPATH: &str = r#"//*[@id="mainview"]/div[1]/div/div[1]/div/div[3]/div[3]/ul[2]/li[3]/a"#;
const LOGIN_FORM: &str = r#"#login-fld-usr, input[name="usuario"], #login-vbtn-loginbtn"#;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(8);
const FILTER_TIMEOUT: Duration = Duration::from_secs(4);
const ROUTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pauses that let the portal's scripts catch up between UI steps.
const AFTER_LOGIN: Duration = Duration::from_millis(1200);
const BEFORE_LISTING: Duration = Duration::from_millis(800);
const BETWEEN_FILTERS: Duration = Duration::from_millis(150);
const AFTER_APPLY: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Launch,
    Login,
    NavigateToListing,
    OpenFilterPanel,
    FilterStock,
    FilterSupplier,
    SubmitFilters,
    RequestExport,
    AwaitDownload,
    Finalize,
    Shutdown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Launch => "launch",
            Stage::Login => "login",
            Stage::NavigateToListing => "navigate-to-listing",
            Stage::OpenFilterPanel => "open-filter-panel",
            Stage::FilterStock => "apply-filter(stock>0)",
            Stage::FilterSupplier => "apply-filter(supplier)",
            Stage::SubmitFilters => "submit-filters",
            Stage::RequestExport => "request-export",
            Stage::AwaitDownload => "await-download",
            Stage::Finalize => "finalize",
            Stage::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

fn at(stage: Stage) -> impl FnOnce(WebDriverError) -> ScrapeError {
    move |source| ScrapeError::WebDriver { stage, source }
}

/// `http://` is assumed when the saved host carries no scheme.
pub fn portal_base(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Origin of the page the portal landed on after login. It can differ from
/// the configured host when the portal redirects.
pub fn listing_routes(current: &Url) -> (String, String) {
    let origin = current.origin().ascii_serialization();
    (
        format!("{origin}{LISTING_HASH_ROUTE}"),
        format!("{origin}{LISTING_PLAIN_ROUTE}"),
    )
}

/// Splits `123,456 ,789` into codes, dropping empty entries.
pub fn parse_codes(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn login_form_present(html: &str) -> bool {
    let document = Html::parse_document(html);
    Selector::parse(LOGIN_FORM)
        .map(|selector| document.select(&selector).next().is_some())
        .unwrap_or(false)
}

pub struct PortalScraper {
    config: ScraperConfig,
    access: PortalAccess,
}

impl PortalScraper {
    pub fn new(config: ScraperConfig, access: PortalAccess) -> Self {
        Self { config, access }
    }

    /// Produces `<downloads>/<code>.pdf`. The browser session is closed
    /// whatever the outcome; failures leave a snapshot in the logs directory.
    #[instrument(skip(self), fields(host = %self.access.host))]
    pub async fn scrape(&self, code: &str) -> Result<PathBuf, ScrapeError> {
        let started = Instant::now();
        let downloads = &self.config.downloads_dir;
        download::clear_downloads(downloads)?;
        let downloads = std::fs::canonicalize(downloads).map_err(|source| ScrapeError::Io {
            path: downloads.clone(),
            source,
        })?;

        let capabilities = ChromeOptions::new(self.config.headless, &downloads).capabilities();
        let driver = WebDriver::connect(&self.config.webdriver_url, capabilities)
            .await
            .map_err(at(Stage::Launch))?;

        let result = self.run(&driver, code, &downloads).await;
        if let Err(e) = &result {
            tracing::error!(code, error = %e, "Scrape failed");
            snapshot::capture(&driver, &self.config.logs_dir, &format!("error-{code}")).await;
        }

        if let Err(e) = driver.quit().await {
            tracing::warn!(stage = %Stage::Shutdown, error = %e, "Browser did not close cleanly");
        }
        if let Ok(path) = &result {
            tracing::info!(code, path = %path.display(), elapsed = ?started.elapsed(), "PDF ready");
        }
        result
    }

    async fn run(&self, driver: &WebDriver, code: &str, downloads: &Path) -> Result<PathBuf, ScrapeError> {
        allow_downloads(driver, downloads).await;

        let entry = format!("{}{LISTING_HASH_ROUTE}", portal_base(&self.access.host));
        tracing::info!(code, url = %entry, "Opening portal");
        driver.goto(&entry).await.map_err(at(Stage::Launch))?;

        self.login(driver).await?;
        self.open_listing(driver).await?;
        self.apply_filters(driver, code).await?;
        self.request_export(driver).await?;

        tracing::debug!(stage = %Stage::AwaitDownload, dir = %downloads.display(), "Polling downloads");
        let found = download::wait_for_download(
            downloads,
            self.config.download_poll(),
            self.config.download_timeout(),
        )
        .await?;
        tracing::debug!(stage = %Stage::Finalize, ?found, "Download detected");
        download::finalize(
            downloads,
            code,
            found,
            self.config.download_poll(),
            self.config.download_timeout(),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn login(&self, driver: &WebDriver) -> Result<(), ScrapeError> {
        let user = wait_any(
            driver,
            Stage::Login,
            &[By::id("login-fld-usr"), By::css(r#"input[name="usuario"]"#)],
            LOGIN_TIMEOUT,
        )
        .await?;
        driver
            .send_keys(&user, &self.access.user)
            .await
            .map_err(at(Stage::Login))?;

        let pass = wait_any(
            driver,
            Stage::Login,
            &[By::id("login-fld-pwd"), By::css(r#"input[type="password"]"#)],
            LOGIN_TIMEOUT,
        )
        .await?;
        driver
            .send_keys(&pass, &self.access.pass)
            .await
            .map_err(at(Stage::Login))?;

        let submit = wait_any(
            driver,
            Stage::Login,
            &[
                By::id("login-vbtn-loginbtn"),
                By::css(r#"button[type="submit"], .btnLogin"#),
            ],
            LOGIN_TIMEOUT,
        )
        .await?;
        driver.click(&submit).await.map_err(at(Stage::Login))?;
        tracing::info!(user = %self.access.user, "Login submitted");
        tokio::time::sleep(AFTER_LOGIN).await;

        match driver.page_source().await {
            Ok(html) if login_form_present(&html) => {
                tracing::warn!("Login form still present after submit, credentials may be wrong")
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Could not inspect page after login"),
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn open_listing(&self, driver: &WebDriver) -> Result<(), ScrapeError> {
        let stage = Stage::NavigateToListing;
        tokio::time::sleep(BEFORE_LISTING).await;
        driver.enter_default_content().await.map_err(at(stage))?;

        let current = driver.current_url().await.map_err(at(stage))?;
        let (hash_route, plain_route) = listing_routes(&current);
        driver.goto(&hash_route).await.map_err(at(stage))?;

        if !self.wait_for_route(driver, "/produto").await {
            tracing::info!(url = %plain_route, "Hash route did not settle, trying plain route");
            driver.goto(&plain_route).await.map_err(at(stage))?;
        }

        wait_any(
            driver,
            stage,
            &[
                By::css("#master-vbtn-optionsdialogopenbutton"),
                By::css(r#"[id*="optionsdialogopenbutton"]"#),
                By::xpath("//*[contains(., 'Opções') or contains(., 'Filtros') or contains(., 'Produtos')]"),
            ],
            self.config.element_timeout(),
        )
        .await?;
        tracing::info!("Product listing loaded");
        Ok(())
    }

    async fn wait_for_route(&self, driver: &WebDriver, fragment: &str) -> bool {
        let deadline = Instant::now() + ROUTE_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(url) = driver.current_url().await {
                if url.as_str().contains(fragment) {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        false
    }

    #[instrument(skip(self, driver))]
    async fn apply_filters(&self, driver: &WebDriver, code: &str) -> Result<(), ScrapeError> {
        let open = wait_any(
            driver,
            Stage::OpenFilterPanel,
            &[
                By::id("master-vbtn-optionsdialogopenbutton"),
                By::css(r#"[id*="optionsdialogopenbutton"], .btnOptions, .btnFilter, a[onclick*="options"]"#),
            ],
            self.config.element_timeout(),
        )
        .await?;
        driver.click(&open).await.map_err(at(Stage::OpenFilterPanel))?;
        tokio::time::sleep(BETWEEN_FILTERS).await;

        let filter_select = [By::css("select.addNewFilter"), By::css(r#"select[name*="filter"]"#)];

        let kind = wait_any(driver, Stage::FilterStock, &filter_select, FILTER_TIMEOUT).await?;
        driver.send_keys(&kind, "E").await.map_err(at(Stage::FilterStock))?;
        tokio::time::sleep(BETWEEN_FILTERS).await;

        let operator = wait_any(
            driver,
            Stage::FilterStock,
            &[By::css("select.operator"), By::css(r#"select[name*="operator"]"#)],
            FILTER_TIMEOUT,
        )
        .await?;
        driver.send_keys(&operator, "m0").await.map_err(at(Stage::FilterStock))?;
        tracing::info!("Stock filter set to greater than zero");
        tokio::time::sleep(BETWEEN_FILTERS).await;

        let supplier = wait_any(driver, Stage::FilterSupplier, &filter_select, FILTER_TIMEOUT).await?;
        driver
            .send_keys(&supplier, &format!("F{code}"))
            .await
            .map_err(at(Stage::FilterSupplier))?;
        tracing::info!(code, "Supplier filter set");
        tokio::time::sleep(BETWEEN_FILTERS).await;

        let apply = wait_any(
            driver,
            Stage::SubmitFilters,
            &[
                By::css("a.btnApply"),
                By::xpath("//a[contains(.,'Aplicar') or contains(.,'Apply')]"),
                By::css("button.apply, .btn.btn-primary"),
            ],
            FILTER_TIMEOUT,
        )
        .await?;
        driver.click(&apply).await.map_err(at(Stage::SubmitFilters))?;
        tracing::info!("Filters applied");
        tokio::time::sleep(AFTER_APPLY).await;
        Ok(())
    }

    async fn request_export(&self, driver: &WebDriver) -> Result<(), ScrapeError> {
        let export = wait_any(
            driver,
            Stage::RequestExport,
            &[
                By::xpath(PDF_XPATH),
                By::css(r#"a[href*="pdf"], a.export-pdf, .btnPdf, .pdf"#),
                By::xpath("//a[contains(.,'PDF') or contains(.,'Relatório')]"),
            ],
            self.config.element_timeout(),
        )
        .await?;
        driver.click(&export).await.map_err(at(Stage::RequestExport))?;
        tracing::info!("PDF export requested, waiting for the file");
        Ok(())
    }
}

/// Best effort: older chromedriver builds reject one or both commands and
/// the browser preferences still apply.
async fn allow_downloads(driver: &WebDriver, downloads: &Path) {
    let path = downloads.to_string_lossy();
    let commands = [
        (
            "Page.setDownloadBehavior",
            json!({ "behavior": "allow", "downloadPath": path }),
        ),
        (
            "Browser.setDownloadBehavior",
            json!({ "behavior": "allow", "downloadPath": path, "eventsEnabled": true }),
        ),
    ];
    for (cmd, params) in commands {
        if let Err(e) = driver.execute_cdp(cmd, params).await {
            tracing::debug!(cmd, error = %e, "DevTools download command rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Arc, Mutex};

    use actix_web::dev::ServerHandle;
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use serde_json::Value;
    use tempfile::TempDir;

    const SESSION: &str = "/session/s-1";

    /// Chromedriver stand-in that records every command and answers the one
    /// at `fail_path` with `error`.
    #[derive(Clone)]
    struct FakeDriver {
        calls: Arc<Mutex<Vec<String>>>,
        fail_path: String,
        error: &'static str,
    }

    impl FakeDriver {
        fn failing(command: &str, error: &'static str) -> Self {
            Self {
                calls: Arc::default(),
                fail_path: format!("{SESSION}{command}"),
                error,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    async fn answer(req: HttpRequest, fake: web::Data<FakeDriver>) -> HttpResponse {
        let method = req.method().as_str().to_string();
        let path = req.path().to_string();
        fake.calls.lock().unwrap().push(format!("{method} {path}"));

        if path == fake.fail_path {
            return HttpResponse::InternalServerError().json(json!({
                "value": { "error": fake.error, "message": "scripted failure", "stacktrace": "" }
            }));
        }
        let value = match (method.as_str(), path.strip_prefix(SESSION)) {
            ("POST", None) if path == "/session" => json!({ "sessionId": "s-1", "capabilities": {} }),
            ("GET", Some("/screenshot")) => json!("cG5n"),
            ("GET", Some("/source")) => json!("<html><body>Erro</body></html>"),
            _ => Value::Null,
        };
        HttpResponse::Ok().json(json!({ "value": value }))
    }

    fn serve(fake: &FakeDriver) -> (String, ServerHandle) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let data = web::Data::new(fake.clone());
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .default_service(web::to(answer))
        })
        .workers(1)
        .disable_signals()
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (url, handle)
    }

    fn scraper(webdriver_url: String, dir: &TempDir) -> PortalScraper {
        let config = ScraperConfig {
            webdriver_url,
            downloads_dir: dir.path().join("downloads"),
            logs_dir: dir.path().join("logs"),
            ..ScraperConfig::default()
        };
        let access = PortalAccess {
            host: "10.0.0.5".to_string(),
            name: None,
            user: "4711".to_string(),
            pass: "s3cret".to_string(),
        };
        PortalScraper::new(config, access)
    }

    fn snapshot_extensions(dir: &TempDir) -> Vec<String> {
        let mut exts: Vec<String> = fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|entry| {
                let path = entry.unwrap().path();
                assert!(path.to_string_lossy().contains("error-12345"));
                path.extension().unwrap().to_string_lossy().into_owned()
            })
            .collect();
        exts.sort();
        exts
    }

    #[actix_web::test]
    async fn test_navigation_failure_snapshots_and_closes_session() {
        let fake = FakeDriver::failing("/url", "unknown error");
        let (url, server) = serve(&fake);
        let dir = TempDir::new().unwrap();

        let err = scraper(url, &dir).scrape("12345").await.unwrap_err();
        assert!(matches!(err, ScrapeError::WebDriver { stage: Stage::Launch, .. }));

        let calls = fake.calls();
        assert_eq!(calls.first().map(String::as_str), Some("POST /session"));
        assert!(calls.contains(&format!("GET {SESSION}/screenshot")));
        assert!(calls.contains(&format!("GET {SESSION}/source")));
        assert_eq!(calls.last(), Some(&format!("DELETE {SESSION}")));
        assert_eq!(snapshot_extensions(&dir), vec!["html", "png"]);

        server.stop(true).await;
    }

    #[actix_web::test]
    async fn test_login_failure_still_closes_session() {
        let fake = FakeDriver::failing("/element", "invalid selector");
        let (url, server) = serve(&fake);
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("downloads")).unwrap();
        fs::write(dir.path().join("downloads").join("12345.pdf"), b"old").unwrap();

        let err = scraper(url, &dir).scrape("12345").await.unwrap_err();
        assert!(matches!(err, ScrapeError::WebDriver { stage: Stage::Login, .. }));

        let calls = fake.calls();
        assert!(calls.contains(&format!("POST {SESSION}/url")));
        assert_eq!(calls.last(), Some(&format!("DELETE {SESSION}")));
        assert_eq!(snapshot_extensions(&dir), vec!["html", "png"]);
        assert!(!dir.path().join("downloads").join("12345.pdf").exists());

        server.stop(true).await;
    }

    #[test]
    fn test_portal_base_adds_scheme() {
        assert_eq!(portal_base("10.0.0.5"), "http://10.0.0.5");
        assert_eq!(portal_base(" https://loja.example/ "), "https://loja.example");
    }

    #[test]
    fn test_listing_routes_use_post_login_origin() {
        let current = Url::parse("http://10.0.48.60:8080/vue/#/login?next=x").unwrap();
        let (hash, plain) = listing_routes(&current);
        assert_eq!(hash, "http://10.0.48.60:8080/vue/#/core/op/produto");
        assert_eq!(plain, "http://10.0.48.60:8080/vue/core/op/produto");
    }

    #[test]
    fn test_login_form_detection() {
        let login = r#"<html><body><form><input id="login-fld-usr"><input type="password"></form></body></html>"#;
        let listing = r#"<html><body><div id="mainview"><a id="master-vbtn-optionsdialogopenbutton">Opções</a></div></body></html>"#;

        assert!(login_form_present(login));
        assert!(!login_form_present(listing));
    }

    #[test]
    fn test_parse_codes() {
        assert_eq!(parse_codes("123, 456,,789 "), vec!["123", "456", "789"]);
        assert!(parse_codes(" , ").is_empty());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::FilterStock.to_string(), "apply-filter(stock>0)");
        assert_eq!(Stage::NavigateToListing.to_string(), "navigate-to-listing");
    }
}
