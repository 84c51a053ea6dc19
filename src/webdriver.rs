//! Minimal W3C WebDriver client over reqwest, enough to drive chromedriver.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::instrument;
use url::Url;

use crate::error::WebDriverError;

/// Key under which W3C drivers return element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Element location strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum By {
    Id(String),
    Css(String),
    XPath(String),
}

impl By {
    pub fn id(id: &str) -> Self {
        By::Id(id.to_string())
    }

    pub fn css(selector: &str) -> Self {
        By::Css(selector.to_string())
    }

    pub fn xpath(path: &str) -> Self {
        By::XPath(path.to_string())
    }

    /// `(using, value)` pair of the `/element` command. W3C has no id
    /// strategy, so ids become attribute selectors.
    fn to_wire(&self) -> (&'static str, String) {
        match self {
            By::Id(id) => ("css selector", format!(r#"[id="{}"]"#, id.replace('"', "\\\""))),
            By::Css(selector) => ("css selector", selector.clone()),
            By::XPath(path) => ("xpath", path.clone()),
        }
    }
}

impl fmt::Display for By {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            By::Id(id) => write!(f, "id={id}"),
            By::Css(selector) => write!(f, "css={selector}"),
            By::XPath(path) => write!(f, "xpath={path}"),
        }
    }
}

/// Opaque reference to an element of the current browsing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

impl ElementRef {
    fn to_wire(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

/// Chrome options for a new session.
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub download_dir: String,
}

impl ChromeOptions {
    pub fn new(headless: bool, download_dir: &Path) -> Self {
        Self {
            headless,
            download_dir: download_dir.to_string_lossy().into_owned(),
        }
    }

    pub fn capabilities(&self) -> Value {
        let mut args: Vec<&str> = Vec::new();
        if self.headless {
            args.push("--headless=new");
        }
        args.extend([
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--ignore-certificate-errors",
            "--allow-running-insecure-content",
            "--lang=pt-BR",
            "--window-size=1366,800",
            "--safebrowsing-disable-download-protection",
            "--disable-features=DownloadBubble,DownloadBubbleV2,SafetyTips",
        ]);

        json!({
            "browserName": "chrome",
            "acceptInsecureCerts": true,
            "goog:chromeOptions": {
                "args": args,
                "prefs": {
                    "plugins.always_open_pdf_externally": true,
                    "download.prompt_for_download": false,
                    "download.directory_upgrade": true,
                    "download.default_directory": self.download_dir,
                    "profile.default_content_settings.popups": 0,
                    "safebrowsing.enabled": false,
                    "safebrowsing.disable_download_protection": true
                }
            }
        })
    }
}

/// Extracts `value` from a WebDriver response body, turning error payloads
/// into [`WebDriverError::Command`].
fn unwrap_value(mut body: Value) -> Result<Value, WebDriverError> {
    let value = body
        .get_mut("value")
        .map(Value::take)
        .ok_or_else(|| WebDriverError::Protocol(format!("missing value in {body}")))?;

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(WebDriverError::Command {
            error: error.to_string(),
            message,
        });
    }
    Ok(value)
}

fn element_from(value: &Value) -> Result<ElementRef, WebDriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| WebDriverError::Protocol(format!("not an element reference: {value}")))
}

/// An open browser session.
pub struct WebDriver {
    client: Client,
    session_url: String,
}

impl WebDriver {
    #[instrument(skip(capabilities))]
    pub async fn connect(server: &str, capabilities: Value) -> Result<Self, WebDriverError> {
        let client = Client::builder().build()?;
        let server = server.trim_end_matches('/');
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });

        let response: Value = client
            .post(format!("{server}/session"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        let value = unwrap_value(response)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Protocol("session id missing".to_string()))?;

        tracing::info!(session_id, "Browser session started");
        Ok(Self {
            client,
            session_url: format!("{server}/session/{session_id}"),
        })
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, WebDriverError> {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.session_url, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response: Value = request.send().await?.json().await?;
        unwrap_value(response)
    }

    pub async fn goto(&self, url: &str) -> Result<(), WebDriverError> {
        tracing::debug!(url, "Navigating");
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    pub async fn current_url(&self) -> Result<Url, WebDriverError> {
        let value = self.command(Method::GET, "/url", None).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| WebDriverError::Protocol(format!("url is not a string: {value}")))?;
        Ok(Url::parse(raw)?)
    }

    pub async fn find(&self, by: &By) -> Result<ElementRef, WebDriverError> {
        let (using, value) = by.to_wire();
        let found = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": using, "value": value })),
            )
            .await?;
        element_from(&found)
    }

    pub async fn find_all(&self, by: &By) -> Result<Vec<ElementRef>, WebDriverError> {
        let (using, value) = by.to_wire();
        let found = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": using, "value": value })),
            )
            .await?;
        found
            .as_array()
            .ok_or_else(|| WebDriverError::Protocol(format!("elements is not a list: {found}")))?
            .iter()
            .map(element_from)
            .collect()
    }

    /// Polls [`find`](Self::find) until the element shows up or `timeout`
    /// elapses.
    pub async fn wait_for(&self, by: &By, timeout: Duration) -> Result<ElementRef, WebDriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.find(by).await {
                Ok(element) => return Ok(element),
                Err(e) if e.is_no_such_element() => {}
                Err(e) => return Err(e),
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Err(WebDriverError::NotFound(by.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": text })),
        )
        .await
        .map(|_| ())
    }

    pub async fn click(&self, element: &ElementRef) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.0),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    pub async fn enter_frame(&self, frame: &ElementRef) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/frame", Some(json!({ "id": frame.to_wire() })))
            .await
            .map(|_| ())
    }

    pub async fn enter_default_content(&self) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/frame", Some(json!({ "id": null })))
            .await
            .map(|_| ())
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>, WebDriverError> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| WebDriverError::Protocol("screenshot is not a string".to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }

    pub async fn page_source(&self) -> Result<String, WebDriverError> {
        let value = self.command(Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WebDriverError::Protocol("page source is not a string".to_string()))
    }

    /// Chrome DevTools command through chromedriver's vendor endpoint.
    pub async fn execute_cdp(&self, cmd: &str, params: Value) -> Result<Value, WebDriverError> {
        self.command(
            Method::POST,
            "/goog/cdp/execute",
            Some(json!({ "cmd": cmd, "params": params })),
        )
        .await
    }

    pub async fn quit(self) -> Result<(), WebDriverError> {
        self.command(Method::DELETE, "", None).await?;
        tracing::info!("Browser session closed");
        Ok(())
    }
}
