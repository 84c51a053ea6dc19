use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::settings::SettingsStore;

/// Scraper tuning, read from the process environment (`WEBDRIVER_URL`,
/// `HEADLESS`, `DOWNLOADS_DIR`, `PORTAL_HOST`, ...).
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ScraperConfig {
    pub webdriver_url: String,
    pub headless: bool,
    pub downloads_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub settings_path: PathBuf,
    pub download_timeout_secs: u64,
    pub download_poll_ms: u64,
    pub element_timeout_ms: u64,
    pub portal_host: Option<String>,
    pub portal_name: Option<String>,
    pub portal_user: Option<String>,
    pub portal_pass: Option<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            downloads_dir: PathBuf::from("downloads"),
            logs_dir: PathBuf::from("logs"),
            settings_path: PathBuf::from("data/settings.json"),
            download_timeout_secs: 60,
            download_poll_ms: 300,
            element_timeout_ms: 6000,
            portal_host: None,
            portal_name: None,
            portal_user: None,
            portal_pass: None,
        }
    }
}

/// Where and as whom to log in.
#[derive(Clone)]
pub struct PortalAccess {
    pub host: String,
    pub name: Option<String>,
    pub user: String,
    pub pass: String,
}

impl std::fmt::Debug for PortalAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalAccess")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ScraperConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(config::Environment::default())
    }

    pub fn from_source(source: config::Environment) -> Result<Self, ConfigError> {
        let settings = config::Config::builder().add_source(source).build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn download_poll(&self) -> Duration {
        Duration::from_millis(self.download_poll_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    /// Environment values first, then the saved settings file.
    pub fn portal_access(&self) -> Result<PortalAccess, ConfigError> {
        let saved = SettingsStore::new(&self.settings_path).read().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Settings file unreadable, using environment only");
            Default::default()
        });

        let host = non_empty(self.portal_host.clone())
            .or(non_empty(saved.portal_host))
            .ok_or(ConfigError::MissingPortalHost)?;
        let user = non_empty(self.portal_user.clone())
            .or(non_empty(saved.portal_user))
            .ok_or(ConfigError::MissingField("PORTAL_USER"))?;
        let pass = non_empty(self.portal_pass.clone())
            .or(non_empty(saved.portal_pass))
            .ok_or(ConfigError::MissingField("PORTAL_PASS"))?;

        Ok(PortalAccess {
            host,
            name: non_empty(self.portal_name.clone()).or(non_empty(saved.portal_name)),
            user,
            pass,
        })
    }
}
