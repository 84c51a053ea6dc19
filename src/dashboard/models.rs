//! Request and response bodies of the dashboard API.

use serde::{Deserialize, Serialize};
use teloxide::types::ChatId;

use crate::queue::QueueSnapshot;
use crate::settings::Settings;

#[derive(Debug, Deserialize)]
pub struct DestinationRequest {
    pub chat_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PortalRequest {
    pub host: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AutoModeRequest {
    pub on: bool,
}

#[derive(Debug, Deserialize)]
pub struct CapturePatternRequest {
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Either a code to queue or an existing PDF to send as is.
#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub pdf_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub when: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub exit_after: bool,
}

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub user: String,
    pub pass: String,
}

/// Settings as shown to the dashboard; the portal password never leaves
/// the process.
#[derive(Debug, Serialize)]
pub struct SettingsSummary {
    pub destination_chat_id: Option<ChatId>,
    pub destination_name: Option<String>,
    pub portal_host: Option<String>,
    pub portal_name: Option<String>,
    pub auto_mode: bool,
    pub capture_pattern: String,
    pub portal_user: Option<String>,
    pub has_credentials: bool,
}

impl From<&Settings> for SettingsSummary {
    fn from(settings: &Settings) -> Self {
        Self {
            destination_chat_id: settings.destination_chat_id,
            destination_name: settings.destination_name.clone(),
            portal_host: settings.portal_host.clone(),
            portal_name: settings.portal_name.clone(),
            auto_mode: settings.auto_mode,
            capture_pattern: settings.capture_pattern.clone(),
            portal_user: settings.portal_user.clone(),
            has_credentials: settings.has_credentials(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub ready: bool,
    pub uptime_secs: u64,
    pub queue: QueueSnapshot,
    pub settings: SettingsSummary,
    pub memory_mb: Option<f64>,
}
