//! One-shot maintenance announcements to the destination chat.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration as TimeDelta, Local, NaiveDateTime, TimeZone};
use regex::Regex;
use teloxide::types::ChatId;
use tracing::instrument;

use crate::chat::ChatClient;
use crate::error::{AnnounceError, ConfigError};
use crate::settings::SettingsStore;
use crate::shutdown::Shutdown;

const ABSOLUTE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

static RE_RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:in|em)\s+(\d+)\s*(m|min|mins|minutes?|h|hrs?|hours?)$")
        .expect("literal pattern")
});

/// Parses `now`, `in N minutes|hours` (short forms `30m`, `2h` accepted) or
/// a local date-time such as `2025-03-01 22:30`.
pub fn parse_when(input: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let lower = input.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if lower == "now" || lower == "agora" {
        return Some(now);
    }

    if let Some(caps) = RE_RELATIVE.captures(&lower) {
        let amount: i64 = caps[1].parse().ok()?;
        let delta = if caps[2].starts_with('h') {
            TimeDelta::try_hours(amount)?
        } else {
            TimeDelta::try_minutes(amount)?
        };
        return now.checked_add_signed(delta);
    }

    let trimmed = input.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(with_offset.with_timezone(&Local));
    }
    ABSOLUTE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(trimmed, format)
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceAnnouncement {
    pub fires_at: DateTime<Local>,
    pub message: String,
    pub exit_after_send: bool,
    /// Sent right away because the fire time was not in the future.
    pub sent_immediately: bool,
}

pub struct Announcer {
    chat: Arc<dyn ChatClient>,
    store: Arc<SettingsStore>,
    shutdown: Shutdown,
}

impl Announcer {
    pub fn new(chat: Arc<dyn ChatClient>, store: Arc<SettingsStore>, shutdown: Shutdown) -> Self {
        Self {
            chat,
            store,
            shutdown,
        }
    }

    /// Validates the request and either sends now or arms a timer. Nothing is
    /// scheduled when the time expression or the destination is missing.
    pub async fn schedule(
        &self,
        when: &str,
        message: Option<&str>,
        exit_after_send: bool,
    ) -> Result<MaintenanceAnnouncement, AnnounceError> {
        let fires_at = parse_when(when, Local::now())
            .ok_or_else(|| ConfigError::InvalidTime(when.to_string()))?;
        self.schedule_at(fires_at, message, exit_after_send).await
    }

    #[instrument(skip(self, message))]
    pub async fn schedule_at(
        &self,
        fires_at: DateTime<Local>,
        message: Option<&str>,
        exit_after_send: bool,
    ) -> Result<MaintenanceAnnouncement, AnnounceError> {
        let destination = self
            .store
            .read()?
            .destination_chat_id
            .ok_or(ConfigError::MissingDestination)?;

        let text = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "🚧 Scheduled maintenance at {}.",
                    fires_at.format("%Y-%m-%d %H:%M")
                )
            });

        let wait = (fires_at - Local::now()).to_std().ok().filter(|d| !d.is_zero());

        let Some(wait) = wait else {
            tracing::info!("Announcing maintenance now");
            let sent = self.chat.send_text(destination, &text).await;
            if exit_after_send {
                self.shutdown.trigger("maintenance announcement sent");
            }
            sent?;
            return Ok(MaintenanceAnnouncement {
                fires_at,
                message: text,
                exit_after_send,
                sent_immediately: true,
            });
        };

        tracing::info!(fires_at = %fires_at, in_secs = wait.as_secs(), "Maintenance announcement scheduled");
        let chat = Arc::clone(&self.chat);
        let shutdown = self.shutdown.clone();
        let pending_text = text.clone();
        self.shutdown.spawn_supervised("announcement timer", async move {
            tokio::time::sleep(wait).await;
            fire(chat.as_ref(), destination, &pending_text).await;
            if exit_after_send {
                shutdown.trigger("maintenance announcement sent");
            }
        });

        Ok(MaintenanceAnnouncement {
            fires_at,
            message: text,
            exit_after_send,
            sent_immediately: false,
        })
    }
}

async fn fire(chat: &dyn ChatClient, destination: ChatId, text: &str) {
    match chat.send_text(destination, text).await {
        Ok(()) => tracing::info!("Maintenance announcement sent"),
        Err(e) => tracing::error!(error = %e, "Failed to send maintenance announcement"),
    }
}
