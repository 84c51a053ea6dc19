//! Runtime settings persisted as a flat JSON file.
//!
//! Every setter is a full read-modify-write of the file, so a change made by
//! the dashboard is visible to the next inbound message or queued job.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use teloxide::types::ChatId;

use crate::error::SettingsError;

pub const DEFAULT_CAPTURE_PATTERN: &str = r"^\d{4,}$";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_chat_id: Option<ChatId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_name: Option<String>,
    #[serde(default = "default_auto_mode")]
    pub auto_mode: bool,
    #[serde(default = "default_capture_pattern")]
    pub capture_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_pass: Option<String>,
}

fn default_auto_mode() -> bool {
    true
}

fn default_capture_pattern() -> String {
    DEFAULT_CAPTURE_PATTERN.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            destination_chat_id: None,
            destination_name: None,
            portal_host: None,
            portal_name: None,
            auto_mode: default_auto_mode(),
            capture_pattern: default_capture_pattern(),
            portal_user: None,
            portal_pass: None,
        }
    }
}

impl Settings {
    pub fn has_credentials(&self) -> bool {
        self.portal_user.is_some() && self.portal_pass.is_some()
    }
}

/// File-backed settings. Reads are never cached.
pub struct SettingsStore {
    path: PathBuf,
    // serializes read-modify-write cycles inside this process
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the current settings. A missing file yields the defaults; a
    /// corrupt one is logged and also yields the defaults.
    pub fn read(&self) -> Result<Settings, SettingsError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            return Ok(Settings::default());
        }

        match serde_json::from_str::<Settings>(&contents) {
            Ok(mut settings) => {
                if settings.capture_pattern.trim().is_empty() {
                    settings.capture_pattern = default_capture_pattern();
                }
                Ok(settings)
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Settings file unreadable, using defaults");
                Ok(Settings::default())
            }
        }
    }

    fn write(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn update<F>(&self, apply: F) -> Result<Settings, SettingsError>
    where
        F: FnOnce(&mut Settings),
    {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut settings = self.read()?;
        apply(&mut settings);
        self.write(&settings)?;
        Ok(settings)
    }

    pub fn set_destination(&self, id: ChatId, name: &str) -> Result<Settings, SettingsError> {
        self.update(|s| {
            s.destination_chat_id = Some(id);
            s.destination_name = Some(name.to_string());
        })
    }

    pub fn clear_destination(&self) -> Result<Settings, SettingsError> {
        self.update(|s| {
            s.destination_chat_id = None;
            s.destination_name = None;
        })
    }

    /// Saves the portal host. The name is only replaced when one is given.
    pub fn set_portal_host(&self, host: &str, name: Option<&str>) -> Result<Settings, SettingsError> {
        self.update(|s| {
            s.portal_host = Some(host.to_string());
            if let Some(name) = name.filter(|n| !n.is_empty()) {
                s.portal_name = Some(name.to_string());
            }
        })
    }

    pub fn clear_portal_host(&self) -> Result<Settings, SettingsError> {
        self.update(|s| {
            s.portal_host = None;
            s.portal_name = None;
        })
    }

    pub fn set_auto_mode(&self, on: bool) -> Result<Settings, SettingsError> {
        self.update(|s| s.auto_mode = on)
    }

    /// An empty pattern restores the default.
    pub fn set_capture_pattern(&self, pattern: Option<&str>) -> Result<Settings, SettingsError> {
        self.update(|s| {
            s.capture_pattern = pattern
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .unwrap_or_else(default_capture_pattern);
        })
    }

    pub fn set_portal_credentials(&self, user: &str, pass: &str) -> Result<Settings, SettingsError> {
        self.update(|s| {
            s.portal_user = Some(user.to_string());
            s.portal_pass = Some(pass.to_string());
        })
    }

    pub fn clear_portal_credentials(&self) -> Result<Settings, SettingsError> {
        self.update(|s| {
            s.portal_user = None;
            s.portal_pass = None;
        })
    }
}
