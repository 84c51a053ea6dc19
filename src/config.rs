use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Bootstrap configuration of the bot process.
///
/// Loaded from an optional TOML file and overlaid with `BOT_*` environment
/// variables (`BOT_TELEGRAM_TOKEN`, `BOT_HTTP_BIND`, ...). Values that the
/// dashboard can change at runtime live in [`crate::settings::Settings`].
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AppConfig {
    pub telegram_token: String,
    pub http_bind: String,
    pub settings_path: PathBuf,
    pub downloads_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Defaults to the `portal-scraper` binary next to the bot executable.
    pub scraper_program: Option<PathBuf>,
    pub scraper_args: Vec<String>,
    pub scraper_timeout_secs: u64,
    pub delivery_attempts: u32,
    pub delivery_delay_ms: u64,
    pub ready_timeout_secs: u64,
    /// Shut down when no destination is saved this long after the chat
    /// client became ready. Zero disables the watchdog.
    pub no_destination_exit_mins: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            http_bind: "127.0.0.1:3000".to_string(),
            settings_path: PathBuf::from("data/settings.json"),
            downloads_dir: PathBuf::from("downloads"),
            logs_dir: PathBuf::from("logs"),
            scraper_program: None,
            scraper_args: Vec::new(),
            scraper_timeout_secs: 300,
            delivery_attempts: 3,
            delivery_delay_ms: 2000,
            ready_timeout_secs: 180,
            no_destination_exit_mins: 60,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("BOT"))
            .build()?;

        let mut app: AppConfig = settings.try_deserialize()?;
        if app.telegram_token.is_empty() {
            if let Ok(token) = std::env::var("TELOXIDE_TOKEN") {
                app.telegram_token = token;
            }
        }
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_token.trim().is_empty() {
            return Err(ConfigError::MissingField("telegram_token"));
        }
        if self.delivery_attempts == 0 {
            return Err(ConfigError::MissingField("delivery_attempts (at least 1)"));
        }
        Ok(())
    }

    pub fn scraper_program(&self) -> PathBuf {
        if let Some(program) = &self.scraper_program {
            return program.clone();
        }
        let name = format!("portal-scraper{}", std::env::consts::EXE_SUFFIX);
        std::env::current_exe()
            .map(|exe| exe.with_file_name(&name))
            .unwrap_or_else(|_| PathBuf::from(name))
    }

    pub fn scraper_timeout(&self) -> Duration {
        Duration::from_secs(self.scraper_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn delivery_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.delivery_attempts,
            Duration::from_millis(self.delivery_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.toml");
        std::fs::write(
            &path,
            "telegram_token = \"123:abc\"\nscraper_timeout_secs = 90\ndelivery_attempts = 5\n",
        )
        .unwrap();

        let app = AppConfig::load(&path).unwrap();
        assert_eq!(app.telegram_token, "123:abc");
        assert_eq!(app.scraper_timeout(), Duration::from_secs(90));
        assert_eq!(app.delivery_attempts, 5);
        assert_eq!(app.http_bind, "127.0.0.1:3000");
        assert_eq!(app.downloads_dir, PathBuf::from("downloads"));
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.toml");
        std::fs::write(&path, "telegram_token = \"t\"\ndelivery_attempts = 0\n").unwrap();

        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_explicit_scraper_program_wins() {
        let app = AppConfig {
            scraper_program: Some(PathBuf::from("/opt/bot/scraper")),
            ..AppConfig::default()
        };
        assert_eq!(app.scraper_program(), PathBuf::from("/opt/bot/scraper"));
    }
}
