use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::portal::Stage;
use crate::retry::Exhausted;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("No destination chat is saved")]
    MissingDestination,

    #[error("Invalid time expression '{0}'")]
    InvalidTime(String),

    #[error("Invalid capture pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Portal host is not configured")]
    MissingPortalHost,

    #[error("{0} is required")]
    MissingField(&'static str),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write settings file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Chat client not ready after {0:?}")]
    NotReady(Duration),

    #[error("Chat request failed: {0}")]
    Request(String),

    #[error("Chat {0} is unknown or not accessible")]
    UnknownChat(i64),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Failed to start scraper '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scraper did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("Downloads directory '{path}' is unusable: {source}")]
    Downloads {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF not found for code {code}")]
    ArtifactNotFound { code: String },

    #[error("Delivery failed after {attempts} attempts: {last}")]
    DeliveryExhausted {
        attempts: u32,
        #[source]
        last: ChatError,
    },

    #[error("Job task aborted: {0}")]
    Aborted(String),
}

impl From<Exhausted<ChatError>> for JobError {
    fn from(err: Exhausted<ChatError>) -> Self {
        JobError::DeliveryExhausted {
            attempts: err.attempts,
            last: err.last,
        }
    }
}

#[derive(Error, Debug)]
pub enum AnnounceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Failed to send announcement: {0}")]
    Chat(#[from] ChatError),
}

#[derive(Error, Debug)]
pub enum WebDriverError {
    #[error("WebDriver request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebDriver command failed ({error}): {message}")]
    Command { error: String, message: String },

    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid screenshot data: {0}")]
    Screenshot(#[from] base64::DecodeError),

    #[error("No element matched {0}")]
    NotFound(String),
}

impl WebDriverError {
    pub fn is_no_such_element(&self) -> bool {
        match self {
            WebDriverError::Command { error, .. } => error == "no such element",
            WebDriverError::NotFound(_) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("{stage}: {source}")]
    WebDriver {
        stage: Stage,
        #[source]
        source: WebDriverError,
    },

    #[error("{stage}: none of the locators matched ({tried})")]
    NotFound { stage: Stage, tried: String },

    #[error("Download did not appear within {0:?}")]
    DownloadTimeout(Duration),

    #[error("Downloads directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
