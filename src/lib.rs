pub mod announce;
pub mod artifact;
pub mod chat;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod filter;
pub mod inbound;
pub mod invoke;
pub mod logging;
pub mod pipeline;
pub mod portal;
pub mod queue;
pub mod retry;
pub mod settings;
pub mod shutdown;
pub mod telegram;
pub mod webdriver;

pub use crate::config::AppConfig;
pub use crate::settings::{Settings, SettingsStore};
