//! Decides whether an inbound chat message becomes a job.

use regex::Regex;

use crate::chat::InboundMessage;
use crate::error::ConfigError;
use crate::queue::Job;
use crate::settings::Settings;

pub const USAGE_HINT: &str = "⚠️ Send a single numeric supplier code per message.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Broadcast,
    FromSelf,
    NoDestination,
    OtherChat,
    AutoModeOff,
    EmptyBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admit(Job),
    /// Rejected silently.
    Ignore(IgnoreReason),
    /// Rejected with one usage hint sent back to the destination.
    Hint,
}

/// Compiles a capture pattern so that it must match the whole body.
pub fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Codes end up as a scraper argument and a file name under the downloads
/// directory, so flags, path separators, commas and control characters are
/// refused whatever the capture pattern says.
pub fn usable_code(code: &str) -> bool {
    !code.is_empty()
        && !code.starts_with('-')
        && code != "."
        && code != ".."
        && !code
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ',') || c.is_control() || c.is_whitespace())
}

pub fn evaluate(message: &InboundMessage, settings: &Settings) -> Result<Verdict, ConfigError> {
    if message.is_broadcast {
        return Ok(Verdict::Ignore(IgnoreReason::Broadcast));
    }
    if message.from_self {
        return Ok(Verdict::Ignore(IgnoreReason::FromSelf));
    }
    let Some(destination) = settings.destination_chat_id else {
        return Ok(Verdict::Ignore(IgnoreReason::NoDestination));
    };
    if message.chat_id != destination {
        return Ok(Verdict::Ignore(IgnoreReason::OtherChat));
    }
    if !settings.auto_mode {
        return Ok(Verdict::Ignore(IgnoreReason::AutoModeOff));
    }

    let body = message.body.trim();
    if body.is_empty() {
        return Ok(Verdict::Ignore(IgnoreReason::EmptyBody));
    }

    let pattern = compile_pattern(&settings.capture_pattern)?;
    if pattern.is_match(body) && usable_code(body) {
        Ok(Verdict::Admit(Job::new(body, destination)))
    } else {
        Ok(Verdict::Hint)
    }
}
