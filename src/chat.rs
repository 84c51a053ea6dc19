//! The chat client seam: inbound text events and outbound sends.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use teloxide::types::ChatId;
use tokio::sync::watch;

use crate::error::ChatError;

/// One inbound text event as seen by the filter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub body: String,
    pub from_self: bool,
    /// Channel posts and other broadcast-style updates.
    pub is_broadcast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationInfo {
    pub id: ChatId,
    pub name: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    fn is_ready(&self) -> bool;

    /// Resolves once the client can send, or fails after `timeout`.
    async fn wait_ready(&self, timeout: Duration) -> Result<(), ChatError>;

    async fn send_text(&self, to: ChatId, text: &str) -> Result<(), ChatError>;

    async fn send_document(&self, to: ChatId, path: &Path, caption: &str) -> Result<(), ChatError>;

    /// Display name of a chat the client can reach.
    async fn lookup_destination(&self, id: ChatId) -> Result<String, ChatError>;

    /// Chats the client has seen traffic from, sorted by name.
    fn known_destinations(&self) -> Vec<DestinationInfo>;
}

/// Readiness flag shared between the client and everything that sends.
#[derive(Debug)]
pub struct ReadyGate {
    tx: watch::Sender<bool>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }
}

impl ReadyGate {
    pub fn set(&self, ready: bool) {
        self.tx.send_replace(ready);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self, timeout: Duration) -> Result<(), ChatError> {
        let mut rx = self.tx.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        if ready {
            Ok(())
        } else {
            Err(ChatError::NotReady(timeout))
        }
    }
}
