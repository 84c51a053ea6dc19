use std::sync::Arc;

use crate::chat::{ChatClient, InboundMessage};
use crate::filter::{self, Verdict, USAGE_HINT};
use crate::queue::QueueService;
use crate::settings::SettingsStore;

/// Applies the inbound filter to chat events and feeds admitted jobs to the
/// queue.
pub struct InboundRouter {
    chat: Arc<dyn ChatClient>,
    store: Arc<SettingsStore>,
    queue: QueueService,
}

impl InboundRouter {
    pub fn new(chat: Arc<dyn ChatClient>, store: Arc<SettingsStore>, queue: QueueService) -> Self {
        Self { chat, store, queue }
    }

    pub async fn handle(&self, message: InboundMessage) -> Option<Verdict> {
        let settings = match self.store.read() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, "Cannot read settings, message dropped");
                return None;
            }
        };

        let verdict = match filter::evaluate(&message, &settings) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, "Capture pattern unusable, message ignored");
                return None;
            }
        };

        match &verdict {
            Verdict::Admit(job) => {
                tracing::info!(code = %job.code, "Code detected");
                let pending = self.queue.enqueue(job.clone());
                tracing::debug!(pending, "Queue length after enqueue");
            }
            Verdict::Hint => {
                if let Err(e) = self.chat.send_text(message.chat_id, USAGE_HINT).await {
                    tracing::warn!(error = %e, "Could not send usage hint");
                }
            }
            Verdict::Ignore(reason) => {
                tracing::debug!(chat = message.chat_id.0, ?reason, "Message ignored");
            }
        }
        Some(verdict)
    }
}
