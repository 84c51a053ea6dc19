//! Telegram implementation of the chat client, built on teloxide.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use teloxide::payloads::SendDocumentSetters;
use teloxide::prelude::*;
use teloxide::types::{Chat, InputFile, UserId};
use tracing::instrument;

use crate::chat::{ChatClient, DestinationInfo, InboundMessage, ReadyGate};
use crate::error::ChatError;
use crate::inbound::InboundRouter;
use crate::shutdown::Shutdown;

pub struct TelegramChat {
    bot: Bot,
    ready: ReadyGate,
    me: OnceLock<UserId>,
    known: RwLock<BTreeMap<i64, String>>,
}

fn chat_name(chat: &Chat) -> String {
    chat.title()
        .or_else(|| chat.username())
        .or_else(|| chat.first_name())
        .map(str::to_string)
        .unwrap_or_else(|| "(unnamed)".to_string())
}

fn request_error(e: teloxide::RequestError) -> ChatError {
    ChatError::Request(e.to_string())
}

impl TelegramChat {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            ready: ReadyGate::default(),
            me: OnceLock::new(),
            known: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Verifies the token and marks the client ready.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), ChatError> {
        let me = self.bot.get_me().await.map_err(request_error)?;
        let _ = self.me.set(me.user.id);
        tracing::info!(username = ?me.user.username, "Telegram client ready");
        self.ready.set(true);
        Ok(())
    }

    fn remember(&self, chat: &Chat) {
        let mut known = self
            .known
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        known.insert(chat.id.0, chat_name(chat));
    }

    /// Converts a text message into the filter's view of it. Non-text
    /// messages yield `None`.
    pub fn to_inbound(&self, msg: &Message, is_broadcast: bool) -> Option<InboundMessage> {
        self.remember(&msg.chat);
        let body = msg.text()?;
        let from_self = match (msg.from(), self.me.get()) {
            (Some(user), Some(me)) => user.id == *me,
            _ => false,
        };
        Some(InboundMessage {
            chat_id: msg.chat.id,
            body: body.to_string(),
            from_self,
            is_broadcast: is_broadcast || msg.chat.is_channel(),
        })
    }
}

#[async_trait]
impl ChatClient for TelegramChat {
    fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<(), ChatError> {
        self.ready.wait(timeout).await
    }

    async fn send_text(&self, to: ChatId, text: &str) -> Result<(), ChatError> {
        self.bot
            .send_message(to, text)
            .await
            .map(|_| ())
            .map_err(request_error)
    }

    async fn send_document(&self, to: ChatId, path: &Path, caption: &str) -> Result<(), ChatError> {
        self.bot
            .send_document(to, InputFile::file(path.to_path_buf()))
            .caption(caption)
            .await
            .map(|_| ())
            .map_err(request_error)
    }

    async fn lookup_destination(&self, id: ChatId) -> Result<String, ChatError> {
        let chat = self.bot.get_chat(id).await.map_err(|e| {
            tracing::warn!(chat = id.0, error = %e, "Chat lookup failed");
            ChatError::UnknownChat(id.0)
        })?;
        self.remember(&chat);
        Ok(chat_name(&chat))
    }

    fn known_destinations(&self) -> Vec<DestinationInfo> {
        let known = self
            .known
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut list: Vec<DestinationInfo> = known
            .iter()
            .map(|(id, name)| DestinationInfo {
                id: ChatId(*id),
                name: name.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        list
    }
}

async fn on_message(
    msg: Message,
    chat: Arc<TelegramChat>,
    router: Arc<InboundRouter>,
) -> ResponseResult<()> {
    if let Some(inbound) = chat.to_inbound(&msg, false) {
        tracing::debug!(chat = inbound.chat_id.0, body = %inbound.body, "Message received");
        router.handle(inbound).await;
    }
    Ok(())
}

async fn on_channel_post(
    msg: Message,
    chat: Arc<TelegramChat>,
    router: Arc<InboundRouter>,
) -> ResponseResult<()> {
    if let Some(inbound) = chat.to_inbound(&msg, true) {
        router.handle(inbound).await;
    }
    Ok(())
}

/// Long-polls Telegram until `shutdown` fires.
pub async fn run_dispatcher(chat: Arc<TelegramChat>, router: Arc<InboundRouter>, shutdown: Shutdown) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_channel_post().endpoint(on_channel_post));

    let mut dispatcher = Dispatcher::builder(chat.bot().clone(), handler)
        .dependencies(dptree::deps![Arc::clone(&chat), router])
        .default_handler(|_| async {})
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown.wait().await;
        // an idle dispatcher refuses the token, so retry until it has started
        loop {
            match token.shutdown() {
                Ok(done) => break done.await,
                Err(e) => {
                    tracing::debug!(error = %e, "Dispatcher not running yet");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    tracing::info!("Listening for chat messages");
    dispatcher.dispatch().await;
    tracing::info!("Dispatcher stopped");
}
