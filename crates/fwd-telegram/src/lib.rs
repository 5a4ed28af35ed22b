//! Telegram adapter (teloxide).
//!
//! This crate implements the `fwd-core` ForwardSender and AdminNotifier
//! ports over the Telegram Bot API, and runs the long-polling loop.

use std::sync::Arc;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        InputFile, InputMedia, InputMediaAudio, InputMediaDocument, InputMediaPhoto,
        InputMediaVideo, MessageEntity,
    },
};

use tokio::time::sleep;
use tracing::warn;

pub mod handlers;
pub mod router;

use fwd_core::{
    domain::{ChatId, MessageId},
    errors::Error,
    messaging::{
        port::ForwardSender,
        types::{MediaKind, OutgoingMedia},
    },
    notifier::{AdminNotifier, DeliveryAlert},
    settings::SettingsStore,
    Result,
};

fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

fn map_err(e: teloxide::RequestError) -> Error {
    Error::Delivery(format!("telegram error: {e}"))
}

/// Retry once on Telegram flood control, then give up.
async fn with_retry<T, Fut>(mut op: impl FnMut() -> Fut) -> Result<T>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
    Fut::IntoFuture: Send,
{
    const MAX_RETRIES: usize = 1;
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => match e {
                teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                    continue;
                }
                other => return Err(map_err(other)),
            },
        }
    }
}

#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Decode caption entities carried through the engine as Bot API JSON.
fn caption_entities(media: &OutgoingMedia) -> Result<Option<Vec<MessageEntity>>> {
    match &media.caption_entities {
        Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        None => Ok(None),
    }
}

fn album_item(media: &OutgoingMedia) -> Result<InputMedia> {
    let file = InputFile::file_id(media.file.as_str());
    let caption = media.caption.clone();
    let entities = caption_entities(media)?;
    let item = match media.kind {
        MediaKind::Photo => {
            let mut m = InputMediaPhoto::new(file);
            m.caption = caption;
            m.caption_entities = entities;
            InputMedia::Photo(m)
        }
        MediaKind::Video => {
            let mut m = InputMediaVideo::new(file);
            m.caption = caption;
            m.caption_entities = entities;
            InputMedia::Video(m)
        }
        MediaKind::Document => {
            let mut m = InputMediaDocument::new(file);
            m.caption = caption;
            m.caption_entities = entities;
            InputMedia::Document(m)
        }
        MediaKind::Audio => {
            let mut m = InputMediaAudio::new(file);
            m.caption = caption;
            m.caption_entities = entities;
            InputMedia::Audio(m)
        }
        MediaKind::Voice | MediaKind::Animation => {
            return Err(Error::Delivery(format!(
                "{:?} cannot be part of a media group",
                media.kind
            )))
        }
    };
    Ok(item)
}

#[async_trait]
impl ForwardSender for TelegramSender {
    async fn copy_message(&self, to: ChatId, from: ChatId, item: MessageId) -> Result<MessageId> {
        let id = with_retry(|| {
            self.bot.copy_message(
                tg_chat(to),
                tg_chat(from),
                teloxide::types::MessageId(item.0),
            )
        })
        .await?;
        Ok(MessageId(id.0))
    }

    async fn send_text(&self, to: ChatId, text: &str) -> Result<MessageId> {
        let msg = with_retry(|| self.bot.send_message(tg_chat(to), text.to_string())).await?;
        Ok(MessageId(msg.id.0))
    }

    async fn send_media(&self, to: ChatId, media: &OutgoingMedia) -> Result<MessageId> {
        let chat = tg_chat(to);
        let file = || InputFile::file_id(media.file.as_str());
        let caption = media.caption.clone();
        let entities = caption_entities(media)?;

        macro_rules! send {
            ($method:ident) => {
                with_retry(|| {
                    let mut req = self.bot.$method(chat, file());
                    if let Some(c) = caption.clone() {
                        req = req.caption(c);
                    }
                    if let Some(e) = entities.clone() {
                        req = req.caption_entities(e);
                    }
                    req
                })
                .await?
            };
        }

        let msg = match media.kind {
            MediaKind::Photo => send!(send_photo),
            MediaKind::Video => send!(send_video),
            MediaKind::Document => send!(send_document),
            MediaKind::Audio => send!(send_audio),
            MediaKind::Voice => send!(send_voice),
            MediaKind::Animation => send!(send_animation),
        };
        Ok(MessageId(msg.id.0))
    }

    async fn send_media_group(
        &self,
        to: ChatId,
        media: &[OutgoingMedia],
    ) -> Result<Vec<MessageId>> {
        let items = media.iter().map(album_item).collect::<Result<Vec<_>>>()?;
        let msgs = with_retry(|| self.bot.send_media_group(tg_chat(to), items.clone())).await?;
        Ok(msgs.iter().map(|m| MessageId(m.id.0)).collect())
    }
}

/// Sends delivery failures to every admin listed in the current settings.
pub struct TelegramAdminNotifier {
    bot: Bot,
    settings: Arc<SettingsStore>,
}

impl TelegramAdminNotifier {
    pub fn new(bot: Bot, settings: Arc<SettingsStore>) -> Self {
        Self { bot, settings }
    }
}

#[async_trait]
impl AdminNotifier for TelegramAdminNotifier {
    async fn notify_error(&self, alert: &DeliveryAlert) {
        let text = alert.render();
        let admins = self.settings.snapshot().admins.clone();
        for admin in admins {
            let chat = teloxide::types::ChatId(admin.0);
            if let Err(e) = self.bot.send_message(chat, text.clone()).await {
                warn!(admin = %admin.0, error = %e, "failed to notify admin");
            }
        }
    }
}
