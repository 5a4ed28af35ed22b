//! Hand-written port fakes shared by the engine tests.

use std::{
    collections::HashSet,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::{
    batch::BatchMetadata,
    delivery_log::DeliveryLog,
    dispatch::DestinationResult,
    domain::{ChatId, MessageId},
    errors::Error,
    messaging::{
        port::ForwardSender,
        types::{Attachment, FileRef, IncomingItem, OutgoingMedia, SenderInfo, SourceChat},
    },
    notifier::{AdminNotifier, DeliveryAlert},
    settings::RewriteSettings,
    text::TextProcessor,
    Result,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Copy { to: ChatId, from: ChatId, item: MessageId },
    Text { to: ChatId, text: String },
    Media { to: ChatId, media: OutgoingMedia },
    Group { to: ChatId, media: Vec<OutgoingMedia> },
}

#[derive(Default)]
pub struct FakeSender {
    pub sent: Mutex<Vec<Sent>>,
    pub failing: Mutex<HashSet<ChatId>>,
    next_id: Mutex<i32>,
}

impl FakeSender {
    pub fn failing_for(chats: &[ChatId]) -> Self {
        let s = Self::default();
        s.failing.lock().unwrap().extend(chats.iter().copied());
        s
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn push(&self, to: ChatId, call: Sent) -> Result<MessageId> {
        if self.failing.lock().unwrap().contains(&to) {
            return Err(Error::Delivery(format!("chat {to} unreachable")));
        }
        self.sent.lock().unwrap().push(call);
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(MessageId(1000 + *id))
    }
}

#[async_trait]
impl ForwardSender for FakeSender {
    async fn copy_message(&self, to: ChatId, from: ChatId, item: MessageId) -> Result<MessageId> {
        self.push(to, Sent::Copy { to, from, item })
    }

    async fn send_text(&self, to: ChatId, text: &str) -> Result<MessageId> {
        self.push(
            to,
            Sent::Text {
                to,
                text: text.to_string(),
            },
        )
    }

    async fn send_media(&self, to: ChatId, media: &OutgoingMedia) -> Result<MessageId> {
        self.push(
            to,
            Sent::Media {
                to,
                media: media.clone(),
            },
        )
    }

    async fn send_media_group(
        &self,
        to: ChatId,
        media: &[OutgoingMedia],
    ) -> Result<Vec<MessageId>> {
        let first = self.push(
            to,
            Sent::Group {
                to,
                media: media.to_vec(),
            },
        )?;
        Ok((0..media.len() as i32).map(|i| MessageId(first.0 + i)).collect())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<DeliveryAlert>>,
}

#[async_trait]
impl AdminNotifier for RecordingNotifier {
    async fn notify_error(&self, alert: &DeliveryAlert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

#[derive(Default)]
pub struct MemoryDeliveryLog {
    pub rows: Mutex<Vec<(DestinationResult, BatchMetadata)>>,
}

impl DeliveryLog for MemoryDeliveryLog {
    fn record(&self, result: &DestinationResult, meta: &BatchMetadata) {
        self.rows
            .lock()
            .unwrap()
            .push((result.clone(), meta.clone()));
    }
}

/// Rewriter that uppercases, fails, or hangs.
pub enum FakeRewriter {
    Upper,
    Failing,
    Hanging,
}

#[async_trait]
impl TextProcessor for FakeRewriter {
    async fn rewrite(&self, text: &str, _settings: &RewriteSettings) -> Result<String> {
        match self {
            FakeRewriter::Upper => Ok(text.to_uppercase()),
            FakeRewriter::Failing => Err(Error::Rewrite("upstream 500".to_string())),
            FakeRewriter::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(text.to_string())
            }
        }
    }
}

pub fn source() -> SourceChat {
    SourceChat {
        id: ChatId(-100),
        title: Some("Daily News".to_string()),
    }
}

pub fn text_item(id: i32, text: &str) -> IncomingItem {
    IncomingItem {
        source: source(),
        item_id: MessageId(id),
        group_id: None,
        text: Some(text.to_string()),
        caption: None,
        caption_entities: None,
        attachments: vec![],
        timestamp: Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap(),
        sender: Some(SenderInfo {
            user_id: None,
            display_name: "Alice Doe".to_string(),
        }),
    }
}

pub fn photo_item(id: i32, group: Option<&str>, caption: Option<&str>) -> IncomingItem {
    IncomingItem {
        text: None,
        group_id: group.map(str::to_string),
        caption: caption.map(str::to_string),
        caption_entities: None,
        attachments: vec![Attachment::Photo(FileRef::new(format!("photo-{id}")))],
        ..text_item(id, "")
    }
}
