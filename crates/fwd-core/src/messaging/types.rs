use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ChatId, MessageId, UserId};

/// Opaque handle to media already stored by the messenger (Telegram `file_id`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileRef(pub String);

impl FileRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Non-text content carried by an incoming item.
///
/// An item may carry more than one attachment (Telegram sends animations with a
/// document fallback, for example); the classifier decides which one wins.
#[derive(Clone, Debug, PartialEq)]
pub enum Attachment {
    Photo(FileRef),
    Video(FileRef),
    Document(FileRef),
    Audio(FileRef),
    Voice(FileRef),
    Sticker(FileRef),
    Animation(FileRef),
    Location { latitude: f64, longitude: f64 },
    Poll,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceChat {
    pub id: ChatId,
    pub title: Option<String>,
}

impl SourceChat {
    /// Title for display, falling back to the numeric id.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => self.id.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderInfo {
    pub user_id: Option<UserId>,
    pub display_name: String,
}

/// One inbound message from a monitored source chat.
///
/// Produced by the transport adapter; the engine never mutates it.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingItem {
    pub source: SourceChat,
    pub item_id: MessageId,
    pub group_id: Option<String>,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Caption formatting as Bot API `MessageEntity` JSON. Opaque to the
    /// engine; only the transport reads it.
    pub caption_entities: Option<serde_json::Value>,
    pub attachments: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
    pub sender: Option<SenderInfo>,
}

impl IncomingItem {
    /// Text body, or the caption for media items.
    pub fn textual_content(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

/// Media kinds that have a dedicated send encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Animation,
}

impl MediaKind {
    /// Telegram albums accept only these kinds.
    pub fn groupable(self) -> bool {
        matches!(
            self,
            MediaKind::Photo | MediaKind::Video | MediaKind::Document | MediaKind::Audio
        )
    }
}

/// A media payload ready to be sent to a destination.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub file: FileRef,
    pub caption: Option<String>,
    /// Set only when `caption` is the source caption unchanged.
    pub caption_entities: Option<serde_json::Value>,
}
