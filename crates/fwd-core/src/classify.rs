//! Content classification and keyword / type suppression.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    messaging::types::{Attachment, IncomingItem, MediaKind},
    settings::ForwardOptions,
};

/// Closed set of content tags an incoming item can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    Location,
    Poll,
    Other,
}

/// Probe order for non-text items. `Text` always wins first.
const ATTACHMENT_PRIORITY: [ContentType; 9] = [
    ContentType::Photo,
    ContentType::Video,
    ContentType::Document,
    ContentType::Audio,
    ContentType::Voice,
    ContentType::Sticker,
    ContentType::Animation,
    ContentType::Location,
    ContentType::Poll,
];

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Photo => "photo",
            ContentType::Video => "video",
            ContentType::Document => "document",
            ContentType::Audio => "audio",
            ContentType::Voice => "voice",
            ContentType::Sticker => "sticker",
            ContentType::Animation => "animation",
            ContentType::Location => "location",
            ContentType::Poll => "poll",
            ContentType::Other => "other",
        }
    }

    /// The dedicated send encoder for this tag, if there is one.
    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            ContentType::Photo => Some(MediaKind::Photo),
            ContentType::Video => Some(MediaKind::Video),
            ContentType::Document => Some(MediaKind::Document),
            ContentType::Audio => Some(MediaKind::Audio),
            ContentType::Voice => Some(MediaKind::Voice),
            ContentType::Animation => Some(MediaKind::Animation),
            _ => None,
        }
    }

    fn of_attachment(a: &Attachment) -> Self {
        match a {
            Attachment::Photo(_) => ContentType::Photo,
            Attachment::Video(_) => ContentType::Video,
            Attachment::Document(_) => ContentType::Document,
            Attachment::Audio(_) => ContentType::Audio,
            Attachment::Voice(_) => ContentType::Voice,
            Attachment::Sticker(_) => ContentType::Sticker,
            Attachment::Animation(_) => ContentType::Animation,
            Attachment::Location { .. } => ContentType::Location,
            Attachment::Poll => ContentType::Poll,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = match s.trim().to_lowercase().as_str() {
            "text" => ContentType::Text,
            "photo" => ContentType::Photo,
            "video" => ContentType::Video,
            "document" => ContentType::Document,
            "audio" => ContentType::Audio,
            "voice" => ContentType::Voice,
            "sticker" => ContentType::Sticker,
            "animation" => ContentType::Animation,
            "location" => ContentType::Location,
            "poll" => ContentType::Poll,
            "other" => ContentType::Other,
            other => return Err(format!("unknown content type: {other}")),
        };
        Ok(tag)
    }
}

/// Tag an item. Pure and total: anything unrecognized is `Other`.
pub fn classify(item: &IncomingItem) -> ContentType {
    if item.text.is_some() {
        return ContentType::Text;
    }

    ATTACHMENT_PRIORITY
        .iter()
        .copied()
        .find(|tag| {
            item.attachments
                .iter()
                .any(|a| ContentType::of_attachment(a) == *tag)
        })
        .unwrap_or(ContentType::Other)
}

/// Why an item was dropped before aggregation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterReason {
    ContentType(ContentType),
    Keyword(String),
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterReason::ContentType(t) => write!(f, "content type {t} is blocked"),
            FilterReason::Keyword(k) => write!(f, "matched keyword {k:?}"),
        }
    }
}

pub fn filter_reason(
    item: &IncomingItem,
    content_type: ContentType,
    opts: &ForwardOptions,
) -> Option<FilterReason> {
    if opts.filter_content_types.contains(&content_type) {
        return Some(FilterReason::ContentType(content_type));
    }

    let content = item.textual_content()?;
    if content.is_empty() || opts.keyword_filter.is_empty() {
        return None;
    }

    let lowered = content.to_lowercase();
    let hit = opts
        .keyword_filter
        .iter()
        .map(String::as_str)
        .filter(|k| !k.trim().is_empty())
        .find(|k| lowered.contains(&k.to_lowercase()))?;

    debug!(keyword = hit, item_id = %item.item_id, "keyword filter hit");
    Some(FilterReason::Keyword(hit.to_string()))
}

/// True when the item must be dropped instead of relayed.
pub fn should_filter(item: &IncomingItem, content_type: ContentType, opts: &ForwardOptions) -> bool {
    filter_reason(item, content_type, opts).is_some()
}
