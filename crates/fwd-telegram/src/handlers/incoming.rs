use teloxide::types::Message;

use fwd_core::{
    domain::{ChatId, MessageId, UserId},
    messaging::types::{Attachment, FileRef, IncomingItem, SenderInfo, SourceChat},
};

/// Map a Telegram message into the relay's transport-neutral item.
pub fn to_incoming(msg: &Message) -> IncomingItem {
    IncomingItem {
        source: SourceChat {
            id: ChatId(msg.chat.id.0),
            title: msg.chat.title().map(str::to_string),
        },
        item_id: MessageId(msg.id.0),
        group_id: msg.media_group_id().map(str::to_string),
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        caption_entities: msg
            .caption_entities()
            .filter(|e| !e.is_empty())
            .and_then(|e| serde_json::to_value(e).ok()),
        attachments: attachments(msg),
        timestamp: msg.date,
        sender: msg.from().map(|u| SenderInfo {
            user_id: Some(UserId(u.id.0 as i64)),
            display_name: u.full_name(),
        }),
    }
}

fn attachments(msg: &Message) -> Vec<Attachment> {
    let mut out = Vec::new();
    // Largest size comes last.
    if let Some(p) = msg.photo().and_then(|sizes| sizes.last()) {
        out.push(Attachment::Photo(FileRef::new(p.file.id.clone())));
    }
    if let Some(v) = msg.video() {
        out.push(Attachment::Video(FileRef::new(v.file.id.clone())));
    }
    if let Some(d) = msg.document() {
        out.push(Attachment::Document(FileRef::new(d.file.id.clone())));
    }
    if let Some(a) = msg.audio() {
        out.push(Attachment::Audio(FileRef::new(a.file.id.clone())));
    }
    if let Some(v) = msg.voice() {
        out.push(Attachment::Voice(FileRef::new(v.file.id.clone())));
    }
    if let Some(s) = msg.sticker() {
        out.push(Attachment::Sticker(FileRef::new(s.file.id.clone())));
    }
    if let Some(a) = msg.animation() {
        out.push(Attachment::Animation(FileRef::new(a.file.id.clone())));
    }
    if let Some(l) = msg.location() {
        out.push(Attachment::Location {
            latitude: l.latitude,
            longitude: l.longitude,
        });
    }
    if msg.poll().is_some() {
        out.push(Attachment::Poll);
    }
    out
}
