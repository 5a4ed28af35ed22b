use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId},
    messaging::types::OutgoingMedia,
    Result,
};

/// Outbound transport port.
///
/// Telegram is the only implementation; each method returns the ids of the
/// messages created at the destination.
#[async_trait]
pub trait ForwardSender: Send + Sync {
    /// Verbatim copy of an existing message (keeps entities and formatting).
    async fn copy_message(&self, to: ChatId, from: ChatId, item: MessageId) -> Result<MessageId>;

    async fn send_text(&self, to: ChatId, text: &str) -> Result<MessageId>;

    async fn send_media(&self, to: ChatId, media: &OutgoingMedia) -> Result<MessageId>;

    /// Send an album. Telegram delivers it as one unit or not at all.
    async fn send_media_group(&self, to: ChatId, media: &[OutgoingMedia])
        -> Result<Vec<MessageId>>;
}
