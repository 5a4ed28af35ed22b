use serde::Serialize;

use crate::{
    classify::{classify, ContentType},
    domain::{ChatId, MessageId},
    messaging::types::{IncomingItem, SourceChat},
};

/// One logical forwarding unit: a single item, or a finalized media group.
///
/// Always non-empty; items are sorted ascending by `item_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardBatch {
    group_id: Option<String>,
    items: Vec<IncomingItem>,
}

impl ForwardBatch {
    pub fn single(item: IncomingItem) -> Self {
        Self {
            group_id: item.group_id.clone(),
            items: vec![item],
        }
    }

    /// Build a batch from buffered group items. Returns `None` for an empty buffer.
    pub fn from_group(group_id: String, mut items: Vec<IncomingItem>) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        items.sort_by_key(|i| i.item_id);
        Some(Self {
            group_id: Some(group_id),
            items,
        })
    }

    pub fn items(&self) -> &[IncomingItem] {
        &self.items
    }

    /// The item that carries the caption for the whole batch.
    pub fn lead(&self) -> &IncomingItem {
        &self.items[0]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// More than one item: delivered as an album.
    pub fn is_media_group(&self) -> bool {
        self.items.len() > 1
    }

    pub fn source(&self) -> &SourceChat {
        &self.lead().source
    }

    pub fn metadata(&self) -> BatchMetadata {
        BatchMetadata {
            source_chat_id: self.source().id,
            source_title: self.source().title.clone(),
            item_ids: self.items.iter().map(|i| i.item_id).collect(),
            group_id: self.group_id.clone(),
            content_types: self.items.iter().map(classify).collect(),
            is_media_group: self.is_media_group(),
        }
    }
}

/// Log-friendly description of a batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchMetadata {
    pub source_chat_id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    pub item_ids: Vec<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content_types: Vec<ContentType>,
    pub is_media_group: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: i32) -> IncomingItem {
        IncomingItem {
            source: SourceChat {
                id: ChatId(-1),
                title: Some("src".to_string()),
            },
            item_id: MessageId(id),
            group_id: Some("g".to_string()),
            text: None,
            caption: None,
            caption_entities: None,
            attachments: vec![],
            timestamp: Utc::now(),
            sender: None,
        }
    }

    #[test]
    fn group_batches_sort_by_item_id() {
        let batch = ForwardBatch::from_group("g".to_string(), vec![item(9), item(2), item(5)])
            .unwrap();
        let ids: Vec<i32> = batch.items().iter().map(|i| i.item_id.0).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        assert_eq!(batch.lead().item_id, MessageId(2));
        assert!(batch.is_media_group());
    }

    #[test]
    fn empty_group_is_not_a_batch() {
        assert!(ForwardBatch::from_group("g".to_string(), vec![]).is_none());
    }

    #[test]
    fn metadata_lists_ids_and_types() {
        let meta = ForwardBatch::single(item(4)).metadata();
        assert_eq!(meta.item_ids, vec![MessageId(4)]);
        assert_eq!(meta.content_types, vec![ContentType::Other]);
        assert!(!meta.is_media_group);
        assert_eq!(meta.source_chat_id, ChatId(-1));
    }
}
