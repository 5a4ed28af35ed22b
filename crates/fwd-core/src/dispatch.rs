//! Fan-out of finalized batches to every destination.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    batch::ForwardBatch,
    classify::classify,
    delivery_log::DeliveryLog,
    domain::{ChatId, MessageId},
    messaging::{
        port::ForwardSender,
        types::{Attachment, FileRef, IncomingItem, MediaKind, OutgoingMedia},
    },
    notifier::{AdminNotifier, DeliveryAlert},
    settings::Settings,
    stats::ForwardStats,
    text::TextProcessor,
    utils::display_timestamp,
    Result,
};

const DEFAULT_REWRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one batch at one destination.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DestinationResult {
    pub destination: ChatId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Items of the batch that reached the destination.
    pub delivered: usize,
    /// Messages created at the destination.
    pub forwarded_ids: Vec<MessageId>,
}

impl DestinationResult {
    fn ok(destination: ChatId, delivered: usize, forwarded_ids: Vec<MessageId>) -> Self {
        Self {
            destination,
            success: true,
            error: None,
            delivered,
            forwarded_ids,
        }
    }

    fn failed(destination: ChatId, error: impl Into<String>) -> Self {
        Self {
            destination,
            success: false,
            error: Some(error.into()),
            delivered: 0,
            forwarded_ids: Vec::new(),
        }
    }
}

/// What a batch turns into at a destination. Built once per batch.
#[derive(Clone, Debug, PartialEq)]
enum Outgoing {
    Copy { from: ChatId, item: MessageId },
    Text(String),
    Media(OutgoingMedia),
    Group(Vec<OutgoingMedia>),
}

impl Outgoing {
    async fn send(&self, sender: &dyn ForwardSender, to: ChatId) -> Result<Vec<MessageId>> {
        match self {
            Outgoing::Copy { from, item } => Ok(vec![sender.copy_message(to, *from, *item).await?]),
            Outgoing::Text(text) => Ok(vec![sender.send_text(to, text).await?]),
            Outgoing::Media(media) => Ok(vec![sender.send_media(to, media).await?]),
            Outgoing::Group(media) => sender.send_media_group(to, media).await,
        }
    }
}

pub struct ForwardDispatcher {
    sender: Arc<dyn ForwardSender>,
    text: Arc<dyn TextProcessor>,
    log: Arc<dyn DeliveryLog>,
    notifier: Arc<dyn AdminNotifier>,
    stats: Arc<ForwardStats>,
    rewrite_timeout: Duration,
}

impl ForwardDispatcher {
    pub fn new(
        sender: Arc<dyn ForwardSender>,
        text: Arc<dyn TextProcessor>,
        log: Arc<dyn DeliveryLog>,
        notifier: Arc<dyn AdminNotifier>,
        stats: Arc<ForwardStats>,
    ) -> Self {
        Self {
            sender,
            text,
            log,
            notifier,
            stats,
            rewrite_timeout: DEFAULT_REWRITE_TIMEOUT,
        }
    }

    pub fn with_rewrite_timeout(mut self, timeout: Duration) -> Self {
        self.rewrite_timeout = timeout;
        self
    }

    /// Deliver `batch` to every target in `settings`.
    ///
    /// Always returns one result per target, in target order. A failing
    /// destination never affects the others.
    pub async fn dispatch(&self, batch: &ForwardBatch, settings: &Settings) -> Vec<DestinationResult> {
        if settings.targets.is_empty() {
            debug!(source = %batch.source().id, "no destinations configured; batch dropped");
            return Vec::new();
        }

        let delay = settings.forwarding.forward_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let plan = self.render(batch, settings).await;

        let mut handles = Vec::with_capacity(settings.targets.len());
        for &to in &settings.targets {
            let sender = Arc::clone(&self.sender);
            let plan = plan.clone();
            let items = batch.len();
            handles.push((
                to,
                tokio::spawn(async move {
                    let outgoing = match plan {
                        Ok(o) => o,
                        Err(e) => return DestinationResult::failed(to, e),
                    };
                    match outgoing.send(sender.as_ref(), to).await {
                        Ok(ids) => DestinationResult::ok(to, items, ids),
                        Err(e) => DestinationResult::failed(to, e.to_string()),
                    }
                }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (to, handle) in handles {
            let result = handle
                .await
                .unwrap_or_else(|e| DestinationResult::failed(to, format!("send task failed: {e}")));
            results.push(result);
        }

        let meta = batch.metadata();
        let mut alerts = Vec::new();
        for result in &results {
            self.log.record(result, &meta);
            self.stats
                .record_content_outcome(&meta.content_types, result.success);
            if result.success {
                self.stats
                    .record_delivery(result.delivered, batch.is_media_group());
                info!(
                    source = %batch.source().id,
                    destination = %result.destination,
                    items = result.delivered,
                    "forwarded"
                );
                continue;
            }

            self.stats.record_failure(batch.len());
            let error = result.error.clone().unwrap_or_default();
            warn!(
                source = %batch.source().id,
                destination = %result.destination,
                error = %error,
                "forward failed"
            );
            if settings.notifications.notify_admin_on_error {
                alerts.push(DeliveryAlert {
                    source: batch.source().clone(),
                    destination: result.destination,
                    error,
                    timestamp: Utc::now(),
                });
            }
        }

        // Admin sends must not hold up the next batch.
        if !alerts.is_empty() {
            let notifier = Arc::clone(&self.notifier);
            tokio::spawn(async move {
                for alert in &alerts {
                    notifier.notify_error(alert).await;
                }
            });
        }

        results
    }

    async fn render(
        &self,
        batch: &ForwardBatch,
        settings: &Settings,
    ) -> std::result::Result<Outgoing, String> {
        let transform = settings.needs_transform();
        let lead = batch.lead();

        if batch.is_media_group() {
            let mut media = Vec::with_capacity(batch.len());
            for item in batch.items() {
                // Untransformed albums keep each item's caption and formatting as sent.
                let (caption, entities) = if transform {
                    (None, None)
                } else {
                    (item.caption.clone(), item.caption_entities.clone())
                };
                let m = outgoing_media(item, caption, entities)
                    .filter(|m| m.kind.groupable())
                    .ok_or_else(|| {
                        format!(
                            "media group item {} ({}) cannot be sent in an album",
                            item.item_id,
                            classify(item)
                        )
                    })?;
                media.push(m);
            }
            if transform {
                // Albums are usually captioned on one item only, not always the first.
                let captioned = batch
                    .items()
                    .iter()
                    .find(|i| i.textual_content().is_some_and(|t| !t.trim().is_empty()))
                    .unwrap_or(lead);
                let caption = self.build_caption(captioned, settings).await;
                if let Some(first) = media.first_mut() {
                    first.caption = non_blank(caption);
                }
            }
            return Ok(Outgoing::Group(media));
        }

        let copy = Outgoing::Copy {
            from: lead.source.id,
            item: lead.item_id,
        };
        if !transform {
            return Ok(copy);
        }

        if lead.text.is_some() {
            let text = self.build_caption(lead, settings).await;
            return Ok(match non_blank(text) {
                Some(t) => Outgoing::Text(t),
                None => copy,
            });
        }

        if classify(lead).media_kind().is_none() {
            return Ok(copy);
        }
        let caption = self.build_caption(lead, settings).await;
        Ok(outgoing_media(lead, non_blank(caption), None)
            .map(Outgoing::Media)
            .unwrap_or(copy))
    }

    /// substitute, then rewrite, then append the source block.
    async fn build_caption(&self, item: &IncomingItem, settings: &Settings) -> String {
        let original = item.textual_content().unwrap_or_default();
        let mut text = self.text.substitute(original, &settings.substitutions);

        if settings.rewrite.enabled && !text.trim().is_empty() {
            match tokio::time::timeout(self.rewrite_timeout, self.text.rewrite(&text, &settings.rewrite))
                .await
            {
                Ok(Ok(rewritten)) if !rewritten.trim().is_empty() => text = rewritten,
                Ok(Ok(_)) => warn!(item_id = %item.item_id, "rewrite returned empty text; keeping original"),
                Ok(Err(e)) => warn!(item_id = %item.item_id, error = %e, "rewrite failed; keeping original"),
                Err(_) => warn!(
                    item_id = %item.item_id,
                    timeout_ms = self.rewrite_timeout.as_millis() as u64,
                    "rewrite timed out; keeping original"
                ),
            }
        }

        if !settings.forwarding.add_source_info {
            return text;
        }

        let mut block = format!(
            "📢 Source: {}\n⏰ Time: {}",
            item.source.display_name(),
            display_timestamp(item.timestamp)
        );
        if settings.forwarding.preserve_sender {
            if let Some(sender) = &item.sender {
                block.push_str(&format!("\n👤 Sender: {}", sender.display_name));
            }
        }

        if text.trim().is_empty() {
            block
        } else {
            format!("{text}\n\n{block}")
        }
    }
}

/// Media payload for the item's classified type, if it has a send encoder.
fn outgoing_media(
    item: &IncomingItem,
    caption: Option<String>,
    caption_entities: Option<serde_json::Value>,
) -> Option<OutgoingMedia> {
    let kind = classify(item).media_kind()?;
    let file = item
        .attachments
        .iter()
        .find_map(|a| file_of_kind(a, kind))?
        .clone();
    Some(OutgoingMedia {
        kind,
        file,
        caption,
        caption_entities,
    })
}

fn file_of_kind(attachment: &Attachment, kind: MediaKind) -> Option<&FileRef> {
    match (attachment, kind) {
        (Attachment::Photo(f), MediaKind::Photo)
        | (Attachment::Video(f), MediaKind::Video)
        | (Attachment::Document(f), MediaKind::Document)
        | (Attachment::Audio(f), MediaKind::Audio)
        | (Attachment::Voice(f), MediaKind::Voice)
        | (Attachment::Animation(f), MediaKind::Animation) => Some(f),
        _ => None,
    }
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messaging::types::SourceChat,
        settings::SubstitutionRule,
        testing::{
            photo_item, text_item, FakeRewriter, FakeSender, MemoryDeliveryLog,
            RecordingNotifier, Sent,
        },
        text::SubstitutionOnly,
    };
    use tokio::time::Instant;

    const X: ChatId = ChatId(-201);
    const Y: ChatId = ChatId(-202);

    struct Harness {
        sender: Arc<FakeSender>,
        notifier: Arc<RecordingNotifier>,
        log: Arc<MemoryDeliveryLog>,
        stats: Arc<ForwardStats>,
        dispatcher: ForwardDispatcher,
    }

    fn harness(sender: FakeSender, text: Arc<dyn TextProcessor>) -> Harness {
        let sender = Arc::new(sender);
        let notifier = Arc::new(RecordingNotifier::default());
        let log = Arc::new(MemoryDeliveryLog::default());
        let stats = Arc::new(ForwardStats::new());
        let dispatcher = ForwardDispatcher::new(
            sender.clone(),
            text,
            log.clone(),
            notifier.clone(),
            stats.clone(),
        );
        Harness {
            sender,
            notifier,
            log,
            stats,
            dispatcher,
        }
    }

    /// Let background alert tasks run.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn passthrough(targets: Vec<ChatId>) -> Settings {
        let mut s = Settings::default();
        s.targets = targets;
        s.forwarding.add_source_info = false;
        s
    }

    #[tokio::test]
    async fn failing_destination_does_not_affect_others() {
        let h = harness(FakeSender::failing_for(&[X]), Arc::new(SubstitutionOnly));
        let batch = ForwardBatch::single(text_item(7, "hello"));

        let results = h.dispatcher.dispatch(&batch, &passthrough(vec![X, Y])).await;
        settle().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].destination, X);
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("unreachable"));
        assert_eq!(results[1].destination, Y);
        assert!(results[1].success);
        assert_eq!(results[1].delivered, 1);

        let alerts = h.notifier.alerts.lock().unwrap().clone();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].destination, X);
        assert_eq!(alerts[0].source.id, ChatId(-100));

        assert_eq!(h.log.rows.lock().unwrap().len(), 2);
        let snap = h.stats.snapshot();
        assert_eq!((snap.forwarded, snap.failed), (1, 1));
        let by_type = h.stats.by_content_type();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].content_type, crate::classify::ContentType::Text);
        assert_eq!((by_type[0].forwarded, by_type[0].failed), (1, 1));
    }

    struct StalledNotifier;

    #[async_trait::async_trait]
    impl AdminNotifier for StalledNotifier {
        async fn notify_error(&self, _alert: &DeliveryAlert) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_admin_alerts_do_not_hold_up_dispatch() {
        let dispatcher = ForwardDispatcher::new(
            Arc::new(FakeSender::failing_for(&[X])),
            Arc::new(SubstitutionOnly),
            Arc::new(MemoryDeliveryLog::default()),
            Arc::new(StalledNotifier),
            Arc::new(ForwardStats::new()),
        );

        let start = Instant::now();
        let results = dispatcher
            .dispatch(&ForwardBatch::single(text_item(1, "x")), &passthrough(vec![X, Y]))
            .await;

        assert_eq!(results.len(), 2);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn notifications_can_be_disabled() {
        let h = harness(FakeSender::failing_for(&[X]), Arc::new(SubstitutionOnly));
        let mut settings = passthrough(vec![X]);
        settings.notifications.notify_admin_on_error = false;

        let results = h
            .dispatcher
            .dispatch(&ForwardBatch::single(text_item(1, "hi")), &settings)
            .await;
        settle().await;

        assert!(!results[0].success);
        assert!(h.notifier.alerts.lock().unwrap().is_empty());
        assert_eq!(h.log.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn passthrough_copies_verbatim() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let batch = ForwardBatch::single(photo_item(9, None, Some("original")));

        let results = h.dispatcher.dispatch(&batch, &passthrough(vec![Y])).await;

        assert!(results[0].success);
        assert_eq!(
            h.sender.sent(),
            vec![Sent::Copy {
                to: Y,
                from: ChatId(-100),
                item: MessageId(9)
            }]
        );
    }

    #[tokio::test]
    async fn photo_caption_gets_substitutions_and_source_block() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let mut settings = Settings::default();
        settings.targets = vec![Y];
        settings.substitutions = vec![SubstitutionRule {
            from: "cats".to_string(),
            to: "dogs".to_string(),
        }];

        let batch = ForwardBatch::single(photo_item(4, None, Some("I like cats")));
        h.dispatcher.dispatch(&batch, &settings).await;

        let sent = h.sender.sent();
        let Sent::Media { media, .. } = &sent[0] else {
            panic!("expected media send, got {sent:?}");
        };
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.file, FileRef::new("photo-4"));
        assert_eq!(
            media.caption.as_deref(),
            Some(
                "I like dogs\n\n📢 Source: Daily News\n⏰ Time: 2026-05-06 07:08:09\n👤 Sender: Alice Doe"
            )
        );
    }

    #[tokio::test]
    async fn sender_line_follows_preserve_sender() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let mut settings = Settings::default();
        settings.targets = vec![Y];
        settings.forwarding.preserve_sender = false;

        h.dispatcher
            .dispatch(&ForwardBatch::single(text_item(1, "news")), &settings)
            .await;

        assert_eq!(
            h.sender.sent(),
            vec![Sent::Text {
                to: Y,
                text: "news\n\n📢 Source: Daily News\n⏰ Time: 2026-05-06 07:08:09".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn group_caption_goes_on_the_first_item_only() {
        let h = harness(FakeSender::default(), Arc::new(FakeRewriter::Upper));
        let mut settings = Settings::default();
        settings.targets = vec![X, Y];
        settings.forwarding.add_source_info = false;
        settings.rewrite.enabled = true;

        let batch = ForwardBatch::from_group(
            "g".to_string(),
            vec![
                photo_item(6, Some("g"), None),
                photo_item(5, Some("g"), Some("album text")),
            ],
        )
        .unwrap();
        let results = h.dispatcher.dispatch(&batch, &settings).await;

        assert!(results.iter().all(|r| r.success && r.delivered == 2));
        assert_eq!(results[0].forwarded_ids.len(), 2);
        let sent = h.sender.sent();
        assert_eq!(sent.len(), 2);
        for s in sent {
            let Sent::Group { media, .. } = s else {
                panic!("expected album");
            };
            assert_eq!(media[0].file, FileRef::new("photo-5"));
            assert_eq!(media[0].caption.as_deref(), Some("ALBUM TEXT"));
            assert_eq!(media[1].caption, None);
        }
        assert_eq!(h.stats.snapshot().media_groups, 2);
    }

    fn bold_caption(id: i32, caption: &str) -> IncomingItem {
        let mut item = photo_item(id, Some("g"), Some(caption));
        item.caption_entities = Some(serde_json::json!([
            { "type": "bold", "offset": 0, "length": caption.chars().count() },
            { "type": "text_link", "offset": 0, "length": 1, "url": "https://example.com/" }
        ]));
        item
    }

    #[tokio::test]
    async fn passthrough_group_keeps_item_captions_and_formatting() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let first = bold_caption(1, "a");
        let second = photo_item(2, Some("g"), Some("b"));
        let batch =
            ForwardBatch::from_group("g".to_string(), vec![first.clone(), second]).unwrap();

        h.dispatcher.dispatch(&batch, &passthrough(vec![Y])).await;

        let Sent::Group { media, .. } = &h.sender.sent()[0] else {
            panic!("expected album");
        };
        let captions: Vec<_> = media.iter().map(|m| m.caption.as_deref()).collect();
        assert_eq!(captions, vec![Some("a"), Some("b")]);
        assert_eq!(media[0].caption_entities, first.caption_entities);
        assert_eq!(media[1].caption_entities, None);
    }

    #[tokio::test]
    async fn rebuilt_captions_drop_source_formatting() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let batch = ForwardBatch::from_group(
            "g".to_string(),
            vec![bold_caption(1, "a"), bold_caption(2, "b")],
        )
        .unwrap();
        let mut settings = Settings::default();
        settings.targets = vec![Y];

        h.dispatcher.dispatch(&batch, &settings).await;

        let Sent::Group { media, .. } = &h.sender.sent()[0] else {
            panic!("expected album");
        };
        assert!(media[0].caption.as_deref().unwrap().contains("📢 Source: Daily News"));
        assert!(media.iter().all(|m| m.caption_entities.is_none()));
    }

    #[tokio::test]
    async fn unbuildable_group_fails_every_destination() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let mut sticker = photo_item(2, Some("g"), None);
        sticker.attachments = vec![Attachment::Sticker(FileRef::new("st"))];
        let batch = ForwardBatch::from_group("g".to_string(), vec![photo_item(1, Some("g"), None), sticker])
            .unwrap();

        let results = h.dispatcher.dispatch(&batch, &passthrough(vec![X, Y])).await;
        settle().await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
        assert!(results[0].error.as_deref().unwrap().contains("sticker"));
        assert!(h.sender.sent().is_empty());
        assert_eq!(h.notifier.alerts.lock().unwrap().len(), 2);
        assert_eq!(h.stats.snapshot().failed, 4);
    }

    #[tokio::test]
    async fn rewrite_failure_falls_back_to_substituted_text() {
        let h = harness(FakeSender::default(), Arc::new(FakeRewriter::Failing));
        let mut settings = passthrough(vec![Y]);
        settings.rewrite.enabled = true;

        let results = h
            .dispatcher
            .dispatch(&ForwardBatch::single(text_item(1, "keep me")), &settings)
            .await;

        assert!(results[0].success);
        assert_eq!(
            h.sender.sent(),
            vec![Sent::Text {
                to: Y,
                text: "keep me".to_string()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rewrite_timeout_falls_back() {
        let h = harness(FakeSender::default(), Arc::new(FakeRewriter::Hanging));
        let dispatcher = h.dispatcher.with_rewrite_timeout(Duration::from_secs(5));
        let mut settings = passthrough(vec![Y]);
        settings.rewrite.enabled = true;

        let start = Instant::now();
        dispatcher
            .dispatch(&ForwardBatch::single(text_item(1, "slow")), &settings)
            .await;

        assert!(start.elapsed() < Duration::from_secs(6));
        assert_eq!(
            h.sender.sent(),
            vec![Sent::Text {
                to: Y,
                text: "slow".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn no_destinations_means_no_results() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let results = h
            .dispatcher
            .dispatch(&ForwardBatch::single(text_item(1, "x")), &passthrough(vec![]))
            .await;
        assert!(results.is_empty());
        assert!(h.log.rows.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forward_delay_is_applied_once_per_batch() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let mut settings = passthrough(vec![X, Y, ChatId(-203)]);
        settings.forwarding.delay_seconds = 2.0;

        let start = Instant::now();
        let results = h
            .dispatcher
            .dispatch(&ForwardBatch::single(text_item(1, "x")), &settings)
            .await;

        assert_eq!(results.len(), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn location_with_source_info_is_copied() {
        let h = harness(FakeSender::default(), Arc::new(SubstitutionOnly));
        let mut settings = Settings::default();
        settings.targets = vec![Y];
        let mut item = photo_item(3, None, None);
        item.attachments = vec![Attachment::Location {
            latitude: 1.0,
            longitude: 2.0,
        }];
        item.source = SourceChat {
            id: ChatId(-5),
            title: None,
        };

        h.dispatcher.dispatch(&ForwardBatch::single(item), &settings).await;

        assert_eq!(
            h.sender.sent(),
            vec![Sent::Copy {
                to: Y,
                from: ChatId(-5),
                item: MessageId(3)
            }]
        );
    }
}
