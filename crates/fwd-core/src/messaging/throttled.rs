use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageId},
    messaging::{port::ForwardSender, types::OutgoingMedia},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* two sends (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to one destination chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

/// Next free send slot for one scope (global, or one destination).
#[derive(Debug)]
struct SlotClock {
    interval: Duration,
    next: Instant,
}

impl SlotClock {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next: now,
        }
    }

    /// Book `slots` consecutive slots starting at the first free one and
    /// return how long the caller must wait for it.
    fn book(&mut self, now: Instant, slots: u32) -> Duration {
        let start = self.next.max(now);
        self.next = start + self.interval * slots;
        start - now
    }
}

#[derive(Debug)]
struct Slots {
    global: SlotClock,
    per_destination: HashMap<ChatId, SlotClock>,
}

/// ForwardSender decorator that spaces out outbound sends.
///
/// Telegram counts every message of an album against its rate limits, so an
/// album of N items books N consecutive slots.
pub struct ThrottledSender {
    inner: Arc<dyn ForwardSender>,
    cfg: ThrottleConfig,
    slots: Mutex<Slots>,
}

impl ThrottledSender {
    pub fn new(inner: Arc<dyn ForwardSender>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            slots: Mutex::new(Slots {
                global: SlotClock::new(cfg.global_min_interval, Instant::now()),
                per_destination: HashMap::new(),
            }),
        }
    }

    async fn wait_turn(&self, to: ChatId, messages: usize) {
        let messages = u32::try_from(messages.max(1)).unwrap_or(u32::MAX);
        let wait = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            let global = slots.global.book(now, messages);
            let interval = self.cfg.per_chat_min_interval;
            let destination = slots
                .per_destination
                .entry(to)
                .or_insert_with(|| SlotClock::new(interval, now))
                .book(now, messages);
            global.max(destination)
        };

        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl ForwardSender for ThrottledSender {
    async fn copy_message(&self, to: ChatId, from: ChatId, item: MessageId) -> Result<MessageId> {
        self.wait_turn(to, 1).await;
        self.inner.copy_message(to, from, item).await
    }

    async fn send_text(&self, to: ChatId, text: &str) -> Result<MessageId> {
        self.wait_turn(to, 1).await;
        self.inner.send_text(to, text).await
    }

    async fn send_media(&self, to: ChatId, media: &OutgoingMedia) -> Result<MessageId> {
        self.wait_turn(to, 1).await;
        self.inner.send_media(to, media).await
    }

    async fn send_media_group(
        &self,
        to: ChatId,
        media: &[OutgoingMedia],
    ) -> Result<Vec<MessageId>> {
        self.wait_turn(to, media.len()).await;
        self.inner.send_media_group(to, media).await
    }
}
