use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use chrono::{DateTime, Utc};

use crate::classify::ContentType;

/// Process-lifetime forwarding counters (shown by `/status`).
#[derive(Debug)]
pub struct ForwardStats {
    started_at: DateTime<Utc>,
    received: AtomicU64,
    filtered: AtomicU64,
    forwarded: AtomicU64,
    media_groups: AtomicU64,
    failed: AtomicU64,
    by_content_type: Mutex<HashMap<ContentType, ContentTypeCount>>,
}

/// Per-destination item outcomes for one content type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentTypeCount {
    pub content_type: ContentType,
    pub forwarded: u64,
    pub failed: u64,
}

impl ContentTypeCount {
    pub fn total(&self) -> u64 {
        self.forwarded + self.failed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub received: u64,
    pub filtered: u64,
    /// Items delivered, counted once per destination.
    pub forwarded: u64,
    pub media_groups: u64,
    /// Items that failed, counted once per destination.
    pub failed: u64,
}

impl Default for ForwardStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            received: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            media_groups: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            by_content_type: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, items: usize, media_group: bool) {
        self.forwarded.fetch_add(items as u64, Ordering::Relaxed);
        if media_group {
            self.media_groups.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, items: usize) {
        self.failed.fetch_add(items as u64, Ordering::Relaxed);
    }

    /// Count one destination outcome for every item of a batch, by tag.
    pub fn record_content_outcome(&self, content_types: &[ContentType], success: bool) {
        let mut map = self.by_content_type.lock().unwrap_or_else(|e| e.into_inner());
        for &content_type in content_types {
            let entry = map.entry(content_type).or_insert(ContentTypeCount {
                content_type,
                forwarded: 0,
                failed: 0,
            });
            if success {
                entry.forwarded += 1;
            } else {
                entry.failed += 1;
            }
        }
    }

    /// Busiest content types first.
    pub fn by_content_type(&self) -> Vec<ContentTypeCount> {
        let map = self.by_content_type.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts: Vec<ContentTypeCount> = map.values().copied().collect();
        counts.sort_by(|a, b| {
            b.total()
                .cmp(&a.total())
                .then_with(|| a.content_type.as_str().cmp(b.content_type.as_str()))
        });
        counts
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            received: self.received.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            media_groups: self.media_groups.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
