//! Inbound pipeline: classify, filter, aggregate; and the worker that drains
//! finalized batches into the dispatcher.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    aggregator::{MediaGroupAggregator, Submitted},
    batch::ForwardBatch,
    classify::{classify, filter_reason, FilterReason},
    dispatch::ForwardDispatcher,
    messaging::types::IncomingItem,
    settings::SettingsStore,
    stats::ForwardStats,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Filtered(FilterReason),
    /// Emitted as a single-item batch.
    Forwarded,
    /// Waiting for the rest of its media group.
    Buffered,
    Duplicate,
}

pub struct Relay {
    settings: Arc<SettingsStore>,
    aggregator: Arc<MediaGroupAggregator>,
    stats: Arc<ForwardStats>,
}

impl Relay {
    pub fn new(
        settings: Arc<SettingsStore>,
        stats: Arc<ForwardStats>,
    ) -> (Self, mpsc::UnboundedReceiver<ForwardBatch>) {
        let (aggregator, rx) = MediaGroupAggregator::new();
        (
            Self {
                settings,
                aggregator,
                stats,
            },
            rx,
        )
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn stats(&self) -> &Arc<ForwardStats> {
        &self.stats
    }

    pub async fn pending_groups(&self) -> usize {
        self.aggregator.pending_groups().await
    }

    /// Source membership is checked by the caller.
    pub async fn submit(&self, item: IncomingItem) -> SubmitOutcome {
        self.stats.record_received();
        let settings = self.settings.snapshot();

        let content_type = classify(&item);
        if let Some(reason) = filter_reason(&item, content_type, &settings.forwarding) {
            self.stats.record_filtered();
            info!(
                source = %item.source.id,
                item_id = %item.item_id,
                content_type = %content_type,
                reason = %reason,
                "item filtered"
            );
            return SubmitOutcome::Filtered(reason);
        }

        let window = settings.forwarding.group_debounce_window();
        match self.aggregator.submit(item, window).await {
            Submitted::Immediate => SubmitOutcome::Forwarded,
            Submitted::Buffered => SubmitOutcome::Buffered,
            Submitted::Duplicate => SubmitOutcome::Duplicate,
        }
    }
}

/// Dispatch batches in finalization order until `cancel` fires or every
/// sender is gone. Each batch uses the settings snapshot taken when it
/// starts; a batch in hand is finished before stopping.
pub async fn run_dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<ForwardBatch>,
    dispatcher: Arc<ForwardDispatcher>,
    settings: Arc<SettingsStore>,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            b = rx.recv() => match b {
                Some(b) => b,
                None => break,
            },
        };

        let snapshot = settings.snapshot();
        debug!(
            source = %batch.source().id,
            items = batch.len(),
            destinations = snapshot.targets.len(),
            "dispatching batch"
        );
        dispatcher.dispatch(&batch, &snapshot).await;
    }
    debug!("dispatch loop stopped");
}
