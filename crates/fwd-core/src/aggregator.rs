//! Debounced media-group buffering.
//!
//! Items that share a group id are held until no sibling has arrived for the
//! debounce window, then released as one [`ForwardBatch`]. Items without a
//! group id pass straight through.
//!
//! Each arrival cancels the group's timer and starts a new one tagged with a
//! fresh generation. A timer only finalizes the group if its generation is
//! still current, so a timer that lost the race with a late sibling is a
//! no-op and a group is emitted at most once.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{batch::ForwardBatch, messaging::types::IncomingItem};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submitted {
    /// Emitted right away as a single-item batch.
    Immediate,
    /// Added to a pending group; the group's timer was (re)started.
    Buffered,
    /// Same item id already pending in its group; ignored.
    Duplicate,
}

struct PendingGroup {
    items: Vec<IncomingItem>,
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Pending {
    groups: HashMap<String, PendingGroup>,
    next_generation: u64,
}

pub struct MediaGroupAggregator {
    pending: Mutex<Pending>,
    out: mpsc::UnboundedSender<ForwardBatch>,
}

impl MediaGroupAggregator {
    /// Returns the aggregator and the receiving end of its batch stream.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ForwardBatch>) {
        let (out, rx) = mpsc::unbounded_channel();
        let agg = Arc::new(Self {
            pending: Mutex::new(Pending::default()),
            out,
        });
        (agg, rx)
    }

    pub async fn submit(self: &Arc<Self>, item: IncomingItem, window: Duration) -> Submitted {
        let Some(group_id) = item.group_id.clone() else {
            self.emit(ForwardBatch::single(item));
            return Submitted::Immediate;
        };

        let mut pending = self.pending.lock().await;
        pending.next_generation += 1;
        let generation = pending.next_generation;
        let cancel = CancellationToken::new();

        match pending.groups.get_mut(&group_id) {
            Some(group) => {
                if group.items.iter().any(|i| i.item_id == item.item_id) {
                    debug!(group_id = %group_id, item_id = %item.item_id, "duplicate group item ignored");
                    return Submitted::Duplicate;
                }
                group.items.push(item);
                group.cancel.cancel();
                group.cancel = cancel.clone();
                group.generation = generation;
            }
            None => {
                pending.groups.insert(
                    group_id.clone(),
                    PendingGroup {
                        items: vec![item],
                        generation,
                        cancel: cancel.clone(),
                    },
                );
            }
        }
        drop(pending);

        self.spawn_timer(group_id, generation, cancel, window);
        Submitted::Buffered
    }

    fn spawn_timer(
        self: &Arc<Self>,
        group_id: String,
        generation: u64,
        cancel: CancellationToken,
        window: Duration,
    ) {
        let agg = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
              _ = cancel.cancelled() => {}
              _ = tokio::time::sleep(window) => {
                agg.finalize(&group_id, generation).await;
              }
            }
        });
    }

    /// Emit the group if `generation` is still its latest. Returns whether a
    /// batch was emitted.
    pub async fn finalize(&self, group_id: &str, generation: u64) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.groups.get(group_id) {
            Some(g) if g.generation == generation => {}
            _ => return false,
        }
        let Some(group) = pending.groups.remove(group_id) else {
            return false;
        };
        let Some(batch) = ForwardBatch::from_group(group_id.to_string(), group.items) else {
            return false;
        };
        debug!(group_id, items = batch.len(), "media group finalized");
        // Sent under the lock so batches leave in finalization order.
        self.emit(batch);
        true
    }

    pub async fn pending_groups(&self) -> usize {
        self.pending.lock().await.groups.len()
    }

    fn emit(&self, batch: ForwardBatch) {
        if self.out.send(batch).is_err() {
            warn!("batch receiver closed; dropping batch");
        }
    }
}
