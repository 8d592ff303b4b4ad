//! Counters fed from the synchronization event streams

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fugue_types::{Observers, Subscription};

use crate::event::{BroadcastEvent, SyncEvent};

/// Aggregate synchronization counters.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    items_fetched: AtomicU64,
    fetch_failures: AtomicU64,
    branches_resolved: AtomicU64,
    resolve_failures: AtomicU64,
    blocks_appended: AtomicU64,
    append_failures: AtomicU64,
    broadcasts: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items accepted from fetches
    pub items_fetched: u64,
    /// Failed fetches
    pub fetch_failures: u64,
    /// Branches assembled
    pub branches_resolved: u64,
    /// Failed branch resolutions
    pub resolve_failures: u64,
    /// Blocks appended from branches
    pub blocks_appended: u64,
    /// Branches aborted by a rejected block
    pub append_failures: u64,
    /// Advertisements sent
    pub broadcasts: u64,
}

impl SyncMetrics {
    /// Zeroed counters
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count one event
    pub fn record(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Fetched { count, .. } => {
                self.items_fetched.fetch_add(*count as u64, Ordering::Relaxed);
            }
            SyncEvent::FetchFailed { .. } => {
                self.fetch_failures.fetch_add(1, Ordering::Relaxed);
            }
            SyncEvent::Resolved { .. } => {
                self.branches_resolved.fetch_add(1, Ordering::Relaxed);
            }
            SyncEvent::ResolveFailed { .. } => {
                self.resolve_failures.fetch_add(1, Ordering::Relaxed);
            }
            SyncEvent::BranchAppended { appended, .. } => {
                self.blocks_appended.fetch_add(*appended as u64, Ordering::Relaxed);
            }
            SyncEvent::AppendFailed { appended, .. } => {
                self.blocks_appended.fetch_add(*appended as u64, Ordering::Relaxed);
                self.append_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count one advertisement
    pub fn record_broadcast(&self, _event: &BroadcastEvent) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count every event of `events` until the subscription is dropped
    pub fn attach(self: &Arc<Self>, events: &Observers<SyncEvent>) -> Subscription {
        let metrics = Arc::clone(self);
        events.subscribe(move |e| metrics.record(e))
    }

    /// Count every advertisement of `events` until the subscription is dropped
    pub fn attach_broadcasts(self: &Arc<Self>, events: &Observers<BroadcastEvent>) -> Subscription {
        let metrics = Arc::clone(self);
        events.subscribe(move |e| metrics.record_broadcast(e))
    }

    /// Current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_fetched: self.items_fetched.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            branches_resolved: self.branches_resolved.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            blocks_appended: self.blocks_appended.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}
