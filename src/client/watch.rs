use std::sync::Arc;

use tracing::debug;

use crate::models::{ScanRecord, ScanStatus};
use crate::realtime::{ChangeHub, Subscription};
use super::cache::{Merge, ScanCache};
use super::notifier::{Notifier, Toast};

/// Live view of one scan: keeps the cache current and raises a toast when
/// the scan finishes.
///
/// Unmounting, explicitly or by drop, removes the subscription.
#[derive(Debug)]
pub struct ScanWatch {
    subscription: Option<Subscription>,
}

impl ScanWatch {
    pub fn mount(
        hub: &ChangeHub,
        cache: ScanCache,
        notifier: Arc<dyn Notifier>,
        scan_id: &str,
    ) -> Self {
        let subscription = hub.subscribe_scan(scan_id, move |record| {
            on_update(&cache, notifier.as_ref(), record);
        });
        Self { subscription: Some(subscription) }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// Live view of every scan one owner has: merges records into the cache
/// and marks lists outdated. No toasts; those belong to [`ScanWatch`].
#[derive(Debug)]
pub struct ScanListWatch {
    subscription: Option<Subscription>,
}

impl ScanListWatch {
    pub fn mount(hub: &ChangeHub, cache: ScanCache, owner_id: &str) -> Self {
        let subscription = hub.subscribe_owner(owner_id, move |record| {
            if cache.merge(record) != Merge::Stale {
                cache.invalidate_lists();
            }
        });
        Self { subscription: Some(subscription) }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

fn on_update(cache: &ScanCache, notifier: &dyn Notifier, record: &ScanRecord) {
    let previous = match cache.merge(record) {
        Merge::Stale => return,
        Merge::Inserted => None,
        Merge::Updated { previous } => Some(previous),
    };
    cache.invalidate_lists();

    if previous == Some(record.status) {
        return;
    }
    debug!(scan_id = %record.id, status = %record.status, "Scan watch update");
    if let Some(toast) = completion_toast(record) {
        notifier.notify(toast);
    }
}

/// Toast for a scan that just reached a terminal state.
pub fn completion_toast(record: &ScanRecord) -> Option<Toast> {
    match record.status {
        ScanStatus::Completed => Some(Toast::success(
            "Scan completed!",
            format!("Found {} vulnerabilities", record.total_count),
        )),
        ScanStatus::Failed => Some(Toast::error("Scan failed", "Please try again")),
        ScanStatus::Pending | ScanStatus::Running => None,
    }
}
