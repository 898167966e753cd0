use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::models::ScanRecord;

/// Callback invoked with the full record after a committed change.
pub type ScanCallback = Arc<dyn Fn(&ScanRecord) + Send + Sync>;

/// Identifies a notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// Updates of a single scan.
    Scan(String),
    /// Updates of every scan owned by an account.
    Owner(String),
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scan(id) => write!(f, "scan:{}", id),
            Self::Owner(id) => write!(f, "owner-scans:{}", id),
        }
    }
}

/// How long a settled scan's version stays tracked, so a late publish of
/// an older version is still dropped.
pub const DEFAULT_SETTLED_RETENTION: Duration = Duration::from_secs(60);

struct Channel {
    subscribers: Vec<(u64, ScanCallback)>,
    /// Highest version delivered per scan id on this channel.
    last_versions: HashMap<String, i64>,
    /// Scans that reached a terminal state or were deleted, oldest first.
    settled: VecDeque<(Instant, String)>,
}

impl Channel {
    fn new() -> Self {
        Self { subscribers: Vec::new(), last_versions: HashMap::new(), settled: VecDeque::new() }
    }

    fn settle(&mut self, scan_id: &str, now: Instant) {
        self.settled.push_back((now, scan_id.to_string()));
    }

    /// Forget versions of scans settled longer than `retention` ago.
    fn prune(&mut self, now: Instant, retention: Duration) {
        while let Some((at, _)) = self.settled.front() {
            if now.duration_since(*at) < retention {
                break;
            }
            if let Some((_, scan_id)) = self.settled.pop_front() {
                self.last_versions.remove(&scan_id);
            }
        }
    }
}

struct HubInner {
    channels: DashMap<ChannelKey, Arc<Mutex<Channel>>>,
    next_id: AtomicU64,
    settled_retention: Duration,
}

fn lock(channel: &Mutex<Channel>) -> MutexGuard<'_, Channel> {
    // A panicking callback must not take the whole channel down with it.
    channel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process change notification hub.
///
/// Delivery is ordered per channel: a record whose `version` is not newer
/// than the last one delivered for that scan on that channel is dropped, so
/// each committed update reaches a subscriber at most once and in commit
/// order. There is no history; a consumer that (re)connects must fetch the
/// current record itself.
///
/// Callbacks run on the publishing task while the channel is locked. They
/// must not subscribe to or unsubscribe from the channel they are called on.
#[derive(Clone)]
pub struct ChangeHub {
    inner: Arc<HubInner>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::with_settled_retention(DEFAULT_SETTLED_RETENTION)
    }

    pub fn with_settled_retention(retention: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                settled_retention: retention,
            }),
        }
    }

    pub fn subscribe_scan<F>(&self, scan_id: &str, callback: F) -> Subscription
    where
        F: Fn(&ScanRecord) + Send + Sync + 'static,
    {
        self.subscribe(ChannelKey::Scan(scan_id.to_string()), Arc::new(callback))
    }

    pub fn subscribe_owner<F>(&self, owner_id: &str, callback: F) -> Subscription
    where
        F: Fn(&ScanRecord) + Send + Sync + 'static,
    {
        self.subscribe(ChannelKey::Owner(owner_id.to_string()), Arc::new(callback))
    }

    pub fn subscribe(&self, key: ChannelKey, callback: ScanCallback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            // Hold the map entry while registering so a concurrent removal of
            // an empty channel cannot orphan this subscriber.
            let entry = self.inner.channels
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Channel::new())));
            lock(entry.value()).subscribers.push((id, callback));
        }
        debug!(channel = %key, subscription = id, "Subscribed");
        Subscription {
            id,
            key,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription. Calling this more than once is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        remove_subscriber(&self.inner, &subscription.key, subscription.id);
    }

    /// Deliver a committed record to the scan channel and the owner channel.
    pub fn publish(&self, record: &ScanRecord) {
        let keys = [
            ChannelKey::Scan(record.id.clone()),
            ChannelKey::Owner(record.owner_id.clone()),
        ];
        let now = Instant::now();
        for key in keys {
            let channel = match self.inner.channels.get(&key) {
                Some(entry) => entry.value().clone(),
                None => continue,
            };
            let mut channel = lock(&channel);
            channel.prune(now, self.inner.settled_retention);
            let last = channel.last_versions.get(&record.id).copied();
            if last.is_some_and(|v| v >= record.version) {
                trace!(channel = %key, version = record.version, "Dropping stale update");
                continue;
            }
            channel.last_versions.insert(record.id.clone(), record.version);
            if record.status.is_terminal() {
                channel.settle(&record.id, now);
            }
            for (_, callback) in &channel.subscribers {
                callback(record);
            }
        }
    }

    /// Stop tracking a deleted scan. Updates still in flight for it are
    /// dropped until the settled retention runs out.
    pub fn forget_scan(&self, scan_id: &str) {
        let now = Instant::now();
        for entry in self.inner.channels.iter() {
            let mut channel = lock(entry.value());
            channel.prune(now, self.inner.settled_retention);
            if channel.last_versions.contains_key(scan_id) {
                channel.last_versions.insert(scan_id.to_string(), i64::MAX);
                channel.settle(scan_id, now);
            }
        }
    }

    /// Number of scans whose last delivered version is tracked on `key`.
    pub fn tracked_scans(&self, key: &ChannelKey) -> usize {
        self.inner.channels
            .get(key)
            .map(|entry| {
                let count = lock(entry.value()).last_versions.len();
                count
            })
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.inner.channels
            .get(key)
            .map(|entry| {
                let count = lock(entry.value()).subscribers.len();
                count
            })
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHub")
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}

fn remove_subscriber(inner: &HubInner, key: &ChannelKey, id: u64) {
    let channel = match inner.channels.get(key) {
        Some(entry) => entry.value().clone(),
        None => return,
    };
    let removed = {
        let mut channel = lock(&channel);
        let before = channel.subscribers.len();
        channel.subscribers.retain(|(sub_id, _)| *sub_id != id);
        before != channel.subscribers.len()
    };
    if removed {
        debug!(channel = %key, subscription = id, "Unsubscribed");
    }
    inner.channels.remove_if(key, |_, channel| lock(channel).subscribers.is_empty());
}

/// Handle to a registered callback. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    key: ChannelKey,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Remove the callback. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.hub.upgrade() {
            remove_subscriber(&inner, &self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}
