use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::models::{ScanRecord, ScanStatus};

/// Result of merging a record into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// First time this scan was seen.
    Inserted,
    /// Replaced an older version; carries the status it had before.
    Updated { previous: ScanStatus },
    /// Same or older version than the cached one; ignored.
    Stale,
}

/// Client-side copy of scan records.
///
/// Derived data only: anything here may be dropped and refetched. Lists are
/// not cached, only a generation counter that views compare against to know
/// when to refetch.
#[derive(Clone, Default)]
pub struct ScanCache {
    inner: Arc<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    records: DashMap<String, ScanRecord>,
    list_generation: AtomicU64,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `record` if it is newer than what is cached.
    pub fn merge(&self, record: &ScanRecord) -> Merge {
        match self.inner.records.entry(record.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().version >= record.version {
                    return Merge::Stale;
                }
                let previous = entry.get().status;
                entry.insert(record.clone());
                Merge::Updated { previous }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Merge::Inserted
            }
        }
    }

    pub fn get(&self, scan_id: &str) -> Option<ScanRecord> {
        self.inner.records.get(scan_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, scan_id: &str) -> Option<ScanRecord> {
        self.inner.records.remove(scan_id).map(|(_, record)| record)
    }

    /// Snapshot of every cached record, in no particular order.
    pub fn records(&self) -> Vec<ScanRecord> {
        self.inner.records.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Mark every cached list as outdated.
    pub fn invalidate_lists(&self) {
        self.inner.list_generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn list_generation(&self) -> u64 {
        self.inner.list_generation.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ScanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCache")
            .field("records", &self.len())
            .field("list_generation", &self.list_generation())
            .finish()
    }
}
