//! In-memory result cache for TV searches and the feed poll cursor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use url::Url;

use crate::release::ReleaseRecord;

#[derive(Debug, Clone)]
struct CacheEntry {
    inserted_at: Instant,
    records: Vec<ReleaseRecord>,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Every release of a series, keyed by normalized series name.
///
/// The map lock is only held to look a slot up. Each series has its own slot
/// lock, so a slow populate for one series does not block other queries.
#[derive(Debug)]
pub struct QueryCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

/// Exclusive access to one series; hold it across check-then-populate.
pub struct CacheSlot {
    ttl: Duration,
    entry: OwnedMutexGuard<Option<CacheEntry>>,
}

pub fn normalize_key(series_name: &str) -> String {
    series_name.trim().to_lowercase()
}

fn is_populated(slot: &Slot) -> bool {
    // A slot locked elsewhere is mid-populate.
    slot.try_lock().map_or(true, |entry| entry.is_some())
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Waits only for other users of the same series.
    pub async fn slot(&self, series_name: &str) -> CacheSlot {
        let slot = self
            .slots
            .lock()
            .await
            .entry(normalize_key(series_name))
            .or_default()
            .clone();

        CacheSlot {
            ttl: self.ttl,
            entry: slot.lock_owned().await,
        }
    }

    /// Drops entries older than the configured TTL, and slots nobody uses.
    /// Slots being populated are left alone.
    pub async fn expire(&self) {
        let ttl = self.ttl;
        let mut slots = self.slots.lock().await;
        let mut evicted = 0usize;

        slots.retain(|_, slot| {
            let slot: &Slot = slot;
            let Ok(mut entry) = slot.try_lock() else {
                return true;
            };
            if entry
                .as_ref()
                .is_some_and(|entry| entry.inserted_at.elapsed() >= ttl)
            {
                *entry = None;
                evicted += 1;
            }
            // New handles are only cloned under the map lock we hold.
            entry.is_some() || Arc::strong_count(slot) > 1
        });

        if evicted > 0 {
            debug!(evicted, remaining = slots.len(), "expired cached series");
        }
    }

    /// Returns whether an entry was removed.
    pub async fn invalidate(&self, series_name: &str) -> bool {
        self.slots
            .lock()
            .await
            .remove(&normalize_key(series_name))
            .is_some_and(|slot| is_populated(&slot))
    }

    /// Drops every entry and returns how many there were.
    pub async fn clear(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let removed = slots.values().filter(|slot| is_populated(slot)).count();
        slots.clear();
        removed
    }
}

impl CacheSlot {
    /// Independent copy of the cached records, if still fresh.
    pub fn get(&self) -> Option<Vec<ReleaseRecord>> {
        self.entry
            .as_ref()
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.records.clone())
    }

    pub fn insert(&mut self, records: Vec<ReleaseRecord>) {
        *self.entry = Some(CacheEntry {
            inserted_at: Instant::now(),
            records,
        });
    }
}

/// Identity of the newest feed item seen on the previous poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    pub title: String,
    pub details_uri: Url,
}

impl FeedCursor {
    pub fn from_record(record: &ReleaseRecord) -> Self {
        Self {
            title: record.title.clone(),
            details_uri: record.details_uri.clone(),
        }
    }

    pub fn matches(&self, record: &ReleaseRecord) -> bool {
        record.same_item(&self.title, &self.details_uri)
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::release::{RawItem, ReleaseType, assemble};

    fn record(title: &str) -> ReleaseRecord {
        assemble(RawItem {
            release_type: ReleaseType::Tv,
            title: title.to_string(),
            details_uri: Url::parse("https://descargas2020.org/serie/lost/").unwrap(),
            quality: None,
            language: None,
            size_bytes: 0,
            publish_date: OffsetDateTime::UNIX_EPOCH,
        })
    }

    #[tokio::test]
    async fn test_lookup_ignores_case_and_whitespace() {
        let cache = QueryCache::new(Duration::from_secs(300));
        cache.slot("Lost").await.insert(vec![record("Lost [Cap.101]")]);

        let hit = cache.slot("lost ").await.get().unwrap();

        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].season, Some(1));
    }

    #[tokio::test]
    async fn test_reads_are_independent_copies() {
        let cache = QueryCache::new(Duration::from_secs(300));
        let mut slot = cache.slot("lost").await;
        slot.insert(vec![record("Lost [Cap.101]")]);

        let mut first = slot.get().unwrap();
        first[0].title = "changed".to_string();
        first.clear();

        let second = slot.get().unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(second[0].title, "changed");
    }

    #[tokio::test]
    async fn test_expire_evicts_stale_entries() {
        let stale = QueryCache::new(Duration::ZERO);
        stale.slot("lost").await.insert(vec![record("Lost [Cap.101]")]);
        stale.expire().await;
        assert!(stale.slots.lock().await.is_empty());
        assert!(stale.slot("lost").await.get().is_none());

        let fresh = QueryCache::new(Duration::from_secs(300));
        fresh.slot("lost").await.insert(vec![record("Lost [Cap.101]")]);
        fresh.expire().await;
        assert!(fresh.slot("lost").await.get().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = QueryCache::new(Duration::from_secs(300));
        cache.slot("lost").await.insert(Vec::new());
        cache.slot("fargo").await.insert(Vec::new());

        assert!(cache.invalidate(" LOST").await);
        assert!(!cache.invalidate("lost").await);

        assert_eq!(cache.clear().await, 1);
        assert!(cache.slot("fargo").await.get().is_none());
    }

    #[tokio::test]
    async fn test_busy_slot_does_not_block_other_series() {
        let cache = QueryCache::new(Duration::from_secs(300));
        let busy = cache.slot("lost").await;

        let other = tokio::time::timeout(Duration::from_secs(1), async {
            cache.slot("fargo").await.insert(Vec::new());
            cache.expire().await;
            cache.clear().await
        })
        .await;

        assert_eq!(other.ok(), Some(2));
        drop(busy);
        assert!(cache.slot("lost").await.get().is_none());
    }

    #[test]
    fn test_feed_cursor_matches_title_and_link() {
        let top = record("Lost [Cap.101]");
        let cursor = FeedCursor::from_record(&top);

        assert!(cursor.matches(&top));

        let mut moved = top.clone();
        moved.details_uri = Url::parse("https://descargas2020.org/serie/other/").unwrap();
        assert!(!cursor.matches(&moved));
    }
}
