//! Discovery cache shared by the collection loop and the HTTP handlers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

use infoblox_discovery_common::{Category, Entity};

/// An immutable snapshot of one (source, category) entry.
pub type EntityList = Arc<[Entity]>;

/// Per-source collection bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Collection cycles run.
    pub collect_count: u64,
    /// Collection cycles that failed.
    pub collect_failed_count: u64,
    /// Duration of the last cycle in whole seconds.
    pub collect_time_secs: u64,
}

#[derive(Default)]
struct Entries {
    lists: HashMap<String, HashMap<Category, EntityList>>,
    expires_at: Option<Instant>,
}

/// TTL-bounded store of the latest discovered entities.
///
/// Writing any entry refreshes a single expiry shared by all entries. Reads
/// after that expiry return empty lists for every key until the next write.
pub struct DiscoveryCache {
    ttl: Duration,
    entries: RwLock<Entries>,
    stats: RwLock<HashMap<String, CollectStats>>,
}

/// Create a shareable cache handle.
pub type SharedCache = Arc<DiscoveryCache>;

impl DiscoveryCache {
    /// Create an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(Entries::default()),
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// The configured time to live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace the entities of a (source, category) entry.
    pub fn put(&self, source: &str, category: Category, entities: Vec<Entity>) {
        let list: EntityList = entities.into();
        let count = list.len();

        let mut entries = self.entries.write();
        entries.expires_at = Some(Instant::now() + self.ttl);
        entries
            .lists
            .entry(source.to_string())
            .or_default()
            .insert(category, list);
        drop(entries);

        debug!(source, %category, count, "Cache updated");
    }

    /// Get the entities of a (source, category) entry.
    ///
    /// Returns an empty list once the cache has expired.
    pub fn get(&self, source: &str, category: Category) -> EntityList {
        let entries = self.entries.read();
        let fresh = entries
            .expires_at
            .is_some_and(|expires_at| Instant::now() < expires_at);

        let hit = if fresh {
            entries
                .lists
                .get(source)
                .and_then(|lists| lists.get(&category))
                .cloned()
        } else {
            None
        };
        drop(entries);

        match hit {
            Some(list) => {
                trace!(source, %category, hit = true, "Cache");
                list
            }
            None => {
                trace!(source, %category, hit = false, "Cache");
                Arc::new([])
            }
        }
    }

    /// Snapshot of every entry, regardless of expiry.
    pub fn get_all(&self) -> BTreeMap<String, BTreeMap<Category, EntityList>> {
        self.entries
            .read()
            .lists
            .iter()
            .map(|(source, lists)| {
                let lists = lists
                    .iter()
                    .map(|(category, list)| (*category, list.clone()))
                    .collect();
                (source.clone(), lists)
            })
            .collect()
    }

    /// Record the duration of the last collection cycle of a source.
    pub fn set_collect_time(&self, source: &str, secs: u64) {
        self.stats
            .write()
            .entry(source.to_string())
            .or_default()
            .collect_time_secs = secs;
    }

    /// Count a collection cycle of a source.
    pub fn inc_collect_count(&self, source: &str) {
        self.stats
            .write()
            .entry(source.to_string())
            .or_default()
            .collect_count += 1;
    }

    /// Count a failed collection cycle of a source.
    pub fn inc_collect_failed_count(&self, source: &str) {
        self.stats
            .write()
            .entry(source.to_string())
            .or_default()
            .collect_failed_count += 1;
    }

    /// Last collection time per source.
    pub fn collect_time(&self) -> BTreeMap<String, u64> {
        self.collect_stats()
            .into_iter()
            .map(|(source, stats)| (source, stats.collect_time_secs))
            .collect()
    }

    /// Collection cycles per source.
    pub fn collect_count(&self) -> BTreeMap<String, u64> {
        self.collect_stats()
            .into_iter()
            .map(|(source, stats)| (source, stats.collect_count))
            .collect()
    }

    /// Failed collection cycles per source.
    pub fn collect_failed_count(&self) -> BTreeMap<String, u64> {
        self.collect_stats()
            .into_iter()
            .map(|(source, stats)| (source, stats.collect_failed_count))
            .collect()
    }

    /// Bookkeeping of every source.
    pub fn collect_stats(&self) -> BTreeMap<String, CollectStats> {
        self.stats
            .read()
            .iter()
            .map(|(source, stats)| (source.clone(), *stats))
            .collect()
    }
}
