//! TTL caches for data fetched from the protocol client
//!
//! Group metadata is the only remote lookup on the message path, so it is
//! cached per group and invalidated whenever the client reports a membership
//! or metadata change.

use crate::protocol::{GroupMetadata, ProtocolClient};
use crate::Clock;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cache entry with TTL
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now + ttl,
            hit_count: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn increment_hit(&mut self) {
        self.hit_count += 1;
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent map whose entries expire after a TTL
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    misses: std::sync::atomic::AtomicU64,
}

impl<K: Clone + Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            clock,
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Get a live value; expired entries are dropped on access
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.increment_hit();
                return Some(entry.value.clone());
            }
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        None
    }

    /// Insert with the default TTL
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries
            .insert(key, CacheEntry::new(value, self.clock.now(), ttl));
    }

    /// Remove an entry immediately
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.entries.iter().map(|e| e.hit_count).sum(),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

/// Group metadata cache
pub struct GroupMetadataCache {
    cache: TtlCache<String, GroupMetadata>,
}

impl GroupMetadataCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::new(ttl, clock),
        }
    }

    /// Cached metadata for a group, if live
    pub fn get(&self, group_id: &str) -> Option<GroupMetadata> {
        self.cache.get(&group_id.to_string())
    }

    /// Store metadata with the default TTL
    pub fn set(&self, group_id: &str, metadata: GroupMetadata) {
        self.cache.insert(group_id.to_string(), metadata);
    }

    /// Store metadata with a TTL override
    pub fn set_with_ttl(&self, group_id: &str, metadata: GroupMetadata, ttl: Duration) {
        self.cache.insert_with_ttl(group_id.to_string(), metadata, ttl);
    }

    /// Cached metadata, fetched from the client on a miss.
    ///
    /// A failed fetch yields `None`; metadata lookups must never abort
    /// message processing.
    pub async fn get_or_fetch(
        &self,
        client: &dyn ProtocolClient,
        group_id: &str,
    ) -> Option<GroupMetadata> {
        if let Some(metadata) = self.get(group_id) {
            return Some(metadata);
        }

        match client.group_metadata(group_id).await {
            Ok(metadata) => {
                self.set(group_id, metadata.clone());
                Some(metadata)
            }
            Err(e) => {
                warn!("Failed to fetch group metadata for {}: {}", group_id, e);
                None
            }
        }
    }

    /// Drop a group's entry after a membership or metadata change
    pub fn invalidate(&self, group_id: &str) {
        if self.cache.invalidate(&group_id.to_string()) {
            debug!("Group cache invalidated: {}", group_id);
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn sweep(&self) -> usize {
        self.cache.sweep()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Periodically drop expired entries until `token` is cancelled
    pub fn start_sweep_task(self: &Arc<Self>, every: std::time::Duration, token: CancellationToken) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!("Swept {} expired group metadata entries", removed);
                        }
                    }
                }
            }
        });
    }
}
