//! Silence lifecycle
//!
//! A silenced user has every message deleted until the silence expires. The
//! in-memory map is the fast path consulted on each message; the store keeps
//! silences across restarts and is loaded back on connect.

use crate::clock::minutes_after;
use crate::store::{SilenceRecord, Store};
use crate::{Clock, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// In-memory silences mirrored to the store
pub struct SilenceService {
    /// (group, user) -> expiry
    entries: DashMap<(String, String), DateTime<Utc>>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SilenceService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            clock,
        }
    }

    /// Load every non-expired persisted silence into memory.
    ///
    /// Expired records are purged from the store first. A store failure
    /// leaves the map as it was and is only logged.
    pub async fn load(&self) -> usize {
        let now = self.clock.now();
        match self.store.purge_expired_silences(now).await {
            Ok(0) => {}
            Ok(purged) => debug!("Purged {} expired silences", purged),
            Err(e) => warn!("Failed to purge expired silences: {}", e),
        }

        let records = match self.store.active_silences(now).await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load silences: {}", e);
                return 0;
            }
        };

        let loaded = records.len();
        for record in records {
            self.entries
                .insert((record.group_id, record.user_id), record.expires_at);
        }

        info!("Silence cache initialized: {} users silenced", loaded);
        loaded
    }

    /// Whether `user` is currently silenced in `group`.
    ///
    /// An expired entry is removed locally and its persisted record deleted in
    /// the background.
    pub fn is_silenced(&self, group_id: &str, user_id: &str) -> bool {
        if group_id.is_empty() || user_id.is_empty() {
            return false;
        }

        let key = (group_id.to_string(), user_id.to_string());
        let expires_at = match self.entries.get(&key) {
            Some(entry) => *entry,
            None => return false,
        };

        if self.clock.now() < expires_at {
            return true;
        }

        self.entries.remove(&key);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let (group_id, user_id) = key;
            if let Err(e) = store.delete_silence(&group_id, &user_id).await {
                error!("Background silence removal failed for {}: {}", user_id, e);
            }
        });
        false
    }

    /// Silence a user for `minutes`; returns the expiry.
    ///
    /// A duration past the representable range is rejected and nothing is
    /// stored.
    pub async fn silence(
        &self,
        group_id: &str,
        user_id: &str,
        admin_id: &str,
        minutes: u64,
    ) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let expires_at = minutes_after(now, minutes)?;

        self.entries
            .insert((group_id.to_string(), user_id.to_string()), expires_at);

        self.store
            .put_silence(SilenceRecord {
                group_id: group_id.to_string(),
                user_id: user_id.to_string(),
                silenced_by: admin_id.to_string(),
                expires_at,
                created_at: now,
            })
            .await?;

        Ok(expires_at)
    }

    /// Lift a silence before it expires
    pub async fn unsilence(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.entries
            .remove(&(group_id.to_string(), user_id.to_string()));
        self.store.delete_silence(group_id, user_id).await
    }

    /// Number of silences held in memory
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn service() -> (SilenceService, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        (SilenceService::new(store.clone(), clock.clone()), store, clock)
    }

    #[tokio::test]
    async fn test_silence_expires_and_record_is_deleted() {
        let (silences, store, clock) = service();

        silences.silence("1@g.us", "u1", "admin", 10).await.unwrap();
        assert!(silences.is_silenced("1@g.us", "u1"));
        assert!(!silences.is_silenced("1@g.us", "u2"));
        assert_eq!(store.silence_count(), 1);

        clock.advance(Duration::minutes(10) + Duration::seconds(1));
        assert!(!silences.is_silenced("1@g.us", "u1"));
        assert!(silences.is_empty());

        // Let the background delete run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.silence_count(), 0);
    }

    #[tokio::test]
    async fn test_unsilence() {
        let (silences, store, _clock) = service();

        silences.silence("1@g.us", "u1", "admin", 5).await.unwrap();
        silences.unsilence("1@g.us", "u1").await.unwrap();

        assert!(!silences.is_silenced("1@g.us", "u1"));
        assert_eq!(store.silence_count(), 0);
    }

    #[tokio::test]
    async fn test_load_restores_active_silences() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());

        {
            let before_restart = SilenceService::new(store.clone(), clock.clone());
            before_restart.silence("1@g.us", "u1", "admin", 30).await.unwrap();
            before_restart.silence("1@g.us", "u2", "admin", 1).await.unwrap();
        }

        clock.advance(Duration::minutes(2));
        let after_restart = SilenceService::new(store.clone(), clock.clone());
        assert_eq!(after_restart.load().await, 1);
        // The lapsed silence is gone from the store, not just from memory
        assert_eq!(store.silence_count(), 1);
        assert!(after_restart.is_silenced("1@g.us", "u1"));
        assert!(!after_restart.is_silenced("1@g.us", "u2"));
    }

    #[tokio::test]
    async fn test_out_of_range_duration_rejected() {
        let (silences, store, _clock) = service();

        let result = silences.silence("1@g.us", "u1", "admin", u64::MAX).await;
        assert!(matches!(result, Err(crate::Error::Command(_))));
        assert!(!silences.is_silenced("1@g.us", "u1"));
        assert_eq!(store.silence_count(), 0);
    }
}
