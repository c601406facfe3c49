//! Persistent records and the stores that hold them
//!
//! The document database is an external collaborator; the bot relies only on
//! read-by-key, update-by-key, query-by-field and delete-by-key. Any call may
//! fail on its own without corrupting in-memory state.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-group settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    /// Delete messages containing links outside the whitelist
    pub antilink: bool,
    /// Extra allowed link fragments for this group
    pub allowed_links: Vec<String>,
    /// Delete messages containing a banned word or phrase
    pub antiwords: bool,
    /// Banned words and phrases, lowercase
    pub banned_words: Vec<String>,
    /// Greet new participants
    pub welcome: bool,
    /// Custom welcome template
    pub welcome_message: Option<String>,
    /// Say goodbye to departing participants
    pub farewell: bool,
    /// Custom farewell template
    pub farewell_message: Option<String>,
}

/// Group the bot has been activated in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub participants: usize,
    #[serde(default)]
    pub settings: GroupSettings,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

/// Persisted silence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceRecord {
    pub group_id: String,
    pub user_id: String,
    pub silenced_by: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SilenceRecord {
    /// Document key of the record
    pub fn key(&self) -> String {
        silence_key(&self.group_id, &self.user_id)
    }
}

/// Document key for a (group, user) silence
pub fn silence_key(group_id: &str, user_id: &str) -> String {
    format!("{}_{}", group_id, user_id)
}

/// Persisted temporary ban
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempBanRecord {
    /// Document ID, assigned by the store
    #[serde(default)]
    pub id: String,
    pub group_id: String,
    pub user_id: String,
    pub unban_at: DateTime<Utc>,
    pub banned_by: String,
    pub duration_minutes: u64,
    pub created_at: DateTime<Utc>,
}

/// Document store used by the bot
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_group(&self, group_id: &str) -> Result<Option<GroupRecord>>;

    /// Create or replace a group record
    async fn put_group(&self, group: GroupRecord) -> Result<()>;

    /// Create or replace the silence for (group, user)
    async fn put_silence(&self, record: SilenceRecord) -> Result<()>;

    async fn delete_silence(&self, group_id: &str, user_id: &str) -> Result<()>;

    /// Silences with `expires_at > now`
    async fn active_silences(&self, now: DateTime<Utc>) -> Result<Vec<SilenceRecord>>;

    /// Delete silences with `expires_at <= now`; returns how many were removed
    async fn purge_expired_silences(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Insert a temp-ban and return its assigned ID
    async fn add_temp_ban(&self, record: TempBanRecord) -> Result<String>;

    /// Temp-bans with `unban_at <= now`
    async fn expired_temp_bans(&self, now: DateTime<Utc>) -> Result<Vec<TempBanRecord>>;

    async fn delete_temp_ban(&self, id: &str) -> Result<()>;
}

/// Bound a store call, mapping an elapsed deadline to `Error::Timeout`
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{} exceeded {}ms", what, limit.as_millis()))),
    }
}

/// Serializable image of every collection
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    groups: Vec<GroupRecord>,
    #[serde(default)]
    silences: Vec<SilenceRecord>,
    #[serde(default)]
    temp_bans: Vec<TempBanRecord>,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    groups: DashMap<String, GroupRecord>,
    silences: DashMap<String, SilenceRecord>,
    temp_bans: DashMap<String, TempBanRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        for group in snapshot.groups {
            store.groups.insert(group.id.clone(), group);
        }
        for silence in snapshot.silences {
            store.silences.insert(silence.key(), silence);
        }
        for ban in snapshot.temp_bans {
            store.temp_bans.insert(ban.id.clone(), ban);
        }
        store
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            groups: self.groups.iter().map(|e| e.value().clone()).collect(),
            silences: self.silences.iter().map(|e| e.value().clone()).collect(),
            temp_bans: self.temp_bans.iter().map(|e| e.value().clone()).collect(),
        }
    }

    pub fn silence_count(&self) -> usize {
        self.silences.len()
    }

    pub fn temp_ban_count(&self) -> usize {
        self.temp_bans.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_group(&self, group_id: &str) -> Result<Option<GroupRecord>> {
        Ok(self.groups.get(group_id).map(|e| e.value().clone()))
    }

    async fn put_group(&self, group: GroupRecord) -> Result<()> {
        self.groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn put_silence(&self, record: SilenceRecord) -> Result<()> {
        self.silences.insert(record.key(), record);
        Ok(())
    }

    async fn delete_silence(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.silences.remove(&silence_key(group_id, user_id));
        Ok(())
    }

    async fn active_silences(&self, now: DateTime<Utc>) -> Result<Vec<SilenceRecord>> {
        Ok(self
            .silences
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn purge_expired_silences(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.silences.len();
        self.silences.retain(|_, record| record.expires_at > now);
        Ok(before.saturating_sub(self.silences.len()))
    }

    async fn add_temp_ban(&self, mut record: TempBanRecord) -> Result<String> {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        let id = record.id.clone();
        self.temp_bans.insert(id.clone(), record);
        Ok(id)
    }

    async fn expired_temp_bans(&self, now: DateTime<Utc>) -> Result<Vec<TempBanRecord>> {
        let mut expired: Vec<TempBanRecord> = self
            .temp_bans
            .iter()
            .filter(|e| e.unban_at <= now)
            .map(|e| e.value().clone())
            .collect();
        expired.sort_by_key(|ban| ban.unban_at);
        Ok(expired)
    }

    async fn delete_temp_ban(&self, id: &str) -> Result<()> {
        self.temp_bans.remove(id);
        Ok(())
    }
}

/// Memory store mirrored to a JSON file after every mutation
pub struct JsonFileStore {
    inner: MemoryStore,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store, loading the file when it exists
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let inner = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                info!(
                    "Loaded store from {:?}: {} groups, {} silences, {} temp bans",
                    path,
                    snapshot.groups.len(),
                    snapshot.silences.len(),
                    snapshot.temp_bans.len()
                );
                MemoryStore::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store file at {:?}, starting empty", path);
                MemoryStore::new()
            }
            Err(e) => return Err(Error::Persistence(format!("Failed to read {:?}: {}", path, e))),
        };

        Ok(Self {
            inner,
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(&self.inner.snapshot())?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to write {:?}: {}", tmp, e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to replace {:?}: {}", self.path, e)))?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn get_group(&self, group_id: &str) -> Result<Option<GroupRecord>> {
        self.inner.get_group(group_id).await
    }

    async fn put_group(&self, group: GroupRecord) -> Result<()> {
        self.inner.put_group(group).await?;
        self.flush().await
    }

    async fn put_silence(&self, record: SilenceRecord) -> Result<()> {
        self.inner.put_silence(record).await?;
        self.flush().await
    }

    async fn delete_silence(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.inner.delete_silence(group_id, user_id).await?;
        self.flush().await
    }

    async fn active_silences(&self, now: DateTime<Utc>) -> Result<Vec<SilenceRecord>> {
        self.inner.active_silences(now).await
    }

    async fn purge_expired_silences(&self, now: DateTime<Utc>) -> Result<usize> {
        let purged = self.inner.purge_expired_silences(now).await?;
        if purged > 0 {
            self.flush().await?;
        }
        Ok(purged)
    }

    async fn add_temp_ban(&self, record: TempBanRecord) -> Result<String> {
        let id = self.inner.add_temp_ban(record).await?;
        self.flush().await?;
        Ok(id)
    }

    async fn expired_temp_bans(&self, now: DateTime<Utc>) -> Result<Vec<TempBanRecord>> {
        self.inner.expired_temp_bans(now).await
    }

    async fn delete_temp_ban(&self, id: &str) -> Result<()> {
        self.inner.delete_temp_ban(id).await?;
        self.flush().await
    }
}
