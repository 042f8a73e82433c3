//! Local cache store boundary plus the in-memory implementation.
//!
//! The durable store is an external collaborator; [`CacheStore`] is the only
//! surface the engine requires of it. Reads are version-checked: an entry
//! whose stored version no longer matches the handle's `mtime` is stale and
//! behaves as a miss.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use evalsync_types::{CacheEntry, LogDetails, LogHandle, LogPreview};

use crate::error::Result;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn read_logs(&self) -> Result<Vec<LogHandle>>;

    async fn write_logs(&self, handles: &[LogHandle]) -> Result<()>;

    /// Fresh preview entries for `handles`; stale entries are omitted.
    async fn read_previews(&self, handles: &[LogHandle]) -> Result<Vec<CacheEntry<LogPreview>>>;

    /// Persist previews stamped with the version of their aligned handle.
    async fn write_previews(&self, previews: &[LogPreview], keys: &[LogHandle]) -> Result<()>;

    /// Fresh detail entries for `handles`; stale entries are omitted.
    async fn read_details(&self, handles: &[LogHandle]) -> Result<Vec<CacheEntry<LogDetails>>>;

    async fn write_details(&self, handle: &LogHandle, detail: &LogDetails) -> Result<()>;

    /// Invalidation primitive: drop any preview/detail cached for `name`.
    async fn clear_cache_for_file(&self, name: &str) -> Result<()>;
}

/// In-memory [`CacheStore`], used in tests and as the default store when no
/// durable backend is wired in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: RwLock<Vec<LogHandle>>,
    previews: RwLock<HashMap<String, CacheEntry<LogPreview>>>,
    details: RwLock<HashMap<String, CacheEntry<LogDetails>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn read_logs(&self) -> Result<Vec<LogHandle>> {
        Ok(self.logs.read().clone())
    }

    async fn write_logs(&self, handles: &[LogHandle]) -> Result<()> {
        *self.logs.write() = handles.to_vec();
        Ok(())
    }

    async fn read_previews(&self, handles: &[LogHandle]) -> Result<Vec<CacheEntry<LogPreview>>> {
        let previews = self.previews.read();
        Ok(handles
            .iter()
            .filter_map(|handle| {
                previews
                    .get(&handle.name)
                    .filter(|entry| entry.is_fresh(handle))
            })
            .cloned()
            .collect())
    }

    async fn write_previews(&self, previews: &[LogPreview], keys: &[LogHandle]) -> Result<()> {
        let mut store = self.previews.write();
        for (preview, handle) in previews.iter().zip(keys) {
            store.insert(
                handle.name.clone(),
                CacheEntry::new(handle.name.clone(), preview.clone(), handle.mtime),
            );
        }
        Ok(())
    }

    async fn read_details(&self, handles: &[LogHandle]) -> Result<Vec<CacheEntry<LogDetails>>> {
        let details = self.details.read();
        Ok(handles
            .iter()
            .filter_map(|handle| {
                details
                    .get(&handle.name)
                    .filter(|entry| entry.is_fresh(handle))
            })
            .cloned()
            .collect())
    }

    async fn write_details(&self, handle: &LogHandle, detail: &LogDetails) -> Result<()> {
        self.details.write().insert(
            handle.name.clone(),
            CacheEntry::new(handle.name.clone(), detail.clone(), handle.mtime),
        );
        Ok(())
    }

    async fn clear_cache_for_file(&self, name: &str) -> Result<()> {
        self.previews.write().remove(name);
        self.details.write().remove(name);
        Ok(())
    }
}
