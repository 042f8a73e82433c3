//! Versioned cache entries.

use serde::{Deserialize, Serialize};

use crate::handle::LogHandle;

/// A cached projection of a log, stamped with the handle version it was
/// derived from. An entry is only valid while its version matches the current
/// handle `mtime`; any mismatch makes it stale and it must be treated as
/// absent until refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub version: i64,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, value: T, version: i64) -> Self {
        Self {
            key: key.into(),
            value,
            version,
        }
    }

    pub fn is_fresh(&self, handle: &LogHandle) -> bool {
        self.key == handle.name && self.version == handle.mtime
    }
}
