use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tantivy::query::{Query, QueryClone};

use crate::query::Fingerprint;

/// A parsed query fragment held in memory, keyed by its fingerprint. The
/// index stores the fingerprint with each fragment; matching resolves
/// candidates through this cache so queries are never re-parsed per document.
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub query: Box<dyn Query>,
    pub metadata: BTreeMap<String, String>,
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint,
            query: self.query.box_clone(),
            metadata: self.metadata.clone(),
        }
    }
}

pub(crate) type CacheMap = DashMap<Fingerprint, CacheEntry>;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cached_queries: usize,
    pub last_purged: Option<SystemTime>,
}

struct CacheState {
    live: Arc<CacheMap>,
    /// Present while a purge is in flight. Entries published during the
    /// purge are written here as well, and merged into the rebuilt map
    /// before it goes live, so concurrent updates survive the purge.
    overflow: Option<Arc<CacheMap>>,
}

/// Concurrent fragment cache with an epoch-style purge protocol.
///
/// Reads and publishes only take the state lock briefly; the expensive part
/// of a purge (rebuilding from the index) runs without any lock held.
pub(crate) struct QueryCache {
    state: RwLock<CacheState>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                live: Arc::new(DashMap::new()),
                overflow: None,
            }),
        }
    }

    pub fn publish(&self, entry: CacheEntry) {
        let state = self.state.read();
        if let Some(overflow) = &state.overflow {
            overflow.insert(entry.fingerprint, entry.clone());
        }
        state.live.insert(entry.fingerprint, entry);
    }

    pub fn snapshot(&self) -> Arc<CacheMap> {
        self.state.read().live.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().live.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.live = Arc::new(DashMap::new());
        if state.overflow.is_some() {
            state.overflow = Some(Arc::new(DashMap::new()));
        }
    }

    /// Install the overflow buffer and return the pre-purge map. The caller
    /// rebuilds a fresh map from the index, resolving fingerprints against
    /// the returned snapshot, then calls [`finish_purge`] or [`abort_purge`].
    ///
    /// [`finish_purge`]: QueryCache::finish_purge
    /// [`abort_purge`]: QueryCache::abort_purge
    pub fn begin_purge(&self) -> Arc<CacheMap> {
        let mut state = self.state.write();
        state.overflow = Some(Arc::new(DashMap::new()));
        state.live.clone()
    }

    pub fn finish_purge(&self, rebuilt: CacheMap) {
        let mut state = self.state.write();
        if let Some(overflow) = state.overflow.take() {
            for entry in overflow.iter() {
                rebuilt.insert(*entry.key(), entry.value().clone());
            }
        }
        state.live = Arc::new(rebuilt);
    }

    pub fn abort_purge(&self) {
        self.state.write().overflow = None;
    }
}
