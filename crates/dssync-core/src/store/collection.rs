// ── Generic reactive entity collection ──
//
// Concurrent storage keyed by `Dsid` with push-based change notification
// via `watch` channels. Mutation happens through `update` closures that
// run under the entry's shard lock, so two contexts touching the same
// entity are serialized.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::Dsid;

/// A concurrent, reactive collection for a single entity type.
///
/// Every mutation rebuilds the snapshot that subscribers receive.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_id: DashMap<Dsid, Arc<T>>,

    /// Full snapshot, rebuilt on mutation for efficient subscription.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_id: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the id was new.
    pub(crate) fn upsert(&self, id: Dsid, entity: T) -> bool {
        let is_new = self.by_id.insert(id, Arc::new(entity)).is_none();
        self.changed();
        is_new
    }

    /// Mutate an entity in place. Returns `None` if the id is unknown.
    ///
    /// The closure runs while the entry is locked; it must not touch
    /// this collection again.
    pub(crate) fn update<R>(&self, id: &Dsid, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let result = {
            let mut entry = self.by_id.get_mut(id)?;
            f(Arc::make_mut(entry.value_mut()))
        };
        self.changed();
        Some(result)
    }

    /// Remove an entity. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, id: &Dsid) -> Option<Arc<T>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    pub(crate) fn get(&self, id: &Dsid) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, id: &Dsid) -> bool {
        self.by_id.contains_key(id)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub(crate) fn ids(&self) -> Vec<Dsid> {
        self.by_id.iter().map(|r| r.key().clone()).collect()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn changed(&self) {
        let values: Vec<Arc<T>> = self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
