//! A shard pairs one row table with one neighbor index and decides when the
//! index is rebuilt from the table.

use std::collections::BTreeSet;
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::SyncPolicy;
use crate::error::{check_dimension, Result, SpaceError};
use crate::index::{IndexFactory, Neighbor, NeighborIndex, Reference};
use crate::store::RowStore;

/// Cached size and key membership of a shard, used for routing.
///
/// Invariant: updated under the shard's write lock together with every row
/// insert and delete, so `size == member_keys.len() == table row count`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStats {
    size: usize,
    member_keys: BTreeSet<u64>,
}

impl ShardStats {
    fn from_keys(keys: impl IntoIterator<Item = u64>) -> Self {
        let member_keys: BTreeSet<u64> = keys.into_iter().collect();
        Self { size: member_keys.len(), member_keys }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, key: u64) -> bool {
        self.member_keys.contains(&key)
    }

    pub fn max_key(&self) -> Option<u64> {
        self.member_keys.last().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.member_keys.iter().copied()
    }

    fn record_insert(&mut self, key: u64) {
        if self.member_keys.insert(key) {
            self.size += 1;
        }
    }

    fn record_remove(&mut self, key: u64) {
        if self.member_keys.remove(&key) {
            self.size -= 1;
        }
    }
}

enum IndexSlot {
    Ready(Arc<dyn NeighborIndex>),
    /// Last rebuild failed; holds the reason.
    Unavailable(String),
    Released,
}

struct ShardState {
    store: Box<dyn RowStore>,
    dirty_weight: u64,
    rebuilds: u64,
    destroyed: bool,
}

/// One independently stored and indexed slice of a vector space.
///
/// Mutations serialize on the shard's write lock. The index is only replaced
/// wholesale: a new one is built from a full table dump and swapped in, so a
/// concurrent query sees either the old or the new index.
pub struct Shard {
    name: String,
    dimensions: usize,
    policy: SyncPolicy,
    factory: Arc<dyn IndexFactory>,
    state: RwLock<ShardState>,
    stats: RwLock<ShardStats>,
    index: RwLock<IndexSlot>,
}

impl Shard {
    /// Wrap `store`, deriving stats from its rows and building the initial index.
    pub fn create(store: Box<dyn RowStore>, factory: Arc<dyn IndexFactory>, policy: SyncPolicy) -> Result<Self> {
        let name = store.name().to_string();
        let dimensions = store.dimensions();
        let rows = store.dump()?;
        let stats = ShardStats::from_keys(rows.iter().map(|(k, _)| *k));

        let shard = Self {
            name,
            dimensions,
            policy,
            factory,
            state: RwLock::new(ShardState { store, dirty_weight: 0, rebuilds: 0, destroyed: false }),
            stats: RwLock::new(stats),
            index: RwLock::new(IndexSlot::Unavailable("index not built yet".into())),
        };
        let slot = match shard.build_index(rows) {
            Ok(index) => IndexSlot::Ready(index),
            Err(e) => {
                warn!(shard = %shard.name, error = %e, "initial index build failed");
                IndexSlot::Unavailable(e.to_string())
            }
        };
        *shard.index.write() = slot;
        Ok(shard)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Insert a row. Without a key, the key is `row_count + 1`.
    pub fn insert(&self, vector: &[f32], key: Option<u64>) -> Result<u64> {
        check_dimension(self.dimensions, vector)?;
        let mut state = self.state.write();
        self.ensure_alive(&state)?;
        let key = key.unwrap_or(state.store.count() as u64 + 1);
        let created = state.store.create(key, vector);
        self.reconcile_stats(&state, key);
        created?;
        self.sync_after_mutation(&mut state, self.policy.weights.insert);
        Ok(key)
    }

    pub fn update(&self, key: u64, vector: &[f32]) -> Result<()> {
        check_dimension(self.dimensions, vector)?;
        let mut state = self.state.write();
        self.ensure_alive(&state)?;
        state.store.update(key, vector)?;
        self.sync_after_mutation(&mut state, self.policy.weights.update);
        Ok(())
    }

    /// Delete a row; returns whether one was present.
    pub fn remove(&self, key: u64) -> Result<bool> {
        let mut state = self.state.write();
        self.ensure_alive(&state)?;
        let deleted = state.store.delete(key);
        self.reconcile_stats(&state, key);
        let removed = deleted?;
        self.sync_after_mutation(&mut state, self.policy.weights.delete);
        Ok(removed)
    }

    /// Add `weight` to the dirty counter and rebuild the index if the
    /// threshold is reached or `force` is set. Returns whether a rebuild ran.
    pub fn maybe_sync(&self, weight: u64, force: bool) -> Result<bool> {
        let mut state = self.state.write();
        self.ensure_alive(&state)?;
        self.maybe_sync_locked(&mut state, weight, force)
    }

    /// Rebuild the index now.
    pub fn sync(&self) -> Result<()> {
        self.maybe_sync(0, true).map(|_| ())
    }

    /// Nearest neighbors according to the current index.
    ///
    /// Results reflect the last rebuild, not the table: recent inserts may be
    /// missing and removed keys may still appear.
    pub fn query(&self, reference: &Reference, k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        if let Reference::ByVector(vector) = reference {
            check_dimension(self.dimensions, vector)?;
        }
        let index = self.current_index()?;
        index.query(reference, k, with_distances)
    }

    /// Read a row straight from the table.
    pub fn get(&self, key: u64) -> Result<Vec<f32>> {
        let state = self.state.read();
        self.ensure_alive(&state)?;
        state.store.get(key)
    }

    /// Every row, ascending by key.
    pub fn dump(&self) -> Result<Vec<(u64, Vec<f32>)>> {
        let state = self.state.read();
        self.ensure_alive(&state)?;
        state.store.dump()
    }

    /// Drop the table and release the index. Failures are logged; calling
    /// this again is a no-op.
    pub fn destroy(&self) {
        let mut state = self.state.write();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.dirty_weight = 0;

        if let Err(e) = state.store.drop_table() {
            warn!(shard = %self.name, error = %e, "failed to drop shard table");
        }
        let old = std::mem::replace(&mut *self.index.write(), IndexSlot::Released);
        if let IndexSlot::Ready(index) = old {
            if let Err(e) = index.release() {
                warn!(shard = %self.name, error = %e, "failed to release shard index");
            }
        }
        *self.stats.write() = ShardStats::default();
        info!(shard = %self.name, "destroyed shard");
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.read().destroyed
    }

    pub fn size(&self) -> usize {
        self.stats.read().size()
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.stats.read().contains(key)
    }

    pub fn max_key(&self) -> Option<u64> {
        self.stats.read().max_key()
    }

    /// Snapshot of the cached stats.
    pub fn stats(&self) -> ShardStats {
        self.stats.read().clone()
    }

    /// Row count straight from the table.
    pub fn row_count(&self) -> usize {
        self.state.read().store.count()
    }

    pub fn dirty_weight(&self) -> u64 {
        self.state.read().dirty_weight
    }

    /// Rebuilds triggered through the sync policy since creation.
    pub fn rebuild_count(&self) -> u64 {
        self.state.read().rebuilds
    }

    /// Item count of the current index, if one is available.
    pub fn indexed_len(&self) -> Option<usize> {
        match &*self.index.read() {
            IndexSlot::Ready(index) => Some(index.len()),
            _ => None,
        }
    }

    fn ensure_alive(&self, state: &ShardState) -> Result<()> {
        if state.destroyed {
            return Err(SpaceError::Destroyed(self.name.clone()));
        }
        Ok(())
    }

    /// Mirror the table's membership of `key` into the stats, whatever the
    /// store call returned.
    fn reconcile_stats(&self, state: &ShardState, key: u64) {
        let mut stats = self.stats.write();
        if state.store.contains(key) {
            stats.record_insert(key);
        } else {
            stats.record_remove(key);
        }
    }

    fn current_index(&self) -> Result<Arc<dyn NeighborIndex>> {
        match &*self.index.read() {
            IndexSlot::Ready(index) => Ok(Arc::clone(index)),
            IndexSlot::Unavailable(reason) => Err(SpaceError::IndexUnavailable {
                shard: self.name.clone(),
                reason: reason.clone(),
            }),
            IndexSlot::Released => Err(SpaceError::Destroyed(self.name.clone())),
        }
    }

    fn build_index(&self, rows: Vec<(u64, Vec<f32>)>) -> Result<Arc<dyn NeighborIndex>> {
        let mut index = self.factory.create(self.dimensions);
        index.rebuild(rows)?;
        Ok(Arc::from(index))
    }

    fn maybe_sync_locked(&self, state: &mut ShardState, weight: u64, force: bool) -> Result<bool> {
        state.dirty_weight += weight;
        if state.dirty_weight < self.policy.sync_threshold && !force {
            return Ok(false);
        }

        let built = state.store.dump().and_then(|rows| self.build_index(rows));
        match built {
            Ok(index) => {
                let items = index.len();
                *self.index.write() = IndexSlot::Ready(index);
                state.dirty_weight = 0;
                state.rebuilds += 1;
                debug!(shard = %self.name, items, "rebuilt index");
                Ok(true)
            }
            Err(e) => {
                let reason = e.to_string();
                *self.index.write() = IndexSlot::Unavailable(reason.clone());
                Err(SpaceError::IndexUnavailable { shard: self.name.clone(), reason })
            }
        }
    }

    /// Row writes succeed even if the follow-up rebuild fails; the failure
    /// surfaces on this shard's queries until a rebuild succeeds.
    fn sync_after_mutation(&self, state: &mut ShardState, weight: u64) {
        if let Err(e) = self.maybe_sync_locked(state, weight, false) {
            warn!(shard = %self.name, error = %e, "index rebuild failed");
        }
    }
}
