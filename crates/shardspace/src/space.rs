//! A single logical vector space over an adaptively growing set of shards.
//!
//! Inserts are routed toward smaller shards; an insert that takes longer than
//! the latency budget appends a fresh, empty shard so later rebuilds stay
//! cheap. Queries fan out to every shard and merge the local candidates.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SpaceConfig;
use crate::error::{check_dimension, Result, SpaceError};
use crate::index::{rank, IndexFactory, Neighbor, Reference};
use crate::router::ShardRouter;
use crate::shard::Shard;
use crate::store::{atomic_write, Storage};

const MANIFEST_FILE: &str = "space.json";

/// Persisted beside the shard tables of a directory-backed space.
#[derive(Debug, Serialize, Deserialize)]
struct SpaceManifest {
    config: SpaceConfig,
    shard_count: usize,
}

/// Per-shard candidate count for a query: `max(1, size / divisor) + 1`.
pub fn candidate_count(shard_size: usize, divisor: usize) -> usize {
    (shard_size / divisor.max(1)).max(1) + 1
}

pub fn shard_name(space: &str, ordinal: usize) -> String {
    format!("{space}_{ordinal}")
}

type ShardList = Arc<Vec<Arc<Shard>>>;

pub struct VectorSpace {
    config: SpaceConfig,
    storage: Storage,
    factory: Arc<dyn IndexFactory>,
    router: ShardRouter,
    /// Copy-on-append: readers iterate a snapshot while growth swaps in a
    /// longer list.
    shards: RwLock<ShardList>,
    /// Keys handed out to inserts that have not landed in a shard yet.
    pending_keys: Mutex<BTreeSet<u64>>,
    destroyed: AtomicBool,
}

/// Holds a key in `pending_keys` until the insert finishes.
struct KeyReservation<'a> {
    pending: &'a Mutex<BTreeSet<u64>>,
    key: u64,
}

impl Drop for KeyReservation<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}

impl VectorSpace {
    /// In-memory space with an auto-generated name.
    pub fn new(dimensions: usize, insertion_latency_budget: Duration, rebalance_factor: f64) -> Result<Self> {
        let name = format!("space-{}", Uuid::new_v4().simple());
        let config = SpaceConfig::new(&name, dimensions)
            .with_latency_budget(insertion_latency_budget)
            .with_rebalance_factor(rebalance_factor);
        Self::open(config)
    }

    /// Create a space, or reopen one whose directory already holds a manifest.
    pub fn open(config: SpaceConfig) -> Result<Self> {
        let factory: Arc<dyn IndexFactory> = Arc::new(config.index.clone());
        Self::with_index_factory(config, factory)
    }

    /// Like [`open`](Self::open) with a custom index implementation.
    pub fn with_index_factory(config: SpaceConfig, factory: Arc<dyn IndexFactory>) -> Result<Self> {
        let router = ShardRouter::new(config.rebalance_factor, config.routing_seed)?;
        Self::with_router(config, factory, router)
    }

    /// Fully explicit constructor, e.g. to route with a custom random source.
    pub fn with_router(config: SpaceConfig, factory: Arc<dyn IndexFactory>, router: ShardRouter) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(&config.storage)?;
        let existing = read_manifest(&storage, &config)?;
        let shard_count = existing.max(1);

        let mut shards = Vec::with_capacity(shard_count);
        for ordinal in 0..shard_count {
            shards.push(open_shard(&storage, &config, &factory, ordinal)?);
        }

        let space = Self {
            config,
            storage,
            factory,
            router,
            shards: RwLock::new(Arc::new(shards)),
            pending_keys: Mutex::new(BTreeSet::new()),
            destroyed: AtomicBool::new(false),
        };
        space.write_manifest(shard_count)?;
        if existing > 0 {
            info!(space = %space.config.name, shards = shard_count, rows = space.len(), "reopened space");
        }
        Ok(space)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    /// Snapshot of the current shard list.
    pub fn shards(&self) -> ShardList {
        self.shards.read().clone()
    }

    pub fn shard(&self, ordinal: usize) -> Option<Arc<Shard>> {
        self.shards().get(ordinal).cloned()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.read().len()
    }

    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards().iter().map(|s| s.size()).collect()
    }

    /// Total rows across shards.
    pub fn len(&self) -> usize {
        self.shards().iter().map(|s| s.size()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: u64) -> bool {
        self.shards().iter().any(|s| s.contains_key(key))
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Insert a vector and return its key.
    ///
    /// Without a key, the key is one more than the largest key in any shard.
    /// An explicit key already present anywhere fails with `DuplicateKey`.
    pub fn insert(&self, vector: &[f32], key: Option<u64>) -> Result<u64> {
        self.ensure_alive()?;
        check_dimension(self.config.dimensions, vector)?;

        let (reservation, shards) = self.reserve_key(key)?;
        let key = reservation.key;
        let sizes: Vec<usize> = shards.iter().map(|s| s.size()).collect();
        let target = self.router.select(&sizes);

        let start = Instant::now();
        shards[target].insert(vector, Some(key))?;
        let elapsed = start.elapsed();
        drop(reservation);

        if elapsed > self.config.insertion_latency_budget {
            if let Err(e) = self.grow(elapsed) {
                warn!(space = %self.config.name, error = %e, "failed to add shard");
            }
        }
        Ok(key)
    }

    /// Read a stored vector; never affected by index staleness.
    pub fn get(&self, key: u64) -> Result<Vec<f32>> {
        self.ensure_alive()?;
        self.owner(key).ok_or(SpaceError::NotFound(key))?.get(key)
    }

    pub fn update(&self, key: u64, vector: &[f32]) -> Result<()> {
        self.ensure_alive()?;
        check_dimension(self.config.dimensions, vector)?;
        self.owner(key).ok_or(SpaceError::NotFound(key))?.update(key, vector)
    }

    /// Delete a vector; returns whether it existed.
    pub fn remove(&self, key: u64) -> Result<bool> {
        self.ensure_alive()?;
        match self.owner(key) {
            Some(shard) => shard.remove(key),
            None => Ok(false),
        }
    }

    /// Global top-`k` across all shards, ascending by distance.
    ///
    /// A key reference is resolved to its stored vector first. Equal
    /// distances keep shard order.
    pub fn query(&self, reference: &Reference, k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        self.ensure_alive()?;
        let reference = self.resolve(reference)?;
        let divisor = self.config.candidate_divisor;
        let mut candidates = Vec::new();
        for shard in self.shards().iter() {
            candidates.extend(query_shard(shard, &reference, divisor)?);
        }
        Ok(rank(candidates, k, with_distances))
    }

    /// [`query`](Self::query) with one blocking task per shard.
    pub async fn query_concurrent(&self, reference: &Reference, k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        self.ensure_alive()?;
        let reference = Arc::new(self.resolve(reference)?);
        let divisor = self.config.candidate_divisor;
        let handles: Vec<_> = self.shards().iter()
            .map(|shard| {
                let shard = Arc::clone(shard);
                let reference = Arc::clone(&reference);
                tokio::task::spawn_blocking(move || query_shard(&shard, &reference, divisor))
            })
            .collect();

        let mut candidates = Vec::new();
        for handle in handles {
            let local = handle
                .await
                .map_err(|e| SpaceError::Other(anyhow::anyhow!("shard query task failed: {e}")))??;
            candidates.extend(local);
        }
        Ok(rank(candidates, k, with_distances))
    }

    /// Rebuild every shard's index now. Every shard is attempted; the first
    /// failure is returned.
    pub fn sync(&self) -> Result<()> {
        self.ensure_alive()?;
        let mut first_err = None;
        for shard in self.shards().iter() {
            if let Err(e) = shard.sync() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Every row in the space, ascending by key.
    pub fn dump(&self) -> Result<Vec<(u64, Vec<f32>)>> {
        self.ensure_alive()?;
        let mut rows = Vec::with_capacity(self.len());
        for shard in self.shards().iter() {
            rows.extend(shard.dump()?);
        }
        rows.sort_by_key(|(key, _)| *key);
        Ok(rows)
    }

    /// Destroy every shard, then release the space's own storage.
    /// Best effort and idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let shards = self.shards();
        for shard in shards.iter() {
            shard.destroy();
        }
        if let Err(e) = self.storage.release(&self.config.name, MANIFEST_FILE) {
            warn!(space = %self.config.name, error = %e, "failed to release space storage");
        }
        info!(space = %self.config.name, shards = shards.len(), "destroyed space");
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(SpaceError::Destroyed(self.config.name.clone()));
        }
        Ok(())
    }

    fn owner(&self, key: u64) -> Option<Arc<Shard>> {
        self.shards().iter().find(|s| s.contains_key(key)).cloned()
    }

    fn resolve(&self, reference: &Reference) -> Result<Reference> {
        match reference {
            Reference::ByKey(key) => Ok(Reference::ByVector(self.get(*key)?)),
            Reference::ByVector(vector) => {
                check_dimension(self.config.dimensions, vector)?;
                Ok(reference.clone())
            }
        }
    }

    /// Pick the key for an insert and hold it until the insert lands.
    ///
    /// The shard snapshot is taken under the same lock so a key that just
    /// landed in a freshly added shard is never handed out twice.
    fn reserve_key(&self, requested: Option<u64>) -> Result<(KeyReservation<'_>, ShardList)> {
        let mut pending = self.pending_keys.lock();
        let shards = self.shards();
        let key = match requested {
            Some(key) => {
                if pending.contains(&key) || shards.iter().any(|s| s.contains_key(key)) {
                    return Err(SpaceError::DuplicateKey(key));
                }
                key
            }
            None => {
                let max_stored = shards.iter().filter_map(|s| s.max_key()).max().unwrap_or(0);
                let max_pending = pending.last().copied().unwrap_or(0);
                max_stored
                    .max(max_pending)
                    .checked_add(1)
                    .ok_or_else(|| SpaceError::Storage("key space exhausted".into()))?
            }
        };
        pending.insert(key);
        Ok((KeyReservation { pending: &self.pending_keys, key }, shards))
    }

    fn grow(&self, elapsed: Duration) -> Result<()> {
        let mut guard = self.shards.write();
        // `destroy` sets the flag before taking its shard snapshot, so under
        // this lock a concurrent teardown is always visible.
        if self.is_destroyed() {
            return Ok(());
        }
        let ordinal = guard.len();
        let shard = open_shard(&self.storage, &self.config, &self.factory, ordinal)?;
        let mut next: Vec<Arc<Shard>> = guard.iter().cloned().collect();
        next.push(shard);
        *guard = Arc::new(next);
        self.write_manifest(ordinal + 1)?;
        info!(
            space = %self.config.name,
            shard = ordinal,
            elapsed_us = elapsed.as_micros() as u64,
            "insert exceeded latency budget, added shard"
        );
        Ok(())
    }

    fn write_manifest(&self, shard_count: usize) -> Result<()> {
        let Some(root) = self.storage.root() else {
            return Ok(());
        };
        let manifest = SpaceManifest { config: self.config.clone(), shard_count };
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| SpaceError::Serialization(e.to_string()))?;
        atomic_write(&root.join(MANIFEST_FILE), &bytes)
    }
}

fn open_shard(storage: &Storage, config: &SpaceConfig, factory: &Arc<dyn IndexFactory>, ordinal: usize) -> Result<Arc<Shard>> {
    let name = shard_name(&config.name, ordinal);
    let table = storage.open_table(&name, config.dimensions)?;
    Ok(Arc::new(Shard::create(table, Arc::clone(factory), config.sync)?))
}

/// Config and shard count recorded in `dir`, if a space was created there.
fn load_manifest(dir: &Path) -> Result<Option<SpaceManifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(&path)?;
    let manifest = serde_json::from_slice(&data)
        .map_err(|e| SpaceError::Serialization(format!("{}: {e}", path.display())))?;
    Ok(Some(manifest))
}

/// Config a space was created with in `dir`, if any.
pub(crate) fn stored_config(dir: &Path) -> Result<Option<SpaceConfig>> {
    Ok(load_manifest(dir)?.map(|m| m.config))
}

/// Shard count recorded by an earlier run, or 0 for a fresh space.
fn read_manifest(storage: &Storage, config: &SpaceConfig) -> Result<usize> {
    let Some(manifest) = storage.root().map(load_manifest).transpose()?.flatten() else {
        return Ok(0);
    };
    if manifest.config.dimensions != config.dimensions {
        return Err(SpaceError::InvalidConfig(format!(
            "space {} was created with {} dimensions, opened with {}",
            config.name, manifest.config.dimensions, config.dimensions
        )));
    }
    if manifest.config.name != config.name {
        return Err(SpaceError::InvalidConfig(format!(
            "directory holds space {}, expected {}",
            manifest.config.name, config.name
        )));
    }
    Ok(manifest.shard_count)
}

/// Local top-m of one shard as `(key, distance)` pairs.
fn query_shard(shard: &Shard, reference: &Reference, divisor: usize) -> Result<Vec<(u64, f32)>> {
    let m = candidate_count(shard.size(), divisor);
    let local = shard.query(reference, m, true)?;
    Ok(local.into_iter().map(|n| (n.key, n.distance.unwrap_or(f32::INFINITY))).collect())
}
