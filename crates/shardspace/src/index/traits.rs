use crate::distance::DistanceMetric;
use crate::error::Result;
use super::{Neighbor, Reference};

/// A nearest-neighbor index that is only ever rebuilt wholesale.
///
/// Shards build a fresh instance off to the side, call [`rebuild`] once, and
/// then share it read-only, so implementations need no interior locking.
///
/// [`rebuild`]: NeighborIndex::rebuild
pub trait NeighborIndex: Send + Sync {
    /// Replace the whole index content with `items`.
    fn rebuild(&mut self, items: Vec<(u64, Vec<f32>)>) -> Result<()>;

    /// Up to `k` neighbors of a free vector, ascending by distance.
    fn query_by_vector(&self, vector: &[f32], k: usize, with_distances: bool) -> Result<Vec<Neighbor>>;

    /// Up to `k` neighbors of an indexed key, ascending by distance.
    ///
    /// Fails with `KeyNotIndexed` when the key was not part of the last rebuild.
    fn query_by_key(&self, key: u64, k: usize, with_distances: bool) -> Result<Vec<Neighbor>>;

    fn query(&self, reference: &Reference, k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        match reference {
            Reference::ByKey(key) => self.query_by_key(*key, k, with_distances),
            Reference::ByVector(vector) => self.query_by_vector(vector, k, with_distances),
        }
    }

    /// Number of indexed items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> usize;

    fn metric(&self) -> DistanceMetric;

    /// Free backing resources. Memory-only indexes release on drop.
    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Produces empty indexes for shards to rebuild into.
pub trait IndexFactory: Send + Sync {
    fn create(&self, dimensions: usize) -> Box<dyn NeighborIndex>;
}
