//! Shardspace - an embeddable, sharded vector store
//!
//! A [`VectorSpace`] stores fixed-dimension vectors under `u64` keys and
//! answers approximate nearest-neighbor queries. Rows live in per-shard
//! tables (in memory or as record logs on disk); each shard keeps a
//! rebuildable neighbor index (forest, HNSW or flat) that is refreshed
//! according to a weighted staleness policy. New shards are added when
//! inserts become slower than the configured latency budget.

pub mod config;
pub mod distance;
pub mod error;
pub mod index;
pub mod registry;
pub mod router;
pub mod shard;
pub mod space;
pub mod store;

pub use config::{MutationWeights, SpaceConfig, SyncPolicy};
pub use distance::DistanceMetric;
pub use error::{Result, SpaceError};
pub use index::{FlatIndex, ForestIndex, HnswIndex, IndexConfig, IndexFactory, IndexKind, Neighbor, NeighborIndex, Reference};
pub use registry::SpaceRegistry;
pub use router::ShardRouter;
pub use shard::{Shard, ShardStats};
pub use space::VectorSpace;
pub use store::{RowStore, Storage, StorageConfig};
