//! Rebuildable nearest-neighbor indexes: Flat (exact), HNSW and a
//! random-projection forest.

mod flat;
mod forest;
mod hnsw;
mod traits;

pub use flat::FlatIndex;
pub use forest::{ForestIndex, ForestParams};
pub use hnsw::{HnswIndex, HnswParams};
pub use traits::{IndexFactory, NeighborIndex};

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;

/// What a query is anchored on.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// A key already stored (and indexed).
    ByKey(u64),
    /// A free vector of the space's dimension.
    ByVector(Vec<f32>),
}

impl From<u64> for Reference {
    fn from(key: u64) -> Self {
        Self::ByKey(key)
    }
}

impl From<Vec<f32>> for Reference {
    fn from(vector: Vec<f32>) -> Self {
        Self::ByVector(vector)
    }
}

impl From<&[f32]> for Reference {
    fn from(vector: &[f32]) -> Self {
        Self::ByVector(vector.to_vec())
    }
}

/// One ranked query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub key: u64,
    /// Present only when distances were requested.
    pub distance: Option<f32>,
}

/// Sort `(key, distance)` candidates ascending and keep the first `k`.
///
/// The sort is stable, so equal distances keep their input order.
pub(crate) fn rank(mut scored: Vec<(u64, f32)>, k: usize, with_distances: bool) -> Vec<Neighbor> {
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.truncate(k);
    scored
        .into_iter()
        .map(|(key, distance)| Neighbor {
            key,
            distance: with_distances.then_some(distance),
        })
        .collect()
}

/// Index implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Flat,
    Hnsw,
    #[default]
    Forest,
}

impl IndexKind {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "flat" | "brute" | "exact" => Self::Flat,
            "hnsw" | "graph" => Self::Hnsw,
            _ => Self::Forest,
        }
    }
}

/// Index configuration shared by every shard of a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub kind: IndexKind,
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default)]
    pub hnsw: HnswParams,
    #[serde(default)]
    pub forest: ForestParams,
    /// Seed for randomized builds; `None` draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl IndexConfig {
    pub fn new(kind: IndexKind, metric: DistanceMetric) -> Self {
        Self { kind, metric, ..Self::default() }
    }

    pub fn flat(metric: DistanceMetric) -> Self {
        Self::new(IndexKind::Flat, metric)
    }
}

impl IndexFactory for IndexConfig {
    fn create(&self, dimensions: usize) -> Box<dyn NeighborIndex> {
        match self.kind {
            IndexKind::Flat => Box::new(FlatIndex::new(dimensions, self.metric)),
            IndexKind::Hnsw => Box::new(HnswIndex::with_params(dimensions, self.metric, self.hnsw.clone(), self.seed)),
            IndexKind::Forest => Box::new(ForestIndex::with_params(dimensions, self.metric, self.forest.clone(), self.seed)),
        }
    }
}
