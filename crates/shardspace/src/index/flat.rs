use std::collections::HashMap;
use crate::distance::DistanceMetric;
use crate::error::{check_dimension, Result, SpaceError};
use super::{rank, Neighbor, traits::NeighborIndex};

/// Brute-force (flat) index.
/// Exact nearest-neighbor search by scanning all vectors.
pub struct FlatIndex {
    dimension: usize,
    metric: DistanceMetric,
    keys: Vec<u64>,
    vectors: Vec<Vec<f32>>,
    key_to_idx: HashMap<u64, usize>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            keys: Vec::new(),
            vectors: Vec::new(),
            key_to_idx: HashMap::new(),
        }
    }

    fn scan(&self, query: &[f32], k: usize, with_distances: bool) -> Vec<Neighbor> {
        let scored: Vec<(u64, f32)> = self.keys.iter().zip(self.vectors.iter())
            .map(|(&key, vec)| (key, self.metric.distance(query, vec)))
            .collect();
        rank(scored, k, with_distances)
    }
}

impl NeighborIndex for FlatIndex {
    fn rebuild(&mut self, items: Vec<(u64, Vec<f32>)>) -> Result<()> {
        let mut keys = Vec::with_capacity(items.len());
        let mut vectors = Vec::with_capacity(items.len());
        let mut key_to_idx = HashMap::with_capacity(items.len());
        for (key, vector) in items {
            check_dimension(self.dimension, &vector)?;
            // Later duplicates win, matching an upsert-style dump.
            if let Some(&idx) = key_to_idx.get(&key) {
                vectors[idx] = vector;
                continue;
            }
            key_to_idx.insert(key, keys.len());
            keys.push(key);
            vectors.push(vector);
        }
        self.keys = keys;
        self.vectors = vectors;
        self.key_to_idx = key_to_idx;
        Ok(())
    }

    fn query_by_vector(&self, vector: &[f32], k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension, vector)?;
        if self.keys.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        Ok(self.scan(vector, k, with_distances))
    }

    fn query_by_key(&self, key: u64, k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        let idx = *self.key_to_idx.get(&key).ok_or(SpaceError::KeyNotIndexed(key))?;
        if k == 0 {
            return Ok(Vec::new());
        }
        Ok(self.scan(&self.vectors[idx], k, with_distances))
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }
}
