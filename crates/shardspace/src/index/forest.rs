use std::collections::{BinaryHeap, HashMap, HashSet};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use crate::distance::{self, DistanceMetric};
use crate::error::{check_dimension, Result, SpaceError};
use super::{rank, Neighbor, traits::NeighborIndex};

/// Random-projection forest parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Tree count is `max(1, n ^ tree_count_exponent)` for `n` items.
    pub tree_count_exponent: f64,
    /// Maximum items per leaf.
    pub leaf_size: usize,
    /// Candidates inspected per query; defaults to `k * tree_count`.
    #[serde(default)]
    pub search_k: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            tree_count_exponent: 0.3,
            leaf_size: 16,
            search_k: None,
        }
    }
}

impl ForestParams {
    pub fn tree_count(&self, items: usize) -> usize {
        ((items as f64).powf(self.tree_count_exponent).floor() as usize).max(1)
    }
}

enum Node {
    Leaf(Vec<usize>),
    Split {
        normal: Vec<f32>,
        offset: f32,
        left: usize,
        right: usize,
    },
}

struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

/// Annoy-style forest of random hyperplane trees.
///
/// Each split picks two random items and cuts halfway between them (through
/// the origin for the angular metric). Queries walk all trees best-first by
/// hyperplane margin until `search_k` candidates are collected, then rank
/// those candidates by exact distance.
pub struct ForestIndex {
    dimension: usize,
    metric: DistanceMetric,
    params: ForestParams,
    seed: Option<u64>,
    keys: Vec<u64>,
    vectors: Vec<Vec<f32>>,
    key_to_id: HashMap<u64, usize>,
    trees: Vec<Tree>,
}

impl ForestIndex {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self::with_params(dimension, metric, ForestParams::default(), None)
    }

    pub fn with_params(dimension: usize, metric: DistanceMetric, params: ForestParams, seed: Option<u64>) -> Self {
        Self {
            dimension,
            metric,
            params,
            seed,
            keys: Vec::new(),
            vectors: Vec::new(),
            key_to_id: HashMap::new(),
            trees: Vec::new(),
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn hyperplane(&self, a: &[f32], b: &[f32]) -> (Vec<f32>, f32) {
        if self.metric == DistanceMetric::Angular {
            let mut an = a.to_vec();
            let mut bn = b.to_vec();
            distance::normalize_vector(&mut an);
            distance::normalize_vector(&mut bn);
            let normal = an.iter().zip(bn.iter()).map(|(x, y)| x - y).collect();
            return (normal, 0.0);
        }
        let normal: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
        let midpoint: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect();
        let offset = distance::inner_product(&normal, &midpoint);
        (normal, offset)
    }

    fn build_node(&self, mut ids: Vec<usize>, rng: &mut StdRng, nodes: &mut Vec<Node>) -> usize {
        let leaf_size = self.params.leaf_size.max(1);
        if ids.len() <= leaf_size {
            nodes.push(Node::Leaf(ids));
            return nodes.len() - 1;
        }

        let i = rng.gen_range(0..ids.len());
        let mut j = rng.gen_range(0..ids.len() - 1);
        if j >= i {
            j += 1;
        }
        let (normal, offset) = self.hyperplane(&self.vectors[ids[i]], &self.vectors[ids[j]]);

        let mut left = Vec::new();
        let mut right = Vec::new();
        for &id in &ids {
            let margin = distance::inner_product(&normal, &self.vectors[id]) - offset;
            let goes_right = if margin == 0.0 { rng.gen::<bool>() } else { margin > 0.0 };
            if goes_right {
                right.push(id);
            } else {
                left.push(id);
            }
        }

        // Degenerate cut (duplicates, collinear data): fall back to a random halving.
        if left.is_empty() || right.is_empty() {
            ids.shuffle(rng);
            right = ids.split_off(ids.len() / 2);
            left = ids;
        }

        let left_node = self.build_node(left, rng, nodes);
        let right_node = self.build_node(right, rng, nodes);
        nodes.push(Node::Split { normal, offset, left: left_node, right: right_node });
        nodes.len() - 1
    }

    fn candidates(&self, query: &[f32], search_k: usize) -> Vec<usize> {
        let mut heap: BinaryHeap<(OrderedFloat<f32>, usize, usize)> = BinaryHeap::new();
        for (t, tree) in self.trees.iter().enumerate() {
            heap.push((OrderedFloat(f32::INFINITY), t, tree.root));
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        while let Some((OrderedFloat(priority), t, node)) = heap.pop() {
            if out.len() >= search_k {
                break;
            }
            match &self.trees[t].nodes[node] {
                Node::Leaf(ids) => {
                    for &id in ids {
                        if seen.insert(id) {
                            out.push(id);
                        }
                    }
                }
                Node::Split { normal, offset, left, right } => {
                    let margin = distance::inner_product(normal, query) - offset;
                    heap.push((OrderedFloat(priority.min(margin)), t, *right));
                    heap.push((OrderedFloat(priority.min(-margin)), t, *left));
                }
            }
        }
        out
    }
}

impl NeighborIndex for ForestIndex {
    fn rebuild(&mut self, items: Vec<(u64, Vec<f32>)>) -> Result<()> {
        let mut keys = Vec::with_capacity(items.len());
        let mut vectors = Vec::with_capacity(items.len());
        let mut key_to_id = HashMap::with_capacity(items.len());
        for (key, vector) in items {
            check_dimension(self.dimension, &vector)?;
            if let Some(&id) = key_to_id.get(&key) {
                vectors[id] = vector;
                continue;
            }
            key_to_id.insert(key, keys.len());
            keys.push(key);
            vectors.push(vector);
        }
        self.keys = keys;
        self.vectors = vectors;
        self.key_to_id = key_to_id;
        self.trees.clear();

        if self.keys.is_empty() {
            return Ok(());
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let n_trees = self.params.tree_count(self.keys.len());
        let mut trees = Vec::with_capacity(n_trees);
        for _ in 0..n_trees {
            let mut nodes = Vec::new();
            let root = self.build_node((0..self.keys.len()).collect(), &mut rng, &mut nodes);
            trees.push(Tree { nodes, root });
        }
        self.trees = trees;
        Ok(())
    }

    fn query_by_vector(&self, vector: &[f32], k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension, vector)?;
        if self.keys.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let search_k = self.params.search_k.unwrap_or(k * self.trees.len()).max(k);
        let scored: Vec<(u64, f32)> = self.candidates(vector, search_k)
            .into_iter()
            .map(|id| (self.keys[id], self.metric.distance(vector, &self.vectors[id])))
            .collect();
        Ok(rank(scored, k, with_distances))
    }

    fn query_by_key(&self, key: u64, k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        let id = *self.key_to_id.get(&key).ok_or(SpaceError::KeyNotIndexed(key))?;
        self.query_by_vector(&self.vectors[id], k, with_distances)
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
