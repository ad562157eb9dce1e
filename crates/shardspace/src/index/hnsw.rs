use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use crate::distance::DistanceMetric;
use crate::error::{check_dimension, Result, SpaceError};
use super::{rank, Neighbor, traits::NeighborIndex};

/// HNSW build and search parameters.
///
/// - `m`: connections per node per layer (layer 0 keeps `2 * m`)
/// - `ef_construction`: candidate list size while linking a node
/// - `ef_search`: candidate list size while answering a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self { m: 16, ef_construction: 200, ef_search: 50 }
    }
}

/// HNSW (Hierarchical Navigable Small World) index.
///
/// Rebuilding inserts the whole item set into a fresh graph. With a fixed
/// seed the level assignment, and therefore the graph, is reproducible.
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    params: HnswParams,
    seed: Option<u64>,
    graph: Graph,
}

#[derive(Default)]
struct Graph {
    vectors: Vec<Vec<f32>>,
    id_to_key: Vec<u64>,
    key_to_id: HashMap<u64, usize>,
    /// layers[level][node_id] = neighbors.
    layers: Vec<Vec<Vec<usize>>>,
    entry_point: Option<usize>,
    max_level: usize,
}

impl HnswIndex {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self::with_params(dimension, metric, HnswParams::default(), None)
    }

    pub fn with_params(dimension: usize, metric: DistanceMetric, params: HnswParams, seed: Option<u64>) -> Self {
        Self {
            dimension,
            metric,
            params,
            seed,
            graph: Graph::default(),
        }
    }

    fn random_level(rng: &mut StdRng, ml: f64) -> usize {
        // gen() is in [0, 1); flip it so ln never sees zero.
        let r: f64 = 1.0 - rng.gen::<f64>();
        (-r.ln() * ml).floor() as usize
    }

    fn insert_node(&mut self, key: u64, vector: Vec<f32>, level: usize) {
        let metric = self.metric;
        let m = self.params.m.max(1);
        let ef_construction = self.params.ef_construction.max(1);
        let g = &mut self.graph;

        let new_id = g.vectors.len();
        g.vectors.push(vector);
        g.id_to_key.push(key);
        g.key_to_id.insert(key, new_id);

        while g.layers.len() <= level {
            g.layers.push(Vec::new());
        }
        for layer in g.layers.iter_mut().take(level + 1) {
            while layer.len() <= new_id {
                layer.push(Vec::new());
            }
        }

        let Some(ep) = g.entry_point else {
            g.entry_point = Some(new_id);
            g.max_level = level;
            return;
        };

        let query = g.vectors[new_id].clone();
        let mut curr_ep = ep;
        for lev in (level + 1..=g.max_level).rev() {
            curr_ep = g.greedy_closest(metric, lev, curr_ep, &query);
        }

        let top = level.min(g.max_level);
        for lev in (0..=top).rev() {
            let candidates = g.search_layer(metric, lev, curr_ep, &query, ef_construction);
            let max_neighbors = if lev == 0 { m * 2 } else { m };
            let neighbors: Vec<usize> = candidates.iter()
                .filter(|&&(id, _)| id != new_id)
                .take(max_neighbors)
                .map(|&(id, _)| id)
                .collect();

            g.layers[lev][new_id] = neighbors.clone();

            for &neighbor in &neighbors {
                g.layers[lev][neighbor].push(new_id);
                if g.layers[lev][neighbor].len() > max_neighbors {
                    let nv = &g.vectors[neighbor];
                    let mut scored: Vec<(usize, f32)> = g.layers[lev][neighbor].iter()
                        .map(|&n| (n, metric.distance(nv, &g.vectors[n])))
                        .collect();
                    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
                    scored.truncate(max_neighbors);
                    g.layers[lev][neighbor] = scored.into_iter().map(|(id, _)| id).collect();
                }
            }

            if let Some(&(closest, _)) = candidates.first() {
                curr_ep = closest;
            }
        }

        if level > g.max_level {
            g.entry_point = Some(new_id);
            g.max_level = level;
        }
    }
}

impl NeighborIndex for HnswIndex {
    fn rebuild(&mut self, items: Vec<(u64, Vec<f32>)>) -> Result<()> {
        for (_, vector) in &items {
            check_dimension(self.dimension, vector)?;
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let ml = 1.0 / (self.params.m.max(2) as f64).ln();

        self.graph = Graph::default();
        for (key, vector) in items {
            if let Some(&id) = self.graph.key_to_id.get(&key) {
                self.graph.vectors[id] = vector;
                continue;
            }
            let level = Self::random_level(&mut rng, ml);
            self.insert_node(key, vector, level);
        }
        Ok(())
    }

    fn query_by_vector(&self, vector: &[f32], k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension, vector)?;
        let g = &self.graph;
        let Some(ep) = g.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut curr_ep = ep;
        for lev in (1..=g.max_level).rev() {
            curr_ep = g.greedy_closest(self.metric, lev, curr_ep, vector);
        }

        let ef = self.params.ef_search.max(k);
        let scored: Vec<(u64, f32)> = g.search_layer(self.metric, 0, curr_ep, vector, ef)
            .into_iter()
            .map(|(id, d)| (g.id_to_key[id], d))
            .collect();
        Ok(rank(scored, k, with_distances))
    }

    fn query_by_key(&self, key: u64, k: usize, with_distances: bool) -> Result<Vec<Neighbor>> {
        let id = *self.graph.key_to_id.get(&key).ok_or(SpaceError::KeyNotIndexed(key))?;
        self.query_by_vector(&self.graph.vectors[id], k, with_distances)
    }

    fn len(&self) -> usize {
        self.graph.key_to_id.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

impl Graph {
    fn neighbors(&self, level: usize, id: usize) -> &[usize] {
        self.layers.get(level)
            .and_then(|layer| layer.get(id))
            .map(|n| n.as_slice())
            .unwrap_or(&[])
    }

    fn greedy_closest(&self, metric: DistanceMetric, level: usize, start: usize, query: &[f32]) -> usize {
        let mut current = start;
        let mut current_dist = metric.distance(query, &self.vectors[current]);
        loop {
            let mut changed = false;
            for &neighbor in self.neighbors(level, current) {
                let d = metric.distance(query, &self.vectors[neighbor]);
                if d < current_dist {
                    current = neighbor;
                    current_dist = d;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        current
    }

    /// Best-first search of one layer; returns candidates ascending by distance.
    fn search_layer(
        &self,
        metric: DistanceMetric,
        level: usize,
        entry: usize,
        query: &[f32],
        ef: usize,
    ) -> Vec<(usize, f32)> {
        let mut visited = HashSet::new();
        visited.insert(entry);
        let entry_dist = OrderedFloat(metric.distance(query, &self.vectors[entry]));

        // Min-heap of nodes to expand, max-heap of the current best `ef`.
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat<f32>, usize)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat<f32>, usize)> = BinaryHeap::new();
        candidates.push(Reverse((entry_dist, entry)));
        results.push((entry_dist, entry));

        while let Some(Reverse((cand_dist, cand_id))) = candidates.pop() {
            if let Some(&(worst, _)) = results.peek() {
                if results.len() >= ef && cand_dist > worst {
                    break;
                }
            }

            for &neighbor in self.neighbors(level, cand_id) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = OrderedFloat(metric.distance(query, &self.vectors[neighbor]));
                let admit = match results.peek() {
                    Some(&(worst, _)) => results.len() < ef || d < worst,
                    None => true,
                };
                if admit {
                    candidates.push(Reverse((d, neighbor)));
                    results.push((d, neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(usize, f32)> = results.into_iter().map(|(d, id)| (id, d.0)).collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        out
    }
}
