//! Shard selection for inserts.
//!
//! Sizes above the mean are scaled by `1 + f`, sizes at or below it by
//! `1 - f`, and each shard is picked with probability inversely proportional
//! to its scaled size. Smaller shards therefore receive more inserts, and a
//! larger `f` pushes harder toward balance.

use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::error::{Result, SpaceError};

pub struct ShardRouter {
    rebalance_factor: f64,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl ShardRouter {
    /// Router seeded from `seed`, or from entropy when `None`.
    pub fn new(rebalance_factor: f64, seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(rebalance_factor, rng)
    }

    /// Router drawing from a caller-supplied random source.
    pub fn with_rng<R: RngCore + Send + 'static>(rebalance_factor: f64, rng: R) -> Result<Self> {
        if !(0.0..1.0).contains(&rebalance_factor) {
            return Err(SpaceError::InvalidConfig(format!(
                "rebalance_factor must be in [0, 1), got {rebalance_factor}"
            )));
        }
        Ok(Self { rebalance_factor, rng: Mutex::new(Box::new(rng)) })
    }

    pub fn rebalance_factor(&self) -> f64 {
        self.rebalance_factor
    }

    /// Selection probability per shard, summing to 1.
    ///
    /// Empty shards have an unbounded inverse weight, so when any exist the
    /// probability is spread evenly over them alone.
    pub fn probabilities(&self, sizes: &[usize]) -> Vec<f64> {
        match sizes.len() {
            0 => return Vec::new(),
            1 => return vec![1.0],
            _ => {}
        }

        let empty = sizes.iter().filter(|&&s| s == 0).count();
        if empty > 0 {
            let p = 1.0 / empty as f64;
            return sizes.iter().map(|&s| if s == 0 { p } else { 0.0 }).collect();
        }

        let mean = sizes.iter().sum::<usize>() as f64 / sizes.len() as f64;
        let inverse: Vec<f64> = sizes.iter()
            .map(|&s| {
                let s = s as f64;
                let scaled = if s > mean {
                    s * (1.0 + self.rebalance_factor)
                } else {
                    s * (1.0 - self.rebalance_factor)
                };
                1.0 / scaled
            })
            .collect();
        let total: f64 = inverse.iter().sum();
        inverse.into_iter().map(|w| w / total).collect()
    }

    /// Pick a shard index for the next insert.
    pub fn select(&self, sizes: &[usize]) -> usize {
        if sizes.len() <= 1 {
            return 0;
        }
        let probs = self.probabilities(sizes);
        let mut rng = self.rng.lock();
        match WeightedIndex::new(&probs) {
            Ok(dist) => dist.sample(&mut *rng),
            // Only reachable with non-finite weights; fall back to uniform.
            Err(_) => rng.gen_range(0..sizes.len()),
        }
    }
}
