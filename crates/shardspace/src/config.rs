//! Construction-time configuration for a vector space.

use std::path::{Component, Path};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{Result, SpaceError};
use crate::index::{IndexConfig, IndexKind};
use crate::store::StorageConfig;

/// Staleness added to a shard's dirty counter per mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationWeights {
    pub insert: u64,
    pub update: u64,
    /// A deleted key lingering in the index returns garbage, so it weighs more.
    pub delete: u64,
}

impl Default for MutationWeights {
    fn default() -> Self {
        Self { insert: 1, update: 1, delete: 2 }
    }
}

/// When a shard rebuilds its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncPolicy {
    /// Rebuild once the dirty counter reaches this; 0 rebuilds on every mutation.
    #[serde(default)]
    pub sync_threshold: u64,
    #[serde(default)]
    pub weights: MutationWeights,
}

impl SyncPolicy {
    pub fn with_threshold(sync_threshold: u64) -> Self {
        Self { sync_threshold, ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Prefix for shard table names (`<name>_<ordinal>`).
    pub name: String,
    pub dimensions: usize,
    /// A shard insert slower than this spawns a new shard.
    #[serde(default = "default_latency_budget")]
    pub insertion_latency_budget: Duration,
    /// In `[0, 1)`; exaggerates shard-size deviation when routing.
    #[serde(default = "default_rebalance_factor")]
    pub rebalance_factor: f64,
    #[serde(default)]
    pub sync: SyncPolicy,
    /// Per-shard candidates for a query are `max(1, size / candidate_divisor) + 1`.
    #[serde(default = "default_candidate_divisor")]
    pub candidate_divisor: usize,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Seed for the routing RNG; `None` draws from entropy.
    #[serde(default)]
    pub routing_seed: Option<u64>,
}

/// At 1.0 a forest already holds one tree per item.
const MAX_TREE_COUNT_EXPONENT: f64 = 1.0;

/// Shard tables and the manifest live in `<root>/<name>`, so a name must not
/// walk out of the root.
fn is_single_component(name: &str) -> bool {
    if name.contains(|c: char| c == '/' || c == '\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

fn default_latency_budget() -> Duration {
    Duration::from_millis(75)
}

fn default_rebalance_factor() -> f64 {
    0.5
}

fn default_candidate_divisor() -> usize {
    15
}

impl SpaceConfig {
    pub fn new(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            insertion_latency_budget: default_latency_budget(),
            rebalance_factor: default_rebalance_factor(),
            sync: SyncPolicy::default(),
            candidate_divisor: default_candidate_divisor(),
            index: IndexConfig::default(),
            storage: StorageConfig::default(),
            routing_seed: None,
        }
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.insertion_latency_budget = budget;
        self
    }

    pub fn with_rebalance_factor(mut self, factor: f64) -> Self {
        self.rebalance_factor = factor;
        self
    }

    pub fn with_sync_threshold(mut self, threshold: u64) -> Self {
        self.sync.sync_threshold = threshold;
        self
    }

    pub fn with_weights(mut self, weights: MutationWeights) -> Self {
        self.sync.weights = weights;
        self
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn with_index_kind(mut self, kind: IndexKind) -> Self {
        self.index.kind = kind;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.index.metric = metric;
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_routing_seed(mut self, seed: u64) -> Self {
        self.routing_seed = Some(seed);
        self
    }

    pub fn with_candidate_divisor(mut self, divisor: usize) -> Self {
        self.candidate_divisor = divisor;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SpaceError::InvalidConfig("space name must not be empty".into()));
        }
        if !is_single_component(&self.name) {
            return Err(SpaceError::InvalidConfig(format!(
                "space name {:?} must be a single plain path component",
                self.name
            )));
        }
        if self.dimensions == 0 {
            return Err(SpaceError::InvalidConfig("dimensions must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.rebalance_factor) {
            return Err(SpaceError::InvalidConfig(format!(
                "rebalance_factor must be in [0, 1), got {}",
                self.rebalance_factor
            )));
        }
        if self.candidate_divisor == 0 {
            return Err(SpaceError::InvalidConfig("candidate_divisor must be at least 1".into()));
        }
        if !(0.0..=MAX_TREE_COUNT_EXPONENT).contains(&self.index.forest.tree_count_exponent) {
            return Err(SpaceError::InvalidConfig(format!(
                "tree_count_exponent must be in [0, {MAX_TREE_COUNT_EXPONENT}], got {}",
                self.index.forest.tree_count_exponent
            )));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SpaceError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SpaceError::Serialization(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}
