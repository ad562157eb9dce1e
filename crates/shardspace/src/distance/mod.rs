//! Distance metrics for nearest-neighbor search.
//!
//! Every metric is expressed as a distance: smaller means closer, so ranked
//! results can always be sorted ascending.

use std::fmt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `sqrt(2 - 2 * cos(a, b))`, the chord length between normalized vectors.
    #[default]
    Angular,
    Euclidean,
    /// Sum of absolute coordinate differences.
    Manhattan,
    /// Negated inner product.
    Dot,
}

impl DistanceMetric {
    pub fn name(self) -> &'static str {
        match self {
            Self::Angular => "angular",
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
            Self::Dot => "dot",
        }
    }

    /// Parse a metric name or common alias; unknown names fall back to angular.
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Self::Euclidean,
            "manhattan" | "l1" | "taxicab" => Self::Manhattan,
            "dot" | "ip" | "inner_product" => Self::Dot,
            _ => Self::Angular,
        }
    }

    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Angular => angular(a, b),
            Self::Euclidean => l2_squared(a, b).sqrt(),
            Self::Manhattan => manhattan(a, b),
            Self::Dot => -inner_product(a, b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline]
pub fn manhattan(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

#[inline]
fn norm(v: &[f32]) -> f32 {
    inner_product(v, v).sqrt()
}

/// Cosine similarity in `[-1, 1]`; 0 when either vector is zero.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    inner_product(a, b) / denom
}

/// Angular distance in `[0, 2]`. Zero vectors sit at `sqrt(2)` from everything.
#[inline]
pub fn angular(a: &[f32], b: &[f32]) -> f32 {
    (2.0 - 2.0 * cosine_similarity(a, b)).max(0.0).sqrt()
}

/// Scale `v` to unit length in place; zero vectors are left untouched.
pub fn normalize_vector(v: &mut [f32]) {
    let n = norm(v);
    if n > 0.0 {
        v.iter_mut().for_each(|x| *x /= n);
    }
}
