//! Distance metrics between sample rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};
use crate::matrix::RowView;

/// Distance metrics for neighbor search and centroid ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean (L2) distance
    #[default]
    Euclidean,
    /// Manhattan (L1) distance
    Manhattan,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
}

impl DistanceMetric {
    /// Calculate the distance between two rows using this metric.
    ///
    /// Callers are responsible for checking that both rows have the same
    /// dimension.
    pub fn distance(&self, a: &RowView<'_>, b: &RowView<'_>) -> f64 {
        match self {
            DistanceMetric::Euclidean => a.squared_euclidean(b).sqrt(),
            DistanceMetric::Manhattan => a.manhattan(b),
            DistanceMetric::Cosine => {
                let norm_a = a.squared_norm().sqrt();
                let norm_b = b.squared_norm().sqrt();

                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0 // Maximum distance for zero vectors
                } else {
                    1.0 - a.dot(b) / (norm_a * norm_b)
                }
            }
        }
    }

    /// Distance between two dense buffers of equal length.
    pub fn distance_dense(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum(),
            DistanceMetric::Cosine => {
                let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0
                } else {
                    1.0 - dot_product / (norm_a * norm_b)
                }
            }
        }
    }

    /// Whether the metric satisfies the triangle inequality, which tree
    /// pruning relies on.
    pub fn is_true_metric(&self) -> bool {
        !matches!(self, DistanceMetric::Cosine)
    }

    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistanceMetric {
    type Err = DocCatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "manhattan" | "l1" | "cityblock" => Ok(DistanceMetric::Manhattan),
            "cosine" => Ok(DistanceMetric::Cosine),
            _ => Err(DocCatError::invalid_parameter(format!(
                "Unknown distance metric: {s}"
            ))),
        }
    }
}
