//! Exhaustive neighbor search.

use serde::{Deserialize, Serialize};

use crate::matrix::{RowView, SampleMatrix};
use crate::neighbors::distance::DistanceMetric;
use crate::neighbors::select_k_nearest;

/// Brute force index: compares every query against every fitted row.
///
/// Works on dense and sparse data. Immutable after construction, so
/// concurrent queries need no synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceIndex {
    data: SampleMatrix,
    metric: DistanceMetric,
}

impl BruteForceIndex {
    pub fn new(data: SampleMatrix, metric: DistanceMetric) -> Self {
        Self { data, metric }
    }

    pub fn len(&self) -> usize {
        self.data.n_samples()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The `k` nearest rows as `(distance, local index)`, closest first.
    ///
    /// Equal distances are ordered by index.
    pub fn search(&self, query: &RowView<'_>, k: usize) -> Vec<(f64, usize)> {
        if k == 1 {
            // Strict comparison keeps the lowest index on ties.
            let mut best: Option<(f64, usize)> = None;
            for i in 0..self.len() {
                let Some(row) = self.data.row(i) else { continue };
                let dist = self.metric.distance(query, &row);
                match best {
                    Some((best_dist, _)) if dist >= best_dist => {}
                    _ => best = Some((dist, i)),
                }
            }
            return best.into_iter().collect();
        }

        let candidates: Vec<(f64, usize)> = (0..self.len())
            .filter_map(|i| {
                self.data
                    .row(i)
                    .map(|row| (self.metric.distance(query, &row), i))
            })
            .collect();
        select_k_nearest(candidates, k)
    }
}
