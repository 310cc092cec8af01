//! Nearest centroid classifier with distance output.

use ahash::AHashMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};
use crate::matrix::{RowView, SampleMatrix};
use crate::neighbors::DistanceMetric;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Centroids {
    classes: Vec<u8>,
    centroids: Vec<Vec<f64>>,
    /// Squared L2 norm of each centroid.
    sq_norms: Vec<f64>,
    /// L1 norm of each centroid.
    l1_norms: Vec<f64>,
    n_features: usize,
}

impl Centroids {
    /// Distance from `row` to centroid `c`, touching only the nonzero
    /// entries of the row.
    fn distance(&self, metric: DistanceMetric, row: &RowView<'_>, c: usize) -> f64 {
        let centroid = &self.centroids[c];
        match metric {
            DistanceMetric::Euclidean => {
                let sq = row.squared_norm() - 2.0 * row.dot_slice(centroid) + self.sq_norms[c];
                sq.max(0.0).sqrt()
            }
            DistanceMetric::Manhattan => {
                let mut acc = self.l1_norms[c];
                row.for_each_nonzero(|j, v| acc += (v - centroid[j]).abs() - centroid[j].abs());
                acc.max(0.0)
            }
            DistanceMetric::Cosine => {
                let norm_row = row.squared_norm().sqrt();
                let norm_centroid = self.sq_norms[c].sqrt();
                if norm_row == 0.0 || norm_centroid == 0.0 {
                    1.0
                } else {
                    1.0 - row.dot_slice(centroid) / (norm_row * norm_centroid)
                }
            }
        }
    }
}

/// Assigns each row to the class with the closest centroid.
///
/// Centroids are per-class means, or per-class medians under the Manhattan
/// metric. [`decision_function`](Self::decision_function) reports the distance
/// to the closest centroid, so lower values mean more confident assignments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NearestCentroidRanker {
    metric: DistanceMetric,
    state: Option<Centroids>,
}

impl NearestCentroidRanker {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            state: None,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Sorted class labels seen at fit time.
    pub fn classes(&self) -> Option<&[u8]> {
        self.state.as_ref().map(|s| s.classes.as_slice())
    }

    /// One centroid per class, in [`classes`](Self::classes) order.
    pub fn centroids(&self) -> Option<&[Vec<f64>]> {
        self.state.as_ref().map(|s| s.centroids.as_slice())
    }

    pub fn fit(&mut self, x: &SampleMatrix, y: &[u8]) -> Result<()> {
        if y.len() != x.n_samples() {
            return Err(DocCatError::shape_mismatch(format!(
                "got {} labels for {} samples",
                y.len(),
                x.n_samples()
            )));
        }

        let mut classes = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(DocCatError::invalid_training_set(format!(
                "nearest centroid needs at least 2 classes, got {}",
                classes.len()
            )));
        }

        let n_features = x.n_features();
        let centroids: Vec<Vec<f64>> = match self.metric {
            DistanceMetric::Manhattan => class_medians(x, y, &classes),
            _ => class_means(x, y, &classes),
        };
        let sq_norms: Vec<f64> = centroids
            .iter()
            .map(|c| c.iter().map(|v| v * v).sum())
            .collect();
        let l1_norms: Vec<f64> = centroids
            .iter()
            .map(|c| c.iter().map(|v| v.abs()).sum())
            .collect();

        debug!(
            "fitted nearest centroid over {} classes ({} metric)",
            classes.len(),
            self.metric
        );
        self.state = Some(Centroids {
            classes,
            centroids,
            sq_norms,
            l1_norms,
            n_features,
        });
        Ok(())
    }

    /// Index of the closest centroid and its distance, per row.
    fn closest(&self, x: &SampleMatrix) -> Result<(&Centroids, Vec<(usize, f64)>)> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| DocCatError::not_fitted("nearest centroid is not fitted"))?;
        if x.n_features() != state.n_features {
            return Err(DocCatError::shape_mismatch(format!(
                "X has {} features, model was fitted with {}",
                x.n_features(),
                state.n_features
            )));
        }

        let closest = x
            .row_views()
            .iter()
            .map(|row| {
                (0..state.centroids.len())
                    .map(|c| (c, state.distance(self.metric, row, c)))
                    .fold((0, f64::INFINITY), |best, cand| {
                        if cand.1 < best.1 { cand } else { best }
                    })
            })
            .collect();
        Ok((state, closest))
    }

    /// Predicted class label per row.
    pub fn predict(&self, x: &SampleMatrix) -> Result<Vec<u8>> {
        let (state, closest) = self.closest(x)?;
        Ok(closest.into_iter().map(|(c, _)| state.classes[c]).collect())
    }

    /// Distance from each row to its closest centroid.
    pub fn decision_function(&self, x: &SampleMatrix) -> Result<Vec<f64>> {
        let (_, closest) = self.closest(x)?;
        Ok(closest.into_iter().map(|(_, d)| d).collect())
    }
}

fn class_slot(classes: &[u8], label: u8) -> usize {
    // Every label is one of `classes`, which was built from the labels.
    classes.binary_search(&label).unwrap_or_default()
}

/// Per-class feature means, streamed over nonzero entries.
fn class_means(x: &SampleMatrix, y: &[u8], classes: &[u8]) -> Vec<Vec<f64>> {
    let mut sums = vec![vec![0.0; x.n_features()]; classes.len()];
    let mut counts = vec![0usize; classes.len()];
    for (row, &label) in x.row_views().iter().zip(y) {
        let c = class_slot(classes, label);
        counts[c] += 1;
        let sum = &mut sums[c];
        row.for_each_nonzero(|j, v| sum[j] += v);
    }
    for (sum, &count) in sums.iter_mut().zip(&counts) {
        let count = count as f64;
        sum.iter_mut().for_each(|s| *s /= count);
    }
    sums
}

/// Per-class feature medians. Only nonzero entries are collected; the
/// implicit zeros of each column are accounted for by count.
fn class_medians(x: &SampleMatrix, y: &[u8], classes: &[u8]) -> Vec<Vec<f64>> {
    let mut columns: Vec<AHashMap<usize, Vec<f64>>> = vec![AHashMap::new(); classes.len()];
    let mut counts = vec![0usize; classes.len()];
    for (row, &label) in x.row_views().iter().zip(y) {
        let c = class_slot(classes, label);
        counts[c] += 1;
        let class_columns = &mut columns[c];
        row.for_each_nonzero(|j, v| class_columns.entry(j).or_default().push(v));
    }

    columns
        .into_iter()
        .zip(counts)
        .map(|(class_columns, count)| {
            let mut median = vec![0.0; x.n_features()];
            for (j, mut values) in class_columns {
                values.sort_by(f64::total_cmp);
                median[j] = column_median(&values, count);
            }
            median
        })
        .collect()
}

/// Median of a column with `count` entries whose nonzero values are the
/// sorted `nonzeros`; the rest are zeros.
fn column_median(nonzeros: &[f64], count: usize) -> f64 {
    let zeros = count - nonzeros.len();
    let negatives = nonzeros.partition_point(|&v| v < 0.0);
    let order_stat = |k: usize| {
        if k < negatives {
            nonzeros[k]
        } else if k < negatives + zeros {
            0.0
        } else {
            nonzeros[k - zeros]
        }
    };
    let mid = count / 2;
    if count % 2 == 0 {
        (order_stat(mid - 1) + order_stat(mid)) / 2.0
    } else {
        order_stat(mid)
    }
}
