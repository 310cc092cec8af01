//! Ball tree index.
//!
//! Space-partitioning tree using hyperspheres (balls). Each node stores the
//! centroid of its points and the radius of the smallest ball around that
//! centroid containing them. A subtree is skipped during search when the
//! closest point it could contain is farther than the current k-th best hit.
//!
//! Only usable with metrics that satisfy the triangle inequality, and only on
//! dense data; sparse input goes to the brute force index instead.
//!
//! # References
//!
//! - Omohundro (1989): "Five balltree construction algorithms"

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};
use crate::matrix::{RowView, SampleMatrix};
use crate::neighbors::distance::DistanceMetric;
use crate::neighbors::neighbor_order;

const MAX_DEPTH: usize = 64;

/// Ball tree over dense sample rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallTree {
    points: Vec<f64>,
    dim: usize,
    n_points: usize,
    leaf_size: usize,
    metric: DistanceMetric,
    nodes: Vec<BallNode>,
    root: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum BallNode {
    Internal {
        center: Vec<f64>,
        radius: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        center: Vec<f64>,
        radius: f64,
        points: Vec<usize>,
    },
}

impl BallNode {
    fn bounds(&self) -> (&[f64], f64) {
        match self {
            BallNode::Internal { center, radius, .. } | BallNode::Leaf { center, radius, .. } => {
                (center, *radius)
            }
        }
    }
}

impl BallTree {
    /// Build the tree over every row of `data`.
    pub fn build(data: &SampleMatrix, leaf_size: usize, metric: DistanceMetric) -> Result<Self> {
        if !metric.is_true_metric() {
            return Err(DocCatError::invalid_parameter(format!(
                "metric '{metric}' cannot be used with a ball tree"
            )));
        }
        if leaf_size == 0 {
            return Err(DocCatError::invalid_parameter("leaf_size must be at least 1"));
        }
        if data.is_empty() {
            return Err(DocCatError::invalid_parameter(
                "cannot build a ball tree over an empty matrix",
            ));
        }

        let dim = data.n_features();
        let mut points = Vec::with_capacity(data.n_samples() * dim);
        for row in data.row_views() {
            points.extend(row.to_dense());
        }

        let mut tree = Self {
            points,
            dim,
            n_points: data.n_samples(),
            leaf_size,
            metric,
            nodes: Vec::new(),
            root: 0,
        };
        let all: Vec<usize> = (0..tree.n_points).collect();
        tree.root = tree.build_node(all, 0);
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.n_points
    }

    pub fn is_empty(&self) -> bool {
        self.n_points == 0
    }

    /// Build a subtree and return its node id.
    fn build_node(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let center = self.compute_center(&indices);
        let radius = self.compute_radius(&indices, &center);

        if indices.len() <= self.leaf_size || radius == 0.0 || depth >= MAX_DEPTH {
            return self.push_leaf(center, radius, indices);
        }

        // Seeds: the point farthest from the centroid, then the point farthest from it.
        let seed_a = self.farthest_from(&indices, &center);
        let seed_a_point = self.point(seed_a).to_vec();
        let seed_b = self.farthest_from(&indices, &seed_a_point);
        let seed_b_point = self.point(seed_b).to_vec();

        let (left, right): (Vec<usize>, Vec<usize>) = indices.iter().copied().partition(|&idx| {
            let p = self.point(idx);
            self.metric.distance_dense(p, &seed_a_point)
                <= self.metric.distance_dense(p, &seed_b_point)
        });

        if left.is_empty() || right.is_empty() {
            return self.push_leaf(center, radius, indices);
        }

        let left = self.build_node(left, depth + 1);
        let right = self.build_node(right, depth + 1);
        self.nodes.push(BallNode::Internal {
            center,
            radius,
            left,
            right,
        });
        self.nodes.len() - 1
    }

    fn push_leaf(&mut self, center: Vec<f64>, radius: f64, points: Vec<usize>) -> usize {
        self.nodes.push(BallNode::Leaf {
            center,
            radius,
            points,
        });
        self.nodes.len() - 1
    }

    fn compute_center(&self, indices: &[usize]) -> Vec<f64> {
        let mut center = vec![0.0; self.dim];
        for &idx in indices {
            for (c, &v) in center.iter_mut().zip(self.point(idx)) {
                *c += v;
            }
        }
        let count = indices.len() as f64;
        for c in center.iter_mut() {
            *c /= count;
        }
        center
    }

    fn compute_radius(&self, indices: &[usize], center: &[f64]) -> f64 {
        indices
            .iter()
            .map(|&idx| self.metric.distance_dense(self.point(idx), center))
            .fold(0.0, f64::max)
    }

    fn farthest_from(&self, indices: &[usize], origin: &[f64]) -> usize {
        let mut best = (f64::NEG_INFINITY, indices[0]);
        for &idx in indices {
            let dist = self.metric.distance_dense(self.point(idx), origin);
            if dist > best.0 {
                best = (dist, idx);
            }
        }
        best.1
    }

    fn point(&self, idx: usize) -> &[f64] {
        let start = idx * self.dim;
        &self.points[start..start + self.dim]
    }

    /// The `k` nearest points as `(distance, local index)`, closest first.
    ///
    /// Results match an exhaustive search, including the lowest-index
    /// preference on equal distances.
    pub fn search(&self, query: &RowView<'_>, k: usize) -> Vec<(f64, usize)> {
        let query = query.to_dense();
        let mut best = Vec::with_capacity(k + 1);
        if k > 0 && !self.nodes.is_empty() {
            self.search_node(self.root, &query, k, &mut best);
        }
        best
    }

    fn lower_bound(&self, node: &BallNode, query: &[f64]) -> f64 {
        let (center, radius) = node.bounds();
        (self.metric.distance_dense(query, center) - radius).max(0.0)
    }

    fn search_node(&self, node_id: usize, query: &[f64], k: usize, best: &mut Vec<(f64, usize)>) {
        let node = &self.nodes[node_id];
        // Strict comparison: a ball that could hold an equally distant point
        // with a lower index must still be visited.
        if best.len() == k && self.lower_bound(node, query) > best[k - 1].0 {
            return;
        }

        match node {
            BallNode::Leaf { points, .. } => {
                for &idx in points {
                    let dist = self.metric.distance_dense(query, self.point(idx));
                    insert_candidate(best, k, (dist, idx));
                }
            }
            BallNode::Internal { left, right, .. } => {
                let left_min = self.lower_bound(&self.nodes[*left], query);
                let right_min = self.lower_bound(&self.nodes[*right], query);
                if left_min <= right_min {
                    self.search_node(*left, query, k, best);
                    self.search_node(*right, query, k, best);
                } else {
                    self.search_node(*right, query, k, best);
                    self.search_node(*left, query, k, best);
                }
            }
        }
    }
}

fn insert_candidate(best: &mut Vec<(f64, usize)>, k: usize, candidate: (f64, usize)) {
    if best.len() == k && neighbor_order(&candidate, &best[k - 1]) != Ordering::Less {
        return;
    }
    let pos = best.partition_point(|hit| neighbor_order(hit, &candidate) == Ordering::Less);
    best.insert(pos, candidate);
    best.truncate(k);
}
