//! Gradient boosted decision trees for binary classification.
//!
//! Each round fits a regression tree to the first and second derivatives of
//! the logistic loss; leaf values are Newton steps `-G / (H + lambda)` and
//! splits maximize the second-order gain used by XGBoost. Zero entries of
//! sparse rows are handled as one aggregated bucket per feature, so split
//! search only touches stored values.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::classifier::{Classifier, log_loss, sigmoid, signed_labels};
use crate::error::{DocCatError, Result};
use crate::matrix::SampleMatrix;

const MIN_HESSIAN: f64 = 1e-16;

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingParams {
    /// Number of boosting rounds.
    pub n_estimators: usize,
    /// Shrinkage applied to every tree.
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Minimum hessian sum in each child of a split.
    pub min_child_weight: f64,
    /// L2 penalty on leaf values.
    pub reg_lambda: f64,
    /// Fraction of rows sampled per round.
    pub subsample: f64,
    pub random_state: u64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            subsample: 1.0,
            random_state: 0,
        }
    }
}

impl GradientBoostingParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(DocCatError::invalid_parameter("n_estimators must be at least 1"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(DocCatError::invalid_parameter("learning_rate must be positive"));
        }
        if self.max_depth == 0 {
            return Err(DocCatError::invalid_parameter("max_depth must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.subsample) || self.subsample == 0.0 {
            return Err(DocCatError::invalid_parameter("subsample must be in (0, 1]"));
        }
        if self.min_child_weight < 0.0 || self.reg_lambda < 0.0 {
            return Err(DocCatError::invalid_parameter(
                "min_child_weight and reg_lambda must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Column-major copy of the nonzero training values.
struct Columns {
    entries: Vec<Vec<(usize, f64)>>,
}

impl Columns {
    fn new(x: &SampleMatrix) -> Self {
        let mut entries = vec![Vec::new(); x.n_features()];
        for (i, row) in x.row_views().iter().enumerate() {
            row.for_each_nonzero(|j, v| entries[j].push((i, v)));
        }
        Self { entries }
    }

    fn value(&self, row: usize, feature: usize) -> f64 {
        let column = &self.entries[feature];
        match column.binary_search_by_key(&row, |&(r, _)| r) {
            Ok(pos) => column[pos].1,
            Err(_) => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Regression tree stored as a node arena; node 0 is the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }

    /// Leaf value for a row whose feature `j` is `feature_value(j)`.
    fn predict<F: Fn(usize) -> f64>(&self, feature_value: F) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    id = if feature_value(*feature) <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    columns: &'a Columns,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a GradientBoostingParams,
    nodes: Vec<TreeNode>,
}

impl TreeBuilder<'_> {
    fn build(mut self, rows: Vec<usize>) -> RegressionTree {
        self.build_node(rows, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn build_node(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        let g_sum: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h_sum: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        self.nodes.push(TreeNode::Leaf {
            value: -g_sum / (h_sum + self.params.reg_lambda),
        });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return id;
        }
        let Some(split) = self.find_best_split(&rows, g_sum, h_sum) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&i| self.columns.value(i, split.feature) <= split.threshold);
        let left = self.build_node(left_rows, depth + 1);
        let right = self.build_node(right_rows, depth + 1);
        self.nodes[id] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.reg_lambda)
    }

    fn find_best_split(&self, rows: &[usize], g_sum: f64, h_sum: f64) -> Option<SplitCandidate> {
        let n_total = self.grad.len();
        let mut in_node = vec![false; n_total];
        for &i in rows {
            in_node[i] = true;
        }

        let parent = self.score(g_sum, h_sum);
        let mut best: Option<SplitCandidate> = None;
        let mut buckets: Vec<(f64, f64, f64)> = Vec::new();

        for (feature, column) in self.columns.entries.iter().enumerate() {
            buckets.clear();
            let (mut g_nz, mut h_nz, mut count_nz) = (0.0, 0.0, 0usize);
            for &(i, v) in column {
                if in_node[i] {
                    buckets.push((v, self.grad[i], self.hess[i]));
                    g_nz += self.grad[i];
                    h_nz += self.hess[i];
                    count_nz += 1;
                }
            }
            if count_nz < rows.len() {
                buckets.push((0.0, g_sum - g_nz, h_sum - h_nz));
            }
            if buckets.len() < 2 {
                continue;
            }
            buckets.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (mut g_left, mut h_left) = (0.0, 0.0);
            for k in 0..buckets.len() - 1 {
                g_left += buckets[k].1;
                h_left += buckets[k].2;
                if buckets[k].0 == buckets[k + 1].0 {
                    continue;
                }
                let (g_right, h_right) = (g_sum - g_left, h_sum - h_left);
                if h_left < self.params.min_child_weight || h_right < self.params.min_child_weight {
                    continue;
                }
                let gain = 0.5 * (self.score(g_left, h_left) + self.score(g_right, h_right) - parent);
                if gain > 0.0 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (buckets[k].0 + buckets[k + 1].0) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Boosted tree ensemble with a logistic link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    params: GradientBoostingParams,
    trees: Vec<RegressionTree>,
    base_margin: f64,
    n_features: Option<usize>,
    training_losses: Vec<f64>,
}

impl GradientBoostingClassifier {
    pub fn new(params: GradientBoostingParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Mean training log loss after each round.
    pub fn training_losses(&self) -> &[f64] {
        &self.training_losses
    }

    /// Raw log-odds of the positive class.
    pub fn decision_margin(&self, x: &SampleMatrix) -> Result<Vec<f64>> {
        let n_features = self
            .n_features
            .ok_or_else(|| DocCatError::not_fitted("gradient boosting model is not fitted"))?;
        if x.n_features() != n_features {
            return Err(DocCatError::shape_mismatch(format!(
                "X has {} features, model was fitted with {n_features}",
                x.n_features()
            )));
        }
        Ok(x.row_views()
            .iter()
            .map(|row| {
                let boost: f64 = self.trees.iter().map(|t| t.predict(|j| row.get(j))).sum();
                self.base_margin + self.params.learning_rate * boost
            })
            .collect())
    }

    /// Probability of the positive class.
    pub fn predict_proba(&self, x: &SampleMatrix) -> Result<Vec<f64>> {
        Ok(self.decision_margin(x)?.into_iter().map(sigmoid).collect())
    }
}

impl Classifier for GradientBoostingClassifier {
    fn name(&self) -> &'static str {
        "xgboost"
    }

    fn fit(&mut self, x: &SampleMatrix, y: &[u8]) -> Result<()> {
        self.params.validate()?;
        let signed = signed_labels(x, y)?;
        let targets: Vec<f64> = y.iter().map(|&l| f64::from(l)).collect();
        let n = targets.len();

        let positive_rate = targets.iter().sum::<f64>() / n as f64;
        let base_margin = (positive_rate / (1.0 - positive_rate)).ln();
        let columns = Columns::new(x);
        let mut margins = vec![base_margin; n];
        let mut rng = StdRng::seed_from_u64(self.params.random_state);
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        let mut losses = Vec::with_capacity(self.params.n_estimators);

        for round in 0..self.params.n_estimators {
            let mut grad = Vec::with_capacity(n);
            let mut hess = Vec::with_capacity(n);
            for (&m, &t) in margins.iter().zip(&targets) {
                let p = sigmoid(m);
                grad.push(p - t);
                hess.push((p * (1.0 - p)).max(MIN_HESSIAN));
            }

            let mut rows: Vec<usize> = if self.params.subsample < 1.0 {
                (0..n)
                    .filter(|_| rng.random::<f64>() < self.params.subsample)
                    .collect()
            } else {
                (0..n).collect()
            };
            if rows.is_empty() {
                rows = (0..n).collect();
            }

            let tree = TreeBuilder {
                columns: &columns,
                grad: &grad,
                hess: &hess,
                params: &self.params,
                nodes: Vec::new(),
            }
            .build(rows);

            for (i, m) in margins.iter_mut().enumerate() {
                *m += self.params.learning_rate * tree.predict(|j| columns.value(i, j));
            }
            let loss = margins
                .iter()
                .zip(&signed)
                .map(|(&m, &s)| log_loss(s * m))
                .sum::<f64>()
                / n as f64;
            debug!(
                "boosting round {}: {} leaves, train log loss {loss:.6}",
                round + 1,
                tree.n_leaves()
            );
            losses.push(loss);
            trees.push(tree);
        }

        self.trees = trees;
        self.base_margin = base_margin;
        self.training_losses = losses;
        self.n_features = Some(x.n_features());
        Ok(())
    }

    fn predict(&self, x: &SampleMatrix) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| u8::from(p > 0.5))
            .collect())
    }

    fn is_fitted(&self) -> bool {
        self.n_features.is_some()
    }

    fn params(&self) -> serde_json::Value {
        json!({
            "n_estimators": self.params.n_estimators,
            "learning_rate": self.params.learning_rate,
            "max_depth": self.params.max_depth,
            "min_child_weight": self.params.min_child_weight,
            "reg_lambda": self.params.reg_lambda,
            "subsample": self.params.subsample,
            "random_state": self.params.random_state,
        })
    }
}
