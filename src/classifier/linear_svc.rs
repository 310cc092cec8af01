//! Linear support vector classifier.
//!
//! L2-regularized, squared hinge loss, solved in the dual by coordinate
//! descent (Hsieh et al., 2008). The intercept is learned as the weight of a
//! constant feature equal to 1 and is regularized with the other weights.

use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::classifier::{Classifier, LinearModel, labels_from_decision, signed_labels};
use crate::error::{DocCatError, Result};
use crate::matrix::SampleMatrix;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvcParams {
    /// Inverse regularization strength.
    pub c: f64,
    /// Stopping tolerance on the projected gradient spread.
    pub tol: f64,
    pub max_iter: usize,
    /// Seed of the coordinate visiting order.
    pub random_state: u64,
}

impl Default for LinearSvcParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            tol: 1e-4,
            max_iter: 1000,
            random_state: 0,
        }
    }
}

impl LinearSvcParams {
    pub fn validate(&self) -> Result<()> {
        if !self.c.is_finite() || self.c <= 0.0 {
            return Err(DocCatError::invalid_parameter("C must be positive"));
        }
        if !self.tol.is_finite() || self.tol <= 0.0 {
            return Err(DocCatError::invalid_parameter("tol must be positive"));
        }
        if self.max_iter == 0 {
            return Err(DocCatError::invalid_parameter("max_iter must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearSvc {
    params: LinearSvcParams,
    model: Option<LinearModel>,
    n_iter: usize,
}

impl LinearSvc {
    pub fn new(params: LinearSvcParams) -> Self {
        Self {
            params,
            model: None,
            n_iter: 0,
        }
    }

    pub fn model(&self) -> Option<&LinearModel> {
        self.model.as_ref()
    }

    /// Passes over the data made by the last fit.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Signed distance to the separating hyperplane (up to `||w||`).
    pub fn decision_function(&self, x: &SampleMatrix) -> Result<Vec<f64>> {
        self.model
            .as_ref()
            .ok_or_else(|| DocCatError::not_fitted("LinearSVC is not fitted"))?
            .decision_function(x)
    }
}

impl Classifier for LinearSvc {
    fn name(&self) -> &'static str {
        "LinearSVC"
    }

    fn fit(&mut self, x: &SampleMatrix, y: &[u8]) -> Result<()> {
        self.params.validate()?;
        let y = signed_labels(x, y)?;
        let rows = x.row_views();
        let n = rows.len();

        // Squared hinge loss adds 1/(2C) to the diagonal of the dual Hessian.
        let diag = 0.5 / self.params.c;
        let q_diag: Vec<f64> = rows.iter().map(|r| r.squared_norm() + 1.0 + diag).collect();

        let mut model = LinearModel::zeros(x.n_features());
        let mut alpha = vec![0.0; n];
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.params.random_state);

        let mut converged = false;
        let mut iter = 0;
        while iter < self.params.max_iter {
            iter += 1;
            order.shuffle(&mut rng);

            let mut pg_max = f64::NEG_INFINITY;
            let mut pg_min = f64::INFINITY;
            for &i in &order {
                let g = y[i] * model.decision(&rows[i]) - 1.0 + diag * alpha[i];
                let pg = if alpha[i] == 0.0 { g.min(0.0) } else { g };
                pg_max = pg_max.max(pg);
                pg_min = pg_min.min(pg);

                if pg.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (old - g / q_diag[i]).max(0.0);
                    let step = (alpha[i] - old) * y[i];
                    rows[i].for_each_nonzero(|j, v| model.coef[j] += step * v);
                    model.intercept += step;
                }
            }

            if pg_max - pg_min <= self.params.tol {
                converged = true;
                break;
            }
        }

        if converged {
            debug!("LinearSVC converged after {iter} iterations");
        } else {
            warn!(
                "LinearSVC did not converge in {} iterations",
                self.params.max_iter
            );
        }
        self.n_iter = iter;
        self.model = Some(model);
        Ok(())
    }

    fn predict(&self, x: &SampleMatrix) -> Result<Vec<u8>> {
        Ok(labels_from_decision(&self.decision_function(x)?))
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn params(&self) -> serde_json::Value {
        json!({
            "C": self.params.c,
            "tol": self.params.tol,
            "max_iter": self.params.max_iter,
            "random_state": self.params.random_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (SampleMatrix, Vec<u8>) {
        let x = SampleMatrix::from_rows(&[
            vec![2.0, 2.0],
            vec![3.0, 1.5],
            vec![2.5, 3.0],
            vec![-2.0, -1.0],
            vec![-3.0, -2.5],
            vec![-1.5, -3.0],
        ])
        .unwrap();
        (x, vec![1, 1, 1, 0, 0, 0])
    }

    #[test]
    fn test_separates_linearly_separable_data() {
        let (x, y) = separable();
        let mut svc = LinearSvc::default();
        svc.fit(&x, &y).unwrap();
        assert!(svc.is_fitted());
        assert_eq!(svc.predict(&x).unwrap(), y);

        let decision = svc.decision_function(&x).unwrap();
        assert!(decision[..3].iter().all(|&d| d > 0.0));
        assert!(decision[3..].iter().all(|&d| d < 0.0));
    }

    #[test]
    fn test_sparse_and_dense_agree() {
        let (x, y) = separable();
        let triplets: Vec<(usize, usize, f64)> = x
            .row_views()
            .iter()
            .enumerate()
            .flat_map(|(i, r)| {
                r.to_dense()
                    .into_iter()
                    .enumerate()
                    .map(move |(j, v)| (i, j, v))
            })
            .collect();
        let sparse = SampleMatrix::from_triplets((6, 2), &triplets).unwrap();

        let mut dense_svc = LinearSvc::default();
        dense_svc.fit(&x, &y).unwrap();
        let mut sparse_svc = LinearSvc::default();
        sparse_svc.fit(&sparse, &y).unwrap();

        let a = dense_svc.model().unwrap();
        let b = sparse_svc.model().unwrap();
        for (wa, wb) in a.coef.iter().zip(&b.coef) {
            assert!((wa - wb).abs() < 1e-9);
        }
    }

    #[test]
    fn test_errors() {
        let (x, _) = separable();
        let svc = LinearSvc::default();
        assert!(matches!(svc.predict(&x), Err(DocCatError::NotFitted(_))));

        let mut svc = LinearSvc::default();
        assert!(matches!(
            svc.fit(&x, &[1, 1, 1, 1, 1, 1]),
            Err(DocCatError::InvalidTrainingSet(_))
        ));

        let mut bad = LinearSvc::new(LinearSvcParams {
            c: 0.0,
            ..Default::default()
        });
        assert!(matches!(
            bad.fit(&x, &[1, 1, 1, 0, 0, 0]),
            Err(DocCatError::InvalidParameter(_))
        ));
    }
}
