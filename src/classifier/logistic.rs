//! L2-regularized logistic regression.
//!
//! Minimizes `0.5 * ||w||^2 + C * sum_i ln(1 + exp(-y_i (w . x_i + b)))` by
//! gradient descent with Armijo backtracking. The intercept is not
//! regularized.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::classifier::{
    Classifier, LinearModel, labels_from_decision, log_loss, sigmoid, signed_labels,
};
use crate::error::{DocCatError, Result};
use crate::matrix::{RowView, SampleMatrix};

const MAX_BACKTRACK: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionParams {
    /// Inverse regularization strength.
    pub c: f64,
    /// Stopping tolerance on the largest gradient component.
    pub tol: f64,
    pub max_iter: usize,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            tol: 1e-4,
            max_iter: 1000,
        }
    }
}

impl LogisticRegressionParams {
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
pub struct LogisticRegression {
    params: LogisticRegressionParams,
    model: Option<LinearModel>,
    n_iter: usize,
}

impl LogisticRegression {
    pub fn new(params: LogisticRegressionParams) -> Self {
        Self {
            params,
            model: None,
            n_iter: 0,
        }
    }

    pub fn model(&self) -> Option<&LinearModel> {
        self.model.as_ref()
    }

    /// Fitted weights, one per feature.
    pub fn coef(&self) -> Option<&[f64]> {
        self.model.as_ref().map(|m| m.coef.as_slice())
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Log-odds of the positive class.
    pub fn decision_function(&self, x: &SampleMatrix) -> Result<Vec<f64>> {
        self.model
            .as_ref()
            .ok_or_else(|| DocCatError::not_fitted("LogisticRegression is not fitted"))?
            .decision_function(x)
    }

    /// Probability of the positive class.
    pub fn predict_proba(&self, x: &SampleMatrix) -> Result<Vec<f64>> {
        Ok(self
            .decision_function(x)?
            .into_iter()
            .map(sigmoid)
            .collect())
    }

    fn objective(&self, model: &LinearModel, rows: &[RowView<'_>], y: &[f64]) -> f64 {
        let penalty: f64 = model.coef.iter().map(|w| w * w).sum::<f64>() * 0.5;
        let loss: f64 = rows
            .iter()
            .zip(y)
            .map(|(row, &yi)| log_loss(yi * model.decision(row)))
            .sum();
        penalty + self.params.c * loss
    }

    fn gradient(&self, model: &LinearModel, rows: &[RowView<'_>], y: &[f64]) -> LinearModel {
        let mut grad = LinearModel {
            coef: model.coef.clone(),
            intercept: 0.0,
        };
        for (row, &yi) in rows.iter().zip(y) {
            // d/dz ln(1 + exp(-y z)) = -y * sigmoid(-y z)
            let factor = -self.params.c * yi * sigmoid(-yi * model.decision(row));
            row.for_each_nonzero(|j, v| grad.coef[j] += factor * v);
            grad.intercept += factor;
        }
        grad
    }
}

impl Classifier for LogisticRegression {
    fn name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn fit(&mut self, x: &SampleMatrix, y: &[u8]) -> Result<()> {
        self.params.validate()?;
        let y = signed_labels(x, y)?;
        let rows = x.row_views();

        let mut model = LinearModel::zeros(x.n_features());
        let mut value = self.objective(&model, &rows, &y);
        let mut step = 1.0;
        let mut converged = false;
        let mut iter = 0;

        while iter < self.params.max_iter {
            iter += 1;
            let grad = self.gradient(&model, &rows, &y);
            let grad_max = grad
                .coef
                .iter()
                .chain(std::iter::once(&grad.intercept))
                .fold(0.0_f64, |m, g| m.max(g.abs()));
            if grad_max <= self.params.tol {
                converged = true;
                break;
            }
            let grad_sq: f64 = grad.coef.iter().map(|g| g * g).sum::<f64>()
                + grad.intercept * grad.intercept;

            // Try a larger step than last time, then backtrack.
            step *= 2.0;
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACK {
                let candidate = LinearModel {
                    coef: model
                        .coef
                        .iter()
                        .zip(&grad.coef)
                        .map(|(w, g)| w - step * g)
                        .collect(),
                    intercept: model.intercept - step * grad.intercept,
                };
                let candidate_value = self.objective(&candidate, &rows, &y);
                if candidate_value <= value - 0.5 * step * grad_sq {
                    accepted = Some((candidate, candidate_value));
                    break;
                }
                step *= 0.5;
            }

            match accepted {
                Some((candidate, candidate_value)) => {
                    model = candidate;
                    value = candidate_value;
                }
                // No descent possible at machine precision.
                None => {
                    converged = true;
                    break;
                }
            }
        }

        if converged {
            debug!("LogisticRegression converged after {iter} iterations (objective {value:.6})");
        } else {
            warn!(
                "LogisticRegression did not converge in {} iterations",
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
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlapping() -> (SampleMatrix, Vec<u8>) {
        let x = SampleMatrix::from_rows(&[
            vec![1.0, 0.2],
            vec![0.8, 0.1],
            vec![0.9, 0.6],
            vec![0.3, 0.4],
            vec![0.1, 0.9],
            vec![0.2, 0.7],
            vec![0.0, 1.0],
            vec![0.6, 0.5],
        ])
        .unwrap();
        (x, vec![1, 1, 1, 0, 0, 0, 0, 1])
    }

    #[test]
    fn test_fit_predict_proba() {
        let (x, y) = overlapping();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y).unwrap();

        let coef = model.coef().unwrap();
        assert!(coef[0] > 0.0);
        assert!(coef[1] < 0.0);

        let proba = model.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|&p| p > 0.0 && p < 1.0));
        assert!(proba[0] > proba[6]);

        let decision = model.decision_function(&x).unwrap();
        for (p, d) in proba.iter().zip(&decision) {
            assert!((p - sigmoid(*d)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gradient_vanishes_at_solution() {
        let (x, y) = overlapping();
        let mut model = LogisticRegression::new(LogisticRegressionParams {
            tol: 1e-8,
            max_iter: 20_000,
            ..Default::default()
        });
        model.fit(&x, &y).unwrap();

        let rows = x.row_views();
        let signed = signed_labels(&x, &y).unwrap();
        let grad = model.gradient(model.model().unwrap(), &rows, &signed);
        assert!(grad.coef.iter().all(|g| g.abs() < 1e-6));
        assert!(grad.intercept.abs() < 1e-6);
    }

    #[test]
    fn test_errors() {
        let (x, y) = overlapping();
        let model = LogisticRegression::default();
        assert!(matches!(
            model.predict_proba(&x),
            Err(DocCatError::NotFitted(_))
        ));

        let mut model = LogisticRegression::default();
        assert!(matches!(
            model.fit(&x, &[0; 8]),
            Err(DocCatError::InvalidTrainingSet(_))
        ));
        model.fit(&x, &y).unwrap();
        let narrow = SampleMatrix::from_rows(&[vec![1.0]]).unwrap();
        assert!(matches!(
            model.decision_function(&narrow),
            Err(DocCatError::ShapeMismatch(_))
        ));
    }
}
