//! Fitted backend dispatch.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::categorization::method::Method;
use crate::classifier::{Classifier, LinearSvc, LogisticRegression};
use crate::error::Result;
use crate::matrix::SampleMatrix;
use crate::ranking::{NearestCentroidRanker, NearestNeighborConfig, NearestNeighborRanker, RankingResult};

#[cfg(feature = "gradient-boosting")]
use crate::classifier::GradientBoostingClassifier;

/// Probabilities are clipped to `[EPS, 1 - EPS]` before taking the logit.
const LOGIT_EPS: f64 = 1e-15;

/// Log-odds of a probability.
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
    (p / (1.0 - p)).ln()
}

/// Scores produced by a backend over a document-term matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// One score per document.
    pub scores: Vec<f64>,
    /// Neighbor diagnostics, for the nearest neighbor backend only.
    pub neighbors: Option<Vec<RankingResult>>,
}

/// One backend, selected once at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    LinearSvc(LinearSvc),
    LogisticRegression(LogisticRegression),
    NearestCentroid(NearestCentroidRanker),
    NearestNeighbor(NearestNeighborRanker),
    #[cfg(feature = "gradient-boosting")]
    GradientBoosting(GradientBoostingClassifier),
}

impl Estimator {
    /// An unfitted backend for `method`.
    pub fn for_method(method: Method, nearest_neighbor: &NearestNeighborConfig) -> Result<Self> {
        match method {
            Method::LinearSvc => Ok(Estimator::LinearSvc(LinearSvc::default())),
            Method::LogisticRegression => {
                Ok(Estimator::LogisticRegression(LogisticRegression::default()))
            }
            Method::NearestCentroid => Ok(Estimator::NearestCentroid(NearestCentroidRanker::default())),
            Method::NearestNeighbor => Ok(Estimator::NearestNeighbor(NearestNeighborRanker::new(
                nearest_neighbor.clone(),
            ))),
            #[cfg(feature = "gradient-boosting")]
            Method::GradientBoosting => Ok(Estimator::GradientBoosting(
                GradientBoostingClassifier::default(),
            )),
            #[cfg(not(feature = "gradient-boosting"))]
            Method::GradientBoosting => Err(crate::error::DocCatError::missing_dependency(
                "xgboost requires the 'gradient-boosting' feature",
            )),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Estimator::LinearSvc(_) => Method::LinearSvc,
            Estimator::LogisticRegression(_) => Method::LogisticRegression,
            Estimator::NearestCentroid(_) => Method::NearestCentroid,
            Estimator::NearestNeighbor(_) => Method::NearestNeighbor,
            #[cfg(feature = "gradient-boosting")]
            Estimator::GradientBoosting(_) => Method::GradientBoosting,
        }
    }

    pub fn fit(&mut self, x: &SampleMatrix, y: &[u8]) -> Result<()> {
        match self {
            Estimator::LinearSvc(model) => model.fit(x, y),
            Estimator::LogisticRegression(model) => model.fit(x, y),
            Estimator::NearestCentroid(model) => model.fit(x, y),
            Estimator::NearestNeighbor(model) => model.fit(x, y),
            #[cfg(feature = "gradient-boosting")]
            Estimator::GradientBoosting(model) => model.fit(x, y),
        }
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            Estimator::LinearSvc(model) => model.is_fitted(),
            Estimator::LogisticRegression(model) => model.is_fitted(),
            Estimator::NearestCentroid(model) => model.is_fitted(),
            Estimator::NearestNeighbor(model) => model.is_fitted(),
            #[cfg(feature = "gradient-boosting")]
            Estimator::GradientBoosting(model) => model.is_fitted(),
        }
    }

    /// Backend options as stored next to the model.
    pub fn options(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Estimator::LinearSvc(model) => model.params(),
            Estimator::LogisticRegression(model) => model.params(),
            Estimator::NearestCentroid(model) => json!({ "metric": model.metric() }),
            Estimator::NearestNeighbor(model) => serde_json::to_value(model.config())?,
            #[cfg(feature = "gradient-boosting")]
            Estimator::GradientBoosting(model) => model.params(),
        })
    }

    /// Score every row of `x`.
    ///
    /// The nearest neighbor ranker returns its fused ranking scores along with
    /// the neighbor diagnostics; `batch_size` only applies to it. Linear models
    /// and the centroid ranker return their decision function, gradient
    /// boosting the logit of the positive class probability.
    pub fn predict(&self, x: &SampleMatrix, batch_size: Option<usize>) -> Result<Prediction> {
        let scores = match self {
            Estimator::NearestNeighbor(model) => {
                let neighbors = model.kneighbors(x, batch_size)?;
                return Ok(Prediction {
                    scores: neighbors.iter().map(|r| r.score).collect(),
                    neighbors: Some(neighbors),
                });
            }
            Estimator::LinearSvc(model) => model.decision_function(x)?,
            Estimator::LogisticRegression(model) => model.decision_function(x)?,
            Estimator::NearestCentroid(model) => model.decision_function(x)?,
            #[cfg(feature = "gradient-boosting")]
            Estimator::GradientBoosting(model) => {
                model.predict_proba(x)?.into_iter().map(logit).collect()
            }
        };
        Ok(Prediction {
            scores,
            neighbors: None,
        })
    }

    pub fn as_logistic_regression(&self) -> Option<&LogisticRegression> {
        match self {
            Estimator::LogisticRegression(model) => Some(model),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocCatError;

    fn data() -> (SampleMatrix, Vec<u8>) {
        let x = SampleMatrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
            vec![0.1, 0.9],
        ])
        .unwrap();
        (x, vec![1, 1, 0, 0])
    }

    #[test]
    fn test_every_method_fits_and_predicts() {
        let (x, y) = data();
        let available = Method::ALL
            .into_iter()
            .filter(|m| cfg!(feature = "gradient-boosting") || *m != Method::GradientBoosting);
        for method in available {
            let mut estimator = Estimator::for_method(method, &NearestNeighborConfig::default()).unwrap();
            assert_eq!(estimator.method(), method);
            assert!(!estimator.is_fitted());

            estimator.fit(&x, &y).unwrap();
            assert!(estimator.is_fitted());

            let prediction = estimator.predict(&x, None).unwrap();
            assert_eq!(prediction.scores.len(), 4);
            assert_eq!(
                prediction.neighbors.is_some(),
                method == Method::NearestNeighbor
            );
            assert!(estimator.options().unwrap().is_object());
        }
    }

    #[test]
    fn test_linear_scores_are_signed() {
        let (x, y) = data();
        let mut estimator =
            Estimator::for_method(Method::LogisticRegression, &NearestNeighborConfig::default())
                .unwrap();
        estimator.fit(&x, &y).unwrap();
        let scores = estimator.predict(&x, None).unwrap().scores;
        assert!(scores[0] > 0.0 && scores[1] > 0.0);
        assert!(scores[2] < 0.0 && scores[3] < 0.0);
    }

    #[test]
    fn test_logit() {
        assert!(logit(0.5).abs() < 1e-15);
        assert!((logit(0.75) - 3f64.ln()).abs() < 1e-12);
        assert!(logit(1.0).is_finite());
        assert!(logit(0.0).is_finite());
    }

    #[test]
    fn test_unfitted_predict_fails() {
        let (x, _) = data();
        let estimator =
            Estimator::for_method(Method::NearestNeighbor, &NearestNeighborConfig::default())
                .unwrap();
        assert!(matches!(
            estimator.predict(&x, None),
            Err(DocCatError::NotFitted(_))
        ));
    }
}
