//! Document categorization.
//!
//! [`Categorizer`] trains one binary backend over the document-term matrix of
//! a dataset, stores it under a fresh model id, and scores every document of
//! the dataset with it. The backend is chosen by name at training time:
//!
//! | name                 | backend                    | score                      |
//! |----------------------|----------------------------|----------------------------|
//! | `LinearSVC`          | linear SVM                 | decision function          |
//! | `LogisticRegression` | logistic regression        | decision function          |
//! | `NearestCentroid`    | nearest centroid           | distance to closest centroid |
//! | `NearestNeighbor`    | dual-index neighbor ranker | ranking score in `[-1, 1]` |
//! | `xgboost`            | gradient boosted trees     | logit of P(relevant)       |
//!
//! # Example
//!
//! ```no_run
//! use doccat::categorization::{Categorizer, CategorizerConfig, InMemoryFeatures};
//! use doccat::matrix::SampleMatrix;
//!
//! # fn main() -> doccat::error::Result<()> {
//! let matrix = SampleMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.9, 0.1]])?;
//! let features = InMemoryFeatures::new("dataset", matrix);
//! let mut categorizer = Categorizer::new(CategorizerConfig::default(), features)?;
//!
//! let summary = categorizer.train(&[0, 1], &[1, 0], "NearestNeighbor", None)?;
//! let prediction = categorizer.predict(None)?;
//! println!("model {} scores {:?}", summary.mid, prediction.scores);
//! # Ok(())
//! # }
//! ```

pub mod estimator;
pub mod explain;
pub mod method;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};
use crate::matrix::SampleMatrix;
use crate::ranking::NearestNeighborConfig;

pub use estimator::{Estimator, Prediction, logit};
pub use explain::explain_binary_categorization;
pub use method::{CvMode, Method};
pub use store::{ModelParams, ModelStore};

/// Provider of a dataset's document-term matrix.
pub trait FeatureSource {
    /// Identifier of the dataset; models are stored per dataset.
    fn dataset_id(&self) -> &str;

    /// The full document-term matrix, one row per document.
    fn document_term_matrix(&self) -> Result<Arc<SampleMatrix>>;

    /// Term to column mapping, if known.
    fn vocabulary(&self) -> Option<&HashMap<String, usize>> {
        None
    }
}

/// A [`FeatureSource`] over a matrix already in memory.
#[derive(Debug, Clone)]
pub struct InMemoryFeatures {
    dataset_id: String,
    matrix: Arc<SampleMatrix>,
    vocabulary: Option<HashMap<String, usize>>,
}

impl InMemoryFeatures {
    pub fn new<S: Into<String>>(dataset_id: S, matrix: SampleMatrix) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            matrix: Arc::new(matrix),
            vocabulary: None,
        }
    }

    pub fn with_vocabulary(mut self, vocabulary: HashMap<String, usize>) -> Self {
        self.vocabulary = Some(vocabulary);
        self
    }
}

impl FeatureSource for InMemoryFeatures {
    fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    fn document_term_matrix(&self) -> Result<Arc<SampleMatrix>> {
        Ok(Arc::clone(&self.matrix))
    }

    fn vocabulary(&self) -> Option<&HashMap<String, usize>> {
        self.vocabulary.as_ref()
    }
}

/// Categorizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizerConfig {
    /// Root directory of stored models.
    pub cache_dir: PathBuf,
    /// Scoring used by cross-validated hyperparameter search.
    pub cv_scoring: String,
    /// Folds used by cross-validated hyperparameter search.
    pub cv_n_folds: usize,
    /// Settings of the `NearestNeighbor` backend.
    pub nearest_neighbor: NearestNeighborConfig,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            cv_scoring: "roc_auc".to_string(),
            cv_n_folds: 3,
            nearest_neighbor: NearestNeighborConfig::default(),
        }
    }
}

impl CategorizerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cv_scoring.is_empty() {
            return Err(DocCatError::invalid_parameter("cv_scoring must not be empty"));
        }
        if self.cv_n_folds < 2 {
            return Err(DocCatError::invalid_parameter("cv_n_folds must be at least 2"));
        }
        self.nearest_neighbor.validate()
    }
}

/// Lifecycle of a [`Categorizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategorizerState {
    Untrained,
    Trained,
    Predicting,
}

impl fmt::Display for CategorizerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CategorizerState::Untrained => "untrained",
            CategorizerState::Trained => "trained",
            CategorizerState::Predicting => "predicting",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Categorizer::train`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Id of the stored model.
    pub mid: String,
    pub method: Method,
    pub n_samples: usize,
    pub n_positive: usize,
    pub n_negative: usize,
}

/// Trains, stores, reloads and applies categorization models for one dataset.
pub struct Categorizer<F: FeatureSource> {
    config: CategorizerConfig,
    features: F,
    store: ModelStore,
    state: CategorizerState,
    mid: Option<String>,
    estimator: Option<Estimator>,
    pars: Option<ModelParams>,
}

impl<F: FeatureSource> Categorizer<F> {
    /// An untrained categorizer.
    pub fn new(config: CategorizerConfig, features: F) -> Result<Self> {
        config.validate()?;
        let store = ModelStore::new(&config.cache_dir, features.dataset_id())?;
        Ok(Self {
            config,
            features,
            store,
            state: CategorizerState::Untrained,
            mid: None,
            estimator: None,
            pars: None,
        })
    }

    /// Reopen stored model `mid`.
    pub fn load(config: CategorizerConfig, features: F, mid: &str) -> Result<Self> {
        let mut categorizer = Self::new(config, features)?;
        let (estimator, pars) = categorizer.store.load(mid)?;
        info!("loaded {} model {mid}", pars.method);
        categorizer.mid = Some(mid.to_string());
        categorizer.estimator = Some(estimator);
        categorizer.pars = Some(pars);
        categorizer.state = CategorizerState::Trained;
        Ok(categorizer)
    }

    pub fn config(&self) -> &CategorizerConfig {
        &self.config
    }

    pub fn features(&self) -> &F {
        &self.features
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn state(&self) -> CategorizerState {
        self.state
    }

    /// Id of the current model.
    pub fn mid(&self) -> Option<&str> {
        self.mid.as_deref()
    }

    pub fn estimator(&self) -> Option<&Estimator> {
        self.estimator.as_ref()
    }

    /// Parameters of the current model.
    pub fn pars(&self) -> Option<&ModelParams> {
        self.pars.as_ref()
    }

    /// Train a backend selected by name on dataset rows `index` with labels `y`.
    ///
    /// `cv` is `None`, `"fast"` or `"full"`.
    pub fn train(
        &mut self,
        index: &[usize],
        y: &[u8],
        method: &str,
        cv: Option<&str>,
    ) -> Result<TrainingSummary> {
        let method: Method = method.parse()?;
        let cv = CvMode::parse_opt(cv)?;
        self.train_with(index, y, method, cv)
    }

    /// Train with an already parsed method.
    pub fn train_with(
        &mut self,
        index: &[usize],
        y: &[u8],
        method: Method,
        cv: Option<CvMode>,
    ) -> Result<TrainingSummary> {
        method.check_cv(cv)?;
        if index.len() != y.len() {
            return Err(DocCatError::shape_mismatch(format!(
                "got {} document ids and {} labels",
                index.len(),
                y.len()
            )));
        }

        let matrix = self.features.document_term_matrix()?;
        let x = matrix.select_rows(index)?;
        let mut estimator = Estimator::for_method(method, &self.config.nearest_neighbor)?;
        debug!(
            "training {method} on {} documents x {} features",
            x.n_samples(),
            x.n_features()
        );
        estimator.fit(&x, y)?;

        let mid = ModelStore::generate_mid();
        let pars = ModelParams {
            method,
            index: index.to_vec(),
            y: y.to_vec(),
            options: estimator.options()?,
            trained_at: Utc::now(),
        };
        self.store.save(&mid, &estimator, &pars)?;

        let n_positive = y.iter().filter(|&&l| l == 1).count();
        let summary = TrainingSummary {
            mid: mid.clone(),
            method,
            n_samples: y.len(),
            n_positive,
            n_negative: y.len() - n_positive,
        };
        info!(
            "trained {method} model {mid} ({} positive, {} negative)",
            summary.n_positive, summary.n_negative
        );

        self.mid = Some(mid);
        self.estimator = Some(estimator);
        self.pars = Some(pars);
        self.state = CategorizerState::Trained;
        Ok(summary)
    }

    /// Score every document of the dataset with the current model.
    ///
    /// `batch_size` bounds the rows per neighbor query of the
    /// `NearestNeighbor` backend and is ignored by the others.
    pub fn predict(&mut self, batch_size: Option<usize>) -> Result<Prediction> {
        let Some(estimator) = self.estimator.as_ref() else {
            return Err(DocCatError::not_trained("no model was trained or loaded"));
        };
        self.state = CategorizerState::Predicting;
        let result = self
            .features
            .document_term_matrix()
            .and_then(|x| estimator.predict(&x, batch_size));
        self.state = CategorizerState::Trained;

        let prediction = result?;
        debug!("scored {} documents", prediction.scores.len());
        Ok(prediction)
    }

    /// Stored parameters of model `mid`, with `options` read from the model.
    pub fn load_pars(&self, mid: &str) -> Result<ModelParams> {
        let (estimator, mut pars) = self.store.load(mid)?;
        pars.options = estimator.options()?;
        Ok(pars)
    }

    /// Ids of every model stored for this dataset.
    pub fn list_models(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    /// Delete the current model from disk and return to the untrained state.
    pub fn delete(&mut self) -> Result<()> {
        let mid = self
            .mid
            .as_deref()
            .ok_or_else(|| DocCatError::not_trained("no model to delete"))?;
        self.store.delete(mid)?;
        self.mid = None;
        self.estimator = None;
        self.pars = None;
        self.state = CategorizerState::Untrained;
        Ok(())
    }

    /// Term weights of dataset row `document` under the current model.
    ///
    /// Needs a vocabulary from the feature source and a `LogisticRegression`
    /// model.
    pub fn explain(&self, document: usize) -> Result<HashMap<String, f64>> {
        let estimator = self
            .estimator
            .as_ref()
            .ok_or_else(|| DocCatError::not_trained("no model was trained or loaded"))?;
        let vocabulary = self.features.vocabulary().ok_or_else(|| {
            DocCatError::invalid_parameter("the feature source has no vocabulary")
        })?;
        let row = self.features.document_term_matrix()?.select_rows(&[document])?;
        explain_binary_categorization(estimator, vocabulary, &row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn features() -> InMemoryFeatures {
        let matrix = SampleMatrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.8, 0.2],
            vec![0.1, 0.9],
        ])
        .unwrap();
        InMemoryFeatures::new("ds", matrix)
    }

    fn config(dir: &TempDir) -> CategorizerConfig {
        CategorizerConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_state_transitions() {
        let dir = TempDir::new().unwrap();
        let mut categorizer = Categorizer::new(config(&dir), features()).unwrap();
        assert_eq!(categorizer.state(), CategorizerState::Untrained);
        assert!(matches!(
            categorizer.predict(None),
            Err(DocCatError::NotTrained(_))
        ));

        categorizer.train(&[0, 1], &[1, 0], "NearestNeighbor", None).unwrap();
        assert_eq!(categorizer.state(), CategorizerState::Trained);

        let prediction = categorizer.predict(None).unwrap();
        assert_eq!(categorizer.state(), CategorizerState::Trained);
        assert_eq!(prediction.scores.len(), 4);
        assert!(prediction.scores[2] > 0.0);
        assert!(prediction.scores[3] < 0.0);

        categorizer.delete().unwrap();
        assert_eq!(categorizer.state(), CategorizerState::Untrained);
        assert!(categorizer.list_models().unwrap().is_empty());
    }

    #[test]
    fn test_config_from_json() {
        let config = CategorizerConfig::from_json_str(
            r#"{"cache_dir": "/tmp/models", "nearest_neighbor": {"batch_size": 100}}"#,
        )
        .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/models"));
        assert_eq!(config.cv_scoring, "roc_auc");
        assert_eq!(config.cv_n_folds, 3);
        assert_eq!(config.nearest_neighbor.batch_size, 100);

        assert!(matches!(
            CategorizerConfig::from_json_str(r#"{"cv_n_folds": 1}"#),
            Err(DocCatError::InvalidParameter(_))
        ));
        assert!(matches!(
            CategorizerConfig::from_json_str("{not json"),
            Err(DocCatError::Json(_))
        ));
    }

    #[test]
    fn test_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("categorizer.json");
        fs::write(&path, r#"{"nearest_neighbor": {"ranking": "unsupervised"}}"#).unwrap();
        let config = CategorizerConfig::from_json_file(&path).unwrap();
        assert_eq!(
            config.nearest_neighbor.ranking,
            crate::ranking::RankingMode::Unsupervised
        );
    }

    #[test]
    fn test_explain_uses_vocabulary() {
        let dir = TempDir::new().unwrap();
        let vocabulary: HashMap<String, usize> =
            [("alpha".to_string(), 0), ("beta".to_string(), 1)].into_iter().collect();
        let mut categorizer =
            Categorizer::new(config(&dir), features().with_vocabulary(vocabulary)).unwrap();
        categorizer
            .train(&[0, 1, 2, 3], &[1, 0, 1, 0], "LogisticRegression", None)
            .unwrap();

        let weights = categorizer.explain(0).unwrap();
        assert_eq!(weights.len(), 1);
        assert!(weights["alpha"] > 0.0);
    }
}
