//! Dual-index nearest neighbor ranker.
//!
//! Positive and negative training samples are indexed separately. A query row
//! is scored from its distance to the closest positive exemplar and, in
//! supervised mode, its distance to the closest negative exemplar.
//!
//! Distances are halved before fusion so that, for L2-normalized vectors
//! (Euclidean distance in `[0, 2]`), each similarity `S = 1 - D/2` lies in
//! `[0, 1]`.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};
use crate::matrix::SampleMatrix;
use crate::neighbors::{
    Algorithm, DEFAULT_BATCH_SIZE, DistanceMetric, NearestNeighbors, NeighborsParams,
    chunk_kneighbors, resolve_n_jobs,
};
use crate::partition::{IndexPartition, check_labels};
use crate::ranking::RankingMode;

/// Configuration of a [`NearestNeighborRanker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearestNeighborConfig {
    /// Search algorithm of both indices.
    pub algorithm: Algorithm,
    /// Leaf size of ball tree indices.
    pub leaf_size: usize,
    /// Worker threads per query (1 = inline, -1 = all cores).
    pub n_jobs: i32,
    /// Requested ranking mode.
    pub ranking: RankingMode,
    /// Query rows per batch.
    pub batch_size: usize,
}

impl Default for NearestNeighborConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Brute,
            leaf_size: 30,
            n_jobs: 1,
            ranking: RankingMode::Supervised,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl NearestNeighborConfig {
    pub fn validate(&self) -> Result<()> {
        if self.leaf_size == 0 {
            return Err(DocCatError::invalid_parameter("leaf_size must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(DocCatError::invalid_parameter("batch_size must be at least 1"));
        }
        resolve_n_jobs(self.n_jobs)?;
        Ok(())
    }

    fn index_params(&self) -> NeighborsParams {
        NeighborsParams {
            n_neighbors: 1,
            algorithm: self.algorithm,
            leaf_size: self.leaf_size,
            n_jobs: self.n_jobs,
            metric: DistanceMetric::Euclidean,
        }
    }
}

/// Ranking of one query row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    /// Signed relevance in `[-1, 1]`; positive means closer to the relevant set.
    pub score: f64,
    /// Training row id of the exemplar that decided the score.
    pub winning_global_index: usize,
    /// Halved distance to the nearest positive exemplar.
    pub dist_positive: f64,
    /// Halved distance to the nearest negative exemplar, when indexed.
    pub dist_negative: Option<f64>,
    pub nearest_positive_id: usize,
    pub nearest_negative_id: Option<usize>,
}

/// Fuse halved positive/negative distances into a score in `[-1, 1]`.
///
/// With `S_p = 1 - d_p` and `S_n = 1 - d_n`, the score is `(S_p + 1) / 2` when
/// `S_p > S_n` and `(-1 - S_n) / 2` otherwise, so an exact tie ranks as
/// non-relevant. Without a negative distance only the first form is used.
///
/// The branch is picked on the raw distances and the similarities are clamped
/// to `[0, 1]` before fusion, so the sign of the score always follows the
/// closer exemplar even when unnormalized input yields distances above 1.
pub fn ranking_score(d_p: f64, d_n: Option<f64>) -> f64 {
    let similarity = |d: f64| (1.0 - d).clamp(0.0, 1.0);
    match d_n {
        Some(d_n) if d_p >= d_n => (-1.0 - similarity(d_n)) / 2.0,
        _ => (similarity(d_p) + 1.0) / 2.0,
    }
}

/// A fitted index over a subset of the training rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedIndex {
    index: NearestNeighbors,
    local_to_global: Vec<usize>,
}

impl FittedIndex {
    fn fit(x: &SampleMatrix, ids: &[usize], params: NeighborsParams) -> Result<Self> {
        let subset = x.select_rows(ids)?;
        let mut index = NearestNeighbors::new(params);
        index.fit(&subset)?;
        Ok(Self {
            index,
            local_to_global: ids.to_vec(),
        })
    }

    /// Halved distance and global id of the nearest exemplar for every row.
    fn nearest(&self, x: &SampleMatrix, batch_size: usize) -> Result<Vec<(f64, usize)>> {
        let result = chunk_kneighbors(|batch| self.index.kneighbors(batch, Some(1)), x, batch_size)?;
        Ok(result
            .nearest()
            .into_iter()
            .map(|(dist, local)| (dist / 2.0, self.local_to_global[local]))
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DualIndex {
    mode: RankingMode,
    positive: FittedIndex,
    negative: Option<FittedIndex>,
    n_features: usize,
}

/// Ranks documents by proximity to positive versus negative exemplars.
///
/// Read-only once fitted: `kneighbors` takes `&self` and may be called from
/// several threads. Refitting replaces the fitted state wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestNeighborRanker {
    config: NearestNeighborConfig,
    state: Option<DualIndex>,
}

impl Default for NearestNeighborRanker {
    fn default() -> Self {
        Self::new(NearestNeighborConfig::default())
    }
}

impl NearestNeighborRanker {
    pub fn new(config: NearestNeighborConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn config(&self) -> &NearestNeighborConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Effective ranking mode, once fitted.
    pub fn mode(&self) -> Option<RankingMode> {
        self.state.as_ref().map(|s| s.mode)
    }

    pub fn n_features(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.n_features)
    }

    /// Training row ids held by the positive index.
    pub fn positive_ids(&self) -> Option<&[usize]> {
        self.state
            .as_ref()
            .map(|s| s.positive.local_to_global.as_slice())
    }

    /// Training row ids held by the negative index, if one was fitted.
    pub fn negative_ids(&self) -> Option<&[usize]> {
        self.state
            .as_ref()
            .and_then(|s| s.negative.as_ref())
            .map(|n| n.local_to_global.as_slice())
    }

    /// Fit the positive and negative indices from labelled rows.
    ///
    /// Rows labelled 1 are relevant, rows labelled 0 are not. At least one
    /// relevant row is required; without non-relevant rows the ranker falls
    /// back to unsupervised scoring. On error the previous state is kept.
    pub fn fit(&mut self, x: &SampleMatrix, y: &[u8]) -> Result<()> {
        self.config.validate()?;
        check_labels(y, x.n_samples())?;

        let partition = IndexPartition::from_labels(y)?;
        if partition.positive_ids.is_empty() {
            return Err(DocCatError::invalid_training_set(
                "at least one positive sample is required",
            ));
        }

        let params = self.config.index_params();
        let positive = FittedIndex::fit(x, &partition.positive_ids, params.clone())?;
        let negative = if partition.negative_ids.is_empty() {
            None
        } else {
            Some(FittedIndex::fit(x, &partition.negative_ids, params)?)
        };

        let mode = match (self.config.ranking, &negative) {
            (RankingMode::Supervised, Some(_)) => RankingMode::Supervised,
            (RankingMode::Unsupervised, Some(_)) => {
                warn!(
                    "unsupervised ranking requested with {} negative samples; they are indexed for diagnostics only",
                    partition.negative_ids.len()
                );
                RankingMode::Unsupervised
            }
            (_, None) => RankingMode::Unsupervised,
        };

        info!(
            "fitted {mode} nearest neighbor ranker: {} positive, {} negative samples",
            partition.positive_ids.len(),
            partition.negative_ids.len()
        );
        self.state = Some(DualIndex {
            mode,
            positive,
            negative,
            n_features: x.n_features(),
        });
        Ok(())
    }

    /// Rank every row of `x`.
    ///
    /// `batch_size` overrides the configured batch size. The output has one
    /// entry per row of `x`, in order.
    pub fn kneighbors(
        &self,
        x: &SampleMatrix,
        batch_size: Option<usize>,
    ) -> Result<Vec<RankingResult>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| DocCatError::not_fitted("nearest neighbor ranker is not fitted"))?;
        if x.n_features() != state.n_features {
            return Err(DocCatError::shape_mismatch(format!(
                "query has {} features, ranker was fitted with {}",
                x.n_features(),
                state.n_features
            )));
        }
        let batch_size = batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(DocCatError::invalid_parameter("batch_size must be at least 1"));
        }

        let positive = state.positive.nearest(x, batch_size)?;
        let negative = match &state.negative {
            Some(index) => Some(index.nearest(x, batch_size)?),
            None => None,
        };
        debug!("ranked {} rows in {} mode", x.n_samples(), state.mode);

        let results = positive
            .iter()
            .enumerate()
            .map(|(i, &(d_p, id_p))| {
                let nearest_negative = negative.as_ref().map(|n| n[i]);
                let (score, winner) = match (state.mode, nearest_negative) {
                    (RankingMode::Supervised, Some((d_n, id_n))) => {
                        let winner = if d_p <= d_n { id_p } else { id_n };
                        (ranking_score(d_p, Some(d_n)), winner)
                    }
                    _ => (ranking_score(d_p, None), id_p),
                };
                RankingResult {
                    score,
                    winning_global_index: winner,
                    dist_positive: d_p,
                    dist_negative: nearest_negative.map(|(d, _)| d),
                    nearest_positive_id: id_p,
                    nearest_negative_id: nearest_negative.map(|(_, id)| id),
                }
            })
            .collect();
        Ok(results)
    }

    /// Ranking scores only, with the configured batch size.
    pub fn decision_function(&self, x: &SampleMatrix) -> Result<Vec<f64>> {
        Ok(self
            .kneighbors(x, None)?
            .into_iter()
            .map(|r| r.score)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_ranking_score_branches() {
        assert!(approx(ranking_score(0.05, Some(0.95)), 0.975));
        // Tie goes to the negative branch.
        assert!(approx(ranking_score(0.5, Some(0.5)), -0.75));
        assert!(approx(ranking_score(0.0, None), 1.0));
        assert!(approx(ranking_score(1.0, None), 0.5));
        // Distances above 1 from unnormalized input keep the branch sign.
        assert_eq!(ranking_score(10.0, None), 0.5);
        assert_eq!(ranking_score(10.0, Some(10.0)), -0.5);
        assert_eq!(ranking_score(60.0, Some(5.0)), -0.5);
        assert_eq!(ranking_score(5.0, Some(60.0)), 0.5);
        assert_eq!(ranking_score(2.5, Some(0.25)), -0.875);
    }

    #[test]
    fn test_fit_and_rank() {
        let x = SampleMatrix::from_rows(&[vec![1.0, 0.0], vec![-1.0, 0.0]]).unwrap();
        let mut ranker = NearestNeighborRanker::default();
        ranker.fit(&x, &[1, 0]).unwrap();
        assert_eq!(ranker.mode(), Some(RankingMode::Supervised));
        assert_eq!(ranker.positive_ids(), Some(&[0][..]));
        assert_eq!(ranker.negative_ids(), Some(&[1][..]));

        let query = SampleMatrix::from_rows(&[vec![0.9, 0.0]]).unwrap();
        let results = ranker.kneighbors(&query, None).unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.975).abs() < 1e-9);
        assert_eq!(results[0].winning_global_index, 0);
        assert_eq!(results[0].nearest_negative_id, Some(1));
    }

    #[test]
    fn test_global_ids_survive_partitioning() {
        let x = SampleMatrix::from_rows(&[
            vec![0.0, 5.0],
            vec![1.0, 0.0],
            vec![0.0, -5.0],
            vec![-1.0, 0.0],
        ])
        .unwrap();
        let mut ranker = NearestNeighborRanker::default();
        ranker.fit(&x, &[0, 1, 0, 1]).unwrap();

        let query = SampleMatrix::from_rows(&[vec![-0.9, 0.0], vec![0.0, -4.0]]).unwrap();
        let results = ranker.kneighbors(&query, Some(1)).unwrap();
        assert_eq!(results[0].nearest_positive_id, 3);
        assert_eq!(results[0].winning_global_index, 3);
        assert_eq!(results[1].nearest_negative_id, Some(2));
        assert_eq!(results[1].winning_global_index, 2);
        assert!(results[1].score < 0.0);
    }

    #[test]
    fn test_unsupervised_config_keeps_negative_diagnostics() {
        let x = SampleMatrix::from_rows(&[vec![1.0, 0.0], vec![-1.0, 0.0]]).unwrap();
        let mut ranker = NearestNeighborRanker::new(NearestNeighborConfig {
            ranking: RankingMode::Unsupervised,
            ..Default::default()
        });
        ranker.fit(&x, &[1, 0]).unwrap();
        assert_eq!(ranker.mode(), Some(RankingMode::Unsupervised));

        let query = SampleMatrix::from_rows(&[vec![-1.0, 0.0]]).unwrap();
        let result = &ranker.kneighbors(&query, None).unwrap()[0];
        // Positive-only score even though the query sits on the negative.
        assert!(approx(result.score, 0.5));
        assert_eq!(result.winning_global_index, 0);
        assert_eq!(result.dist_negative, Some(0.0));
        assert_eq!(result.nearest_negative_id, Some(1));
    }

    #[test]
    fn test_failed_refit_keeps_state() {
        let x = SampleMatrix::from_rows(&[vec![1.0, 0.0], vec![-1.0, 0.0]]).unwrap();
        let mut ranker = NearestNeighborRanker::default();
        ranker.fit(&x, &[1, 0]).unwrap();

        let err = ranker.fit(&x, &[0, 0]).unwrap_err();
        assert!(matches!(err, DocCatError::InvalidTrainingSet(_)));
        assert_eq!(ranker.positive_ids(), Some(&[0][..]));
    }

    #[test]
    fn test_input_errors() {
        let x = SampleMatrix::from_rows(&[vec![1.0, 0.0], vec![-1.0, 0.0]]).unwrap();
        let mut ranker = NearestNeighborRanker::default();
        let query = SampleMatrix::from_rows(&[vec![0.0, 0.0]]).unwrap();
        assert!(matches!(
            ranker.kneighbors(&query, None),
            Err(DocCatError::NotFitted(_))
        ));

        assert!(matches!(
            ranker.fit(&x, &[1]),
            Err(DocCatError::ShapeMismatch(_))
        ));
        assert!(matches!(
            ranker.fit(&x, &[1, 2]),
            Err(DocCatError::InvalidParameter(_))
        ));

        ranker.fit(&x, &[1, 0]).unwrap();
        let wide = SampleMatrix::from_rows(&[vec![0.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            ranker.kneighbors(&wide, None),
            Err(DocCatError::ShapeMismatch(_))
        ));
        assert!(matches!(
            ranker.kneighbors(&query, Some(0)),
            Err(DocCatError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: NearestNeighborConfig =
            serde_json::from_str(r#"{"ranking": "unsupervised"}"#).unwrap();
        assert_eq!(config.ranking, RankingMode::Unsupervised);
        assert_eq!(config.leaf_size, 30);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(serde_json::from_str::<NearestNeighborConfig>(r#"{"ranking": "semi"}"#).is_err());
    }
}
