//! Nearest neighbor search.
//!
//! [`NearestNeighbors`] is the search structure the rankers fit and query: a
//! brute force scan or a ball tree, picked by [`Algorithm`]. Query-level
//! parallelism is configured through `n_jobs` and lives entirely here; the
//! rankers built on top stay single-threaded.
//!
//! Large query matrices should go through [`chunked::chunk_kneighbors`] to
//! bound memory use.

pub mod ball_tree;
pub mod brute;
pub mod chunked;
pub mod distance;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use log::{debug, warn};
use ndarray::Array2;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};
use crate::matrix::{RowView, SampleMatrix};

pub use ball_tree::BallTree;
pub use brute::BruteForceIndex;
pub use chunked::{DEFAULT_BATCH_SIZE, chunk_kneighbors};
pub use distance::DistanceMetric;

/// Algorithm used to answer neighbor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Pick from the data: brute force for sparse input, cosine distance or
    /// small indices, ball tree otherwise.
    Auto,
    BallTree,
    #[default]
    Brute,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Auto => "auto",
            Algorithm::BallTree => "ball_tree",
            Algorithm::Brute => "brute",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = DocCatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Algorithm::Auto),
            "ball_tree" => Ok(Algorithm::BallTree),
            "brute" => Ok(Algorithm::Brute),
            _ => Err(DocCatError::invalid_parameter(format!(
                "unknown neighbor algorithm '{s}', expected one of auto, ball_tree, brute"
            ))),
        }
    }
}

/// Construction parameters of a [`NearestNeighbors`] index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborsParams {
    /// Default number of neighbors per query.
    pub n_neighbors: usize,
    pub algorithm: Algorithm,
    /// Maximum number of points in a ball tree leaf.
    pub leaf_size: usize,
    /// Worker threads for queries: 1 runs inline, -1 uses every core.
    pub n_jobs: i32,
    pub metric: DistanceMetric,
}

impl Default for NeighborsParams {
    fn default() -> Self {
        Self {
            n_neighbors: 1,
            algorithm: Algorithm::Brute,
            leaf_size: 30,
            n_jobs: 1,
            metric: DistanceMetric::Euclidean,
        }
    }
}

impl NeighborsParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_neighbors == 0 {
            return Err(DocCatError::invalid_parameter("n_neighbors must be at least 1"));
        }
        if self.leaf_size == 0 {
            return Err(DocCatError::invalid_parameter("leaf_size must be at least 1"));
        }
        resolve_n_jobs(self.n_jobs)?;
        Ok(())
    }
}

/// Translate an `n_jobs` setting into a thread count.
pub fn resolve_n_jobs(n_jobs: i32) -> Result<usize> {
    match n_jobs {
        -1 => Ok(num_cpus::get().max(1)),
        n if n >= 1 => Ok(n as usize),
        n => Err(DocCatError::invalid_parameter(format!(
            "n_jobs must be -1 or a positive integer, got {n}"
        ))),
    }
}

/// Output of a k-nearest-neighbor query: both arrays have shape
/// `(n_queries, k)` and row `i` answers query row `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct KNeighbors {
    pub distances: Array2<f64>,
    pub indices: Array2<usize>,
}

impl KNeighbors {
    /// A result with no rows.
    pub fn empty() -> Self {
        Self {
            distances: Array2::zeros((0, 0)),
            indices: Array2::zeros((0, 0)),
        }
    }

    pub fn n_queries(&self) -> usize {
        self.distances.nrows()
    }

    /// The first neighbor of every query row as `(distance, index)`.
    pub fn nearest(&self) -> Vec<(f64, usize)> {
        self.distances
            .outer_iter()
            .zip(self.indices.outer_iter())
            .filter_map(|(d, i)| Some((*d.get(0)?, *i.get(0)?)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SearchIndex {
    Brute(BruteForceIndex),
    BallTree(BallTree),
}

impl SearchIndex {
    fn search(&self, query: &RowView<'_>, k: usize) -> Vec<(f64, usize)> {
        match self {
            SearchIndex::Brute(index) => index.search(query, k),
            SearchIndex::BallTree(index) => index.search(query, k),
        }
    }

    fn algorithm(&self) -> Algorithm {
        match self {
            SearchIndex::Brute(_) => Algorithm::Brute,
            SearchIndex::BallTree(_) => Algorithm::BallTree,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedSearch {
    index: SearchIndex,
    n_samples: usize,
    n_features: usize,
}

/// Unsupervised nearest neighbor search structure.
///
/// Immutable once fitted; `kneighbors` takes `&self` and is safe to call from
/// several threads at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestNeighbors {
    params: NeighborsParams,
    fitted: Option<FittedSearch>,
    /// Query pool for `n_jobs != 1`, built on first use and shared by clones.
    #[serde(skip)]
    pool: OnceLock<Arc<ThreadPool>>,
}

impl NearestNeighbors {
    pub fn new(params: NeighborsParams) -> Self {
        Self {
            params,
            fitted: None,
            pool: OnceLock::new(),
        }
    }

    fn thread_pool(&self, n_threads: usize) -> Result<&ThreadPool> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = ThreadPoolBuilder::new().num_threads(n_threads).build()?;
        debug!("built neighbor query pool with {n_threads} threads");
        // A concurrent first query may have won the race; either pool will do.
        let _ = self.pool.set(Arc::new(pool));
        self.pool
            .get()
            .map(|pool| pool.as_ref())
            .ok_or_else(|| DocCatError::other("neighbor query pool is unavailable"))
    }

    pub fn params(&self) -> &NeighborsParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Number of indexed samples, if fitted.
    pub fn n_samples_fit(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_samples)
    }

    /// Feature count seen at fit time, if fitted.
    pub fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_features)
    }

    /// The algorithm actually used by the fitted index.
    pub fn fit_method(&self) -> Option<Algorithm> {
        self.fitted.as_ref().map(|f| f.index.algorithm())
    }

    /// Index every row of `x`.
    pub fn fit(&mut self, x: &SampleMatrix) -> Result<()> {
        self.params.validate()?;
        if x.is_empty() {
            return Err(DocCatError::invalid_parameter(
                "cannot fit a neighbor index on a matrix with no rows",
            ));
        }

        let algorithm = self.resolve_algorithm(x)?;
        let index = match algorithm {
            Algorithm::BallTree => SearchIndex::BallTree(BallTree::build(
                x,
                self.params.leaf_size,
                self.params.metric,
            )?),
            _ => SearchIndex::Brute(BruteForceIndex::new(x.clone(), self.params.metric)),
        };
        debug!(
            "fitted {} neighbor index over {} samples x {} features",
            index.algorithm(),
            x.n_samples(),
            x.n_features()
        );

        self.fitted = Some(FittedSearch {
            index,
            n_samples: x.n_samples(),
            n_features: x.n_features(),
        });
        Ok(())
    }

    fn resolve_algorithm(&self, x: &SampleMatrix) -> Result<Algorithm> {
        match self.params.algorithm {
            Algorithm::Brute => Ok(Algorithm::Brute),
            Algorithm::BallTree if x.is_sparse() => {
                warn!("ball_tree does not support sparse input, using brute force search");
                Ok(Algorithm::Brute)
            }
            Algorithm::BallTree => {
                if !self.params.metric.is_true_metric() {
                    return Err(DocCatError::invalid_parameter(format!(
                        "metric '{}' is not valid for ball_tree",
                        self.params.metric
                    )));
                }
                Ok(Algorithm::BallTree)
            }
            Algorithm::Auto => {
                if x.is_sparse()
                    || !self.params.metric.is_true_metric()
                    || self.params.n_neighbors >= x.n_samples() / 2
                {
                    Ok(Algorithm::Brute)
                } else {
                    Ok(Algorithm::BallTree)
                }
            }
        }
    }

    /// Find the `k` nearest indexed rows (local indices) for every row of `x`.
    ///
    /// `k` defaults to the configured `n_neighbors`.
    pub fn kneighbors(&self, x: &SampleMatrix, k: Option<usize>) -> Result<KNeighbors> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| DocCatError::not_fitted("nearest neighbor index is not fitted"))?;

        if x.n_features() != fitted.n_features {
            return Err(DocCatError::shape_mismatch(format!(
                "query has {} features, index was fitted with {}",
                x.n_features(),
                fitted.n_features
            )));
        }

        let k = k.unwrap_or(self.params.n_neighbors);
        if k == 0 || k > fitted.n_samples {
            return Err(DocCatError::invalid_parameter(format!(
                "expected 1 <= k <= {}, got {k}",
                fitted.n_samples
            )));
        }

        let rows = x.row_views();
        let search = |row: &RowView<'_>| fitted.index.search(row, k);
        let hits: Vec<Vec<(f64, usize)>> = match resolve_n_jobs(self.params.n_jobs)? {
            1 => rows.iter().map(search).collect(),
            n_threads => self
                .thread_pool(n_threads)?
                .install(|| rows.par_iter().map(search).collect()),
        };

        let mut distances = Vec::with_capacity(rows.len() * k);
        let mut indices = Vec::with_capacity(rows.len() * k);
        for row_hits in hits {
            for (dist, idx) in row_hits {
                distances.push(dist);
                indices.push(idx);
            }
        }

        let shape = (rows.len(), k);
        Ok(KNeighbors {
            distances: Array2::from_shape_vec(shape, distances)
                .map_err(|e| DocCatError::other(e.to_string()))?,
            indices: Array2::from_shape_vec(shape, indices)
                .map_err(|e| DocCatError::other(e.to_string()))?,
        })
    }
}

/// Order neighbor candidates by distance, then by index.
pub(crate) fn neighbor_order(a: &(f64, usize), b: &(f64, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

/// Keep the `k` closest candidates, sorted by [`neighbor_order`].
pub(crate) fn select_k_nearest(mut candidates: Vec<(f64, usize)>, k: usize) -> Vec<(f64, usize)> {
    if k == 0 {
        return Vec::new();
    }
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, neighbor_order);
        candidates.truncate(k);
    }
    candidates.sort_by(neighbor_order);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training() -> SampleMatrix {
        SampleMatrix::from_rows(&[
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![5.0, 5.0],
            vec![6.0, 5.0],
            vec![5.0, 6.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_kneighbors_shapes_and_values() {
        let mut nn = NearestNeighbors::new(NeighborsParams::default());
        nn.fit(&training()).unwrap();
        assert_eq!(nn.n_samples_fit(), Some(6));
        assert_eq!(nn.fit_method(), Some(Algorithm::Brute));

        let queries = SampleMatrix::from_rows(&[vec![0.9, 0.1], vec![5.1, 5.9]]).unwrap();
        let result = nn.kneighbors(&queries, Some(2)).unwrap();
        assert_eq!(result.distances.shape(), &[2, 2]);
        assert_eq!(result.indices[[0, 0]], 1);
        assert_eq!(result.indices[[1, 0]], 5);
        assert_eq!(result.nearest().len(), 2);
    }

    #[test]
    fn test_algorithms_agree() {
        let queries =
            SampleMatrix::from_rows(&[vec![0.2, 0.3], vec![4.0, 4.0], vec![-1.0, 7.0]]).unwrap();

        let mut results = Vec::new();
        for algorithm in [Algorithm::Brute, Algorithm::BallTree, Algorithm::Auto] {
            let mut nn = NearestNeighbors::new(NeighborsParams {
                algorithm,
                leaf_size: 1,
                ..Default::default()
            });
            nn.fit(&training()).unwrap();
            results.push(nn.kneighbors(&queries, Some(3)).unwrap());
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], results[2]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let queries = training();
        let mut sequential = NearestNeighbors::new(NeighborsParams::default());
        sequential.fit(&training()).unwrap();
        let mut parallel = NearestNeighbors::new(NeighborsParams {
            n_jobs: 2,
            ..Default::default()
        });
        parallel.fit(&training()).unwrap();

        assert_eq!(
            sequential.kneighbors(&queries, None).unwrap(),
            parallel.kneighbors(&queries, None).unwrap()
        );
    }

    #[test]
    fn test_query_pool_is_built_once() {
        let mut nn = NearestNeighbors::new(NeighborsParams {
            n_jobs: 2,
            ..Default::default()
        });
        nn.fit(&training()).unwrap();
        assert!(nn.pool.get().is_none());

        let queries = training();
        chunk_kneighbors(|batch| nn.kneighbors(batch, None), &queries, 2).unwrap();
        let pool = Arc::clone(nn.pool.get().unwrap());
        assert_eq!(pool.current_num_threads(), 2);

        nn.kneighbors(&queries, None).unwrap();
        assert!(Arc::ptr_eq(&pool, nn.pool.get().unwrap()));
        // One reference held here, one by the index.
        assert_eq!(Arc::strong_count(&pool), 2);

        let mut sequential = NearestNeighbors::new(NeighborsParams::default());
        sequential.fit(&training()).unwrap();
        sequential.kneighbors(&queries, None).unwrap();
        assert!(sequential.pool.get().is_none());
    }

    #[test]
    fn test_sparse_input_uses_brute_force() {
        let sparse = SampleMatrix::from_triplets((3, 4), &[(0, 0, 1.0), (1, 1, 1.0), (2, 3, 1.0)])
            .unwrap();
        let mut nn = NearestNeighbors::new(NeighborsParams {
            algorithm: Algorithm::BallTree,
            ..Default::default()
        });
        nn.fit(&sparse).unwrap();
        assert_eq!(nn.fit_method(), Some(Algorithm::Brute));

        let query = SampleMatrix::from_triplets((1, 4), &[(0, 3, 0.8)]).unwrap();
        let result = nn.kneighbors(&query, None).unwrap();
        assert_eq!(result.indices[[0, 0]], 2);
    }

    #[test]
    fn test_errors() {
        let nn = NearestNeighbors::new(NeighborsParams::default());
        let query = SampleMatrix::from_rows(&[vec![0.0, 0.0]]).unwrap();
        assert!(matches!(
            nn.kneighbors(&query, None),
            Err(DocCatError::NotFitted(_))
        ));

        let mut nn = NearestNeighbors::new(NeighborsParams::default());
        nn.fit(&training()).unwrap();
        let wrong = SampleMatrix::from_rows(&[vec![0.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            nn.kneighbors(&wrong, None),
            Err(DocCatError::ShapeMismatch(_))
        ));
        assert!(matches!(
            nn.kneighbors(&query, Some(7)),
            Err(DocCatError::InvalidParameter(_))
        ));

        let mut bad_jobs = NearestNeighbors::new(NeighborsParams {
            n_jobs: 0,
            ..Default::default()
        });
        assert!(matches!(
            bad_jobs.fit(&training()),
            Err(DocCatError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_resolve_n_jobs() {
        assert_eq!(resolve_n_jobs(1).unwrap(), 1);
        assert_eq!(resolve_n_jobs(4).unwrap(), 4);
        assert!(resolve_n_jobs(-1).unwrap() >= 1);
        assert!(resolve_n_jobs(-2).is_err());
    }

    #[test]
    fn test_select_k_nearest() {
        let picked = select_k_nearest(vec![(3.0, 0), (1.0, 4), (1.0, 2), (0.5, 9)], 3);
        assert_eq!(picked, vec![(0.5, 9), (1.0, 2), (1.0, 4)]);
    }
}
