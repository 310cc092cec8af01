//! # doccat
//!
//! Binary document categorization over document-term matrices.
//!
//! ## Features
//!
//! - Dense (`ndarray`) and sparse CSR (`sprs`) sample matrices
//! - Nearest neighbor search with brute force and ball tree indices
//! - Dual-index nearest neighbor ranking with bounded-memory batched queries
//! - Nearest centroid, linear SVM, logistic regression and gradient boosted
//!   tree backends behind one train/predict interface
//! - Model persistence, reload and per-term explanations

pub mod categorization;
pub mod classifier;
pub mod error;
pub mod matrix;
pub mod neighbors;
pub mod partition;
pub mod ranking;

pub mod prelude {
    pub use crate::categorization::{
        Categorizer, CategorizerConfig, CategorizerState, Estimator, FeatureSource,
        InMemoryFeatures, Method, Prediction,
    };
    pub use crate::error::{DocCatError, Result};
    pub use crate::matrix::SampleMatrix;
    pub use crate::neighbors::{Algorithm, DistanceMetric, NearestNeighbors, NeighborsParams};
    pub use crate::ranking::{
        NearestCentroidRanker, NearestNeighborConfig, NearestNeighborRanker, RankingMode,
        RankingResult,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
