//! Error types for the doccat library.
//!
//! All errors are represented by the [`DocCatError`] enum. Every failure is
//! detected at the start of the offending call and propagated unchanged;
//! nothing in the crate retries or recovers partially.
//!
//! # Examples
//!
//! ```
//! use doccat::error::{DocCatError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(DocCatError::invalid_parameter("batch_size must be positive"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for doccat operations.
#[derive(Error, Debug)]
pub enum DocCatError {
    /// The training set cannot produce a usable model (e.g. no positive samples).
    #[error("Invalid training set: {0}")]
    InvalidTrainingSet(String),

    /// A ranker or classifier was queried before `fit`.
    #[error("Not fitted: {0}")]
    NotFitted(String),

    /// The categorizer has no trained or loaded model.
    #[error("Not trained: {0}")]
    NotTrained(String),

    /// Matrix or vector dimensions disagree.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A parameter value or combination of parameters is not accepted.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The requested backend is disabled or unknown.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// A backend needs functionality that is not compiled into this build.
    #[error("Missing optional dependency: {0}")]
    MissingOptionalDependency(String),

    /// No stored model with the given id.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The operation is not implemented for this estimator.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Building the worker pool for a parallel query failed.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// I/O errors (model persistence).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary model serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] Box<bincode::ErrorKind>),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with DocCatError.
pub type Result<T> = std::result::Result<T, DocCatError>;

impl DocCatError {
    /// Create a new invalid training set error.
    pub fn invalid_training_set<S: Into<String>>(msg: S) -> Self {
        DocCatError::InvalidTrainingSet(msg.into())
    }

    /// Create a new not fitted error.
    pub fn not_fitted<S: Into<String>>(msg: S) -> Self {
        DocCatError::NotFitted(msg.into())
    }

    /// Create a new not trained error.
    pub fn not_trained<S: Into<String>>(msg: S) -> Self {
        DocCatError::NotTrained(msg.into())
    }

    /// Create a new shape mismatch error.
    pub fn shape_mismatch<S: Into<String>>(msg: S) -> Self {
        DocCatError::ShapeMismatch(msg.into())
    }

    /// Create a new invalid parameter error.
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        DocCatError::InvalidParameter(msg.into())
    }

    /// Create a new unsupported method error.
    pub fn unsupported_method<S: Into<String>>(msg: S) -> Self {
        DocCatError::UnsupportedMethod(msg.into())
    }

    /// Create a new missing optional dependency error.
    pub fn missing_dependency<S: Into<String>>(msg: S) -> Self {
        DocCatError::MissingOptionalDependency(msg.into())
    }

    /// Create a new model not found error.
    pub fn model_not_found<S: Into<String>>(msg: S) -> Self {
        DocCatError::ModelNotFound(msg.into())
    }

    /// Create a new not implemented error.
    pub fn not_implemented<S: Into<String>>(msg: S) -> Self {
        DocCatError::NotImplemented(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DocCatError::Other(msg.into())
    }
}

impl From<anyhow::Error> for DocCatError {
    fn from(err: anyhow::Error) -> Self {
        DocCatError::Other(format!("{err:#}"))
    }
}

impl From<rayon::ThreadPoolBuildError> for DocCatError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        DocCatError::ThreadPool(err.to_string())
    }
}
