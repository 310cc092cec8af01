//! Backend selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};

/// Backends that are implemented but kept out of production use.
const DISABLED_METHODS: &[&str] = &["ensemble-stacking", "MLPClassifier"];

/// A trainable categorization backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "LinearSVC")]
    LinearSvc,
    LogisticRegression,
    NearestCentroid,
    NearestNeighbor,
    /// Gradient boosted trees.
    #[serde(rename = "xgboost")]
    GradientBoosting,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::LinearSvc,
        Method::LogisticRegression,
        Method::GradientBoosting,
        Method::NearestCentroid,
        Method::NearestNeighbor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::LinearSvc => "LinearSVC",
            Method::LogisticRegression => "LogisticRegression",
            Method::NearestCentroid => "NearestCentroid",
            Method::NearestNeighbor => "NearestNeighbor",
            Method::GradientBoosting => "xgboost",
        }
    }

    /// Whether the backend is a distance ranker, which has no hyperparameter
    /// search.
    pub fn is_ranker(&self) -> bool {
        matches!(self, Method::NearestCentroid | Method::NearestNeighbor)
    }

    /// Reject a cross-validation request this backend cannot honor.
    pub fn check_cv(&self, cv: Option<CvMode>) -> Result<()> {
        match cv {
            None => Ok(()),
            Some(cv) if self.is_ranker() => Err(DocCatError::invalid_parameter(format!(
                "cross validation ('{cv}') is not supported with {self}"
            ))),
            Some(cv) => Err(DocCatError::missing_dependency(format!(
                "cross validation ('{cv}') for {self} requires the hyperparameter search extension, which is not available"
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = DocCatError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(method) = Method::ALL.iter().find(|m| m.name() == s) {
            return Ok(*method);
        }
        if DISABLED_METHODS.contains(&s) {
            return Err(DocCatError::unsupported_method(format!(
                "method '{s}' is implemented but not production ready, and was disabled"
            )));
        }
        let valid: Vec<&str> = Method::ALL.iter().map(|m| m.name()).collect();
        Err(DocCatError::unsupported_method(format!(
            "method '{s}' is not supported, must be one of {}",
            valid.join(", ")
        )))
    }
}

/// Cross-validation strategy for hyperparameter search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CvMode {
    Fast,
    Full,
}

impl CvMode {
    /// Parse an optional cross-validation setting.
    pub fn parse_opt(cv: Option<&str>) -> Result<Option<CvMode>> {
        cv.map(str::parse).transpose()
    }

    pub fn name(&self) -> &'static str {
        match self {
            CvMode::Fast => "fast",
            CvMode::Full => "full",
        }
    }
}

impl fmt::Display for CvMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CvMode {
    type Err = DocCatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(CvMode::Fast),
            "full" => Ok(CvMode::Full),
            _ => Err(DocCatError::invalid_parameter(format!(
                "cv must be one of none, fast, full; got '{s}'"
            ))),
        }
    }
}
