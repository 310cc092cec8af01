//! Distance-based rankers.
//!
//! - [`NearestNeighborRanker`]: two independent neighbor indices (positive and
//!   negative exemplars) whose distances are fused into a signed score.
//! - [`NearestCentroidRanker`]: nearest-centroid classifier that also reports
//!   the distance to the closest centroid.

pub mod nearest_centroid;
pub mod nearest_neighbor;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};

pub use nearest_centroid::NearestCentroidRanker;
pub use nearest_neighbor::{
    NearestNeighborConfig, NearestNeighborRanker, RankingResult, ranking_score,
};

/// Which exemplars take part in the ranking score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RankingMode {
    /// Distances to both positive and negative exemplars.
    #[default]
    Supervised,
    /// Distances to positive exemplars only.
    Unsupervised,
}

impl RankingMode {
    pub fn name(&self) -> &'static str {
        match self {
            RankingMode::Supervised => "supervised",
            RankingMode::Unsupervised => "unsupervised",
        }
    }
}

impl fmt::Display for RankingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RankingMode {
    type Err = DocCatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "supervised" => Ok(RankingMode::Supervised),
            "unsupervised" => Ok(RankingMode::Unsupervised),
            _ => Err(DocCatError::invalid_parameter(format!(
                "ranking must be 'supervised' or 'unsupervised', got '{s}'"
            ))),
        }
    }
}
