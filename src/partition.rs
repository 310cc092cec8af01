//! Label partitioning and the relevant/non-relevant id helpers.

use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};

/// Row indices split by binary label.
///
/// Both sequences keep the order of the source labels. Every index of the
/// source appears in exactly one of them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexPartition {
    pub positive_ids: Vec<usize>,
    pub negative_ids: Vec<usize>,
}

impl IndexPartition {
    /// Split `0..labels.len()` into rows labelled 1 and rows labelled 0.
    pub fn from_labels(labels: &[u8]) -> Result<Self> {
        let mut partition = IndexPartition::default();
        for (i, &label) in labels.iter().enumerate() {
            match label {
                1 => partition.positive_ids.push(i),
                0 => partition.negative_ids.push(i),
                other => {
                    return Err(DocCatError::invalid_parameter(format!(
                        "label {other} at position {i} is not binary (expected 0 or 1)"
                    )));
                }
            }
        }
        Ok(partition)
    }

    pub fn len(&self) -> usize {
        self.positive_ids.len() + self.negative_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Check that a label vector is binary and parallel to `n_samples` rows.
pub fn check_labels(labels: &[u8], n_samples: usize) -> Result<()> {
    if labels.len() != n_samples {
        return Err(DocCatError::shape_mismatch(format!(
            "got {} labels for {n_samples} samples",
            labels.len()
        )));
    }
    if let Some((i, label)) = labels.iter().enumerate().find(|(_, l)| **l > 1) {
        return Err(DocCatError::invalid_parameter(format!(
            "label {label} at position {i} is not binary (expected 0 or 1)"
        )));
    }
    Ok(())
}

/// Merge relevant and non-relevant document ids into `(ids, labels)`.
///
/// Relevant ids come first and are labelled 1.
pub fn zip_relevant(relevant_id: &[usize], non_relevant_id: &[usize]) -> (Vec<usize>, Vec<u8>) {
    let ids = relevant_id
        .iter()
        .chain(non_relevant_id.iter())
        .copied()
        .collect();
    let labels = std::iter::repeat_n(1u8, relevant_id.len())
        .chain(std::iter::repeat_n(0u8, non_relevant_id.len()))
        .collect();
    (ids, labels)
}

/// Split ids by prediction value: `y > 0.5` is relevant.
pub fn unzip_relevant(ids: &[usize], y: &[f64]) -> Result<(Vec<usize>, Vec<usize>)> {
    if ids.len() != y.len() {
        return Err(DocCatError::shape_mismatch(format!(
            "got {} ids and {} target values",
            ids.len(),
            y.len()
        )));
    }
    let (relevant, non_relevant): (Vec<(usize, f64)>, Vec<(usize, f64)>) = ids
        .iter()
        .copied()
        .zip(y.iter().copied())
        .partition(|(_, value)| *value > 0.5);
    Ok((
        relevant.into_iter().map(|(id, _)| id).collect(),
        non_relevant.into_iter().map(|(id, _)| id).collect(),
    ))
}
