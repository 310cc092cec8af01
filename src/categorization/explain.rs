//! Per-term explanation of a linear categorization.

use std::collections::HashMap;

use ahash::AHashMap;

use crate::categorization::estimator::Estimator;
use crate::error::{DocCatError, Result};
use crate::matrix::SampleMatrix;

/// Contribution `x_j * w_j` of every term present in a single document.
///
/// `vocabulary` maps terms to feature columns and `row` is a one-row
/// document-term matrix. Only logistic regression models can be explained.
pub fn explain_binary_categorization(
    estimator: &Estimator,
    vocabulary: &HashMap<String, usize>,
    row: &SampleMatrix,
) -> Result<HashMap<String, f64>> {
    let model = estimator.as_logistic_regression().ok_or_else(|| {
        DocCatError::not_implemented(format!(
            "explanations are only available for LogisticRegression, not {}",
            estimator.method()
        ))
    })?;
    let coef = model
        .coef()
        .ok_or_else(|| DocCatError::not_fitted("LogisticRegression is not fitted"))?;

    if row.n_samples() != 1 {
        return Err(DocCatError::shape_mismatch(format!(
            "expected a single document, got shape {:?}",
            row.shape()
        )));
    }
    if vocabulary.len() != row.n_features() {
        return Err(DocCatError::shape_mismatch(format!(
            "vocabulary has {} terms but the document has {} features",
            vocabulary.len(),
            row.n_features()
        )));
    }
    if coef.len() != row.n_features() {
        return Err(DocCatError::shape_mismatch(format!(
            "model has {} coefficients but the document has {} features",
            coef.len(),
            row.n_features()
        )));
    }

    let inverse: AHashMap<usize, &str> = vocabulary
        .iter()
        .map(|(term, &column)| (column, term.as_str()))
        .collect();
    if inverse.len() != vocabulary.len() {
        return Err(DocCatError::invalid_parameter(
            "vocabulary maps several terms to the same column",
        ));
    }

    let mut weights = HashMap::new();
    let mut missing = None;
    if let Some(document) = row.row(0) {
        document.for_each_nonzero(|j, v| match inverse.get(&j) {
            Some(term) => {
                weights.insert((*term).to_string(), v * coef[j]);
            }
            None => missing = Some(j),
        });
    }
    if let Some(column) = missing {
        return Err(DocCatError::invalid_parameter(format!(
            "column {column} has no vocabulary entry"
        )));
    }
    Ok(weights)
}
