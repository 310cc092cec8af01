//! Batched neighbor queries.
//!
//! Brute force and tree searches can materialize buffers proportional to
//! `n_queries x n_indexed`. Splitting the query matrix into row batches keeps
//! peak memory at `O(batch_size x n_indexed)` regardless of the number of
//! documents being ranked.

use log::debug;
use ndarray::{Axis, concatenate};

use crate::error::{DocCatError, Result};
use crate::matrix::SampleMatrix;
use crate::neighbors::KNeighbors;

/// Default number of query rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Run `query` over `x` in batches of `batch_size` rows and concatenate the
/// results.
///
/// Row `i` of the output always answers row `i` of `x`. Batches run
/// sequentially and in order; the first failing batch aborts the call with its
/// error. An empty `x` runs no batch and returns [`KNeighbors::empty`].
pub fn chunk_kneighbors<F>(mut query: F, x: &SampleMatrix, batch_size: usize) -> Result<KNeighbors>
where
    F: FnMut(&SampleMatrix) -> Result<KNeighbors>,
{
    if batch_size == 0 {
        return Err(DocCatError::invalid_parameter("batch_size must be at least 1"));
    }

    let n_samples = x.n_samples();
    let n_batches = n_samples.div_ceil(batch_size);
    if n_batches == 0 {
        return Ok(KNeighbors::empty());
    }

    let mut distances = Vec::with_capacity(n_batches);
    let mut indices = Vec::with_capacity(n_batches);
    for batch in 0..n_batches {
        let start = batch * batch_size;
        let end = (start + batch_size).min(n_samples);
        let rows = x.slice_rows(start..end)?;
        let result = query(&rows)?;
        if result.n_queries() != end - start {
            return Err(DocCatError::shape_mismatch(format!(
                "batch {batch} returned {} rows for {} queries",
                result.n_queries(),
                end - start
            )));
        }
        debug!("neighbor batch {}/{} ({} rows)", batch + 1, n_batches, end - start);
        distances.push(result.distances);
        indices.push(result.indices);
    }

    let distance_views: Vec<_> = distances.iter().map(|d| d.view()).collect();
    let index_views: Vec<_> = indices.iter().map(|i| i.view()).collect();
    Ok(KNeighbors {
        distances: concatenate(Axis(0), &distance_views)
            .map_err(|e| DocCatError::shape_mismatch(e.to_string()))?,
        indices: concatenate(Axis(0), &index_views)
            .map_err(|e| DocCatError::shape_mismatch(e.to_string()))?,
    })
}
