//! Sample matrices: dense or sparse (CSR) document-term matrices.
//!
//! Rows are document feature vectors. The ranking and classification code only
//! ever borrows a [`SampleMatrix`]; row access goes through [`RowView`], which
//! hides whether the row came from a dense `ndarray` buffer or a CSR `sprs`
//! matrix.

use std::cmp::Ordering;
use std::ops::Range;

use ndarray::{Array2, ArrayView1, Axis, s};
use serde::{Deserialize, Serialize};
use sprs::{CsMat, CsVecView, TriMat};

use crate::error::{DocCatError, Result};

/// An immutable, row-major numeric matrix of shape (n_samples, n_features).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SampleMatrix {
    /// Dense storage in standard (row-major) layout.
    Dense(Array2<f64>),
    /// Sparse compressed-row storage.
    Sparse(CsMat<f64>),
}

impl SampleMatrix {
    /// Wrap a dense array. Values must be finite.
    pub fn from_dense(data: Array2<f64>) -> Result<Self> {
        if data.iter().any(|v| !v.is_finite()) {
            return Err(DocCatError::invalid_parameter(
                "sample matrix contains NaN or infinite values",
            ));
        }
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Ok(SampleMatrix::Dense(data))
    }

    /// Build a dense matrix from a slice of equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != n_features)
        {
            return Err(DocCatError::shape_mismatch(format!(
                "row {i} has {} features, expected {n_features}",
                row.len()
            )));
        }

        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let data = Array2::from_shape_vec((rows.len(), n_features), flat)
            .map_err(|e| DocCatError::shape_mismatch(e.to_string()))?;
        Self::from_dense(data)
    }

    /// Wrap a sparse matrix. It must use compressed-row storage.
    pub fn from_csr(data: CsMat<f64>) -> Result<Self> {
        if !data.is_csr() {
            return Err(DocCatError::invalid_parameter(
                "sparse sample matrices must use CSR storage",
            ));
        }
        if data.data().iter().any(|v| !v.is_finite()) {
            return Err(DocCatError::invalid_parameter(
                "sample matrix contains NaN or infinite values",
            ));
        }
        Ok(SampleMatrix::Sparse(data))
    }

    /// Build a sparse CSR matrix from `(row, col, value)` triplets.
    ///
    /// Duplicate coordinates are summed.
    pub fn from_triplets(shape: (usize, usize), triplets: &[(usize, usize, f64)]) -> Result<Self> {
        let (rows, cols) = shape;
        let mut tri = TriMat::new(shape);
        for &(row, col, value) in triplets {
            if row >= rows || col >= cols {
                return Err(DocCatError::shape_mismatch(format!(
                    "triplet ({row}, {col}) is outside a {rows}x{cols} matrix"
                )));
            }
            tri.add_triplet(row, col, value);
        }
        let csr: CsMat<f64> = tri.to_csr();
        Self::from_csr(csr)
    }

    /// Number of rows.
    pub fn n_samples(&self) -> usize {
        match self {
            SampleMatrix::Dense(data) => data.nrows(),
            SampleMatrix::Sparse(data) => data.rows(),
        }
    }

    /// Number of columns.
    pub fn n_features(&self) -> usize {
        match self {
            SampleMatrix::Dense(data) => data.ncols(),
            SampleMatrix::Sparse(data) => data.cols(),
        }
    }

    /// `(n_samples, n_features)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.n_samples(), self.n_features())
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, SampleMatrix::Sparse(_))
    }

    pub fn is_empty(&self) -> bool {
        self.n_samples() == 0
    }

    /// View of a single row, or `None` if `i` is out of bounds.
    pub fn row(&self, i: usize) -> Option<RowView<'_>> {
        if i >= self.n_samples() {
            return None;
        }
        match self {
            SampleMatrix::Dense(data) => Some(RowView::Dense(data.row(i))),
            SampleMatrix::Sparse(data) => data.outer_view(i).map(RowView::Sparse),
        }
    }

    /// Views of all rows, in order.
    pub fn row_views(&self) -> Vec<RowView<'_>> {
        match self {
            SampleMatrix::Dense(data) => data.outer_iter().map(RowView::Dense).collect(),
            SampleMatrix::Sparse(data) => data.outer_iterator().map(RowView::Sparse).collect(),
        }
    }

    /// Copy the rows listed in `ids`, in that order, into a new matrix.
    pub fn select_rows(&self, ids: &[usize]) -> Result<SampleMatrix> {
        let n_samples = self.n_samples();
        if let Some(&bad) = ids.iter().find(|&&i| i >= n_samples) {
            return Err(DocCatError::invalid_parameter(format!(
                "row index {bad} is out of bounds for a matrix with {n_samples} rows"
            )));
        }

        match self {
            SampleMatrix::Dense(data) => Ok(SampleMatrix::Dense(data.select(Axis(0), ids))),
            SampleMatrix::Sparse(data) => {
                let mut indptr = Vec::with_capacity(ids.len() + 1);
                let mut indices = Vec::new();
                let mut values = Vec::new();
                indptr.push(0);
                for &i in ids {
                    if let Some(row) = data.outer_view(i) {
                        indices.extend_from_slice(row.indices());
                        values.extend_from_slice(row.data());
                    }
                    indptr.push(indices.len());
                }
                Ok(SampleMatrix::Sparse(CsMat::new(
                    (ids.len(), data.cols()),
                    indptr,
                    indices,
                    values,
                )))
            }
        }
    }

    /// Copy a contiguous range of rows into a new matrix.
    pub fn slice_rows(&self, range: Range<usize>) -> Result<SampleMatrix> {
        let n_samples = self.n_samples();
        if range.start > range.end || range.end > n_samples {
            return Err(DocCatError::invalid_parameter(format!(
                "row range {range:?} is out of bounds for a matrix with {n_samples} rows"
            )));
        }
        match self {
            SampleMatrix::Dense(data) => Ok(SampleMatrix::Dense(
                data.slice(s![range.start..range.end, ..]).to_owned(),
            )),
            SampleMatrix::Sparse(_) => {
                let ids: Vec<usize> = range.collect();
                self.select_rows(&ids)
            }
        }
    }
}

/// A borrowed row of a [`SampleMatrix`].
#[derive(Debug, Clone)]
pub enum RowView<'a> {
    Dense(ArrayView1<'a, f64>),
    Sparse(CsVecView<'a, f64>),
}

impl RowView<'_> {
    /// Length of the row (the matrix feature count).
    pub fn dim(&self) -> usize {
        match self {
            RowView::Dense(row) => row.len(),
            RowView::Sparse(row) => row.dim(),
        }
    }

    /// Value at column `j` (zero when absent from a sparse row).
    pub fn get(&self, j: usize) -> f64 {
        match self {
            RowView::Dense(row) => row.get(j).copied().unwrap_or(0.0),
            RowView::Sparse(row) => match row.indices().binary_search(&j) {
                Ok(pos) => row.data()[pos],
                Err(_) => 0.0,
            },
        }
    }

    /// Call `f(column, value)` for every nonzero entry, in column order.
    pub fn for_each_nonzero<F: FnMut(usize, f64)>(&self, mut f: F) {
        match self {
            RowView::Dense(row) => {
                for (j, &v) in row.iter().enumerate() {
                    if v != 0.0 {
                        f(j, v);
                    }
                }
            }
            RowView::Sparse(row) => {
                for (&j, &v) in row.indices().iter().zip(row.data()) {
                    if v != 0.0 {
                        f(j, v);
                    }
                }
            }
        }
    }

    /// Densify the row.
    pub fn to_dense(&self) -> Vec<f64> {
        match self {
            RowView::Dense(row) => row.to_vec(),
            RowView::Sparse(row) => {
                let mut out = vec![0.0; row.dim()];
                for (&j, &v) in row.indices().iter().zip(row.data()) {
                    out[j] = v;
                }
                out
            }
        }
    }

    /// Visit aligned value pairs `(self[j], other[j])`.
    ///
    /// Every coordinate where either side is nonzero is visited; coordinates
    /// where both sides are structurally zero may be skipped.
    pub fn fold_pairs<F: FnMut(f64, f64)>(&self, other: &RowView<'_>, mut f: F) {
        match (self, other) {
            (RowView::Dense(a), RowView::Dense(b)) => {
                for (&x, &y) in a.iter().zip(b.iter()) {
                    f(x, y);
                }
            }
            (RowView::Sparse(a), RowView::Dense(b)) => sparse_dense_pairs(a, b, f),
            (RowView::Dense(a), RowView::Sparse(b)) => {
                sparse_dense_pairs(b, a, |y, x| f(x, y));
            }
            (RowView::Sparse(a), RowView::Sparse(b)) => {
                let (ai, ad) = (a.indices(), a.data());
                let (bi, bd) = (b.indices(), b.data());
                let (mut p, mut q) = (0, 0);
                while p < ai.len() || q < bi.len() {
                    let ca = ai.get(p).copied().unwrap_or(usize::MAX);
                    let cb = bi.get(q).copied().unwrap_or(usize::MAX);
                    match ca.cmp(&cb) {
                        Ordering::Less => {
                            f(ad[p], 0.0);
                            p += 1;
                        }
                        Ordering::Greater => {
                            f(0.0, bd[q]);
                            q += 1;
                        }
                        Ordering::Equal => {
                            f(ad[p], bd[q]);
                            p += 1;
                            q += 1;
                        }
                    }
                }
            }
        }
    }

    /// Dot product with another row.
    pub fn dot(&self, other: &RowView<'_>) -> f64 {
        let mut acc = 0.0;
        self.fold_pairs(other, |x, y| acc += x * y);
        acc
    }

    /// Dot product with a dense weight vector of the same length.
    pub fn dot_slice(&self, weights: &[f64]) -> f64 {
        let mut acc = 0.0;
        self.for_each_nonzero(|j, v| {
            if let Some(w) = weights.get(j) {
                acc += v * w;
            }
        });
        acc
    }

    pub fn squared_norm(&self) -> f64 {
        let mut acc = 0.0;
        self.for_each_nonzero(|_, v| acc += v * v);
        acc
    }

    /// Squared Euclidean distance to another row.
    pub fn squared_euclidean(&self, other: &RowView<'_>) -> f64 {
        let mut acc = 0.0;
        self.fold_pairs(other, |x, y| {
            let d = x - y;
            acc += d * d;
        });
        acc
    }

    /// L1 distance to another row.
    pub fn manhattan(&self, other: &RowView<'_>) -> f64 {
        let mut acc = 0.0;
        self.fold_pairs(other, |x, y| acc += (x - y).abs());
        acc
    }
}

fn sparse_dense_pairs<F: FnMut(f64, f64)>(
    sparse: &CsVecView<'_, f64>,
    dense: &ArrayView1<'_, f64>,
    mut f: F,
) {
    let indices = sparse.indices();
    let data = sparse.data();
    let mut k = 0;
    for (j, &y) in dense.iter().enumerate() {
        let x = if k < indices.len() && indices[k] == j {
            k += 1;
            data[k - 1]
        } else {
            0.0
        };
        f(x, y);
    }
}
