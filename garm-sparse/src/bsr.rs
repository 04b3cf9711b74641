//! Block-compressed-row sparse matrix storage.
//!
//! The matrix is stored as small dense blocks of a fixed size, one block per
//! node pair, matching the per-node grouping of degrees of freedom in a finite
//! element discretization. The sparsity pattern is determined once from mesh
//! connectivity and shared (via [`Arc`]) between all matrices assembled at the
//! same topology.

use crate::Real;
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut};
use std::sync::Arc;

/// The block sparsity structure of a [`BsrMatrix`].
///
/// Rows and columns are counted in *blocks*; the scalar dimensions are
/// `block_rows * block_size` by `block_cols * block_size`. Column indices are
/// sorted and deduplicated within each row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BsrPattern {
    block_rows: usize,
    block_cols: usize,
    block_size: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
}

impl BsrPattern {
    /// Build a pattern from (block-row, block-col) coordinates.
    ///
    /// Duplicate coordinates are merged. Panics if a coordinate is out of bounds.
    pub fn from_block_coordinates(
        block_rows: usize,
        block_cols: usize,
        block_size: usize,
        mut coordinates: Vec<(usize, usize)>,
    ) -> Self {
        assert!(block_size > 0, "Block size must be non-zero.");
        assert!(
            coordinates.iter().all(|&(i, j)| i < block_rows && j < block_cols),
            "Block coordinates contain index out of bounds."
        );
        coordinates.sort_unstable();
        coordinates.dedup();

        let mut row_offsets = Vec::with_capacity(block_rows + 1);
        let mut col_indices = Vec::with_capacity(coordinates.len());
        row_offsets.push(0);
        for (i, j) in coordinates {
            while i + 1 > row_offsets.len() {
                row_offsets.push(col_indices.len());
            }
            col_indices.push(j);
        }
        while row_offsets.len() < block_rows + 1 {
            row_offsets.push(col_indices.len());
        }

        Self {
            block_rows,
            block_cols,
            block_size,
            row_offsets,
            col_indices,
        }
    }

    pub fn block_rows(&self) -> usize {
        self.block_rows
    }

    pub fn block_cols(&self) -> usize {
        self.block_cols
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of stored blocks.
    pub fn nnz_blocks(&self) -> usize {
        self.col_indices.len()
    }

    /// Scalar row dimension.
    pub fn rows(&self) -> usize {
        self.block_rows * self.block_size
    }

    /// Scalar column dimension.
    pub fn cols(&self) -> usize {
        self.block_cols * self.block_size
    }

    /// The block-column indices of block row `i`.
    pub fn row_col_indices(&self, i: usize) -> &[usize] {
        &self.col_indices[self.row_offsets[i]..self.row_offsets[i + 1]]
    }

    /// The range of storage indices covered by block row `i`.
    pub fn row_block_range(&self, i: usize) -> std::ops::Range<usize> {
        self.row_offsets[i]..self.row_offsets[i + 1]
    }

    /// Storage index of block `(i, j)`, if present in the pattern.
    pub fn find_block(&self, i: usize, j: usize) -> Option<usize> {
        let range = self.row_block_range(i);
        let cols = &self.col_indices[range.clone()];
        cols.binary_search(&j).ok().map(|pos| range.start + pos)
    }
}

/// A sparse matrix of dense `block_size x block_size` blocks in
/// block-compressed-row format.
///
/// Blocks are stored column-major (nalgebra convention) so that block storage
/// can be viewed directly as a [`DMatrixView`].
#[derive(Debug, Clone)]
pub struct BsrMatrix<T> {
    pattern: Arc<BsrPattern>,
    values: Vec<T>,
}

impl<T: Real> BsrMatrix<T> {
    /// Create a zero matrix with the given pattern.
    pub fn from_pattern(pattern: Arc<BsrPattern>) -> Self {
        let num_values = pattern.nnz_blocks() * pattern.block_size() * pattern.block_size();
        Self {
            pattern,
            values: vec![T::zero(); num_values],
        }
    }

    pub fn pattern(&self) -> &BsrPattern {
        &self.pattern
    }

    pub fn pattern_arc(&self) -> Arc<BsrPattern> {
        Arc::clone(&self.pattern)
    }

    pub fn block_size(&self) -> usize {
        self.pattern.block_size()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Set all stored values to zero, keeping the pattern.
    pub fn zero_values(&mut self) {
        self.values.fill(T::zero());
    }

    /// Storage slice of the block at storage index `idx`.
    pub fn block_slice(&self, idx: usize) -> &[T] {
        let bs2 = self.block_size() * self.block_size();
        &self.values[idx * bs2..(idx + 1) * bs2]
    }

    pub fn block_slice_mut(&mut self, idx: usize) -> &mut [T] {
        let bs2 = self.block_size() * self.block_size();
        &mut self.values[idx * bs2..(idx + 1) * bs2]
    }

    /// View of the block at storage index `idx`.
    pub fn block(&self, idx: usize) -> DMatrixView<T> {
        let bs = self.block_size();
        DMatrixView::from_slice(self.block_slice(idx), bs, bs)
    }

    pub fn block_mut(&mut self, idx: usize) -> DMatrixViewMut<T> {
        let bs = self.block_size();
        let bs2 = bs * bs;
        let values = &mut self.values[idx * bs2..(idx + 1) * bs2];
        DMatrixViewMut::from_slice(values, bs, bs)
    }

    /// Add `block` to the block at `(i, j)`.
    ///
    /// Panics if `(i, j)` is not in the pattern: the pattern is constructed
    /// from the same connectivity that produces the contributions, so a miss
    /// is a programming error, not a data error.
    pub fn add_block(&mut self, i: usize, j: usize, block: DMatrixView<T>) {
        let idx = self
            .pattern
            .find_block(i, j)
            .unwrap_or_else(|| panic!("Block ({}, {}) is not present in the sparsity pattern.", i, j));
        let bs = self.block_size();
        assert_eq!(block.nrows(), bs);
        assert_eq!(block.ncols(), bs);
        let values = self.block_slice_mut(idx);
        for c in 0..bs {
            for r in 0..bs {
                values[c * bs + r] += block[(r, c)];
            }
        }
    }

    /// Add a single scalar value at block `(i, j)`, entry `(r, c)`.
    pub fn add_entry(&mut self, i: usize, j: usize, r: usize, c: usize, value: T) {
        let idx = self
            .pattern
            .find_block(i, j)
            .unwrap_or_else(|| panic!("Block ({}, {}) is not present in the sparsity pattern.", i, j));
        let bs = self.block_size();
        self.block_slice_mut(idx)[c * bs + r] += value;
    }

    /// Dense diagonal block of block row `i`, if the pattern stores one.
    pub fn diagonal_block(&self, i: usize) -> Option<DMatrix<T>> {
        self.pattern.find_block(i, i).map(|idx| {
            let bs = self.block_size();
            DMatrix::from_column_slice(bs, bs, self.block_slice(idx))
        })
    }

    /// Computes `y = A x` over the local blocks.
    ///
    /// `x` must have length `cols()` and `y` length `rows()`.
    pub fn mul_vector(&self, x: &[T], y: &mut [T]) {
        let bs = self.block_size();
        assert_eq!(x.len(), self.pattern.cols());
        assert_eq!(y.len(), self.pattern.rows());
        y.fill(T::zero());
        for i in 0..self.pattern.block_rows() {
            let range = self.pattern.row_block_range(i);
            let cols = &self.pattern.col_indices[range.clone()];
            let yi = &mut y[i * bs..(i + 1) * bs];
            for (offset, &j) in cols.iter().enumerate() {
                let idx = range.start + offset;
                let bs2 = bs * bs;
                let block = &self.values[idx * bs2..(idx + 1) * bs2];
                let xj = &x[j * bs..(j + 1) * bs];
                for c in 0..bs {
                    let xc = xj[c];
                    for r in 0..bs {
                        yi[r] += block[c * bs + r] * xc;
                    }
                }
            }
        }
    }

    /// Computes `y = A^T x` over the local blocks via row-wise scatter.
    ///
    /// `x` must have length `rows()` and `y` length `cols()`.
    pub fn mul_transpose_vector(&self, x: &[T], y: &mut [T]) {
        let bs = self.block_size();
        assert_eq!(x.len(), self.pattern.rows());
        assert_eq!(y.len(), self.pattern.cols());
        y.fill(T::zero());
        for i in 0..self.pattern.block_rows() {
            let range = self.pattern.row_block_range(i);
            let cols = &self.pattern.col_indices[range.clone()];
            let xi = &x[i * bs..(i + 1) * bs];
            for (offset, &j) in cols.iter().enumerate() {
                let idx = range.start + offset;
                let bs2 = bs * bs;
                let block = &self.values[idx * bs2..(idx + 1) * bs2];
                let yj = &mut y[j * bs..(j + 1) * bs];
                for c in 0..bs {
                    let mut acc = T::zero();
                    for r in 0..bs {
                        acc += block[c * bs + r] * xi[r];
                    }
                    yj[c] += acc;
                }
            }
        }
    }

    /// Builds the dense equivalent. Intended for tests and small systems.
    pub fn to_dense(&self) -> DMatrix<T> {
        let bs = self.block_size();
        let mut dense = DMatrix::zeros(self.pattern.rows(), self.pattern.cols());
        for i in 0..self.pattern.block_rows() {
            let range = self.pattern.row_block_range(i);
            for idx in range {
                let j = self.pattern.col_indices[idx];
                let block = self.block(idx);
                for c in 0..bs {
                    for r in 0..bs {
                        dense[(i * bs + r, j * bs + c)] = block[(r, c)];
                    }
                }
            }
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixcompare::assert_matrix_eq;
    use nalgebra::DMatrix;

    fn example_matrix() -> BsrMatrix<f64> {
        // Block structure (block size 2):
        //  [ A  B  . ]
        //  [ .  C  D ]
        let pattern = BsrPattern::from_block_coordinates(2, 3, 2, vec![(0, 0), (0, 1), (1, 1), (1, 2)]);
        let mut matrix = BsrMatrix::from_pattern(Arc::new(pattern));
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = DMatrix::from_row_slice(2, 2, &[5.0, 6.0, 7.0, 8.0]);
        let c = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -1.0]);
        let d = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 1.0, 2.0]);
        matrix.add_block(0, 0, DMatrixView::from(&a));
        matrix.add_block(0, 1, DMatrixView::from(&b));
        matrix.add_block(1, 1, DMatrixView::from(&c));
        matrix.add_block(1, 2, DMatrixView::from(&d));
        matrix
    }

    fn dense_reference() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            4,
            6,
            &[
                1.0, 2.0, 5.0, 6.0, 0.0, 0.0, //
                3.0, 4.0, 7.0, 8.0, 0.0, 0.0, //
                0.0, 0.0, -1.0, 0.0, 2.0, 0.0, //
                0.0, 0.0, 0.0, -1.0, 1.0, 2.0,
            ],
        )
    }

    #[test]
    fn pattern_from_coordinates_sorts_and_dedups() {
        let pattern =
            BsrPattern::from_block_coordinates(3, 3, 1, vec![(2, 0), (0, 1), (0, 1), (0, 0), (2, 2)]);
        assert_eq!(pattern.nnz_blocks(), 4);
        assert_eq!(pattern.row_col_indices(0), &[0, 1]);
        assert_eq!(pattern.row_col_indices(1), &[] as &[usize]);
        assert_eq!(pattern.row_col_indices(2), &[0, 2]);
        assert_eq!(pattern.find_block(0, 1), Some(1));
        assert_eq!(pattern.find_block(1, 1), None);
    }

    #[test]
    fn to_dense_matches_blocks() {
        let matrix = example_matrix();
        assert_matrix_eq!(matrix.to_dense(), dense_reference());
    }

    #[test]
    fn mul_vector_matches_dense() {
        let matrix = example_matrix();
        let x: Vec<f64> = vec![1.0, -1.0, 0.5, 2.0, -3.0, 4.0];
        let mut y = vec![0.0; 4];
        matrix.mul_vector(&x, &mut y);
        let expected = dense_reference() * DMatrix::from_column_slice(6, 1, &x);
        for (computed, reference) in y.iter().zip(expected.iter()) {
            assert!((computed - reference).abs() < 1e-14);
        }
    }

    #[test]
    fn mul_transpose_vector_matches_dense() {
        let matrix = example_matrix();
        let x: Vec<f64> = vec![1.0, 2.0, -1.0, 0.5];
        let mut y = vec![0.0; 6];
        matrix.mul_transpose_vector(&x, &mut y);
        let expected = dense_reference().transpose() * DMatrix::from_column_slice(4, 1, &x);
        for (computed, reference) in y.iter().zip(expected.iter()) {
            assert!((computed - reference).abs() < 1e-14);
        }
    }

    #[test]
    fn add_block_accumulates() {
        let mut matrix = example_matrix();
        let increment = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        matrix.add_block(0, 0, DMatrixView::from(&increment));
        let idx = matrix.pattern().find_block(0, 0).unwrap();
        let block = matrix.block(idx);
        assert_eq!(block[(0, 0)], 2.0);
        assert_eq!(block[(1, 1)], 5.0);
    }

    #[test]
    #[should_panic(expected = "not present in the sparsity pattern")]
    fn add_block_outside_pattern_panics() {
        let mut matrix = example_matrix();
        let block = DMatrix::zeros(2, 2);
        matrix.add_block(1, 0, DMatrixView::from(&block));
    }
}
