//! Block preconditioners for BSR matrices.
//!
//! Both preconditioners operate on the square leading sub-block of a (possibly
//! rectangular) local matrix: a distributed caller passes its owned-rows matrix,
//! whose trailing columns reference ghost nodes, and the preconditioner drops the
//! off-partition coupling. Applied additively over partitions this yields the
//! block-Jacobi and approximate-Schur (local block-ILU) preconditioners.
//!
//! Every preconditioner can also apply its transpose, so an adjoint (transposed)
//! solve reuses the factorization computed for the forward solve.

use crate::bsr::BsrMatrix;
use crate::Real;
use nalgebra::DMatrix;
use std::error::Error;
use std::fmt;

/// Application of an (approximate) inverse `M^-1` and its transpose.
pub trait Preconditioner<T> {
    /// Computes `y = M^-1 x`.
    fn apply(&self, y: &mut [T], x: &[T]);

    /// Computes `y = M^-T x`.
    fn apply_transpose(&self, y: &mut [T], x: &[T]);
}

#[derive(Debug)]
pub enum FactorizationError {
    /// The pattern stores no diagonal block for this block row.
    MissingDiagonalBlock { block_row: usize },
    /// A diagonal block was singular (or non-finite) at factorization time.
    SingularDiagonalBlock { block_row: usize },
}

impl fmt::Display for FactorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDiagonalBlock { block_row } => {
                write!(f, "Sparsity pattern has no diagonal block in block row {}.", block_row)
            }
            Self::SingularDiagonalBlock { block_row } => {
                write!(f, "Diagonal block in block row {} is singular.", block_row)
            }
        }
    }
}

impl Error for FactorizationError {}

/// The trivial preconditioner `M = I`.
#[derive(Debug, Clone, Copy)]
pub struct IdentityPreconditioner;

impl<T: Real> Preconditioner<T> for IdentityPreconditioner {
    fn apply(&self, y: &mut [T], x: &[T]) {
        y.copy_from_slice(x);
    }

    fn apply_transpose(&self, y: &mut [T], x: &[T]) {
        y.copy_from_slice(x);
    }
}

/// Block-Jacobi preconditioner: the inverse of the block diagonal.
#[derive(Debug, Clone)]
pub struct BlockJacobi<T: Real> {
    block_size: usize,
    inverses: Vec<DMatrix<T>>,
}

impl<T: Real> BlockJacobi<T> {
    /// Invert the diagonal blocks of the leading `square_blocks` block rows of `matrix`.
    pub fn new(matrix: &BsrMatrix<T>, square_blocks: usize) -> Result<Self, FactorizationError> {
        assert!(square_blocks <= matrix.pattern().block_rows());
        let mut inverses = Vec::with_capacity(square_blocks);
        for i in 0..square_blocks {
            let diagonal = matrix
                .diagonal_block(i)
                .ok_or(FactorizationError::MissingDiagonalBlock { block_row: i })?;
            let inverse = diagonal
                .try_inverse()
                .filter(|inv| inv.iter().all(|&v| crate::is_finite(v)))
                .ok_or(FactorizationError::SingularDiagonalBlock { block_row: i })?;
            inverses.push(inverse);
        }
        Ok(Self {
            block_size: matrix.block_size(),
            inverses,
        })
    }
}

impl<T: Real> Preconditioner<T> for BlockJacobi<T> {
    fn apply(&self, y: &mut [T], x: &[T]) {
        let bs = self.block_size;
        assert_eq!(x.len(), self.inverses.len() * bs);
        assert_eq!(y.len(), x.len());
        for (i, inverse) in self.inverses.iter().enumerate() {
            let xi = &x[i * bs..(i + 1) * bs];
            let yi = &mut y[i * bs..(i + 1) * bs];
            for r in 0..bs {
                let mut acc = T::zero();
                for c in 0..bs {
                    acc += inverse[(r, c)] * xi[c];
                }
                yi[r] = acc;
            }
        }
    }

    fn apply_transpose(&self, y: &mut [T], x: &[T]) {
        let bs = self.block_size;
        assert_eq!(x.len(), self.inverses.len() * bs);
        assert_eq!(y.len(), x.len());
        for (i, inverse) in self.inverses.iter().enumerate() {
            let xi = &x[i * bs..(i + 1) * bs];
            let yi = &mut y[i * bs..(i + 1) * bs];
            for r in 0..bs {
                let mut acc = T::zero();
                for c in 0..bs {
                    acc += inverse[(c, r)] * xi[c];
                }
                yi[r] = acc;
            }
        }
    }
}

/// Block incomplete LU factorization with zero fill-in, `A ~ L U` on the
/// sparsity pattern of `A`.
///
/// `L` has unit block diagonal; its off-diagonal blocks and the blocks of `U`
/// are stored in place of the original values. The block diagonal of `U` is
/// kept in inverted form so the triangular solves only multiply.
#[derive(Debug, Clone)]
pub struct BlockIlu0<T: Real> {
    square_blocks: usize,
    block_size: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<T>,
    diag_inverses: Vec<DMatrix<T>>,
}

impl<T: Real> BlockIlu0<T> {
    /// Factorize the leading `square_blocks x square_blocks` block submatrix of `matrix`.
    pub fn new(matrix: &BsrMatrix<T>, square_blocks: usize) -> Result<Self, FactorizationError> {
        assert!(square_blocks <= matrix.pattern().block_rows());
        let bs = matrix.block_size();
        let bs2 = bs * bs;

        // Copy out the square sub-pattern (dropping columns beyond the square part).
        let mut row_offsets = Vec::with_capacity(square_blocks + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        row_offsets.push(0);
        for i in 0..square_blocks {
            let range = matrix.pattern().row_block_range(i);
            for (offset, &j) in matrix.pattern().row_col_indices(i).iter().enumerate() {
                if j < square_blocks {
                    col_indices.push(j);
                    values.extend_from_slice(matrix.block_slice(range.start + offset));
                }
            }
            row_offsets.push(col_indices.len());
        }

        let mut factor = Self {
            square_blocks,
            block_size: bs,
            row_offsets,
            col_indices,
            values,
            diag_inverses: Vec::with_capacity(square_blocks),
        };

        // Block IKJ elimination restricted to the existing pattern.
        for i in 0..square_blocks {
            let row_range = factor.row_range(i);
            for pos_ik in row_range.clone() {
                let k = factor.col_indices[pos_ik];
                if k >= i {
                    break;
                }
                // L_ik = A_ik * inv(U_kk)
                let l_ik = factor.block_matrix(pos_ik) * &factor.diag_inverses[k];
                factor.values[pos_ik * bs2..(pos_ik + 1) * bs2].copy_from_slice(l_ik.as_slice());

                for pos_ij in row_range.clone() {
                    let j = factor.col_indices[pos_ij];
                    if j <= k {
                        continue;
                    }
                    if let Some(pos_kj) = factor.find(k, j) {
                        let update = &l_ik * factor.block_matrix(pos_kj);
                        let target = &mut factor.values[pos_ij * bs2..(pos_ij + 1) * bs2];
                        for (t, u) in target.iter_mut().zip(update.as_slice()) {
                            *t -= *u;
                        }
                    }
                }
            }

            let pos_ii = factor
                .find(i, i)
                .ok_or(FactorizationError::MissingDiagonalBlock { block_row: i })?;
            let inverse = factor
                .block_matrix(pos_ii)
                .try_inverse()
                .filter(|inv| inv.iter().all(|&v| crate::is_finite(v)))
                .ok_or(FactorizationError::SingularDiagonalBlock { block_row: i })?;
            factor.diag_inverses.push(inverse);
        }

        Ok(factor)
    }

    fn row_range(&self, i: usize) -> std::ops::Range<usize> {
        self.row_offsets[i]..self.row_offsets[i + 1]
    }

    fn find(&self, i: usize, j: usize) -> Option<usize> {
        let range = self.row_range(i);
        self.col_indices[range.clone()]
            .binary_search(&j)
            .ok()
            .map(|pos| range.start + pos)
    }

    fn block_matrix(&self, idx: usize) -> DMatrix<T> {
        let bs = self.block_size;
        DMatrix::from_column_slice(bs, bs, &self.values[idx * bs * bs..(idx + 1) * bs * bs])
    }

    /// `y_i (+/-)= B x_j` for a stored block, column-major storage.
    fn block_mul_acc(&self, idx: usize, transpose: bool, x: &[T], y: &mut [T]) {
        let bs = self.block_size;
        let block = &self.values[idx * bs * bs..(idx + 1) * bs * bs];
        for c in 0..bs {
            for r in 0..bs {
                let v = block[c * bs + r];
                if transpose {
                    y[c] -= v * x[r];
                } else {
                    y[r] -= v * x[c];
                }
            }
        }
    }
}

impl<T: Real> Preconditioner<T> for BlockIlu0<T> {
    fn apply(&self, y: &mut [T], x: &[T]) {
        let bs = self.block_size;
        let n = self.square_blocks;
        assert_eq!(x.len(), n * bs);
        assert_eq!(y.len(), x.len());
        y.copy_from_slice(x);

        // Forward solve L w = x (unit block diagonal).
        for i in 0..n {
            let (lower, upper) = y.split_at_mut(i * bs);
            let yi = &mut upper[..bs];
            for pos in self.row_range(i) {
                let k = self.col_indices[pos];
                if k >= i {
                    break;
                }
                let yk = &lower[k * bs..(k + 1) * bs];
                self.block_mul_acc(pos, false, yk, yi);
            }
        }

        // Backward solve U y = w.
        for i in (0..n).rev() {
            let (lower, upper) = y.split_at_mut((i + 1) * bs);
            let yi_start = i * bs;
            for pos in self.row_range(i) {
                let j = self.col_indices[pos];
                if j <= i {
                    continue;
                }
                let yj = &upper[(j - i - 1) * bs..(j - i) * bs];
                let yi = &mut lower[yi_start..yi_start + bs];
                self.block_mul_acc(pos, false, yj, yi);
            }
            let inverse = &self.diag_inverses[i];
            let yi = &mut lower[yi_start..yi_start + bs];
            let mut scaled = vec![T::zero(); bs];
            for r in 0..bs {
                for c in 0..bs {
                    scaled[r] += inverse[(r, c)] * yi[c];
                }
            }
            yi.copy_from_slice(&scaled);
        }
    }

    fn apply_transpose(&self, y: &mut [T], x: &[T]) {
        let bs = self.block_size;
        let n = self.square_blocks;
        assert_eq!(x.len(), n * bs);
        assert_eq!(y.len(), x.len());
        y.copy_from_slice(x);

        // Solve U^T w = x, right-looking over the rows of U.
        for i in 0..n {
            let inverse = &self.diag_inverses[i];
            let mut scaled = vec![T::zero(); bs];
            {
                let yi = &y[i * bs..(i + 1) * bs];
                for r in 0..bs {
                    for c in 0..bs {
                        // Multiply by inv(U_ii)^T.
                        scaled[r] += inverse[(c, r)] * yi[c];
                    }
                }
            }
            y[i * bs..(i + 1) * bs].copy_from_slice(&scaled);
            let (lower, upper) = y.split_at_mut((i + 1) * bs);
            let yi = &lower[i * bs..(i + 1) * bs];
            for pos in self.row_range(i) {
                let j = self.col_indices[pos];
                if j <= i {
                    continue;
                }
                let yj = &mut upper[(j - i - 1) * bs..(j - i) * bs];
                self.block_mul_acc(pos, true, yi, yj);
            }
        }

        // Solve L^T y = w, right-looking over the rows of L.
        for i in (0..n).rev() {
            let (lower, upper) = y.split_at_mut(i * bs);
            let yi = &upper[..bs];
            for pos in self.row_range(i) {
                let k = self.col_indices[pos];
                if k >= i {
                    break;
                }
                let yk = &mut lower[k * bs..(k + 1) * bs];
                self.block_mul_acc(pos, true, yi, yk);
            }
        }
    }
}
