//! Restarted, preconditioned GMRES.
//!
//! The solver is written against two seams:
//!
//! - [`LinearOperator`]: the matrix-vector product. A distributed caller wraps its
//!   local matrix in an operator that performs the ghost-vector exchange before the
//!   local multiply.
//! - [`InnerProduct`]: the dot product used for all norms and Arnoldi coefficients.
//!   A distributed caller all-reduces the local dot products here, which keeps every
//!   rank's Givens rotations bit-identical and makes the restart-cycle convergence
//!   check a global decision.
//!
//! Left preconditioning is used; the convergence criterion is the *true* relative
//! residual `||b - Ax|| / ||b||`, recomputed at the end of every restart cycle. The
//! Givens estimate of the preconditioned residual only decides when to leave the
//! inner Arnoldi loop early.

use crate::precond::Preconditioner;
use crate::{is_finite, Real};
use crate::bsr::BsrMatrix;
use itertools::izip;
use log::debug;
use nalgebra::DMatrix;
use std::error::Error;
use std::fmt;

/// A linear operator `y = Ax` on contiguous coefficient slices.
pub trait LinearOperator<T> {
    fn apply(&self, y: &mut [T], x: &[T]);
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: &mut [T], x: &[T]) {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T: Real> LinearOperator<T> for DMatrix<T> {
    fn apply(&self, y: &mut [T], x: &[T]) {
        assert_eq!(x.len(), self.ncols());
        assert_eq!(y.len(), self.nrows());
        for (r, y_r) in y.iter_mut().enumerate() {
            let mut acc = T::zero();
            for (c, x_c) in x.iter().enumerate() {
                acc += self[(r, c)] * *x_c;
            }
            *y_r = acc;
        }
    }
}

impl<T: Real> LinearOperator<T> for BsrMatrix<T> {
    fn apply(&self, y: &mut [T], x: &[T]) {
        self.mul_vector(x, y);
    }
}

/// The inner product used for Arnoldi coefficients and norms.
pub trait InnerProduct<T: Real> {
    fn dot(&self, a: &[T], b: &[T]) -> T;

    fn norm(&self, a: &[T]) -> T {
        self.dot(a, a).sqrt()
    }
}

/// The plain (single-partition) Euclidean inner product.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanInnerProduct;

impl<T: Real> InnerProduct<T> for EuclideanInnerProduct {
    fn dot(&self, a: &[T], b: &[T]) -> T {
        assert_eq!(a.len(), b.len());
        let mut acc = T::zero();
        for (x, y) in a.iter().zip(b) {
            acc += *x * *y;
        }
        acc
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GmresSettings<T> {
    /// Relative residual tolerance, `||b - Ax|| <= tolerance * ||b||`.
    pub tolerance: T,
    /// Total iteration budget across all restart cycles.
    pub max_iterations: usize,
    /// Krylov subspace dimension per restart cycle.
    pub restart: usize,
}

impl Default for GmresSettings<f64> {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 500,
            restart: 30,
        }
    }
}

impl Default for GmresSettings<f32> {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 500,
            restart: 30,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct GmresOutput<T> {
    /// Number of Arnoldi iterations performed.
    pub iterations: usize,
    /// Relative residual of the solution left in `x`.
    pub relative_residual: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GmresErrorKind {
    /// The iteration budget was exhausted before the tolerance was met.
    MaxIterationsReached { max_iterations: usize },
    /// The residual became NaN or infinite.
    NonFiniteResidual,
    /// The iteration stalled without reducing the residual (e.g. a vanishing
    /// preconditioned residual or a zero pivot in the least-squares solve).
    Stagnated,
}

/// A failed GMRES solve.
///
/// The *best* iterate encountered is always left in the solution vector, so a
/// caller can decide to continue with it (e.g. with a damped Newton step)
/// rather than discarding the work.
#[derive(Debug, Clone)]
pub struct GmresError<T> {
    pub output: GmresOutput<T>,
    pub kind: GmresErrorKind,
}

impl<T: fmt::Display> fmt::Display for GmresError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            GmresErrorKind::MaxIterationsReached { max_iterations } => write!(
                f,
                "GMRES did not converge within {} iterations (relative residual {}).",
                max_iterations, self.output.relative_residual
            ),
            GmresErrorKind::NonFiniteResidual => write!(
                f,
                "GMRES residual became non-finite after {} iterations.",
                self.output.iterations
            ),
            GmresErrorKind::Stagnated => write!(
                f,
                "GMRES stagnated after {} iterations (relative residual {}).",
                self.output.iterations, self.output.relative_residual
            ),
        }
    }
}

impl<T: fmt::Debug + fmt::Display> Error for GmresError<T> {}

fn givens_rotation<T: Real>(a: T, b: T) -> (T, T) {
    if b == T::zero() {
        (T::one(), T::zero())
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = T::one() / (T::one() + t * t).sqrt();
        (s * t, s)
    } else {
        let t = b / a;
        let c = T::one() / (T::one() + t * t).sqrt();
        (c, c * t)
    }
}

/// Solves `Ax = b` with restarted, left-preconditioned GMRES.
///
/// On success the solution is left in `x` (which also serves as the initial
/// guess). On failure the best iterate encountered is left in `x` and the
/// error carries the iteration count and achieved relative residual.
pub fn gmres<T, A, M, P>(
    operator: &A,
    preconditioner: &M,
    inner_product: &P,
    b: &[T],
    x: &mut [T],
    settings: &GmresSettings<T>,
) -> Result<GmresOutput<T>, GmresError<T>>
where
    T: Real,
    A: LinearOperator<T>,
    M: Preconditioner<T>,
    P: InnerProduct<T>,
{
    let n = b.len();
    assert_eq!(x.len(), n);
    assert!(settings.restart >= 1, "Restart length must be at least 1.");

    let b_norm = inner_product.norm(b);
    if b_norm == T::zero() {
        x.fill(T::zero());
        return Ok(GmresOutput {
            iterations: 0,
            relative_residual: T::zero(),
        });
    }

    // Norm of the preconditioned right-hand side, used to scale the Givens
    // estimate of the preconditioned residual in the inner loop.
    let mut scratch = vec![T::zero(); n];
    preconditioner.apply(&mut scratch, b);
    let preconditioned_b_norm = inner_product.norm(&scratch);

    let mut r = vec![T::zero(); n];
    let mut z = vec![T::zero(); n];
    let mut w = vec![T::zero(); n];

    let compute_residual = |r: &mut [T], x: &[T], scratch: &mut [T]| {
        operator.apply(scratch, x);
        for (r_i, b_i, ax_i) in izip!(r.iter_mut(), b, scratch.iter()) {
            *r_i = *b_i - *ax_i;
        }
    };

    compute_residual(&mut r, x, &mut scratch);
    let mut relative_residual = inner_product.norm(&r) / b_norm;
    let mut best_x = x.to_vec();
    let mut best_residual = relative_residual;

    let mut iterations = 0;
    let fail = |x: &mut [T], best_x: &[T], best_residual: T, iterations: usize, kind: GmresErrorKind| {
        x.copy_from_slice(best_x);
        Err(GmresError {
            output: GmresOutput {
                iterations,
                relative_residual: best_residual,
            },
            kind,
        })
    };

    loop {
        if !is_finite(relative_residual) {
            return fail(x, &best_x, best_residual, iterations, GmresErrorKind::NonFiniteResidual);
        }
        if relative_residual <= settings.tolerance {
            debug!(
                "GMRES converged in {} iterations (relative residual {:?}).",
                iterations, relative_residual
            );
            return Ok(GmresOutput {
                iterations,
                relative_residual,
            });
        }
        if iterations >= settings.max_iterations {
            return fail(
                x,
                &best_x,
                best_residual,
                iterations,
                GmresErrorKind::MaxIterationsReached {
                    max_iterations: settings.max_iterations,
                },
            );
        }

        // Start a new restart cycle from the preconditioned residual.
        preconditioner.apply(&mut z, &r);
        let beta = inner_product.norm(&z);
        if beta == T::zero() || !is_finite(beta) {
            return fail(x, &best_x, best_residual, iterations, GmresErrorKind::Stagnated);
        }

        let m = settings.restart;
        let mut basis: Vec<Vec<T>> = Vec::with_capacity(m + 1);
        basis.push(z.iter().map(|&v| v / beta).collect());
        let mut h = DMatrix::<T>::zeros(m + 1, m);
        let mut cs = vec![T::zero(); m];
        let mut sn = vec![T::zero(); m];
        let mut g = vec![T::zero(); m + 1];
        g[0] = beta;

        let mut k = 0;
        for j in 0..m {
            if iterations >= settings.max_iterations {
                break;
            }

            operator.apply(&mut w, &basis[j]);
            preconditioner.apply(&mut z, &w);

            // Modified Gram-Schmidt.
            for i in 0..=j {
                let h_ij = inner_product.dot(&z, &basis[i]);
                h[(i, j)] = h_ij;
                for (z_l, v_l) in z.iter_mut().zip(&basis[i]) {
                    *z_l -= h_ij * *v_l;
                }
            }
            let h_next = inner_product.norm(&z);
            h[(j + 1, j)] = h_next;

            for i in 0..j {
                let temp = cs[i] * h[(i, j)] + sn[i] * h[(i + 1, j)];
                h[(i + 1, j)] = -sn[i] * h[(i, j)] + cs[i] * h[(i + 1, j)];
                h[(i, j)] = temp;
            }
            let (c, s) = givens_rotation(h[(j, j)], h[(j + 1, j)]);
            cs[j] = c;
            sn[j] = s;
            h[(j, j)] = c * h[(j, j)] + s * h[(j + 1, j)];
            h[(j + 1, j)] = T::zero();
            g[j + 1] = -s * g[j];
            g[j] = c * g[j];

            iterations += 1;
            k = j + 1;

            let estimate = g[j + 1].abs() / preconditioned_b_norm;
            if h_next == T::zero() || estimate <= settings.tolerance {
                // Lucky breakdown or estimated convergence: leave the cycle and
                // let the true residual decide.
                break;
            }
            basis.push(z.iter().map(|&v| v / h_next).collect());
        }

        // Back substitution of the (k x k) triangular least-squares system.
        let mut y = vec![T::zero(); k];
        for i in (0..k).rev() {
            let mut acc = g[i];
            for l in (i + 1)..k {
                acc -= h[(i, l)] * y[l];
            }
            if h[(i, i)] == T::zero() {
                return fail(x, &best_x, best_residual, iterations, GmresErrorKind::Stagnated);
            }
            y[i] = acc / h[(i, i)];
        }
        for (i, y_i) in y.iter().enumerate() {
            for (x_l, v_l) in x.iter_mut().zip(&basis[i]) {
                *x_l += *y_i * *v_l;
            }
        }

        compute_residual(&mut r, x, &mut scratch);
        relative_residual = inner_product.norm(&r) / b_norm;
        debug!(
            "GMRES restart cycle finished: {} total iterations, relative residual {:?}.",
            iterations, relative_residual
        );
        if is_finite(relative_residual) && relative_residual < best_residual {
            best_residual = relative_residual;
            best_x.copy_from_slice(x);
        }
    }
}
