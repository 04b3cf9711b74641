//! Distributed linear solves.
//!
//! The GMRES implementation in `garm-sparse` is generic over a linear operator
//! and an inner product; this module supplies both for the distributed
//! setting. Krylov vectors hold only *owned* degrees of freedom, so inner
//! products never double-count shared nodes. The operator widens a vector to
//! local layout, synchronizes the ghosts and multiplies; the inner product is
//! a local dot followed by a global reduction. Since every partition sees the
//! same reduced scalars, all partitions perform identical Givens rotations and
//! make identical convergence decisions.
//!
//! The adjoint solve applies the transpose operator without forming the
//! transposed matrix: a local transpose multiply scatters into local layout
//! and the ghost contributions are accumulated back to their owners. The
//! preconditioner of the forward solve is reused through its transpose
//! application.

use crate::comm::Communicator;
use crate::config::{PreconditionerType, SolverConfig};
use crate::dof::DofMap;
use crate::error::{AnalysisError, ConvergenceFailure, NumericalFailure};
use crate::Real;
use garm_sparse::precond::Preconditioner;
use garm_sparse::{
    gmres, BlockIlu0, BlockJacobi, GmresErrorKind, GmresOutput, GmresSettings, IdentityPreconditioner, InnerProduct,
    LinearOperator,
};
use garm_sparse::BsrMatrix;
use log::debug;
use std::cell::RefCell;

/// `y = Ax` on owned vectors, with ghost exchange before the local multiply.
pub struct DistributedOperator<'a, T: Real, C> {
    matrix: &'a BsrMatrix<T>,
    dof_map: &'a DofMap,
    comm: &'a C,
    scratch: RefCell<Vec<T>>,
}

impl<'a, T: Real, C: Communicator<T>> DistributedOperator<'a, T, C> {
    pub fn new(matrix: &'a BsrMatrix<T>, dof_map: &'a DofMap, comm: &'a C) -> Self {
        Self {
            matrix,
            dof_map,
            comm,
            scratch: RefCell::new(vec![T::zero(); dof_map.local_dofs()]),
        }
    }
}

impl<'a, T: Real, C: Communicator<T>> LinearOperator<T> for DistributedOperator<'a, T, C> {
    fn apply(&self, y: &mut [T], x: &[T]) {
        let mut local = self.scratch.borrow_mut();
        local[..self.dof_map.owned_dofs()].copy_from_slice(x);
        self.dof_map.sync_broadcast(self.comm, &mut local);
        self.matrix.mul_vector(&local, y);
    }
}

/// `y = Aᵀx` on owned vectors, without forming the transpose.
pub struct TransposeOperator<'a, T: Real, C> {
    matrix: &'a BsrMatrix<T>,
    dof_map: &'a DofMap,
    comm: &'a C,
    scratch: RefCell<Vec<T>>,
}

impl<'a, T: Real, C: Communicator<T>> TransposeOperator<'a, T, C> {
    pub fn new(matrix: &'a BsrMatrix<T>, dof_map: &'a DofMap, comm: &'a C) -> Self {
        Self {
            matrix,
            dof_map,
            comm,
            scratch: RefCell::new(vec![T::zero(); dof_map.local_dofs()]),
        }
    }
}

impl<'a, T: Real, C: Communicator<T>> LinearOperator<T> for TransposeOperator<'a, T, C> {
    fn apply(&self, y: &mut [T], x: &[T]) {
        let mut local = self.scratch.borrow_mut();
        // The local transpose multiply scatters owned rows into all local
        // columns; ghost columns are contributions to rows owned elsewhere.
        self.matrix.mul_transpose_vector(x, &mut local);
        self.dof_map.sync_add(self.comm, &mut local);
        y.copy_from_slice(&local[..self.dof_map.owned_dofs()]);
    }
}

/// Euclidean inner product over all partitions.
pub struct DistributedDot<'a, C> {
    comm: &'a C,
}

impl<'a, C> DistributedDot<'a, C> {
    pub fn new(comm: &'a C) -> Self {
        Self { comm }
    }
}

impl<'a, T: Real, C: Communicator<T>> InnerProduct<T> for DistributedDot<'a, C> {
    fn dot(&self, a: &[T], b: &[T]) -> T {
        assert_eq!(a.len(), b.len());
        let mut local = T::zero();
        for (x, y) in a.iter().zip(b) {
            local += *x * *y;
        }
        self.comm.all_reduce_sum(local)
    }
}

/// The local preconditioner applied by each partition to its owned block.
pub enum LocalPreconditioner<T: Real> {
    Identity(IdentityPreconditioner),
    BlockJacobi(BlockJacobi<T>),
    BlockIlu0(BlockIlu0<T>),
}

impl<T: Real> LocalPreconditioner<T> {
    /// Factorizes the owned square sub-block of `matrix` according to the
    /// configured preconditioner type.
    pub fn build(
        kind: PreconditionerType,
        matrix: &BsrMatrix<T>,
        dof_map: &DofMap,
    ) -> Result<Self, NumericalFailure> {
        let owned = dof_map.num_owned_nodes();
        match kind {
            PreconditionerType::Identity => Ok(Self::Identity(IdentityPreconditioner)),
            PreconditionerType::BlockJacobi => BlockJacobi::new(matrix, owned)
                .map(Self::BlockJacobi)
                .map_err(|_| NumericalFailure::new("block-Jacobi factorization")),
            PreconditionerType::BlockIlu0 => BlockIlu0::new(matrix, owned)
                .map(Self::BlockIlu0)
                .map_err(|_| NumericalFailure::new("block-ILU(0) factorization")),
        }
    }
}

impl<T: Real> Preconditioner<T> for LocalPreconditioner<T> {
    fn apply(&self, y: &mut [T], x: &[T]) {
        match self {
            Self::Identity(p) => p.apply(y, x),
            Self::BlockJacobi(p) => p.apply(y, x),
            Self::BlockIlu0(p) => p.apply(y, x),
        }
    }

    fn apply_transpose(&self, y: &mut [T], x: &[T]) {
        match self {
            Self::Identity(p) => p.apply_transpose(y, x),
            Self::BlockJacobi(p) => p.apply_transpose(y, x),
            Self::BlockIlu0(p) => p.apply_transpose(y, x),
        }
    }
}

/// Swaps the forward and transpose application of a preconditioner, so a
/// factorization built for `A` preconditions solves with `Aᵀ`.
struct TransposedPreconditioner<'a, P>(&'a P);

impl<'a, T: Real, P: Preconditioner<T>> Preconditioner<T> for TransposedPreconditioner<'a, P> {
    fn apply(&self, y: &mut [T], x: &[T]) {
        self.0.apply_transpose(y, x)
    }

    fn apply_transpose(&self, y: &mut [T], x: &[T]) {
        self.0.apply(y, x)
    }
}

fn settings_from_config<T: Real>(config: &SolverConfig<T>) -> GmresSettings<T> {
    GmresSettings {
        tolerance: config.linear_solver_tolerance,
        max_iterations: config.max_krylov_iterations,
        restart: config.krylov_restart,
    }
}

fn map_gmres_error<T: Real>(error: garm_sparse::GmresError<T>, tolerance: T) -> AnalysisError<T> {
    match error.kind {
        GmresErrorKind::NonFiniteResidual => NumericalFailure::new("linear solve").into(),
        GmresErrorKind::MaxIterationsReached { .. } | GmresErrorKind::Stagnated => ConvergenceFailure {
            iterations: error.output.iterations,
            relative_residual: error.output.relative_residual,
            tolerance,
        }
        .into(),
    }
}

/// Solves `Jx = rhs` over owned degrees of freedom on every partition.
pub fn solve_linear<T, C>(
    matrix: &BsrMatrix<T>,
    dof_map: &DofMap,
    comm: &C,
    config: &SolverConfig<T>,
    rhs: &[T],
    solution: &mut [T],
) -> Result<GmresOutput<T>, AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    let preconditioner = LocalPreconditioner::build(config.preconditioner, matrix, dof_map)?;
    let operator = DistributedOperator::new(matrix, dof_map, comm);
    let dot = DistributedDot::new(comm);
    let output = gmres(&operator, &preconditioner, &dot, rhs, solution, &settings_from_config(config))
        .map_err(|error| map_gmres_error(error, config.linear_solver_tolerance))?;
    debug!(
        "Linear solve converged in {} iterations (relative residual {:?}).",
        output.iterations, output.relative_residual
    );
    Ok(output)
}

/// Solves `Jᵀx = rhs` over owned degrees of freedom, reusing the forward
/// preconditioner through its transpose application.
pub fn solve_linear_transpose<T, C>(
    matrix: &BsrMatrix<T>,
    dof_map: &DofMap,
    comm: &C,
    config: &SolverConfig<T>,
    rhs: &[T],
    solution: &mut [T],
) -> Result<GmresOutput<T>, AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    let preconditioner = LocalPreconditioner::build(config.preconditioner, matrix, dof_map)?;
    solve_linear_transpose_with(&preconditioner, matrix, dof_map, comm, config, rhs, solution)
}

/// Like [`solve_linear_transpose`], but with a factorization built once by the
/// caller. Several transpose solves against the same matrix then share it.
pub fn solve_linear_transpose_with<T, C>(
    preconditioner: &LocalPreconditioner<T>,
    matrix: &BsrMatrix<T>,
    dof_map: &DofMap,
    comm: &C,
    config: &SolverConfig<T>,
    rhs: &[T],
    solution: &mut [T],
) -> Result<GmresOutput<T>, AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    let operator = TransposeOperator::new(matrix, dof_map, comm);
    let dot = DistributedDot::new(comm);
    let output = gmres(
        &operator,
        &TransposedPreconditioner(preconditioner),
        &dot,
        rhs,
        solution,
        &settings_from_config(config),
    )
    .map_err(|error| map_gmres_error(error, config.linear_solver_tolerance))?;
    debug!(
        "Transpose linear solve converged in {} iterations (relative residual {:?}).",
        output.iterations, output.relative_residual
    );
    Ok(output)
}
