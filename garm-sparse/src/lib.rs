//! Block-sparse linear algebra for `garm`.
//!
//! Provides the block-compressed-row matrix format used for assembled Jacobians,
//! block preconditioners and a restarted, preconditioned GMRES solver. The solver is
//! generic over a [`LinearOperator`](crate::gmres::LinearOperator) and an
//! [`InnerProduct`](crate::gmres::InnerProduct), so the same implementation serves both
//! serial and distributed operation: a distributed caller injects an operator that
//! performs ghost exchange and an inner product that performs a global reduction.

pub mod bsr;
pub mod gmres;
pub mod precond;

pub use bsr::{BsrMatrix, BsrPattern};
pub use gmres::{gmres, EuclideanInnerProduct, GmresError, GmresErrorKind, GmresOutput, GmresSettings, InnerProduct, LinearOperator};
pub use precond::{BlockIlu0, BlockJacobi, FactorizationError, IdentityPreconditioner, Preconditioner};

use nalgebra::RealField;

pub use nalgebra;

/// Trait alias for the scalar types supported by the solvers in this crate.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// Returns `true` if `x` is neither NaN nor infinite.
///
/// Works for any [`Real`] without requiring a `Float` bound: multiplying an
/// infinity by zero yields NaN, and NaN compares unequal to everything.
#[inline]
pub fn is_finite<T: Real>(x: T) -> bool {
    x * T::zero() == T::zero()
}
