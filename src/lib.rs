//! `garm` is a library for distributed finite element analysis with adjoint
//! design sensitivities.
//!
//! The library follows an SPMD model: every partition holds the full
//! replicated [`mesh::MeshData`] together with a partition of node ownership,
//! and all heavy data (degrees of freedom, matrix rows, element integration)
//! is distributed by that ownership. The pieces are:
//!
//! - [`mesh`]: replicated mesh description, partitioning and validation.
//! - [`dof`]: ownership-contiguous renumbering, ghost exchange schedules and
//!   the collective vector operations built on them.
//! - [`element`] and [`constitutive`]: structural element integration and the
//!   material models with their design-variable derivatives.
//! - [`assembly`]: parallel assembly of residuals and block-sparse Jacobians
//!   with ghost reconciliation and Dirichlet conditions.
//! - [`solver`] and [`newton`]: preconditioned GMRES over distributed
//!   operators (from the companion `garm-sparse` crate) and the Newton driver.
//! - [`functions`] and [`adjoint`]: functions of interest and their total
//!   design derivatives through the equilibrium constraint.
//! - [`model`]: the [`model::FeModel`] facade tying it all together.
//!
//! Communication is abstracted behind [`comm::Communicator`]; the provided
//! implementations run a single partition ([`comm::SerialComm`]) or several
//! partitions as threads of one process ([`comm::ThreadComm`]), which is also
//! how the partition-invariance tests exercise the collective paths.

pub mod adjoint;
pub mod assembly;
pub mod comm;
pub mod config;
pub mod constitutive;
pub mod dof;
pub mod element;
pub mod error;
pub mod functions;
pub mod mesh;
pub mod model;
pub mod newton;
pub mod solver;

pub extern crate nalgebra;

pub use config::{PreconditionerType, SolverConfig};
pub use error::AnalysisError;
pub use functions::FunctionKind;
pub use garm_sparse::Real;
pub use model::{FeModel, PointLoad};
