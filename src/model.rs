//! The analysis facade tying mesh, elements, materials, solver and adjoint
//! together for one partition of an SPMD run.
//!
//! Every partition constructs its own [`FeModel`] from the same replicated
//! [`MeshData`] and the collective calls ([`FeModel::solve`],
//! [`FeModel::evaluate_functions`], [`FeModel::evaluate_gradients`]) must be
//! entered by all partitions together. Scalar results and gradients come back
//! identical everywhere.

use crate::adjoint;
use crate::assembly::Assembler;
use crate::comm::Communicator;
use crate::constitutive::ConstitutiveSet;
use crate::dof::DofMap;
use crate::element::ElementRegistry;
use crate::error::{AnalysisError, PartitionError};
use crate::functions::{evaluate_function, EvaluationContext, FunctionKind};
use crate::mesh::{ConstitutiveHandle, MeshData};
use crate::newton::{solve_newton, NewtonOutput};
use crate::{Real, SolverConfig};
use log::info;

/// A concentrated load on one node, one value per degree of freedom.
#[derive(Debug, Clone, PartialEq)]
pub struct PointLoad<T> {
    pub node: usize,
    pub components: Vec<T>,
}

pub struct FeModel<T: Real, C> {
    mesh: MeshData<T>,
    dof_map: DofMap,
    registry: ElementRegistry<T>,
    constitutive: ConstitutiveSet<T>,
    assembler: Assembler,
    comm: C,
    config: SolverConfig<T>,
    /// Replicated design vector, identical on every partition.
    design: Vec<T>,
    /// Local-layout state; ghost entries mirror their owners after a solve.
    state: Vec<T>,
    /// External load over owned degrees of freedom.
    external: Vec<T>,
    solved: bool,
}

impl<T, C> FeModel<T, C>
where
    T: Real + Send + Sync,
    C: Communicator<T>,
{
    pub fn new(
        mesh: MeshData<T>,
        registry: ElementRegistry<T>,
        constitutive: ConstitutiveSet<T>,
        loads: &[PointLoad<T>],
        design: Vec<T>,
        config: SolverConfig<T>,
        comm: C,
    ) -> Result<Self, AnalysisError<T>> {
        mesh.validate_partition(comm.size())?;
        for handle in 0..constitutive.len() {
            let model = constitutive
                .get(ConstitutiveHandle(handle))
                .unwrap_or_else(|| unreachable!("Handle below the arena length."));
            for &design_var in model.design_vars() {
                if design_var >= design.len() {
                    return Err(PartitionError::DesignVarOutOfRange {
                        handle,
                        design_var,
                        num_design_vars: design.len(),
                    }
                    .into());
                }
            }
        }
        for load in loads {
            if load.node >= mesh.nodes.len() || load.components.len() != mesh.dofs_per_node {
                return Err(PartitionError::InvalidLoad { node: load.node }.into());
            }
        }

        let dof_map = DofMap::new(&mesh, comm.rank(), comm.size());
        let assembler = Assembler::new(&mesh, &dof_map, &registry, &constitutive)?;

        // Loads land on whichever partition owns the node.
        let bs = dof_map.block_size();
        let mut external = vec![T::zero(); dof_map.owned_dofs()];
        for load in loads {
            if dof_map.is_owned_old(load.node) {
                let local = dof_map
                    .local_node_of_old(load.node)
                    .unwrap_or_else(|| unreachable!("Owned nodes are local."));
                for (component, &value) in load.components.iter().enumerate() {
                    external[local * bs + component] += value;
                }
            }
        }

        let state = vec![T::zero(); dof_map.local_dofs()];
        Ok(Self {
            mesh,
            dof_map,
            registry,
            constitutive,
            assembler,
            comm,
            config,
            design,
            state,
            external,
            solved: false,
        })
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }

    pub fn design_vars(&self) -> &[T] {
        &self.design
    }

    /// Replaces the design vector and invalidates the current state as an
    /// equilibrium solution. The length must not change.
    pub fn set_design_vars(&mut self, design: &[T]) {
        assert_eq!(design.len(), self.design.len());
        self.design.copy_from_slice(design);
        self.solved = false;
    }

    /// Drives the residual to equilibrium from the current state.
    pub fn solve(&mut self) -> Result<NewtonOutput<T>, AnalysisError<T>> {
        let output = solve_newton(
            &self.mesh,
            &self.dof_map,
            &self.registry,
            &self.constitutive,
            &self.assembler,
            &self.design,
            &mut self.state,
            &self.external,
            &self.config,
            &self.comm,
        )?;
        self.solved = true;
        info!(
            "Equilibrium reached after {} Newton iterations ({} Krylov iterations).",
            output.iterations, output.linear_iterations
        );
        Ok(output)
    }

    fn context(&self) -> EvaluationContext<'_, T> {
        EvaluationContext {
            mesh: &self.mesh,
            dof_map: &self.dof_map,
            registry: &self.registry,
            constitutive: &self.constitutive,
            assembler: &self.assembler,
            design: &self.design,
            state: &self.state,
            external: &self.external,
        }
    }

    /// Evaluates each function at the current equilibrium state.
    pub fn evaluate_functions(
        &mut self,
        kinds: &[FunctionKind<T>],
    ) -> Result<Vec<T>, AnalysisError<T>> {
        if !self.solved {
            self.solve()?;
        }
        let context = self.context();
        kinds
            .iter()
            .map(|kind| evaluate_function(kind, &context, &self.comm))
            .collect()
    }

    /// Total design derivatives of each function via one adjoint solve per
    /// function. The Jacobian is reassembled at the current state.
    pub fn evaluate_gradients(
        &mut self,
        kinds: &[FunctionKind<T>],
    ) -> Result<Vec<Vec<T>>, AnalysisError<T>> {
        if !self.solved {
            self.solve()?;
        }
        let matrix = self.assembler.assemble_jacobian(
            &self.mesh,
            &self.dof_map,
            &self.registry,
            &self.constitutive,
            &self.design,
            &self.comm,
        )?;
        adjoint::evaluate_gradients(
            kinds,
            &self.context(),
            &matrix,
            &self.config,
            self.design.len(),
            &self.comm,
        )
    }

    /// Gathers the full state in the original node numbering; identical on
    /// every partition.
    pub fn displacements(&self) -> Vec<T> {
        self.dof_map
            .gather_global(&self.comm, &self.state[..self.dof_map.owned_dofs()])
    }
}
