//! Functions of interest evaluated over the equilibrium state.
//!
//! Every function is a single scalar reduced over all partitions:
//!
//! - [`FunctionKind::Mass`]: total structural mass, independent of the state.
//! - [`FunctionKind::Compliance`]: work of the external loads, `f_extᵀ u`.
//! - [`FunctionKind::KsFailure`]: Kreisselmeier-Steinhauser aggregate of the
//!   pointwise failure index over all quadrature points, a smooth and
//!   conservative approximation of the maximum that remains differentiable
//!   for the adjoint. The log-sum-exp is shifted by the global maximum so the
//!   exponentials never overflow.
//!
//! Besides the values, this module provides the *partial* derivatives with
//! respect to the state and the design vector; the total design derivative
//! through the equilibrium constraint is assembled in [`crate::adjoint`].

use crate::assembly::Assembler;
use crate::comm::Communicator;
use crate::constitutive::ConstitutiveSet;
use crate::dof::DofMap;
use crate::element::{element_mass, element_mass_design_derivative, ElementRegistry};
use crate::error::{AnalysisError, NumericalFailure};
use crate::mesh::MeshData;
use crate::Real;
use garm_sparse::is_finite;
use itertools::izip;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind<T> {
    Mass,
    Compliance,
    KsFailure {
        /// Aggregation weight; larger values approach the true maximum.
        weight: T,
    },
}

/// Everything a function evaluation reads. The state must be ghost-synced.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a, T: Real> {
    pub mesh: &'a MeshData<T>,
    pub dof_map: &'a DofMap,
    pub registry: &'a ElementRegistry<T>,
    pub constitutive: &'a ConstitutiveSet<T>,
    pub assembler: &'a Assembler,
    pub design: &'a [T],
    /// Local-layout equilibrium state.
    pub state: &'a [T],
    /// External load over owned degrees of freedom.
    pub external: &'a [T],
}

impl<'a, T: Real> EvaluationContext<'a, T> {
    fn element_nodes(&self, element: usize) -> Vec<nalgebra::Point3<T>> {
        self.mesh.elements[element]
            .nodes
            .iter()
            .map(|&n| self.mesh.nodes[n])
            .collect()
    }

    fn element_material(&self, element: usize) -> &dyn crate::constitutive::ConstitutiveModel<T> {
        self.constitutive
            .get(self.mesh.elements[element].constitutive)
            .unwrap_or_else(|| unreachable!("Validated in Assembler::new."))
    }

    fn element_model(&self, element: usize) -> &dyn crate::element::ElementModel<T> {
        self.registry
            .get(self.mesh.elements[element].kind)
            .unwrap_or_else(|| unreachable!("Validated in Assembler::new."))
    }

    fn element_state(&self, element: usize) -> Vec<T> {
        let bs = self.dof_map.block_size();
        let mut dofs = Vec::with_capacity(self.mesh.elements[element].nodes.len() * bs);
        for &node in &self.mesh.elements[element].nodes {
            let local = self
                .dof_map
                .local_node_of_old(node)
                .unwrap_or_else(|| unreachable!("Integrated elements have local nodes only."));
            dofs.extend_from_slice(&self.state[local * bs..(local + 1) * bs]);
        }
        dofs
    }
}

/// Failure index at every quadrature point of an owned element.
fn element_failure_values<T: Real>(
    context: &EvaluationContext<'_, T>,
    element: usize,
) -> Result<Vec<T>, NumericalFailure> {
    let model = context.element_model(element);
    let material = context.element_material(element);
    let nodes = context.element_nodes(element);
    let dofs = DVector::from_vec(context.element_state(element));
    let points = model
        .quadrature(&nodes)
        .map_err(|_| NumericalFailure::in_element("element quadrature", element))?;
    points
        .into_iter()
        .map(|point| {
            let strain = &point.strain_displacement * &dofs;
            let value = material.failure(context.design, strain.as_slice());
            if is_finite(value) {
                Ok(value)
            } else {
                Err(NumericalFailure::in_element("failure evaluation", element))
            }
        })
        .collect()
}

/// Shift and normalization of the KS aggregate, identical on every partition.
pub(crate) struct KsContext<T> {
    pub max: T,
    pub sum_exp: T,
}

pub(crate) fn ks_context<T, C>(
    context: &EvaluationContext<'_, T>,
    weight: T,
    comm: &C,
) -> Result<KsContext<T>, NumericalFailure>
where
    T: Real,
    C: Communicator<T>,
{
    // The failure index is nonnegative, so zero is a safe identity for the
    // maximum even on partitions without elements.
    let mut local_max = T::zero();
    for &element in context.assembler.owned_elements() {
        for value in element_failure_values(context, element)? {
            if value > local_max {
                local_max = value;
            }
        }
    }
    let max = comm.all_reduce_max(local_max);

    let mut local_sum = T::zero();
    for &element in context.assembler.owned_elements() {
        for value in element_failure_values(context, element)? {
            local_sum += (weight * (value - max)).exp();
        }
    }
    let sum_exp = comm.all_reduce_sum(local_sum);
    Ok(KsContext { max, sum_exp })
}

/// Evaluates one function of interest; the result is identical on every
/// partition.
pub fn evaluate_function<T, C>(
    kind: &FunctionKind<T>,
    context: &EvaluationContext<'_, T>,
    comm: &C,
) -> Result<T, AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    let value = match kind {
        FunctionKind::Mass => {
            let mut local = T::zero();
            for &element in context.assembler.owned_elements() {
                let mass = element_mass(
                    context.element_model(element),
                    &context.element_nodes(element),
                    context.element_material(element),
                    context.design,
                )
                .map_err(|_| NumericalFailure::in_element("element quadrature", element))?;
                local += mass;
            }
            comm.all_reduce_sum(local)
        }
        FunctionKind::Compliance => {
            let mut local = T::zero();
            for (f, u) in izip!(context.external, context.state) {
                local += *f * *u;
            }
            comm.all_reduce_sum(local)
        }
        FunctionKind::KsFailure { weight } => {
            let ks = ks_context(context, *weight, comm)?;
            if ks.sum_exp > T::zero() {
                ks.max + ks.sum_exp.ln() / *weight
            } else {
                T::zero()
            }
        }
    };
    if is_finite(value) {
        Ok(value)
    } else {
        Err(NumericalFailure::new("function evaluation").into())
    }
}

/// Partial derivative of a function with respect to the state, over owned
/// degrees of freedom, with constrained entries zeroed.
pub fn function_state_gradient<T, C>(
    kind: &FunctionKind<T>,
    context: &EvaluationContext<'_, T>,
    comm: &C,
) -> Result<Vec<T>, AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    let owned_dofs = context.dof_map.owned_dofs();
    let mut gradient = match kind {
        FunctionKind::Mass => vec![T::zero(); owned_dofs],
        FunctionKind::Compliance => context.external.to_vec(),
        FunctionKind::KsFailure { weight } => {
            let ks = ks_context(context, *weight, comm)?;
            let bs = context.dof_map.block_size();
            let mut local = vec![T::zero(); context.dof_map.local_dofs()];
            if ks.sum_exp > T::zero() {
                for &element in context.assembler.owned_elements() {
                    let model = context.element_model(element);
                    let material = context.element_material(element);
                    let nodes = context.element_nodes(element);
                    let dofs = DVector::from_vec(context.element_state(element));
                    let points = model
                        .quadrature(&nodes)
                        .map_err(|_| NumericalFailure::in_element("element quadrature", element))?;
                    for point in points {
                        let strain = &point.strain_displacement * &dofs;
                        let value = material.failure(context.design, strain.as_slice());
                        let share = (*weight * (value - ks.max)).exp() / ks.sum_exp;
                        let strain_gradient = material.failure_strain_gradient(context.design, strain.as_slice());
                        let element_gradient = point.strain_displacement.transpose() * strain_gradient * share;
                        for (position, &node) in context.mesh.elements[element].nodes.iter().enumerate() {
                            let local_node = context
                                .dof_map
                                .local_node_of_old(node)
                                .unwrap_or_else(|| unreachable!("Integrated elements have local nodes only."));
                            for component in 0..bs {
                                local[local_node * bs + component] += element_gradient[position * bs + component];
                            }
                        }
                    }
                }
            }
            context.dof_map.sync_add(comm, &mut local);
            local.truncate(owned_dofs);
            local
        }
    };
    for &dof in context.assembler.constrained_dofs() {
        if dof < owned_dofs {
            gradient[dof] = T::zero();
        }
    }
    Ok(gradient)
}

/// Partial derivative of a function with respect to the design vector,
/// holding the state fixed. Local contribution only; the caller reduces over
/// partitions.
pub fn function_design_gradient_partial<T, C>(
    kind: &FunctionKind<T>,
    context: &EvaluationContext<'_, T>,
    num_design_vars: usize,
    comm: &C,
) -> Result<Vec<T>, AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    let mut gradient = vec![T::zero(); num_design_vars];
    match kind {
        FunctionKind::Mass => {
            for &element in context.assembler.owned_elements() {
                let material = context.element_material(element);
                for &design_var in material.design_vars() {
                    gradient[design_var] += element_mass_design_derivative(
                        context.element_model(element),
                        &context.element_nodes(element),
                        material,
                        context.design,
                        design_var,
                    )
                    .map_err(|_| NumericalFailure::in_element("element quadrature", element))?;
                }
            }
        }
        FunctionKind::Compliance => {}
        FunctionKind::KsFailure { weight } => {
            let ks = ks_context(context, *weight, comm)?;
            if ks.sum_exp > T::zero() {
                for &element in context.assembler.owned_elements() {
                    let model = context.element_model(element);
                    let material = context.element_material(element);
                    let nodes = context.element_nodes(element);
                    let dofs = DVector::from_vec(context.element_state(element));
                    let points = model
                        .quadrature(&nodes)
                        .map_err(|_| NumericalFailure::in_element("element quadrature", element))?;
                    for point in points {
                        let strain = &point.strain_displacement * &dofs;
                        let value = material.failure(context.design, strain.as_slice());
                        let share = (*weight * (value - ks.max)).exp() / ks.sum_exp;
                        for &design_var in material.design_vars() {
                            gradient[design_var] += share
                                * material.failure_design_derivative(context.design, strain.as_slice(), design_var);
                        }
                    }
                }
            }
        }
    }
    Ok(gradient)
}
