//! Adjoint design sensitivities.
//!
//! For a function `f(u(x), x)` constrained by the equilibrium residual
//! `R(u, x) = K(x) u - f_ext = 0`, the total design derivative is
//!
//! ```text
//! df/dx = ∂f/∂x - λᵀ ∂R/∂x,    Kᵀ λ = ∂f/∂u
//! ```
//!
//! One transposed linear solve per function, regardless of the number of
//! design variables. The transpose solves of all requested functions share
//! the assembled Jacobian and a single preconditioner factorization through
//! [`crate::solver::solve_linear_transpose_with`].
//!
//! Constrained degrees of freedom carry a zero right-hand side, so the
//! adjoint vanishes there and the raw element design derivatives can be
//! contracted without re-applying the constraints.

use crate::comm::Communicator;
use crate::element::element_stiffness_design_derivative;
use crate::error::{AdjointFailure, AnalysisError, NumericalFailure};
use crate::functions::{
    function_design_gradient_partial, function_state_gradient, EvaluationContext, FunctionKind,
};
use crate::solver::{solve_linear_transpose_with, LocalPreconditioner};
use crate::{Real, SolverConfig};
use garm_sparse::{is_finite, BsrMatrix};
use nalgebra::DVector;

/// Contracts `λᵀ (∂K_e/∂x u_e)` over the owned elements into `gradient`.
fn accumulate_residual_products<T, C>(
    context: &EvaluationContext<'_, T>,
    adjoint: &[T],
    gradient: &mut [T],
    _comm: &C,
) -> Result<(), AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    let bs = context.dof_map.block_size();
    for &element in context.assembler.owned_elements() {
        let connectivity = &context.mesh.elements[element];
        let model = context
            .registry
            .get(connectivity.kind)
            .unwrap_or_else(|| unreachable!("Validated in Assembler::new."));
        let material = context
            .constitutive
            .get(connectivity.constitutive)
            .unwrap_or_else(|| unreachable!("Validated in Assembler::new."));
        let design_vars = material.design_vars();
        if design_vars.is_empty() {
            continue;
        }
        let nodes: Vec<_> = connectivity
            .nodes
            .iter()
            .map(|&n| context.mesh.nodes[n])
            .collect();
        let local_nodes: Vec<usize> = connectivity
            .nodes
            .iter()
            .map(|&n| {
                context
                    .dof_map
                    .local_node_of_old(n)
                    .unwrap_or_else(|| unreachable!("Integrated elements have local nodes only."))
            })
            .collect();
        let mut element_state = DVector::zeros(connectivity.nodes.len() * bs);
        let mut element_adjoint = DVector::zeros(connectivity.nodes.len() * bs);
        for (position, &local) in local_nodes.iter().enumerate() {
            for component in 0..bs {
                element_state[position * bs + component] = context.state[local * bs + component];
                element_adjoint[position * bs + component] = adjoint[local * bs + component];
            }
        }
        for &design_var in design_vars {
            let derivative = element_stiffness_design_derivative(
                model,
                &nodes,
                material,
                context.design,
                design_var,
            )
            .map_err(|_| NumericalFailure::in_element("element quadrature", element))?;
            gradient[design_var] -= element_adjoint.dot(&(&derivative * &element_state));
        }
    }
    Ok(())
}

fn gradient_for_function<T, C>(
    kind: &FunctionKind<T>,
    context: &EvaluationContext<'_, T>,
    preconditioner: &LocalPreconditioner<T>,
    matrix: &BsrMatrix<T>,
    config: &SolverConfig<T>,
    num_design_vars: usize,
    comm: &C,
) -> Result<Vec<T>, AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    let rhs = function_state_gradient(kind, context, comm)?;
    let mut adjoint_owned = vec![T::zero(); context.dof_map.owned_dofs()];
    solve_linear_transpose_with(
        preconditioner,
        matrix,
        context.dof_map,
        comm,
        config,
        &rhs,
        &mut adjoint_owned,
    )?;

    // Ghost copies of the adjoint are needed to contract whole elements.
    let mut adjoint = vec![T::zero(); context.dof_map.local_dofs()];
    adjoint[..adjoint_owned.len()].copy_from_slice(&adjoint_owned);
    context.dof_map.sync_broadcast(comm, &mut adjoint);

    let mut gradient = function_design_gradient_partial(kind, context, num_design_vars, comm)?;
    accumulate_residual_products(context, &adjoint, &mut gradient, comm)?;
    comm.all_reduce_sum_slice(&mut gradient);
    if gradient.iter().any(|&g| !is_finite(g)) {
        return Err(NumericalFailure::new("design gradient accumulation").into());
    }
    Ok(gradient)
}

/// Total design derivatives of each function, one adjoint solve per function.
/// Every partition returns the same full-length gradients.
pub fn evaluate_gradients<T, C>(
    kinds: &[FunctionKind<T>],
    context: &EvaluationContext<'_, T>,
    matrix: &BsrMatrix<T>,
    config: &SolverConfig<T>,
    num_design_vars: usize,
    comm: &C,
) -> Result<Vec<Vec<T>>, AnalysisError<T>>
where
    T: Real,
    C: Communicator<T>,
{
    // One factorization serves the transpose solves of all functions.
    let preconditioner = LocalPreconditioner::build(config.preconditioner, matrix, context.dof_map)
        .map_err(|source| {
            AnalysisError::Adjoint(AdjointFailure {
                function: 0,
                source: Box::new(source.into()),
            })
        })?;
    kinds
        .iter()
        .enumerate()
        .map(|(function, kind)| {
            gradient_for_function(kind, context, &preconditioner, matrix, config, num_design_vars, comm)
                .map_err(|source| {
                    AnalysisError::Adjoint(AdjointFailure {
                        function,
                        source: Box::new(source),
                    })
                })
        })
        .collect()
}
