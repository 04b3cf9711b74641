//! Newton iteration over the distributed residual.
//!
//! Every partition runs the same iteration in lockstep: residual norms are
//! globally reduced, so all partitions take the same branches. The state
//! vector is kept ghost-synced and its constrained entries are held at zero
//! throughout, matching the zeroed rows and pinned diagonal of the assembled
//! Jacobian.

use crate::assembly::Assembler;
use crate::comm::Communicator;
use crate::config::SolverConfig;
use crate::constitutive::ConstitutiveSet;
use crate::dof::DofMap;
use crate::element::ElementRegistry;
use crate::error::{AnalysisError, DivergenceError};
use crate::mesh::MeshData;
use crate::solver::solve_linear;
use crate::Real;
use garm_sparse::is_finite;
use log::debug;

#[derive(Debug, Clone)]
pub struct NewtonOutput<T> {
    pub iterations: usize,
    pub residual_norm: T,
    /// Total Krylov iterations across all linear solves.
    pub linear_iterations: usize,
}

fn owned_norm<T, C>(comm: &C, values: &[T]) -> T
where
    T: Real,
    C: Communicator<T>,
{
    let mut local = T::zero();
    for &v in values {
        local += v * v;
    }
    comm.all_reduce_sum(local).sqrt()
}

/// Drives the state to equilibrium: finds `u` with `R(u) = f_int(u) - f_ext = 0`.
///
/// `state` is a local-layout vector used as the initial guess; on success it
/// holds the ghost-synced solution.
#[allow(clippy::too_many_arguments)]
pub fn solve_newton<T, C>(
    mesh: &MeshData<T>,
    dof_map: &DofMap,
    registry: &ElementRegistry<T>,
    constitutive: &ConstitutiveSet<T>,
    assembler: &Assembler,
    design: &[T],
    state: &mut [T],
    external: &[T],
    config: &SolverConfig<T>,
    comm: &C,
) -> Result<NewtonOutput<T>, AnalysisError<T>>
where
    T: Real + Send + Sync,
    C: Communicator<T>,
{
    assert_eq!(state.len(), dof_map.local_dofs());
    let owned_dofs = dof_map.owned_dofs();

    for &dof in assembler.constrained_dofs() {
        state[dof] = T::zero();
    }
    dof_map.sync_broadcast(comm, state);

    let mut residual =
        assembler.assemble_residual(mesh, dof_map, registry, constitutive, design, state, external, comm)?;
    let mut residual_norm = owned_norm(comm, &residual);
    let initial_norm = residual_norm;
    debug!("Newton iteration 0: residual norm {:?}.", residual_norm);

    if initial_norm == T::zero() {
        return Ok(NewtonOutput {
            iterations: 0,
            residual_norm,
            linear_iterations: 0,
        });
    }
    let target = config.newton_tolerance * initial_norm;

    let mut linear_iterations = 0;
    for iteration in 0..config.max_newton_iterations {
        if residual_norm <= target {
            return Ok(NewtonOutput {
                iterations: iteration,
                residual_norm,
                linear_iterations,
            });
        }
        if !is_finite(residual_norm) || residual_norm > config.divergence_tolerance * initial_norm {
            return Err(DivergenceError {
                iterations: iteration,
                residual_norm,
                initial_residual_norm: initial_norm,
            }
            .into());
        }

        let jacobian = assembler.assemble_jacobian(mesh, dof_map, registry, constitutive, design, comm)?;
        let mut step = vec![T::zero(); owned_dofs];
        match solve_linear(&jacobian, dof_map, comm, config, &residual, &mut step) {
            Ok(output) => linear_iterations += output.iterations,
            Err(AnalysisError::Convergence(failure)) => {
                // The Krylov solver left its best iterate in `step`; try it as
                // a damped direction and let the line search decide. If the
                // residual cannot be reduced, the divergence check above
                // terminates the iteration.
                linear_iterations += failure.iterations;
                debug!(
                    "Linear solve stopped at relative residual {:?}; continuing with the best iterate.",
                    failure.relative_residual
                );
            }
            Err(error) => return Err(error),
        }

        // Backtracking line search on the residual norm.
        let mut alpha = T::one();
        let base: Vec<T> = state[..owned_dofs].to_vec();
        let mut accepted = false;
        for _ in 0..=config.max_line_search_steps {
            for (dof, (value, &reference)) in state[..owned_dofs].iter_mut().zip(base.iter()).enumerate() {
                *value = reference - alpha * step[dof];
            }
            for &dof in assembler.constrained_dofs() {
                if dof < owned_dofs {
                    state[dof] = T::zero();
                }
            }
            dof_map.sync_broadcast(comm, state);
            residual =
                assembler.assemble_residual(mesh, dof_map, registry, constitutive, design, state, external, comm)?;
            let trial_norm = owned_norm(comm, &residual);
            if is_finite(trial_norm) && trial_norm < residual_norm {
                residual_norm = trial_norm;
                accepted = true;
                break;
            }
            alpha *= T::from_f64(0.5).expect("literal must fit in T");
        }
        if !accepted {
            // Leave the shortest trial step in place; the divergence check at
            // the top of the loop decides whether to abort.
            residual_norm = owned_norm(comm, &residual);
        }
        debug!(
            "Newton iteration {}: residual norm {:?} (step scaling {:?}).",
            iteration + 1,
            residual_norm,
            alpha
        );
    }

    if residual_norm <= target {
        return Ok(NewtonOutput {
            iterations: config.max_newton_iterations,
            residual_norm,
            linear_iterations,
        });
    }
    Err(DivergenceError {
        iterations: config.max_newton_iterations,
        residual_norm,
        initial_residual_norm: initial_norm,
    }
    .into())
}
